//! Filter/sort pipeline - a pure function from store contents to an ordered view.

use crate::feed::lists::UserLists;
use crate::feed::types::{FilterParams, RankingPolicy};
use crate::types::TokenMarketData;

/// Default number of tokens in a view.
pub const DEFAULT_VIEW_LIMIT: usize = 20;

/// Compute the ordered view for the given filters.
///
/// Tokens are kept when they fall in the market-cap bucket, pass the watchlist-only
/// and hidden-only membership tests, and receive a rank from `policy`. The result is
/// ordered by rank (highest first), ties broken by pubkey, and truncated to `limit`.
/// Identical inputs always produce identical output.
pub fn filter_and_sort<'a, I>(
    tokens: I,
    params: &FilterParams,
    lists: &UserLists,
    policy: RankingPolicy,
    limit: usize,
) -> Vec<TokenMarketData>
where
    I: IntoIterator<Item = &'a TokenMarketData>,
{
    let mut ranked: Vec<(f64, &TokenMarketData)> = tokens
        .into_iter()
        .filter(|token| params.market_cap.contains(token.market_cap))
        .filter(|token| !params.watchlist_only || lists.is_watchlisted(&token.pubkey))
        .filter(|token| !params.hidden_only || lists.is_hidden(&token.pubkey))
        .filter_map(|token| policy.rank(token, params.volume).map(|rank| (rank, token)))
        .collect();

    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_b
            .total_cmp(rank_a)
            .then_with(|| a.pubkey.cmp(&b.pubkey))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(_, token)| token.clone())
        .collect()
}
