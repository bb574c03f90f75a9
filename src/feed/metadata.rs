//! Token metadata resolver with caching, rate limiting and retries.
//!
//! Used to backfill display names, symbols and images for tokens first seen
//! without them.

use crate::feed::types::FeedConfig;
use crate::types::{Pubkey, TokenMetadata};
use anyhow::{anyhow, Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use moka::future::Cache;
use reqwest::Client;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_retry::{strategy::ExponentialBackoff, Retry};
use tracing::{debug, instrument};

/// Response body of the metadata endpoint.
#[derive(Debug, Deserialize)]
struct MetadataResponse {
    mint: Pubkey,
    mpl: MplMetadata,
}

#[derive(Debug, Deserialize)]
struct MplMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    ipfs_metadata: Option<IpfsMetadata>,
}

#[derive(Debug, Deserialize)]
struct IpfsMetadata {
    image: Option<String>,
}

impl From<MetadataResponse> for TokenMetadata {
    fn from(response: MetadataResponse) -> Self {
        let image = response
            .mpl
            .ipfs_metadata
            .and_then(|ipfs| ipfs.image)
            .and_then(|url| normalize_image_url(&url));

        TokenMetadata {
            pubkey: response.mint,
            name: response.mpl.name.trim().to_string(),
            symbol: response.mpl.symbol.trim().to_string(),
            image,
        }
    }
}

/// Only https images are kept; the cf-ipfs gateway is swapped for ipfs.io.
pub fn normalize_image_url(url: &str) -> Option<String> {
    let url = url.trim();
    url.starts_with("https://")
        .then(|| url.replace("cf-ipfs.com", "ipfs.io"))
}

/// Resolves display metadata for a pubkey.
pub struct MetadataResolver {
    http_client: Client,
    endpoint: String,
    cache: Cache<Pubkey, TokenMetadata>,
    limiter: DefaultDirectRateLimiter,
    retry_attempts: usize,
}

impl MetadataResolver {
    /// Create a resolver for `endpoint` using the cache, rate and retry settings of `config`.
    pub fn new(endpoint: impl Into<String>, config: &FeedConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.metadata_timeout_seconds))
            .build()
            .context("Failed to build metadata HTTP client")?;

        let cache = Cache::builder()
            .max_capacity(config.max_metadata_cache_entries)
            .time_to_live(Duration::from_secs(config.metadata_cache_ttl_seconds))
            .build();

        let quota = Quota::per_second(
            NonZeroU32::new(config.metadata_requests_per_second).unwrap_or(NonZeroU32::MIN),
        );

        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            cache,
            limiter: RateLimiter::direct(quota),
            retry_attempts: config.metadata_retry_attempts,
        })
    }

    /// Resolve metadata, serving from cache when possible.
    #[instrument(skip(self))]
    pub async fn resolve(&self, pubkey: &str) -> Result<TokenMetadata> {
        if let Some(cached) = self.cache.get(pubkey).await {
            debug!("Metadata cache hit for {}", pubkey);
            return Ok(cached);
        }

        self.limiter.until_ready().await;

        let retry_strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);

        let metadata = Retry::spawn(retry_strategy, || self.fetch(pubkey)).await?;
        self.cache.insert(pubkey.to_string(), metadata.clone()).await;
        Ok(metadata)
    }

    /// Number of cached entries after pending cache maintenance has run.
    pub async fn cached_entries(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn fetch(&self, pubkey: &str) -> Result<TokenMetadata> {
        let response = self
            .http_client
            .get(&self.endpoint)
            .query(&[("mint", pubkey)])
            .send()
            .await
            .context("Failed to fetch token metadata")?;

        if !response.status().is_success() {
            return Err(anyhow!("Metadata request for {} failed: {}", pubkey, response.status()));
        }

        let body: MetadataResponse = response
            .json()
            .await
            .context("Failed to parse token metadata")?;

        let metadata = TokenMetadata::from(body);
        if metadata.pubkey != pubkey {
            return Err(anyhow!(
                "Metadata response for {} describes {}",
                pubkey,
                metadata.pubkey
            ));
        }

        debug!("Fetched metadata for {}: {}", pubkey, metadata.symbol);
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_urls_are_normalized() {
        assert_eq!(
            normalize_image_url("https://cf-ipfs.com/ipfs/Qm123"),
            Some("https://ipfs.io/ipfs/Qm123".to_string())
        );
        assert_eq!(
            normalize_image_url("https://arweave.net/abc"),
            Some("https://arweave.net/abc".to_string())
        );
        assert_eq!(normalize_image_url("http://insecure.example/img.png"), None);
        assert_eq!(normalize_image_url("ipfs://Qm123"), None);
    }

    #[test]
    fn test_response_maps_to_token_metadata() {
        let body = r#"{
            "mint": "Mint111",
            "mpl": {
                "name": " Radar Token ",
                "symbol": "RDR",
                "ipfs_metadata": { "image": "https://cf-ipfs.com/ipfs/QmImage" }
            }
        }"#;
        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        let metadata = TokenMetadata::from(response);

        assert_eq!(metadata.pubkey, "Mint111");
        assert_eq!(metadata.name, "Radar Token");
        assert_eq!(metadata.symbol, "RDR");
        assert_eq!(metadata.image.as_deref(), Some("https://ipfs.io/ipfs/QmImage"));
    }

    #[test]
    fn test_response_without_ipfs_metadata() {
        let body = r#"{ "mint": "Mint222", "mpl": { "symbol": "NOIMG" } }"#;
        let response: MetadataResponse = serde_json::from_str(body).unwrap();
        let metadata = TokenMetadata::from(response);

        assert_eq!(metadata.name, "");
        assert_eq!(metadata.symbol, "NOIMG");
        assert_eq!(metadata.image, None);
    }
}
