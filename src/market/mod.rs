// Market data module - CoinMarketCap proxy with TTL caching

pub mod cache;
pub mod coinmarketcap;

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::portfolio::valuation::{valuate, PortfolioReport};
use crate::portfolio::Portfolio;
pub use cache::TtlCache;
pub use coinmarketcap::{AssetInfo, AssetQuote, CoinMarketCap, GlobalMetrics, Listing, Quote};

/// How many listings the search filter runs over.
const SEARCH_UNIVERSE_LIMIT: u32 = 500;

/// Metadata plus the live quote figures for one asset, as served by the
/// detail endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct AssetDetail {
    #[serde(flatten)]
    pub info: AssetInfo,
    pub quote: HashMap<String, Quote>,
}

/// Supplier of current unit prices per symbol.
///
/// May return fewer symbols than requested; missing symbols are valued at
/// zero downstream. Errors mean total failure, not an unknown symbol.
pub trait PriceFeed {
    fn current_prices(
        &self,
        symbols: &[String],
    ) -> impl std::future::Future<Output = Result<HashMap<String, Decimal>>> + Send;
}

/// CoinMarketCap-backed market data with read-through TTL caches.
///
/// Constructed once and owned by the server state; there is no global
/// instance.
pub struct MarketData {
    client: CoinMarketCap,
    listings_cache: TtlCache<Vec<Listing>>,
    quotes_cache: TtlCache<HashMap<String, AssetQuote>>,
    detail_cache: TtlCache<AssetDetail>,
    global_cache: TtlCache<GlobalMetrics>,
}

impl MarketData {
    pub fn new(client: CoinMarketCap, cache_ttl_secs: i64) -> Self {
        Self {
            client,
            listings_cache: TtlCache::new(cache_ttl_secs),
            quotes_cache: TtlCache::new(cache_ttl_secs),
            detail_cache: TtlCache::new(cache_ttl_secs),
            global_cache: TtlCache::new(cache_ttl_secs),
        }
    }

    /// Latest listings, served from cache when fresh.
    pub async fn listings(&self, limit: u32) -> Result<Vec<Listing>> {
        let key = format!("listings:{}", limit);
        if let Some(cached) = self.listings_cache.get(&key) {
            return Ok(cached);
        }

        let listings = self.client.listings(limit).await?;
        self.listings_cache.insert(key, listings.clone());
        Ok(listings)
    }

    /// Latest quotes for a set of symbols, served from cache when fresh.
    pub async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, AssetQuote>> {
        let normalized = normalize_symbols(symbols);
        if normalized.is_empty() {
            return Ok(HashMap::new());
        }

        let key = format!("quotes:{}", normalized.join(","));
        if let Some(cached) = self.quotes_cache.get(&key) {
            return Ok(cached);
        }

        let quotes = self.client.quotes(&normalized).await?;
        self.quotes_cache.insert(key, quotes.clone());
        Ok(quotes)
    }

    /// Metadata combined with the current quote for one asset.
    pub async fn asset_detail(&self, symbol: &str) -> Result<AssetDetail> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(Error::validation("missing field: symbol"));
        }

        let key = format!("detail:{}", symbol);
        if let Some(cached) = self.detail_cache.get(&key) {
            return Ok(cached);
        }

        let info = self.client.info(&symbol).await?;
        let quote = self
            .quotes(std::slice::from_ref(&symbol))
            .await?
            .remove(&symbol)
            .map(|asset| asset.quote)
            .unwrap_or_default();

        let detail = AssetDetail { info, quote };
        self.detail_cache.insert(key, detail.clone());
        Ok(detail)
    }

    /// Case-insensitive name/symbol search over the cached listings.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<Listing>> {
        let listings = self.listings(SEARCH_UNIVERSE_LIMIT).await?;
        Ok(filter_listings(listings, query, limit))
    }

    /// Global market metrics, served from cache when fresh.
    pub async fn global(&self) -> Result<GlobalMetrics> {
        let key = "global".to_string();
        if let Some(cached) = self.global_cache.get(&key) {
            return Ok(cached);
        }

        let metrics = self.client.global_metrics().await?;
        self.global_cache.insert(key, metrics.clone());
        Ok(metrics)
    }

    /// Drop all cached market responses. Returns the number of entries
    /// removed.
    pub fn clear_cache(&self) -> usize {
        let cleared = self.listings_cache.clear()
            + self.quotes_cache.clear()
            + self.detail_cache.clear()
            + self.global_cache.clear();
        info!("Market cache cleared ({} entries)", cleared);
        cleared
    }

    pub fn cache_entries(&self) -> usize {
        self.listings_cache.len()
            + self.quotes_cache.len()
            + self.detail_cache.len()
            + self.global_cache.len()
    }
}

impl PriceFeed for MarketData {
    async fn current_prices(&self, symbols: &[String]) -> Result<HashMap<String, Decimal>> {
        let quotes = self.quotes(symbols).await?;
        Ok(quotes
            .into_iter()
            .filter_map(|(symbol, quote)| quote.usd_price().map(|p| (symbol, p)))
            .collect())
    }
}

fn filter_listings(listings: Vec<Listing>, query: &str, limit: usize) -> Vec<Listing> {
    let needle = query.trim().to_lowercase();
    listings
        .into_iter()
        .filter(|listing| {
            listing.name.to_lowercase().contains(&needle)
                || listing.symbol.to_lowercase().contains(&needle)
        })
        .take(limit)
        .collect()
}

/// Uppercase, dedupe, and sort symbols so equivalent requests share a
/// cache key.
fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    let mut normalized: Vec<String> = symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    normalized.sort();
    normalized.dedup();
    normalized
}

/// Value a portfolio against live prices.
///
/// Price feeds are best-effort: on total feed failure the report is
/// computed against an empty price map (all market values zero) instead of
/// failing the read.
pub async fn portfolio_report(portfolio: &Portfolio, feed: &impl PriceFeed) -> PortfolioReport {
    let symbols = portfolio.symbols();
    let prices = match feed.current_prices(&symbols).await {
        Ok(prices) => prices,
        Err(e) => {
            warn!("Price feed unavailable, valuing against empty prices: {}", e);
            HashMap::new()
        }
    };
    valuate(portfolio, &prices)
}
