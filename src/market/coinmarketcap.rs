//! CoinMarketCap API client
//!
//! Thin typed wrapper over the endpoints the service proxies: latest
//! listings, latest quotes by symbol, per-asset metadata, and global
//! market metrics. Quote figures arrive as JSON floats and are converted
//! to Decimal at this boundary.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{Error, Result};

const BASE_URL: &str = "https://pro-api.coinmarketcap.com";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

#[derive(Debug, Deserialize)]
struct CmcResponse<T> {
    status: CmcStatus,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CmcStatus {
    error_code: i64,
    error_message: Option<String>,
}

/// One row of the listings endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub cmc_rank: Option<i64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub quote: HashMap<String, Quote>,
}

/// Market figures in one conversion currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub volume_24h: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub percent_change_24h: Option<f64>,
}

/// One asset from the quotes endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetQuote {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub quote: HashMap<String, Quote>,
}

impl AssetQuote {
    /// Current USD unit price, converted to Decimal.
    pub fn usd_price(&self) -> Option<Decimal> {
        self.quote
            .get("USD")
            .and_then(|q| q.price)
            .and_then(|p| Decimal::try_from(p).ok())
    }
}

/// Metadata from the info endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetInfo {
    pub id: i64,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub date_added: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub urls: HashMap<String, Vec<String>>,
}

/// Market-wide aggregates from the global-metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalMetrics {
    #[serde(default)]
    pub active_cryptocurrencies: Option<i64>,
    #[serde(default)]
    pub total_cryptocurrencies: Option<i64>,
    #[serde(default)]
    pub btc_dominance: Option<f64>,
    #[serde(default)]
    pub eth_dominance: Option<f64>,
    #[serde(default)]
    pub quote: HashMap<String, GlobalQuote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalQuote {
    #[serde(default)]
    pub total_market_cap: Option<f64>,
    #[serde(default)]
    pub total_volume_24h: Option<f64>,
}

/// CoinMarketCap HTTP client
pub struct CoinMarketCap {
    http: Client,
    api_key: String,
    base_url: String,
}

impl CoinMarketCap {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent("cryptofolio/0.1")
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        })
    }

    /// Latest listings sorted by market cap, USD conversion.
    pub async fn listings(&self, limit: u32) -> Result<Vec<Listing>> {
        info!("Fetching top {} listings from CoinMarketCap", limit);

        let url = format!("{}/v1/cryptocurrency/listings/latest", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("limit", limit.to_string()),
                ("convert", "USD".to_string()),
                ("sort", "market_cap".to_string()),
                ("sort_dir", "desc".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Market(format!(
                "CoinMarketCap returned error status: {}",
                response.status()
            )));
        }

        let body: CmcResponse<Vec<Listing>> = response.json().await?;
        check_status(&body.status)?;

        body.data
            .ok_or_else(|| Error::Market("no data returned from CoinMarketCap".to_string()))
    }

    /// Latest quotes for a set of symbols, USD conversion.
    ///
    /// Unknown symbols are simply absent from the result; the endpoint only
    /// fails as a whole.
    pub async fn quotes(&self, symbols: &[String]) -> Result<HashMap<String, AssetQuote>> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }

        let joined = symbols.join(",");
        debug!("Fetching quotes for {} from CoinMarketCap", joined);

        let url = format!("{}/v2/cryptocurrency/quotes/latest", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("symbol", joined.as_str()), ("convert", "USD")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Market(format!(
                "CoinMarketCap returned error status: {}",
                response.status()
            )));
        }

        // v2 keys the payload by symbol, each mapping to the list of assets
        // sharing that symbol; the first entry is the canonical one.
        let body: CmcResponse<HashMap<String, Vec<AssetQuote>>> = response.json().await?;
        check_status(&body.status)?;

        let data = body
            .data
            .ok_or_else(|| Error::Market("no data returned from CoinMarketCap".to_string()))?;

        let quotes = data
            .into_iter()
            .filter_map(|(symbol, mut entries)| {
                if entries.is_empty() {
                    None
                } else {
                    Some((symbol, entries.swap_remove(0)))
                }
            })
            .collect();

        Ok(quotes)
    }

    /// Metadata for one symbol from the info endpoint.
    pub async fn info(&self, symbol: &str) -> Result<AssetInfo> {
        debug!("Fetching info for {} from CoinMarketCap", symbol);

        let url = format!("{}/v2/cryptocurrency/info", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[
                ("symbol", symbol),
                ("aux", "logo,description,urls,tags,date_added"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Market(format!(
                "CoinMarketCap returned error status: {}",
                response.status()
            )));
        }

        // Keyed by symbol like the quotes endpoint; the first entry of the
        // list sharing that symbol is the canonical one.
        let body: CmcResponse<HashMap<String, Vec<AssetInfo>>> = response.json().await?;
        check_status(&body.status)?;

        body.data
            .and_then(|mut data| data.remove(symbol))
            .and_then(|mut entries| {
                if entries.is_empty() {
                    None
                } else {
                    Some(entries.swap_remove(0))
                }
            })
            .ok_or_else(|| Error::not_found(format!("cryptocurrency {}", symbol)))
    }

    /// Global market metrics, USD conversion.
    pub async fn global_metrics(&self) -> Result<GlobalMetrics> {
        debug!("Fetching global metrics from CoinMarketCap");

        let url = format!("{}/v1/global-metrics/quotes/latest", self.base_url);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("convert", "USD")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Market(format!(
                "CoinMarketCap returned error status: {}",
                response.status()
            )));
        }

        let body: CmcResponse<GlobalMetrics> = response.json().await?;
        check_status(&body.status)?;

        body.data
            .ok_or_else(|| Error::Market("no data returned from CoinMarketCap".to_string()))
    }
}

fn check_status(status: &CmcStatus) -> Result<()> {
    if status.error_code != 0 {
        return Err(Error::Market(format!(
            "CoinMarketCap API error {}: {}",
            status.error_code,
            status.error_message.as_deref().unwrap_or("unknown")
        )));
    }
    Ok(())
}
