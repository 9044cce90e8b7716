//! Primary vendor: Alpaca market data REST API.

use async_trait::async_trait;
use barcache_types::{Bar, StoredGranularity, SymbolCode};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::client::{decode_json, ensure_success};
use crate::{BarRequest, HttpClient, HttpConfig, RateLimiter, Vendor, VendorBars, VendorError};

/// Configuration for the Alpaca client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlpacaConfig {
    /// Market data base URL.
    pub data_url: String,
    /// Trading API base URL, used for asset lookups.
    pub trading_url: String,
    /// API key id.
    pub key_id: Option<String>,
    /// API secret key.
    pub secret_key: Option<String>,
    /// Data feed (`iex` or `sip`).
    pub feed: String,
    /// Requests allowed per rolling minute.
    pub requests_per_minute: u32,
    /// Maximum symbols per bars request.
    pub max_batch_size: usize,
    /// Cooldown after a 429 before the single retry, in seconds.
    pub rate_limit_cooldown_secs: u64,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            data_url: "https://data.alpaca.markets".to_string(),
            trading_url: "https://paper-api.alpaca.markets".to_string(),
            key_id: None,
            secret_key: None,
            feed: "iex".to_string(),
            requests_per_minute: 200,
            max_batch_size: 100,
            rate_limit_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<HashMap<String, Vec<AlpacaBar>>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    n: Option<u64>,
    #[serde(default)]
    vw: Option<f64>,
}

impl From<AlpacaBar> for Bar {
    fn from(raw: AlpacaBar) -> Self {
        Self {
            timestamp: raw.t,
            open: raw.o,
            high: raw.h,
            low: raw.l,
            close: raw.c,
            volume: raw.v,
            vwap: raw.vw,
            trade_count: raw.n,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Asset {
    #[serde(default)]
    status: String,
    #[serde(default)]
    tradable: bool,
}

/// Alpaca market data client.
#[derive(Debug, Clone)]
pub struct AlpacaClient {
    http: HttpClient,
    config: AlpacaConfig,
    limiter: RateLimiter,
}

impl AlpacaClient {
    /// Vendor name.
    pub const NAME: &'static str = "alpaca";

    /// Maximum bars per page.
    const PAGE_LIMIT: u32 = 10_000;

    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: AlpacaConfig, http: HttpConfig) -> Result<Self, reqwest::Error> {
        let limiter = RateLimiter::new(config.requests_per_minute);
        Ok(Self {
            http: HttpClient::new(http)?,
            config,
            limiter,
        })
    }

    /// Returns the client configuration.
    #[must_use]
    pub const fn config(&self) -> &AlpacaConfig {
        &self.config
    }

    /// Returns the vendor's timeframe parameter for a granularity.
    #[must_use]
    pub const fn timeframe(granularity: StoredGranularity) -> &'static str {
        match granularity {
            StoredGranularity::Minute1 => "1Min",
            StoredGranularity::Minute5 => "5Min",
            StoredGranularity::Minute15 => "15Min",
            StoredGranularity::Minute30 => "30Min",
            StoredGranularity::Hour1 => "1Hour",
            StoredGranularity::Day1 => "1Day",
            StoredGranularity::Week1 => "1Week",
            StoredGranularity::Month1 => "1Month",
        }
    }

    fn credentials(&self) -> Result<(&str, &str), VendorError> {
        match (&self.config.key_id, &self.config.secret_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok((key.as_str(), secret.as_str()))
            }
            _ => Err(VendorError::Unavailable),
        }
    }

    const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.rate_limit_cooldown_secs)
    }

    async fn fetch_page(
        &self,
        query: &[(&str, String)],
        page_token: Option<&str>,
    ) -> Result<BarsPage, VendorError> {
        let (key, secret) = self.credentials()?;
        let url = format!("{}/v2/stocks/bars", self.config.data_url);

        let response = self
            .http
            .send_throttled(Self::NAME, &self.limiter, self.cooldown(), |client| {
                let mut request = client
                    .get(&url)
                    .header("APCA-API-KEY-ID", key)
                    .header("APCA-API-SECRET-KEY", secret)
                    .query(query);
                if let Some(token) = page_token {
                    request = request.query(&[("page_token", token)]);
                }
                request
            })
            .await?;

        decode_json(ensure_success(response).await?).await
    }
}

#[async_trait]
impl Vendor for AlpacaClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn is_available(&self) -> bool {
        self.credentials().is_ok()
    }

    async fn fetch_bars(&self, request: &BarRequest) -> Result<VendorBars, VendorError> {
        if request.symbols.len() > self.config.max_batch_size {
            return Err(VendorError::BatchTooLarge {
                requested: request.symbols.len(),
                max: self.config.max_batch_size,
            });
        }

        let requested: HashMap<String, &SymbolCode> = request
            .symbols
            .iter()
            .map(|s| (s.with_class_separator('.'), s))
            .collect();
        let symbols = request
            .symbols
            .iter()
            .map(|s| s.with_class_separator('.'))
            .collect::<Vec<_>>()
            .join(",");

        let query = [
            ("symbols", symbols),
            (
                "timeframe",
                Self::timeframe(request.granularity).to_string(),
            ),
            (
                "start",
                request
                    .window
                    .start
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            (
                "end",
                request.window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            ),
            ("limit", Self::PAGE_LIMIT.to_string()),
            ("feed", self.config.feed.clone()),
        ];

        let mut out = VendorBars::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let page = self.fetch_page(&query, page_token.as_deref()).await?;
            pages += 1;

            for (key, bars) in page.bars.unwrap_or_default() {
                let symbol = requested
                    .get(&key)
                    .ok_or_else(|| VendorError::UnexpectedSymbol(key.clone()))?;
                out.entry((*symbol).clone())
                    .or_default()
                    .extend(bars.into_iter().map(Bar::from));
            }

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        debug!(
            vendor = Self::NAME,
            granularity = %request.granularity,
            symbols = request.symbols.len(),
            pages,
            "fetched bars"
        );
        Ok(out)
    }

    async fn validate_symbol(&self, symbol: &SymbolCode) -> Result<bool, VendorError> {
        let (key, secret) = self.credentials()?;
        let url = format!(
            "{}/v2/assets/{}",
            self.config.trading_url,
            symbol.with_class_separator('.')
        );

        let response = self
            .http
            .send_throttled(Self::NAME, &self.limiter, self.cooldown(), |client| {
                client
                    .get(&url)
                    .header("APCA-API-KEY-ID", key)
                    .header("APCA-API-SECRET-KEY", secret)
            })
            .await?;

        if matches!(
            response.status(),
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            return Ok(false);
        }
        let asset: Asset = decode_json(ensure_success(response).await?).await?;
        Ok(asset.tradable || asset.status == "active")
    }
}
