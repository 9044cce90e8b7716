//! Secondary vendor: Schwab market data REST API with bearer tokens.

use async_trait::async_trait;
use barcache_types::{Bar, StoredGranularity, SymbolCode};
use chrono::{DateTime, Utc};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::{decode_json, ensure_success};
use crate::{
    BarRequest, HttpClient, HttpConfig, RateLimiter, TokenError, Vendor, VendorBars, VendorError,
};

/// Source of bearer tokens for the Schwab API.
///
/// The OAuth authorization flow lives outside barcache; implementations only
/// hand out the current access token and refresh it on demand.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    /// Returns true if a token can be produced without user interaction.
    fn is_configured(&self) -> bool;

    /// Returns the current access token.
    async fn access_token(&self) -> Result<String, TokenError>;

    /// Exchanges the refresh token for a new access token.
    async fn refresh(&self) -> Result<String, TokenError>;
}

/// A fixed access token from configuration. It cannot be refreshed.
#[derive(Debug, Clone)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    /// Creates a provider from an optional configured token.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    fn is_configured(&self) -> bool {
        self.0.is_some()
    }

    async fn access_token(&self) -> Result<String, TokenError> {
        self.0.clone().ok_or(TokenError::Missing)
    }

    async fn refresh(&self) -> Result<String, TokenError> {
        Err(TokenError::RefreshExpired)
    }
}

/// Configuration for the Schwab client.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchwabConfig {
    /// API base URL.
    pub base_url: String,
    /// Static access token, if no external token provider is wired in.
    pub access_token: Option<String>,
    /// Requests allowed per rolling minute.
    pub requests_per_minute: u32,
    /// Maximum symbols per batch; symbols are fetched one request at a time.
    pub max_batch_size: usize,
    /// Cooldown after a 429 before the single retry, in seconds.
    pub rate_limit_cooldown_secs: u64,
}

impl Default for SchwabConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.schwabapi.com".to_string(),
            access_token: None,
            requests_per_minute: 120,
            max_batch_size: 50,
            rate_limit_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PriceHistory {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct Candle {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    /// Open time in epoch milliseconds.
    datetime: i64,
}

impl Candle {
    fn into_bar(self) -> Option<Bar> {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(self.datetime)?;
        Some(Bar::new(
            timestamp, self.open, self.high, self.low, self.close, self.volume,
        ))
    }
}

/// Period/frequency parameters of a price history request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frequency {
    period_type: &'static str,
    frequency_type: &'static str,
    frequency: u32,
}

/// Schwab market data client.
#[derive(Debug, Clone)]
pub struct SchwabClient {
    http: HttpClient,
    config: SchwabConfig,
    limiter: RateLimiter,
    tokens: Arc<dyn TokenProvider>,
}

impl SchwabClient {
    /// Vendor name.
    pub const NAME: &'static str = "schwab";

    /// Creates a client using the configured static access token.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: SchwabConfig, http: HttpConfig) -> Result<Self, reqwest::Error> {
        let tokens = Arc::new(StaticToken::new(config.access_token.clone()));
        Self::with_tokens(config, http, tokens)
    }

    /// Creates a client with an external token provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_tokens(
        config: SchwabConfig,
        http: HttpConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self, reqwest::Error> {
        let limiter = RateLimiter::new(config.requests_per_minute);
        Ok(Self {
            http: HttpClient::new(http)?,
            config,
            limiter,
            tokens,
        })
    }

    /// Maps a granularity onto period/frequency parameters.
    const fn frequency(granularity: StoredGranularity) -> Option<Frequency> {
        let (period_type, frequency_type, frequency) = match granularity {
            StoredGranularity::Minute1 => ("day", "minute", 1),
            StoredGranularity::Minute5 => ("day", "minute", 5),
            StoredGranularity::Minute15 => ("day", "minute", 15),
            StoredGranularity::Minute30 => ("day", "minute", 30),
            StoredGranularity::Hour1 => return None,
            StoredGranularity::Day1 => ("year", "daily", 1),
            StoredGranularity::Week1 => ("year", "weekly", 1),
            StoredGranularity::Month1 => ("year", "monthly", 1),
        };
        Some(Frequency {
            period_type,
            frequency_type,
            frequency,
        })
    }

    const fn cooldown(&self) -> Duration {
        Duration::from_secs(self.config.rate_limit_cooldown_secs)
    }

    async fn send_with_token(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &str,
    ) -> Result<Response, VendorError> {
        self.http
            .send_throttled(Self::NAME, &self.limiter, self.cooldown(), |client| {
                client.get(url).bearer_auth(token).query(query)
            })
            .await
    }

    /// Issues an authorized GET, refreshing the token once on a 401.
    async fn authorized_get(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Response, VendorError> {
        let token = self.tokens.access_token().await?;
        let response = self.send_with_token(url, query, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!(vendor = Self::NAME, "access token rejected, refreshing");
        let token = self.tokens.refresh().await.inspect_err(|e| {
            warn!(vendor = Self::NAME, error = %e, "token refresh failed");
        })?;
        let response = self.send_with_token(url, query, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(VendorError::Unauthorized(
                "token rejected after refresh".to_string(),
            ));
        }
        Ok(response)
    }

    async fn fetch_symbol(
        &self,
        symbol: &SymbolCode,
        frequency: Frequency,
        request: &BarRequest,
    ) -> Result<Vec<Bar>, VendorError> {
        let vendor_symbol = symbol.with_class_separator('/');
        let url = format!("{}/marketdata/v1/pricehistory", self.config.base_url);
        let query = [
            ("symbol", vendor_symbol.clone()),
            ("periodType", frequency.period_type.to_string()),
            ("frequencyType", frequency.frequency_type.to_string()),
            ("frequency", frequency.frequency.to_string()),
            (
                "startDate",
                request.window.start.timestamp_millis().to_string(),
            ),
            ("endDate", request.window.end.timestamp_millis().to_string()),
            ("needExtendedHoursData", "true".to_string()),
        ];

        let response = ensure_success(self.authorized_get(&url, &query).await?).await?;
        let history: PriceHistory = decode_json(response).await?;

        if let Some(returned) = history.symbol
            && returned != vendor_symbol
        {
            return Err(VendorError::UnexpectedSymbol(returned));
        }

        Ok(history
            .candles
            .into_iter()
            .filter_map(Candle::into_bar)
            .collect())
    }
}

#[async_trait]
impl Vendor for SchwabClient {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    fn is_available(&self) -> bool {
        self.tokens.is_configured()
    }

    async fn fetch_bars(&self, request: &BarRequest) -> Result<VendorBars, VendorError> {
        let frequency = Self::frequency(request.granularity)
            .ok_or(VendorError::Unsupported(request.granularity))?;

        let mut out = VendorBars::new();
        for symbol in &request.symbols {
            let bars = self.fetch_symbol(symbol, frequency, request).await?;
            if !bars.is_empty() {
                out.insert(symbol.clone(), bars);
            }
        }

        debug!(
            vendor = Self::NAME,
            granularity = %request.granularity,
            symbols = request.symbols.len(),
            returned = out.len(),
            "fetched bars"
        );
        Ok(out)
    }

    async fn validate_symbol(&self, symbol: &SymbolCode) -> Result<bool, VendorError> {
        let vendor_symbol = symbol.with_class_separator('/');
        let url = format!("{}/marketdata/v1/quotes", self.config.base_url);
        let query = [("symbols", vendor_symbol.clone())];

        let response = self.authorized_get(&url, &query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let quotes: HashMap<String, serde_json::Value> =
            decode_json(ensure_success(response).await?).await?;
        Ok(quotes.contains_key(&vendor_symbol))
    }
}
