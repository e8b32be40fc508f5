use crate::errors::{PricerError, PricerResult};
use crate::models::pipeline::OptionQuote;
use crate::models::OptionKind;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;

/// Option-chain client for the Yahoo Finance v7 `options` endpoint.
/// All methods return Result, never panic.
#[derive(Clone)]
pub struct MarketDataClient {
    client: Client,
    base_url: String,
}

/// One expiry's chain as quoted right now.
#[derive(Debug, Clone)]
pub struct OptionChain {
    pub spot: f64,
    pub expiry: NaiveDate,
    pub calls: Vec<OptionQuote>,
    pub puts: Vec<OptionQuote>,
}

impl MarketDataClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
                .pool_max_idle_per_host(4)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_chain_data(&self, path: &str) -> PricerResult<ChainData> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PricerError::MarketData(format!("HTTP {status}: {body}")));
        }

        let body: OptionsResponse = resp
            .json()
            .await
            .map_err(|e| PricerError::Parse(format!("GET {path}: {e}")))?;
        first_result(body)
    }

    /// Latest spot (rounded to cents) and the listed expirations.
    pub async fn get_spot_and_expirations(
        &self,
        ticker: &str,
    ) -> PricerResult<(f64, Vec<NaiveDate>)> {
        let data = self.get_chain_data(&format!("/options/{ticker}")).await?;
        Ok((spot_of(&data)?, expirations_of(&data)))
    }

    pub async fn get_option_chain(
        &self,
        ticker: &str,
        expiry: NaiveDate,
    ) -> PricerResult<OptionChain> {
        let ts = expiry
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .ok_or_else(|| PricerError::InvalidInput(format!("bad expiry {expiry}")))?;
        let data = self.get_chain_data(&format!("/options/{ticker}?date={ts}")).await?;
        chain_from_data(data, expiry)
    }
}

fn first_result(body: OptionsResponse) -> PricerResult<ChainData> {
    body.option_chain
        .result
        .into_iter()
        .next()
        .ok_or_else(|| PricerError::MarketData("no option chain in response".into()))
}

fn spot_of(data: &ChainData) -> PricerResult<f64> {
    match data.quote.regular_market_price {
        Some(p) if p.is_finite() && p > 0.0 => Ok((p * 100.0).round() / 100.0),
        other => Err(PricerError::MarketData(format!("invalid spot price: {other:?}"))),
    }
}

fn expirations_of(data: &ChainData) -> Vec<NaiveDate> {
    data.expiration_dates
        .iter()
        .filter_map(|&ts| DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()))
        .collect()
}

fn chain_from_data(data: ChainData, expiry: NaiveDate) -> PricerResult<OptionChain> {
    let spot = spot_of(&data)?;
    let (calls, puts) = match data.options.into_iter().next() {
        Some(o) => (
            o.calls.iter().map(|r| r.to_quote(OptionKind::Call)).collect(),
            o.puts.iter().map(|r| r.to_quote(OptionKind::Put)).collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    Ok(OptionChain { spot, expiry, calls, puts })
}

// Response shape (abridged):
// {
//   "optionChain": {
//     "result": [{
//       "expirationDates": [1760659200, ...],
//       "quote": { "regularMarketPrice": 247.45 },
//       "options": [{ "calls": [{ "strike": 200.0, "lastPrice": 48.1,
//                                 "impliedVolatility": 0.61 }, ...],
//                     "puts": [...] }]
//     }]
//   }
// }

#[derive(serde::Deserialize)]
struct OptionsResponse {
    #[serde(rename = "optionChain")]
    option_chain: OptionChainResult,
}

#[derive(serde::Deserialize)]
struct OptionChainResult {
    result: Vec<ChainData>,
}

#[derive(serde::Deserialize)]
struct ChainData {
    #[serde(rename = "expirationDates", default)]
    expiration_dates: Vec<i64>,
    quote: QuoteData,
    #[serde(default)]
    options: Vec<ChainOptions>,
}

#[derive(serde::Deserialize)]
struct QuoteData {
    #[serde(rename = "regularMarketPrice")]
    regular_market_price: Option<f64>,
}

#[derive(serde::Deserialize)]
struct ChainOptions {
    #[serde(default)]
    calls: Vec<ContractData>,
    #[serde(default)]
    puts: Vec<ContractData>,
}

#[derive(serde::Deserialize)]
struct ContractData {
    strike: Option<f64>,
    #[serde(rename = "lastPrice")]
    last_price: Option<f64>,
    #[serde(rename = "impliedVolatility")]
    implied_volatility: Option<f64>,
}

impl ContractData {
    fn to_quote(&self, kind: OptionKind) -> OptionQuote {
        OptionQuote {
            strike: self.strike.filter(|v| v.is_finite()),
            market_price: self.last_price.filter(|v| v.is_finite()),
            market_iv: self.implied_volatility.filter(|v| v.is_finite()),
            kind,
        }
    }
}
