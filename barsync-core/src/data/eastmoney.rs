//! Eastmoney kline provider.
//!
//! Fetches bars from the public `api/qt/stock/kline/get` endpoint. Each bar
//! arrives as a comma-joined string:
//!
//! `date,open,close,high,low,volume,amount,amplitude,pct_chg,chg,turnover_rate`
//!
//! The instrument universe comes from the `api/qt/clist/get` board listing,
//! paged and filtered by board (`fs`) per market kind.
//!
//! The endpoints have no official documentation and throttle aggressively;
//! a 403 means the client is banned for a while, so it trips the breaker.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{FetchError, FetchRequest, SourceAdapter};
use crate::config::{ConfigError, SourceConfig};
use crate::domain::{
    parse_number, parse_time, AdjustmentType, Exchange, Instrument, MarketKind, Period, Record,
};
use reqwest::blocking::Response;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const KLINE_PATH: &str = "/api/qt/stock/kline/get";
const CLIST_PATH: &str = "/api/qt/clist/get";
const LIST_PAGE_SIZE: usize = 100;
const MAX_LIST_PAGES: u32 = 200;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClistResponse {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    total: usize,
    #[serde(default)]
    diff: Vec<ClistItem>,
}

#[derive(Debug, Deserialize)]
struct ClistItem {
    #[serde(rename = "f12")]
    code: String,
    #[serde(rename = "f13")]
    market: u8,
}

pub struct EastmoneySource {
    client: reqwest::blocking::Client,
    base_url: String,
    list_base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl EastmoneySource {
    pub fn new(config: &SourceConfig, breaker: Arc<CircuitBreaker>) -> Result<Self, ConfigError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            list_base_url: config.list_base_url.trim_end_matches('/').to_string(),
            breaker,
        })
    }

    /// Market id of the `secid` parameter: 1 for Shanghai, 0 otherwise.
    fn market_id(instrument: &Instrument) -> u8 {
        match instrument.exchange() {
            Some(Exchange::Shanghai) => 1,
            Some(Exchange::Shenzhen) | Some(Exchange::Beijing) => 0,
            // Bare codes: Shanghai funds/REITs (5xxxxx) and treasury bonds (01xxxx).
            None => {
                let symbol = instrument.symbol();
                if symbol.starts_with('5') || symbol.starts_with("01") {
                    1
                } else {
                    0
                }
            }
        }
    }

    fn klt(period: Period) -> u32 {
        match period {
            Period::Min5 => 5,
            Period::Min15 => 15,
            Period::Min30 => 30,
            Period::Min60 => 60,
            Period::Day => 101,
            Period::Week => 102,
            Period::Month => 103,
        }
    }

    fn fqt(adjustment: AdjustmentType) -> u32 {
        match adjustment {
            AdjustmentType::Unadjusted => 0,
            AdjustmentType::Forward => 1,
            AdjustmentType::Backward => 2,
        }
    }

    /// Board filter of the listing endpoint. Treasury bonds have no board.
    fn board_filter(kind: MarketKind) -> Option<&'static str> {
        match kind {
            MarketKind::Equity => Some("m:0+t:6,m:0+t:80,m:1+t:2,m:1+t:23,m:0+t:81+s:2048"),
            MarketKind::Index => Some("m:1+s:2,m:0+t:5"),
            MarketKind::Fund => Some("b:MK0021,b:MK0022,b:MK0023,b:MK0024,m:1+t:9+e:97,m:0+t:10+e:97"),
            MarketKind::Bond => None,
        }
    }

    fn kline_url(&self, request: &FetchRequest) -> String {
        format!(
            "{base}{KLINE_PATH}?secid={market}.{symbol}&klt={klt}&fqt={fqt}\
             &beg={beg}&end={end}\
             &fields1=f1,f2,f3,f4,f5,f6\
             &fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61",
            base = self.base_url,
            market = Self::market_id(&request.instrument),
            symbol = request.instrument.symbol(),
            klt = Self::klt(request.period),
            fqt = Self::fqt(request.adjustment),
            beg = request.range.start.format("%Y%m%d"),
            end = request.range.end.format("%Y%m%d"),
        )
    }

    fn clist_url(&self, board: &str, page: u32) -> Result<String, FetchError> {
        let page = page.to_string();
        let size = LIST_PAGE_SIZE.to_string();
        let url = reqwest::Url::parse_with_params(
            &format!("{}{CLIST_PATH}", self.list_base_url),
            [
                ("pn", page.as_str()),
                ("pz", size.as_str()),
                ("po", "1"),
                ("np", "1"),
                ("fltt", "2"),
                ("invt", "2"),
                ("fid", "f12"),
                ("fs", board),
                ("fields", "f12,f13,f14"),
            ],
        )
        .map_err(|e| FetchError::Rejected(format!("bad listing url: {e}")))?;
        Ok(url.into())
    }

    /// Send a GET and classify everything but a 2xx. `series` keys the
    /// breaker's failure streak.
    fn send(&self, url: &str, series: &str) -> Result<Response, FetchError> {
        if !self.breaker.is_allowed() {
            let remaining = self.breaker.remaining_cooldown().as_secs();
            tracing::warn!(remaining_secs = remaining, series, "provider cooling down, refusing request");
            return Err(FetchError::CoolingDown {
                retry_after_secs: remaining,
            });
        }

        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_builder() {
                return FetchError::Rejected(e.to_string());
            }
            self.breaker.record_failure(series);
            if e.is_timeout() {
                FetchError::Timeout(e.to_string())
            } else {
                FetchError::Transport(e.to_string())
            }
        })?;
        let status = resp.status();

        if status == StatusCode::FORBIDDEN {
            self.breaker.trip();
            return Err(FetchError::Blocked);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.breaker.record_failure(series);
            let retry_after_secs = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(FetchError::RateLimited { retry_after_secs });
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(FetchError::AuthenticationFailed(format!("HTTP 401 for {series}")));
        }
        if status.is_server_error() {
            self.breaker.record_failure(series);
            return Err(FetchError::UpstreamUnavailable {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Rejected(format!("HTTP {status} for {series}")));
        }
        Ok(resp)
    }

    fn list_page(&self, board: &str, page: u32) -> Result<Option<ClistData>, FetchError> {
        let series = format!("listing {board}");
        let resp = self.send(&self.clist_url(board, page)?, &series)?;
        let body: ClistResponse = resp.json().map_err(|e| {
            self.breaker.record_failure(&series);
            FetchError::MalformedPayload(format!("undecodable listing page {page}: {e}"))
        })?;
        self.breaker.record_success();
        Ok(body.data)
    }
}

/// Parse one kline string.
fn parse_kline(line: &str) -> Result<Record, FetchError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < 7 {
        return Err(FetchError::MalformedPayload(format!(
            "kline has {} fields: '{line}'",
            fields.len()
        )));
    }
    // Eastmoney marks missing values with '-'.
    let cell = |i: usize| match fields.get(i).copied() {
        Some("-") | None => "",
        Some(v) => v,
    };
    let malformed = |e: crate::domain::RecordError| FetchError::MalformedPayload(format!("{e} in '{line}'"));

    Ok(Record {
        time: parse_time(cell(0)).map_err(malformed)?,
        open: parse_number("open", cell(1)).map_err(malformed)?,
        close: parse_number("close", cell(2)).map_err(malformed)?,
        high: parse_number("high", cell(3)).map_err(malformed)?,
        low: parse_number("low", cell(4)).map_err(malformed)?,
        volume: parse_number("volume", cell(5)).map_err(malformed)?,
        turnover: parse_number("turnover", cell(6)).map_err(malformed)?,
        turnover_rate: parse_number("turnover_rate", cell(10)).map_err(malformed)?,
    })
}

fn parse_response(code: &str, response: KlineResponse) -> Result<Vec<Record>, FetchError> {
    let data = response.data.ok_or_else(|| FetchError::UnknownInstrument {
        code: code.to_string(),
    })?;
    data.klines.iter().map(|line| parse_kline(line)).collect()
}

/// Instrument of a listing row, normalized the way user input is. Market 1
/// is Shanghai; market 0 covers Shenzhen and Beijing.
fn listed_instrument(item: &ClistItem) -> Option<Instrument> {
    let bare = Instrument::parse(&item.code).ok()?;
    let consistent = match (bare.exchange(), item.market) {
        (None, _) => true,
        (Some(Exchange::Shanghai), market) => market == 1,
        (Some(_), market) => market == 0,
    };
    if consistent {
        return Some(bare);
    }
    let prefix = if item.market == 1 { "sh" } else { "sz" };
    Instrument::parse(&format!("{prefix}.{}", item.code)).ok()
}

impl SourceAdapter for EastmoneySource {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Record>, FetchError> {
        let series = request.series();
        let resp = self.send(&self.kline_url(request), &series)?;
        let body: KlineResponse = resp.json().map_err(|e| {
            self.breaker.record_failure(&series);
            FetchError::MalformedPayload(format!("undecodable response for {series}: {e}"))
        })?;
        let records = parse_response(request.instrument.code(), body)?;
        self.breaker.record_success();
        Ok(records)
    }

    fn list_instruments(&self, kinds: &[MarketKind]) -> Result<Vec<Instrument>, FetchError> {
        let kinds: Vec<MarketKind> = if kinds.is_empty() {
            vec![MarketKind::Equity, MarketKind::Index, MarketKind::Fund]
        } else {
            kinds.to_vec()
        };

        let mut out = Vec::new();
        for kind in kinds {
            let board = Self::board_filter(kind).ok_or_else(|| {
                FetchError::Rejected(format!("eastmoney has no listing for {}", kind.as_str()))
            })?;
            let mut seen = 0;
            for page in 1..=MAX_LIST_PAGES {
                let Some(data) = self.list_page(board, page)? else {
                    break;
                };
                let rows = data.diff.len();
                seen += rows;
                out.extend(
                    data.diff
                        .iter()
                        .filter_map(listed_instrument)
                        .filter(|i| i.kind() == kind),
                );
                if rows < LIST_PAGE_SIZE || seen >= data.total {
                    break;
                }
            }
            tracing::info!(kind = kind.as_str(), listed = seen, "instrument listing fetched");
        }
        Ok(out)
    }
}
