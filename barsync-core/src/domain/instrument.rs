//! Instrument identity: exchange-qualified code plus market kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Major indices that can be appended to any target list.
pub const MAJOR_INDICES: [&str; 8] = [
    "sh.000001", // SSE Composite
    "sz.399001", // SZSE Component
    "sz.399006", // ChiNext
    "sh.000016", // SSE 50
    "sh.000300", // CSI 300
    "sh.000905", // CSI 500
    "sz.399905", // CSI 500 (SZ listing)
    "sh.000852", // CSI 1000
];

const MAX_CODE_LEN: usize = 32;

/// Listing exchange, taken from the code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Exchange {
    Shanghai,
    Shenzhen,
    Beijing,
}

impl Exchange {
    pub fn prefix(&self) -> &'static str {
        match self {
            Exchange::Shanghai => "sh",
            Exchange::Shenzhen => "sz",
            Exchange::Beijing => "bj",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sh" => Some(Exchange::Shanghai),
            "sz" => Some(Exchange::Shenzhen),
            "bj" => Some(Exchange::Beijing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Equity,
    Index,
    /// Exchange-traded funds, LOFs and REITs.
    Fund,
    Bond,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::Equity => "equity",
            MarketKind::Index => "index",
            MarketKind::Fund => "fund",
            MarketKind::Bond => "bond",
        }
    }
}

impl std::str::FromStr for MarketKind {
    type Err = InstrumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity" | "stock" => Ok(MarketKind::Equity),
            "index" => Ok(MarketKind::Index),
            "fund" | "reits" => Ok(MarketKind::Fund),
            "bond" => Ok(MarketKind::Bond),
            other => Err(InstrumentError::UnknownKind(other.to_string())),
        }
    }
}

/// A tradable series identity. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Instrument {
    code: String,
    kind: MarketKind,
}

impl Instrument {
    /// Parse user input into a normalized instrument.
    ///
    /// Accepts `sh.600000`, `SH600000`, `sz.000001` and bare six-digit
    /// A-share codes, which get their exchange prefix from the leading digit.
    pub fn parse(raw: &str) -> Result<Self, InstrumentError> {
        let code = normalize_code(raw)?;
        Self::from_stored(&code)
    }

    /// Build from a code exactly as it appears in the store (no normalization).
    pub fn from_stored(code: &str) -> Result<Self, InstrumentError> {
        validate_code(code)?;
        Ok(Self {
            code: code.to_string(),
            kind: classify(code),
        })
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn kind(&self) -> MarketKind {
        self.kind
    }

    pub fn exchange(&self) -> Option<Exchange> {
        self.code
            .split_once('.')
            .and_then(|(prefix, _)| Exchange::from_prefix(prefix))
    }

    /// Code without the exchange prefix.
    pub fn symbol(&self) -> &str {
        match self.code.split_once('.') {
            Some((_, symbol)) => symbol,
            None => &self.code,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    #[error("empty instrument code")]
    Empty,

    #[error("invalid instrument code '{0}': only letters, digits, '.', '_' and '-' are allowed")]
    InvalidCharacters(String),

    #[error("instrument code '{0}' is too long")]
    TooLong(String),

    #[error("unknown market kind '{0}' (expected equity, index, fund, bond)")]
    UnknownKind(String),
}

fn normalize_code(raw: &str) -> Result<String, InstrumentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InstrumentError::Empty);
    }
    let lower = trimmed.to_ascii_lowercase();

    for exchange in [Exchange::Shanghai, Exchange::Shenzhen, Exchange::Beijing] {
        if let Some(rest) = lower.strip_prefix(exchange.prefix()) {
            let rest = rest.strip_prefix('.').unwrap_or(rest);
            if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
                return Ok(format!("{}.{rest}", exchange.prefix()));
            }
        }
    }

    if lower.len() == 6 && lower.bytes().all(|b| b.is_ascii_digit()) {
        // Treasury bonds (01xxxx) collide with the Shenzhen range and stay bare.
        if lower.starts_with("01") {
            return Ok(lower);
        }
        let prefix = match lower.as_bytes()[0] {
            b'6' => Some("sh"),
            b'0' | b'3' => Some("sz"),
            b'4' | b'8' => Some("bj"),
            _ => None,
        };
        return Ok(match prefix {
            Some(p) => format!("{p}.{lower}"),
            None => lower,
        });
    }

    Ok(trimmed.to_string())
}

fn validate_code(code: &str) -> Result<(), InstrumentError> {
    if code.is_empty() {
        return Err(InstrumentError::Empty);
    }
    if code.len() > MAX_CODE_LEN {
        return Err(InstrumentError::TooLong(code.to_string()));
    }
    let allowed = code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !allowed || code.starts_with('.') {
        return Err(InstrumentError::InvalidCharacters(code.to_string()));
    }
    Ok(())
}

fn classify(code: &str) -> MarketKind {
    match code.split_once('.') {
        Some(("sh", symbol)) if symbol.starts_with("000") => MarketKind::Index,
        Some(("sz", symbol)) if symbol.starts_with("399") => MarketKind::Index,
        Some(("sh", symbol)) if symbol.starts_with('5') => MarketKind::Fund,
        Some(("sz", symbol)) if ["15", "16", "18"].iter().any(|p| symbol.starts_with(p)) => {
            MarketKind::Fund
        }
        Some(_) => MarketKind::Equity,
        None if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) => {
            if code.starts_with("01") {
                MarketKind::Bond
            } else {
                MarketKind::Fund
            }
        }
        None => MarketKind::Equity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_codes_are_kept() {
        let i = Instrument::parse("sh.600000").unwrap();
        assert_eq!(i.code(), "sh.600000");
        assert_eq!(i.exchange(), Some(Exchange::Shanghai));
        assert_eq!(i.symbol(), "600000");
        assert_eq!(i.kind(), MarketKind::Equity);
    }

    #[test]
    fn prefix_without_dot_and_uppercase_is_normalized() {
        assert_eq!(Instrument::parse(" SZ000001 ").unwrap().code(), "sz.000001");
        assert_eq!(Instrument::parse("SH.600519").unwrap().code(), "sh.600519");
    }

    #[test]
    fn bare_a_share_codes_get_exchange_prefix() {
        assert_eq!(Instrument::parse("600000").unwrap().code(), "sh.600000");
        assert_eq!(Instrument::parse("000001").unwrap().code(), "sz.000001");
        assert_eq!(Instrument::parse("300750").unwrap().code(), "sz.300750");
        assert_eq!(Instrument::parse("830799").unwrap().code(), "bj.830799");
    }

    #[test]
    fn bare_bond_and_fund_codes_stay_bare() {
        let bond = Instrument::parse("019547").unwrap();
        assert_eq!(bond.code(), "019547");
        assert_eq!(bond.kind(), MarketKind::Bond);

        let reit = Instrument::parse("508000").unwrap();
        assert_eq!(reit.code(), "508000");
        assert_eq!(reit.kind(), MarketKind::Fund);
        assert_eq!(reit.exchange(), None);
    }

    #[test]
    fn indices_are_classified() {
        for code in MAJOR_INDICES {
            assert_eq!(Instrument::parse(code).unwrap().kind(), MarketKind::Index, "{code}");
        }
    }

    #[test]
    fn exchange_funds_are_classified() {
        assert_eq!(Instrument::parse("sh.510300").unwrap().kind(), MarketKind::Fund);
        assert_eq!(Instrument::parse("sz.159915").unwrap().kind(), MarketKind::Fund);
    }

    #[test]
    fn path_unsafe_codes_are_rejected() {
        assert!(matches!(
            Instrument::from_stored("../etc"),
            Err(InstrumentError::InvalidCharacters(_))
        ));
        assert!(matches!(
            Instrument::from_stored("a/b"),
            Err(InstrumentError::InvalidCharacters(_))
        ));
        assert_eq!(Instrument::parse("   "), Err(InstrumentError::Empty));
    }

    #[test]
    fn market_kind_parses_aliases() {
        assert_eq!("stock".parse::<MarketKind>().unwrap(), MarketKind::Equity);
        assert_eq!("REITS".parse::<MarketKind>().unwrap(), MarketKind::Fund);
        assert!("crypto".parse::<MarketKind>().is_err());
    }
}
