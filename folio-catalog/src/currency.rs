use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

const MICROS: i128 = 1_000_000;

/// ISO-4217 style code: three ASCII uppercase letters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn parse(value: &str) -> Result<Self, CurrencyError> {
        let code = value.trim().to_ascii_uppercase();
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
            Ok(Self(code))
        } else {
            Err(CurrencyError::InvalidCode(value.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Units of target currency per unit of base currency, scaled by 10^6.
/// `ExchangeRate::IDENTITY` is exactly 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    pub micros: i64,
}

impl ExchangeRate {
    pub const IDENTITY: ExchangeRate = ExchangeRate { micros: 1_000_000 };

    pub fn from_micros(micros: i64) -> Result<Self, CurrencyError> {
        if micros <= 0 {
            return Err(CurrencyError::InvalidRate(micros));
        }
        Ok(Self { micros })
    }

    /// Display-only conversion of a minor-unit amount, rounded half up.
    pub fn convert(&self, amount_minor: i64) -> i64 {
        let scaled = amount_minor as i128 * self.micros as i128;
        let rounded = (scaled + MICROS / 2).div_euclid(MICROS);
        rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CurrencyError {
    #[error("Invalid currency code: {0}")]
    InvalidCode(String),

    #[error("Exchange rate must be positive, got {0} micros")]
    InvalidRate(i64),

    #[error("Unsupported currency: {0}")]
    Unsupported(String),

    #[error("Exchange rate source unavailable: {0}")]
    Unavailable(String),
}

/// Supplies display exchange rates; accuracy is the provider's concern.
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn rate(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<ExchangeRate, CurrencyError>;
}

/// Fixed table of rates from the base currency, loaded from configuration.
#[derive(Debug, Clone)]
pub struct StaticRateTable {
    base: CurrencyCode,
    rates: HashMap<CurrencyCode, ExchangeRate>,
}

impl StaticRateTable {
    pub fn new(base: CurrencyCode, rates_micros: &HashMap<String, i64>) -> Result<Self, CurrencyError> {
        let mut rates = HashMap::with_capacity(rates_micros.len());
        for (code, micros) in rates_micros {
            rates.insert(CurrencyCode::parse(code)?, ExchangeRate::from_micros(*micros)?);
        }
        Ok(Self { base, rates })
    }
}

#[async_trait]
impl ExchangeRateProvider for StaticRateTable {
    async fn rate(&self, base: &CurrencyCode, target: &CurrencyCode) -> Result<ExchangeRate, CurrencyError> {
        if base == target {
            return Ok(ExchangeRate::IDENTITY);
        }
        if base != &self.base {
            return Err(CurrencyError::Unsupported(base.to_string()));
        }
        self.rates
            .get(target)
            .copied()
            .ok_or_else(|| CurrencyError::Unsupported(target.to_string()))
    }
}
