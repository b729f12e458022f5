use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use crate::error::Error as AppError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub units: i64,
    pub precision: u8,
    pub symbol: String,
}

impl Asset {
    pub fn zero(precision: u8, symbol: impl Into<String>) -> Self {
        Self {
            units: 0,
            precision,
            symbol: symbol.into(),
        }
    }
}

impl FromStr for Asset {
    type Err = AppError;

    /// Parses the chain's textual asset form, e.g. `"1.2345 TLOS"` into 12345 units.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::InvalidAsset(s.to_owned());

        let mut parts = s.trim().split_whitespace();
        let amount = parts.next().ok_or_else(invalid)?;
        let symbol = parts.next().ok_or_else(invalid)?;
        if parts.next().is_some() || symbol.is_empty() {
            return Err(invalid());
        }

        let (negative, amount) = match amount.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, amount),
        };

        let (int_part, frac_part) = match amount.split_once('.') {
            Some((i, f)) => (i, f),
            None => (amount, ""),
        };

        if int_part.is_empty()
            || !int_part.bytes().all(|b| b.is_ascii_digit())
            || !frac_part.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(invalid());
        }

        let precision = u8::try_from(frac_part.len()).map_err(|_| invalid())?;
        let digits = format!("{}{}", int_part, frac_part);
        let units: i64 = digits.parse().map_err(|_| invalid())?;

        Ok(Asset {
            units: if negative { -units } else { units },
            precision,
            symbol: symbol.to_owned(),
        })
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.units < 0 { "-" } else { "" };
        let abs = self.units.unsigned_abs().to_string();
        let precision = self.precision as usize;

        if precision == 0 {
            return write!(f, "{}{} {}", sign, abs, self.symbol);
        }

        let padded = format!("{:0>width$}", abs, width = precision + 1);
        let (int_part, frac_part) = padded.split_at(padded.len() - precision);
        write!(f, "{}{}.{} {}", sign, int_part, frac_part, self.symbol)
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Asset::from_str(&s).map_err(de::Error::custom)
    }
}

/// Token ids are `lowercase(contract):UPPERCASE(symbol)`.
pub fn token_id(contract: &str, symbol: &str) -> String {
    format!("{}:{}", contract.to_lowercase(), symbol.to_uppercase())
}

/// Account names used as a scope or a primary-key bound get a trailing space.
///
/// The node tries to read a scope/bound as a number before reading it as a
/// name, so accounts like `1` are otherwise looked up under the wrong key.
pub fn account_scope(account: &str) -> String {
    format!("{} ", account)
}

// Chain JSON renders 64-bit integers and floats either as numbers or as strings
// depending on magnitude and node version, so row decoders accept both.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
}

pub fn de_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(v) => Ok(v),
        NumberOrString::UInt(v) => i64::try_from(v).map_err(de::Error::custom),
        NumberOrString::Float(v) => Ok(v as i64),
        NumberOrString::Str(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

pub fn de_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(v) => u64::try_from(v).map_err(de::Error::custom),
        NumberOrString::UInt(v) => Ok(v),
        NumberOrString::Float(v) => Ok(v as u64),
        NumberOrString::Str(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

/// Floats are kept in their decimal text form so no precision is lost.
pub fn de_float_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(v) => Ok(v.to_string()),
        NumberOrString::UInt(v) => Ok(v.to_string()),
        NumberOrString::Float(v) => Ok(format!("{}", v)),
        NumberOrString::Str(s) => Ok(s),
    }
}

pub fn de_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(u64),
    }

    match BoolOrInt::deserialize(deserializer)? {
        BoolOrInt::Bool(b) => Ok(b),
        BoolOrInt::Int(i) => Ok(i != 0),
    }
}

/// Integer part of a chain float string: `"1234.5678"` -> `"1234"`.
pub fn integer_part(float: &str) -> String {
    let int = float.trim().split('.').next().unwrap_or("");
    if int.is_empty() || int == "-" {
        "0".to_owned()
    } else {
        int.to_owned()
    }
}
