use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A monetary amount with two decimal places, stored as minor units.
///
/// Accepted on the wire as a JSON number (`500`, `499.5`) or a decimal string
/// (`"499.50"`); always serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,
    #[error("amount '{0}' is not a decimal number")]
    Malformed(String),
    #[error("amount '{0}' has more than two decimal places")]
    TooPrecise(String),
    #[error("amount '{0}' is out of range")]
    OutOfRange(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn from_units(units: i64) -> Self {
        Self(units * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((_, "")) => return Err(AmountError::Malformed(s.to_string())),
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(frac) {
            return Err(AmountError::Malformed(s.to_string()));
        }
        if frac.len() > 2 {
            return Err(AmountError::TooPrecise(s.to_string()));
        }

        let whole: i64 = whole
            .parse()
            .map_err(|_| AmountError::OutOfRange(s.to_string()))?;
        let frac_cents: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().unwrap_or(0) * 10,
            _ => frac.parse::<i64>().unwrap_or(0),
        };

        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(frac_cents))
            .ok_or_else(|| AmountError::OutOfRange(s.to_string()))?;

        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

struct AmountVisitor;

impl Visitor<'_> for AmountVisitor {
    type Value = Amount;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a decimal amount as a number or string")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
        v.parse().map_err(E::custom)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
        v.checked_mul(100)
            .map(Amount)
            .ok_or_else(|| E::custom(AmountError::OutOfRange(v.to_string())))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
        i64::try_from(v)
            .ok()
            .and_then(|v| v.checked_mul(100))
            .map(Amount)
            .ok_or_else(|| E::custom(AmountError::OutOfRange(v.to_string())))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
        let scaled = v * 100.0;
        let rounded = scaled.round();
        if !rounded.is_finite() || rounded.abs() > i64::MAX as f64 {
            return Err(E::custom(AmountError::OutOfRange(v.to_string())));
        }
        if (scaled - rounded).abs() > 1e-6 {
            return Err(E::custom(AmountError::TooPrecise(v.to_string())));
        }
        Ok(Amount(rounded as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_forms() {
        assert_eq!("500".parse::<Amount>().unwrap(), Amount::from_units(500));
        assert_eq!("499.5".parse::<Amount>().unwrap(), Amount::from_cents(49_950));
        assert_eq!("0.07".parse::<Amount>().unwrap(), Amount::from_cents(7));
        assert_eq!("-3.10".parse::<Amount>().unwrap(), Amount::from_cents(-310));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<Amount>(), Err(AmountError::Empty));
        assert!(matches!("1.234".parse::<Amount>(), Err(AmountError::TooPrecise(_))));
        assert!(matches!("abc".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!(".5".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(matches!("1.".parse::<Amount>(), Err(AmountError::Malformed(_))));
        assert!(serde_json::from_str::<Amount>("\"1.\"").is_err());
    }

    #[test]
    fn accepts_json_numbers_and_strings() {
        let from_int: Amount = serde_json::from_str("500").unwrap();
        let from_float: Amount = serde_json::from_str("450.25").unwrap();
        let from_str: Amount = serde_json::from_str("\"450.25\"").unwrap();
        assert_eq!(from_int, Amount::from_units(500));
        assert_eq!(from_float, from_str);
        assert!(serde_json::from_str::<Amount>("1.005").is_err());
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Amount::from_cents(50_000)).unwrap();
        assert_eq!(json, "\"500.00\"");
    }
}
