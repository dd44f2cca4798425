//! Fixed-point credit amounts.
//!
//! The ledger never stores binary floats: a [`Credits`] value is an `i64`
//! count of micro-credits (1e-6). Floats only appear at the config boundary,
//! where TOML numbers are converted once at load time.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

const MICROS_PER_CREDIT: i64 = 1_000_000;

/// A credit amount in micro-credits. May be negative: racing settlements are
/// allowed to overdraw a balance rather than lose or double a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn micros(self) -> i64 {
        self.0
    }

    /// Convert a config-supplied float, rounding to the nearest micro-credit.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self((value * MICROS_PER_CREDIT as f64).round() as i64)
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Scale by an integer factor (admission head-room multiplier).
    #[must_use]
    pub const fn scaled(self, factor: u32) -> Self {
        Self(self.0.saturating_mul(factor as i64))
    }

    /// Cost of `tokens` at `price_per_ktok`, rounded half-up in micro-credits.
    #[must_use]
    pub fn token_cost(tokens: u64, price_per_ktok: Credits) -> Self {
        let micros = (tokens as i128 * price_per_ktok.0 as i128 + 500) / 1000;
        Self(micros as i64)
    }
}

impl Add for Credits {
    type Output = Credits;

    fn add(self, rhs: Credits) -> Credits {
        Credits(self.0 + rhs.0)
    }
}

impl AddAssign for Credits {
    fn add_assign(&mut self, rhs: Credits) {
        self.0 += rhs.0;
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / MICROS_PER_CREDIT as u64;
        let frac = abs % MICROS_PER_CREDIT as u64;
        if frac == 0 {
            write!(f, "{sign}{whole}")
        } else {
            let frac = format!("{frac:06}");
            write!(f, "{sign}{whole}.{}", frac.trim_end_matches('0'))
        }
    }
}

impl FromStr for Credits {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1i64, rest),
            None => (1i64, s),
        };
        let (whole, frac) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(format!("invalid credit amount '{s}'"));
        }
        if frac.len() > 6 {
            return Err(format!(
                "credit amount '{s}' exceeds micro-credit precision"
            ));
        }
        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|_| format!("invalid credit amount '{s}'"))?
        };
        let frac_micros: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{frac:0<6}");
            padded
                .parse()
                .map_err(|_| format!("invalid credit amount '{s}'"))?
        };
        Ok(Credits(sign * (whole * MICROS_PER_CREDIT + frac_micros)))
    }
}

impl Serialize for Credits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Credits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Float(f64),
            Int(i64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Float(v) => Ok(Credits::from_f64(v)),
            Repr::Int(v) => Ok(Credits(v * MICROS_PER_CREDIT)),
            Repr::Text(s) => s.parse().map_err(DeError::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_trims_trailing_zeros() {
        assert_eq!(Credits::from_micros(10_000_000).to_string(), "10");
        assert_eq!(Credits::from_micros(9_998_333).to_string(), "9.998333");
        assert_eq!(Credits::from_micros(1_667).to_string(), "0.001667");
        assert_eq!(Credits::from_micros(-500_000).to_string(), "-0.5");
        assert_eq!(Credits::ZERO.to_string(), "0");
    }

    #[test]
    fn test_parse_roundtrip() {
        for s in ["10", "9.998333", "0.001667", "-0.5", "0"] {
            let credits: Credits = s.parse().unwrap();
            assert_eq!(credits.to_string(), s);
        }
        assert!("".parse::<Credits>().is_err());
        assert!("1.2345678".parse::<Credits>().is_err());
        assert!("abc".parse::<Credits>().is_err());
    }

    #[test]
    fn test_from_f64() {
        assert_eq!(Credits::from_f64(0.001).micros(), 1_000);
        assert_eq!(Credits::from_f64(25.0).micros(), 25_000_000);
    }

    #[test]
    fn test_token_cost_rounds_half_up() {
        let price = Credits::from_f64(0.001); // 1000 micros per kilo-token
        assert_eq!(Credits::token_cost(667, price).micros(), 667);
        assert_eq!(Credits::token_cost(0, price).micros(), 0);
        // 1 token at 0.001/1K = 1 micro exactly
        assert_eq!(Credits::token_cost(1, price).micros(), 1);
        // half-up: 1 token at 0.0005/1K = 0.5 micro -> 1
        assert_eq!(Credits::token_cost(1, Credits::from_micros(500)).micros(), 1);
    }

    #[test]
    fn test_worked_billing_example() {
        // 667 input tokens at 0.001/1K plus 500 output tokens at 0.002/1K
        let cost = Credits::token_cost(667, Credits::from_f64(0.001))
            + Credits::token_cost(500, Credits::from_f64(0.002));
        assert_eq!(cost.to_string(), "0.001667");

        let balance = Credits::from_f64(10.0);
        assert_eq!(
            Credits::from_micros(balance.micros() - cost.micros()).to_string(),
            "9.998333"
        );
    }

    #[test]
    fn test_toml_deserialization() {
        #[derive(Deserialize)]
        struct Cfg {
            a: Credits,
            b: Credits,
            c: Credits,
        }
        let cfg: Cfg = toml::from_str("a = 0.001\nb = 25\nc = \"1.5\"").unwrap();
        assert_eq!(cfg.a.micros(), 1_000);
        assert_eq!(cfg.b.micros(), 25_000_000);
        assert_eq!(cfg.c.micros(), 1_500_000);
    }
}
