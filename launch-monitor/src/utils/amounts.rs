use alloy_primitives::U256;

/// Decimals of the base token. Tax, buyback and whale amounts are all
/// denominated in it.
pub const BASE_TOKEN_DECIMALS: u32 = 18;

/// 10^18, the scale factor between base units and display units.
pub fn wad() -> U256 {
    U256::from(10u64).pow(U256::from(BASE_TOKEN_DECIMALS))
}

/// Convert an integer base-unit amount to display units as f64.
///
/// Lossy above ~2^53 display units, which is fine for rates, ETAs and
/// progress percentages.
pub fn to_display(value: U256) -> f64 {
    let mut result = 0.0;
    let mut multiplier = 1.0;

    for word in value.as_limbs().iter() {
        result += (*word as f64) * multiplier;
        multiplier *= 2.0_f64.powi(64);
    }

    result / 1e18
}

/// Parse a whole-token decimal string (e.g. "1000" or "12.5") into base units.
pub fn parse_display(s: &str) -> Option<U256> {
    let s = s.trim();
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() > BASE_TOKEN_DECIMALS as usize {
        return None;
    }

    let int: U256 = if int_part.is_empty() {
        U256::ZERO
    } else {
        int_part.parse().ok()?
    };

    let frac: U256 = if frac_part.is_empty() {
        U256::ZERO
    } else {
        let scale = U256::from(10u64).pow(U256::from(
            BASE_TOKEN_DECIMALS as usize - frac_part.len(),
        ));
        frac_part.parse::<U256>().ok()?.checked_mul(scale)?
    };

    int.checked_mul(wad())?.checked_add(frac)
}

/// Format a base-unit amount as a whole-token decimal string with trailing
/// zeros trimmed, e.g. 1_500_000_000_000_000_000 -> "1.5".
pub fn format_display(value: U256) -> String {
    let int = value / wad();
    let frac = value % wad();
    if frac.is_zero() {
        return int.to_string();
    }
    let frac_str = format!("{:0>18}", frac.to_string());
    format!("{}.{}", int, frac_str.trim_end_matches('0'))
}

/// Serde adapter: `U256` as a decimal string.
///
/// Integer monetary amounts always cross the wire as strings so they survive
/// double-precision rounding in JSON consumers.
pub mod amount_string {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Serde adapter: `Option<U256>` as an optional decimal string.
pub mod amount_string_opt {
    use alloy_primitives::U256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<U256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<U256>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Serde adapter: `Option<I256>` as an optional decimal string (sign kept).
pub mod signed_string_opt {
    use alloy_primitives::I256;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<I256>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<I256>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        match s {
            Some(s) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_display() {
        let one_and_half = U256::from(1_500_000_000_000_000_000u64);
        assert!((to_display(one_and_half) - 1.5).abs() < 1e-12);
        assert_eq!(to_display(U256::ZERO), 0.0);
    }

    #[test]
    fn test_parse_display_whole() {
        assert_eq!(
            parse_display("1000"),
            Some(U256::from(1000u64) * wad())
        );
    }

    #[test]
    fn test_parse_display_fractional() {
        assert_eq!(
            parse_display("12.5"),
            Some(U256::from(12_500_000_000_000_000_000u128))
        );
    }

    #[test]
    fn test_parse_display_rejects_garbage() {
        assert_eq!(parse_display(""), None);
        assert_eq!(parse_display("abc"), None);
        assert_eq!(parse_display("1.0000000000000000001"), None);
    }

    #[test]
    fn test_format_display_round_trip() {
        for s in ["0", "1", "1.5", "1000", "0.000000000000000001"] {
            let v = parse_display(s).unwrap();
            assert_eq!(format_display(v), s);
        }
    }

    #[test]
    fn test_amount_serde_decimal_string() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Wrapper {
            #[serde(with = "amount_string")]
            value: U256,
        }

        let w = Wrapper {
            value: U256::from(1500u64) * wad(),
        };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"1500000000000000000000"}"#);

        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, w.value);
    }
}
