//! Kubernetes resource quantity parsing
//!
//! Only the subset KaaS accepts: CPU as cores or millicores, memory and
//! storage as plain bytes or with a binary/decimal suffix. Quantities must be
//! strictly positive.

use std::fmt;

const BYTE_SUFFIXES: [&str; 12] = [
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "k", "M", "G", "T", "P", "E",
];

/// A validated quantity string, passed through to the API server verbatim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Quantity(String);

impl Quantity {
    /// Parse a CPU quantity (e.g., "500m", "1", "0.5")
    pub fn cpu(raw: &str) -> Result<Self, String> {
        let qty = raw.trim();
        let value = if let Some(milli) = qty.strip_suffix('m') {
            milli.parse::<u64>().ok().map(|m| m as f64)
        } else {
            parse_decimal(qty)
        };

        match value {
            Some(v) if v > 0.0 => Ok(Self(qty.to_string())),
            Some(_) => Err(format!("cpu quantity '{}' must be greater than zero", qty)),
            None => Err(format!(
                "invalid cpu quantity '{}' (expected e.g., '500m', '1', '0.5')",
                qty
            )),
        }
    }

    /// Parse a byte quantity for memory or storage (e.g., "128Mi", "1Gi", "1000000")
    pub fn bytes(raw: &str) -> Result<Self, String> {
        let qty = raw.trim();
        let number = BYTE_SUFFIXES
            .iter()
            .find_map(|suffix| qty.strip_suffix(suffix))
            .unwrap_or(qty);

        match parse_decimal(number) {
            Some(v) if v > 0.0 => Ok(Self(qty.to_string())),
            Some(_) => Err(format!("quantity '{}' must be greater than zero", qty)),
            None => Err(format!(
                "invalid quantity '{}' (expected e.g., '128Mi', '1Gi')",
                qty
            )),
        }
    }

    /// The quantity as written
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.0
    }
}

// Plain decimal only: f64::from_str would also take "inf", "NaN" and exponents
fn parse_decimal(s: &str) -> Option<f64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if s.matches('.').count() > 1 || s.starts_with('.') || s.ends_with('.') {
        return None;
    }
    s.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_accepts_millicores_and_cores() {
        assert_eq!(Quantity::cpu("500m").unwrap().as_str(), "500m");
        assert_eq!(Quantity::cpu("2").unwrap().as_str(), "2");
        assert_eq!(Quantity::cpu(" 0.5 ").unwrap().as_str(), "0.5");
    }

    #[test]
    fn cpu_rejects_garbage_and_zero() {
        assert!(Quantity::cpu("").is_err());
        assert!(Quantity::cpu("fast").is_err());
        assert!(Quantity::cpu("1.5m").is_err());
        assert!(Quantity::cpu("-1").is_err());
        assert!(Quantity::cpu("0").unwrap_err().contains("greater than zero"));
        assert!(Quantity::cpu("0m").is_err());
        assert!(Quantity::cpu("inf").is_err());
    }

    #[test]
    fn bytes_accepts_suffixes() {
        for q in ["128Mi", "1Gi", "1000000", "1.5G", "512k", "2Ti"] {
            assert_eq!(Quantity::bytes(q).unwrap().as_str(), q, "{}", q);
        }
    }

    #[test]
    fn bytes_rejects_unknown_suffix_and_empty_number() {
        assert!(Quantity::bytes("128MB").is_err());
        assert!(Quantity::bytes("Gi").is_err());
        assert!(Quantity::bytes("0Gi").is_err());
        assert!(Quantity::bytes("1e3").is_err());
        assert!(Quantity::bytes("..1Mi").is_err());
    }
}
