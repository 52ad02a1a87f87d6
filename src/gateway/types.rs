//! Live router objects as the engine sees them
//!
//! These are normalized views of RouterOS records; the REST wire format
//! (string-typed fields, `.id` keys) stays inside the REST client.

use serde::{Deserialize, Serialize};

/// A `/ppp/secret` entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PppSecret {
    /// RouterOS internal id (`*1A`), absent before creation
    pub id: Option<String>,
    pub name: String,
    pub password: Option<String>,
    pub profile: String,
    pub service: String,
    pub disabled: bool,
    pub comment: Option<String>,
}

/// A `/queue/simple` entry
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleQueue {
    pub id: Option<String>,
    pub name: String,
    pub target: String,
    /// `upload/download`, e.g. `5M/10M`
    pub max_limit: String,
    pub disabled: bool,
    pub comment: Option<String>,
}

/// A `/ppp/active` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub id: String,
    pub name: String,
    pub address: Option<String>,
}

/// Fields to change on an existing secret; `None` leaves the field untouched
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SecretPatch {
    pub profile: Option<String>,
    pub password: Option<String>,
    pub disabled: Option<bool>,
    pub comment: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueuePatch {
    pub target: Option<String>,
    pub max_limit: Option<String>,
    pub disabled: Option<bool>,
    pub comment: Option<String>,
}

/// One sample of `/interface/monitor-traffic`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceTraffic {
    pub interface: String,
    pub rx_bits_per_second: u64,
    pub tx_bits_per_second: u64,
}

/// Parsed `max-limit` value in bits per second
///
/// RouterOS accepts `5M/10M` on input but reports `5000000/10000000`, so
/// limits are compared after parsing rather than as strings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub upload: u64,
    pub download: u64,
}

impl RateLimit {
    pub fn parse(value: &str) -> Option<Self> {
        let (up, down) = value.trim().split_once('/')?;
        Some(Self {
            upload: parse_rate(up)?,
            download: parse_rate(down)?,
        })
    }

    /// Whether two `max-limit` strings describe the same limit
    pub fn same(a: &str, b: &str) -> bool {
        match (Self::parse(a), Self::parse(b)) {
            (Some(a), Some(b)) => a == b,
            _ => a.trim() == b.trim(),
        }
    }
}

fn parse_rate(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1_000),
        'M' => (&value[..value.len() - 1], 1_000_000),
        'G' => (&value[..value.len() - 1], 1_000_000_000),
        _ => (value, 1),
    };
    digits.parse::<u64>().ok()?.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_rate_is_rejected() {
        assert_eq!(RateLimit::parse("20000000000000M/1"), None);
        assert_eq!(parse_rate("18446744073709551615"), Some(u64::MAX));
        assert_eq!(parse_rate("18446744073709551615k"), None);
    }

    #[test]
    fn test_rate_limit_units() {
        assert_eq!(
            RateLimit::parse("5M/10M"),
            Some(RateLimit {
                upload: 5_000_000,
                download: 10_000_000
            })
        );
        assert_eq!(
            RateLimit::parse("512k/1G"),
            Some(RateLimit {
                upload: 512_000,
                download: 1_000_000_000
            })
        );
        assert_eq!(RateLimit::parse("0/0").map(|r| r.download), Some(0));
    }

    #[test]
    fn test_rate_limit_rejects_garbage() {
        assert!(RateLimit::parse("fast").is_none());
        assert!(RateLimit::parse("5M").is_none());
        assert!(RateLimit::parse("/10M").is_none());
    }

    #[test]
    fn test_rate_limit_same_across_notations() {
        assert!(RateLimit::same("5M/10M", "5000000/10000000"));
        assert!(!RateLimit::same("5M/10M", "5M/20M"));
        // unparseable values fall back to string equality
        assert!(RateLimit::same("unlimited", "unlimited"));
    }
}
