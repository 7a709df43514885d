//! Token usage extraction
//!
//! The upstream schema is not fixed, so a small ordered list of probes is
//! tried in sequence and the first present value wins.

use serde_json::Value;

/// One place a token count may live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenProbe {
    pub name: &'static str,
    pub path: &'static [&'static str],
}

impl TokenProbe {
    pub const fn new(name: &'static str, path: &'static [&'static str]) -> Self {
        Self { name, path }
    }

    /// Read a non-negative integer at this probe's path
    pub fn extract(&self, value: &Value) -> Option<u64> {
        let mut current = value;
        for key in self.path {
            current = current.get(*key)?;
        }
        as_count(current)
    }
}

/// Probes in priority order
pub const TOKEN_PROBES: &[TokenProbe] = &[
    TokenProbe::new("usage.total_tokens", &["usage", "total_tokens"]),
    TokenProbe::new("message.usage.total_tokens", &["message", "usage", "total_tokens"]),
    TokenProbe::new("usage.output_tokens", &["usage", "output_tokens"]),
    TokenProbe::new("message.usage.output_tokens", &["message", "usage", "output_tokens"]),
    TokenProbe::new("total_tokens", &["total_tokens"]),
    TokenProbe::new("tokens", &["tokens"]),
];

/// First token count found by [`TOKEN_PROBES`]
pub fn extract_tokens(value: &Value) -> Option<u64> {
    extract_tokens_with(TOKEN_PROBES, value)
}

/// First token count found by the given probes
pub fn extract_tokens_with(probes: &[TokenProbe], value: &Value) -> Option<u64> {
    probes.iter().find_map(|probe| probe.extract(value))
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && *f >= 0.0)
            .map(|f| f.round() as u64)
    })
}
