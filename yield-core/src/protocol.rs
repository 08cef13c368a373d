//! Protocol descriptors for source adapters

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static description of the upstream a source adapter talks to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInfo {
    /// Protocol name, also the id prefix of every opportunity it produces
    pub name: String,
    /// Chain the adapter is scoped to ("all" when unscoped)
    pub chain: String,
    /// Base URL of the upstream API
    pub base_url: String,
    /// Requests per minute the upstream tolerates
    pub rate_limit: u32,
    /// Per-request timeout in milliseconds
    pub timeout_ms: u64,
    /// Retry attempts the adapter uses for a fetch
    pub retry_attempts: u32,
}

impl ProtocolInfo {
    /// Prefix used in opportunity ids (`"{name}-"`)
    pub fn id_prefix(&self) -> String {
        format!("{}-", self.name)
    }

    /// Whether an opportunity id belongs to this protocol
    pub fn owns_id(&self, id: &str) -> bool {
        id.len() > self.name.len() + 1 && id.starts_with(&self.id_prefix())
    }
}

impl fmt::Display for ProtocolInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str) -> ProtocolInfo {
        ProtocolInfo {
            name: name.to_string(),
            chain: "all".to_string(),
            base_url: "https://example.org".to_string(),
            rate_limit: 60,
            timeout_ms: 10_000,
            retry_attempts: 3,
        }
    }

    #[test]
    fn test_owns_id() {
        let aave = info("aave-v3");
        assert!(aave.owns_id("aave-v3-747c1d2a"));
        assert!(!aave.owns_id("aave-v3-"));
        assert!(!aave.owns_id("aave-v2-747c1d2a"));
        assert!(!info("aave").owns_id("aavex-1"));
    }
}
