//! Error taxonomy (§7): five categories, only the first is fatal.
//!
//! Grounded on `pkg/http/ierror/error.go`'s `{code,name,message,detail}`
//! envelope for the `Remote` variant's shape, and the five-category list
//! in §7 of the specification for the enum's structure.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Category 1: missing required config, unreachable policy server at
    /// boot, missing kernel binaries, unparseable `iptables --version`.
    /// The only category that aborts the process.
    #[error("fatal startup error: {0}")]
    Startup(String),

    /// Category 2: `iptables-restore`/`ipset restore`/`*-save` failure
    /// after exhausting retries.
    #[error("kernel command error: {0}")]
    Kernel(String),

    /// Category 3: policy-server fetch error or non-200 response.
    #[error("policy server error: {0}")]
    Remote(String),

    /// Category 4: malformed CIDR, mismatched ip_version, and similar
    /// per-item data problems that are dropped with a warning rather than
    /// failing the whole apply.
    #[error("data error: {0}")]
    Data(String),

    /// Anything else; only ever surfaced to `main`, never matched on.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Kernel(err.to_string())
    }
}

impl AgentError {
    /// True for the one category that should abort the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Startup(_))
    }
}
