use thiserror::Error;

use crate::config::ConfigError;
use crate::scan::ScanState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied parameter is outside the domain of the device or
    /// record it addresses. Never clamped.
    #[error("{what} out of range: {value} (allowed {allowed})")]
    Range {
        what: &'static str,
        value: i64,
        allowed: &'static str,
    },

    /// Unknown satellite or position key.
    #[error("unknown {kind} '{key}' (known: {})", .known.join(", "))]
    NotFound {
        kind: &'static str,
        key: String,
        known: Vec<String>,
    },

    #[error("no lock on {frequency_mhz} MHz {polarization} within {timeout_ms} ms")]
    ProtocolTimeout {
        frequency_mhz: u32,
        polarization: char,
        timeout_ms: u64,
    },

    #[error("illegal scan state transition {from:?} -> {to:?}")]
    StateTransition { from: ScanState, to: ScanState },

    #[error("tuner hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("channel list: {0}")]
    ChannelList(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn range(what: &'static str, value: impl Into<i64>, allowed: &'static str) -> Self {
        Error::Range {
            what,
            value: value.into(),
            allowed,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}
