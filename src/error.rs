//! Error taxonomy for the wire engine, session executor, and fleet runner.
//!
//! Everything wire- or session-related is rooted at [`ConnectionError`] so a
//! caller can match on one family. The runner wraps these per-job into
//! [`LaunchError`]/[`LaunchTimeout`], preserving the original diagnostic as a
//! formatted trace string rather than a source chain (so it survives being
//! carried across a `tokio::task::JoinSet` boundary).

use serde_json::Value;

/// One device address, attached to every error in this module.
pub type Address = (String, u16);

/// The error family raised by [`crate::wire::roundtrip`] and
/// [`crate::session::rexec`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// A wire attempt (connect/write/read) exceeded its timeout budget on
    /// every retry.
    #[error("<{}:{}>: timeout: {reason}", .address.0, .address.1)]
    Timeout { address: Address, reason: String },

    /// `logon` returned `STATUS[0].Code == 402`: the device already has an
    /// open session. Never retried.
    #[error("<{}:{}>: session already active", .address.0, .address.1)]
    SessionAlreadyActive { address: Address },

    /// The reply envelope was missing `STATUS`/`id`, or a declared
    /// list-valued field was present but not a list.
    #[error("<{}:{}>: malformed reply: {reason}", .address.0, .address.1)]
    MessageMalformed {
        address: Address,
        reason: String,
        reply: Value,
    },

    /// `STATUS[0].STATUS == "E"`: the device rejected the command.
    #[error("<{}:{}>: device rejected command: {reason}", .address.0, .address.1)]
    MessageError {
        address: Address,
        reason: String,
        reply: Value,
    },

    /// A declared field's cardinality fell outside its `[min, max]` bounds.
    #[error(
        "<{}:{}>: invalid reply: field {field} has {actual} entries, expected {min}..={max}",
        .address.0, .address.1
    )]
    MessageInvalid {
        address: Address,
        field: String,
        min: usize,
        max: usize,
        actual: usize,
        reply: Value,
    },
}

impl ConnectionError {
    pub fn address(&self) -> &Address {
        match self {
            Self::Timeout { address, .. }
            | Self::SessionAlreadyActive { address }
            | Self::MessageMalformed { address, .. }
            | Self::MessageError { address, .. }
            | Self::MessageInvalid { address, .. } => address,
        }
    }

    /// True for errors that are safe for a caller to retry at a higher
    /// level (spec: "Retriable at the caller's discretion").
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Per-job outcome wrapper used by [`crate::launch::launch`] when a job
/// raises rather than returning its own typed error.
#[derive(Debug, thiserror::Error)]
pub enum LaunchFailure {
    #[error("<{}:{}>: timed out: {brief}", .address.0, .address.1)]
    Timeout {
        address: Address,
        brief: String,
        trace: String,
    },
    #[error("<{}:{}>: {brief}", .address.0, .address.1)]
    Err {
        address: Address,
        brief: String,
        trace: String,
    },
}

impl LaunchFailure {
    pub fn address(&self) -> &Address {
        match self {
            Self::Timeout { address, .. } | Self::Err { address, .. } => address,
        }
    }

    /// Build a [`LaunchFailure`] from whatever a job's `Result::Err` was.
    /// `ConnectionError::Timeout` maps to `LaunchFailure::Timeout`; every
    /// other connection error (and any other error type, via `Display`) maps
    /// to `LaunchFailure::Err`.
    pub fn from_connection_error(address: Address, err: &ConnectionError) -> Self {
        let trace = format!("{err:?}");
        match err {
            ConnectionError::Timeout { reason, .. } => Self::Timeout {
                address,
                brief: reason.clone(),
                trace,
            },
            other => Self::Err {
                address,
                brief: other.to_string(),
                trace,
            },
        }
    }

    pub fn cancelled(address: Address) -> Self {
        Self::Err {
            address,
            brief: "cancelled".to_string(),
            trace: "job was cancelled before completion".to_string(),
        }
    }
}
