use std::path::PathBuf;

use thiserror::Error;

/// Result type for lab operations.
pub type Result<T> = std::result::Result<T, LabError>;

/// Errors that can occur while generating or driving a lab.
#[derive(Debug, Error)]
pub enum LabError {
    /// Spine/leaf counts (or derived ASN/address ranges) cannot form a valid fabric.
    #[error("invalid topology shape for lab {lab}: {reason}")]
    InvalidTopologyShape { lab: String, reason: String },

    #[error("invalid lab name {0:?}: use 1-32 lowercase letters, digits, '-' or '_', starting with a letter or digit")]
    InvalidLabName(String),

    #[error("invalid subnet {value:?}: {reason}")]
    InvalidSubnet { value: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An explicitly requested subnet overlaps an allocation that is already in use.
    #[error("subnet {subnet} requested for lab {lab} overlaps {conflict} ({owner})")]
    SubnetInUse {
        lab: String,
        subnet: String,
        conflict: String,
        owner: String,
    },

    #[error(
        "address space exhausted for lab {lab}: requested {requested} x /{prefix_len} in {supernet}, only {available} free"
    )]
    AddressSpaceExhausted {
        lab: String,
        prefix_len: u8,
        supernet: String,
        requested: usize,
        available: usize,
    },

    #[error("lab {lab} already exists at {} (use --force to regenerate)", .path.display())]
    LabAlreadyExists { lab: String, path: PathBuf },

    #[error("lab {lab} not found at {}", .path.display())]
    LabNotFound { lab: String, path: PathBuf },

    /// The orchestration runtime could not be invoked or reported failure.
    #[error("orchestration runtime unavailable for lab {lab}: {reason}")]
    RuntimeUnavailable { lab: String, reason: String },

    #[error("address pool at {} is locked by another process (waited {waited_secs}s)", .path.display())]
    PoolBusy { path: PathBuf, waited_secs: u64 },

    #[error("address pool ledger {} line {line}: {reason}", .path.display())]
    Ledger {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("render error: {0}")]
    Render(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LabError {
    pub fn invalid_shape(lab: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTopologyShape {
            lab: lab.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_subnet(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSubnet {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn runtime_unavailable(lab: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RuntimeUnavailable {
            lab: lab.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code reported by the CLI for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidTopologyShape { .. } => 10,
            Self::InvalidLabName(_)
            | Self::InvalidSubnet { .. }
            | Self::InvalidConfig(_)
            | Self::SubnetInUse { .. } => 11,
            Self::AddressSpaceExhausted { .. } => 12,
            Self::LabAlreadyExists { .. } => 13,
            Self::LabNotFound { .. } => 14,
            Self::RuntimeUnavailable { .. } => 15,
            Self::PoolBusy { .. } => 16,
            Self::Ledger { .. } | Self::Render(_) | Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}

impl From<serde_json::Error> for LabError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for LabError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tera::Error> for LabError {
    fn from(err: tera::Error) -> Self {
        // tera hides the useful part of the message in the source chain
        let mut msg = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            msg.push_str(": ");
            msg.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::Render(msg)
    }
}
