// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

/// Error type for proposal synchronization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Orchestrator has been shut down")]
    ShutDown,

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Whether this error is transient and the operation may be retried
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SyncError::Rpc(_) | SyncError::Timeout(_) | SyncError::ChannelClosed
        )
    }

    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            SyncError::Rpc(_) => "rpc",
            SyncError::InvalidResponse(_) => "invalid_response",
            SyncError::Storage(_) => "storage",
            SyncError::Serialization(_) => "serialization",
            SyncError::ChannelClosed => "channel_closed",
            SyncError::Timeout(_) => "timeout",
            SyncError::ShutDown => "shut_down",
            SyncError::Other(_) => "other",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Storage(e.to_string())
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
