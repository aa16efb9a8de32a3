//! Error types and RPC status mapping.
//!
//! DKV defines a small error taxonomy shared by the storage engine, the
//! replication pipeline, and the RPC surface. Every per-request error maps
//! to a numeric code carried in the `Status` envelope; background loops log
//! and continue instead of propagating.

use thiserror::Error;

/// Common DKV error conditions.
#[derive(Debug, Error)]
pub enum DkvError {
    /// Underlying storage engine I/O failure or corruption.
    ///
    /// Not retried by the slave puller; requires operator intervention.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// Requested change number is below the engine's retention floor.
    ///
    /// The slave must bootstrap from a snapshot before tailing again.
    #[error("changes unavailable: requested {requested}, retention floor is {floor}")]
    ChangesUnavailable { requested: u64, floor: u64 },

    /// SaveChanges received a range that does not start at the next
    /// expected change number.
    #[error("non-contiguous changes: expected first change {expected}, got {got}")]
    NonContiguousChanges { expected: u64, got: u64 },

    /// A write or membership call reached a non-leader.
    ///
    /// `leader_hint` is the current leader's node id if known (0 if not).
    #[error("not leader; current leader is node {leader_hint}")]
    NotLeader { leader_hint: u64 },

    /// Discovery received a heartbeat older than the stored timestamp.
    ///
    /// Dropped silently on the wire; surfaced internally for tests.
    #[error("stale update: incoming timestamp {incoming} behind stored {stored}")]
    StaleUpdate { incoming: u64, stored: u64 },

    /// Transport failure reaching a peer.
    #[error("peer unreachable: {message}")]
    Unreachable { message: String },

    /// Malformed request parameters. Terminal; callers must not retry.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Result type using DkvError.
pub type DkvResult<T> = Result<T, DkvError>;

/// Numeric status codes carried in the RPC `Status` envelope.
///
/// Code 0 is OK; the remaining codes follow the error taxonomy.
pub mod status_code {
    pub const OK: i32 = 0;
    pub const STORAGE: i32 = 1;
    pub const CHANGES_UNAVAILABLE: i32 = 2;
    pub const NON_CONTIGUOUS_CHANGES: i32 = 3;
    pub const NOT_LEADER: i32 = 4;
    pub const STALE_UPDATE: i32 = 5;
    pub const UNREACHABLE: i32 = 6;
    pub const INVALID_REQUEST: i32 = 7;
}

impl DkvError {
    /// Create a storage error from any displayable source.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create an invalid-request error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an unreachable error from a transport failure.
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable {
            message: message.into(),
        }
    }

    /// The envelope status code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::Storage { .. } => status_code::STORAGE,
            Self::ChangesUnavailable { .. } => status_code::CHANGES_UNAVAILABLE,
            Self::NonContiguousChanges { .. } => status_code::NON_CONTIGUOUS_CHANGES,
            Self::NotLeader { .. } => status_code::NOT_LEADER,
            Self::StaleUpdate { .. } => status_code::STALE_UPDATE,
            Self::Unreachable { .. } => status_code::UNREACHABLE,
            Self::InvalidRequest { .. } => status_code::INVALID_REQUEST,
        }
    }

    /// Whether the slave puller should retry after this error.
    ///
    /// Storage corruption and invalid requests are terminal; everything
    /// else is transient from the puller's point of view.
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::Storage { .. } | Self::InvalidRequest { .. })
    }
}

impl From<std::io::Error> for DkvError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage {
            message: e.to_string(),
        }
    }
}

/// Reconstruct a DkvError from an envelope status code and message.
///
/// Used by RPC clients to surface server-side failures with the same
/// taxonomy the server raised them with. Structured fields that do not
/// survive the envelope round-trip (expected/got pairs) default to zero.
pub fn error_from_status(code: i32, message: &str) -> DkvError {
    match code {
        status_code::CHANGES_UNAVAILABLE => DkvError::ChangesUnavailable {
            requested: 0,
            floor: 0,
        },
        status_code::NON_CONTIGUOUS_CHANGES => DkvError::NonContiguousChanges {
            expected: 0,
            got: 0,
        },
        status_code::NOT_LEADER => DkvError::NotLeader { leader_hint: 0 },
        status_code::STALE_UPDATE => DkvError::StaleUpdate {
            incoming: 0,
            stored: 0,
        },
        status_code::UNREACHABLE => DkvError::unreachable(message.to_string()),
        status_code::INVALID_REQUEST => DkvError::invalid(message.to_string()),
        _ => DkvError::storage(message.to_string()),
    }
}

/// Map a DkvError to a tonic Status for transport-level failures.
///
/// Per-request errors normally travel inside the response envelope; this
/// mapping is used when a request cannot be answered at all (decode
/// failures, unknown methods).
pub fn to_tonic_status(e: &DkvError) -> tonic::Status {
    match e {
        DkvError::InvalidRequest { message } => tonic::Status::invalid_argument(message.clone()),
        DkvError::NotLeader { .. } => tonic::Status::failed_precondition(e.to_string()),
        DkvError::ChangesUnavailable { .. } => tonic::Status::out_of_range(e.to_string()),
        DkvError::Unreachable { .. } => tonic::Status::unavailable(e.to_string()),
        _ => tonic::Status::internal(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip_through_envelope() {
        let errors = [
            DkvError::storage("disk gone"),
            DkvError::ChangesUnavailable {
                requested: 1,
                floor: 10,
            },
            DkvError::NonContiguousChanges {
                expected: 5,
                got: 9,
            },
            DkvError::NotLeader { leader_hint: 2 },
            DkvError::unreachable("refused"),
            DkvError::invalid("empty key"),
        ];
        for err in errors {
            let rebuilt = error_from_status(err.code(), &err.to_string());
            assert_eq!(rebuilt.code(), err.code());
        }
    }

    #[test]
    fn retriability_split() {
        assert!(!DkvError::storage("bad block").is_retriable());
        assert!(!DkvError::invalid("negative max").is_retriable());
        assert!(DkvError::NotLeader { leader_hint: 0 }.is_retriable());
        assert!(DkvError::unreachable("timeout").is_retriable());
    }
}
