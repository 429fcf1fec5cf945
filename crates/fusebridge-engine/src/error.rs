//! Error types for the protocol engine.

use fusebridge_error::CommonError;
use fusebridge_proto::FuseOpcode;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while framing or validating a kernel message.
///
/// Every variant names a message the engine refuses to dispatch; none of
/// them is fatal to the session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The read returned fewer bytes than a request header.
    #[error("message too short for a request header: {got} bytes")]
    ShortRead {
        /// Bytes actually read.
        got: usize,
    },

    /// The header length field disagrees with the number of bytes read.
    #[error("header declares {declared} bytes but {actual} were read")]
    LengthMismatch {
        /// Length from the request header.
        declared: u32,
        /// Bytes actually read.
        actual: usize,
    },

    /// The opcode is not part of the protocol revision we speak.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),

    /// The payload is too short for the opcode's argument record.
    #[error("truncated payload for {opcode:?}: need {needed} bytes, got {got}")]
    TruncatedPayload {
        /// Opcode whose argument failed to decode.
        opcode: FuseOpcode,
        /// Minimum payload size for the opcode.
        needed: usize,
        /// Bytes actually present.
        got: usize,
    },

    /// A name argument is missing its NUL terminator.
    #[error("malformed name argument for {opcode:?}")]
    BadName {
        /// Opcode whose name argument failed to parse.
        opcode: FuseOpcode,
    },
}

/// Errors on the kernel channel itself.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// An unrecoverable I/O failure; the session must shut down.
    #[error("channel I/O failed: {0}")]
    Fatal(#[source] std::io::Error),
}

/// Errors while dropping or restoring process credentials.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// Dropping effective credentials failed.
    #[error("dropping {what} privilege failed: {source}")]
    Drop {
        /// Which credential ("user" or "group").
        what: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Restoring saved credentials failed.
    #[error("restoring {what} privilege failed: {source}")]
    Restore {
        /// Which credential ("user" or "group").
        what: &'static str,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// A set*id call returned success but the effective ID did not change.
    #[error("{what} privilege change did not take effect")]
    Ineffective {
        /// Which credential ("user" or "group").
        what: &'static str,
    },
}

/// Errors that can occur while running a session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Common errors shared across fusebridge crates.
    #[error(transparent)]
    Common(#[from] CommonError),

    /// Message framing or validation failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Kernel channel failure.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Credential management failure.
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Common(CommonError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::LengthMismatch {
            declared: 64,
            actual: 48,
        };
        assert_eq!(err.to_string(), "header declares 64 bytes but 48 were read");
    }

    #[test]
    fn test_truncated_payload_names_opcode() {
        let err = ProtocolError::TruncatedPayload {
            opcode: FuseOpcode::Open,
            needed: 8,
            got: 3,
        };
        assert!(err.to_string().contains("Open"));
    }

    #[test]
    fn test_engine_error_from_io() {
        let io = std::io::Error::from_raw_os_error(libc::ENODEV);
        let err = EngineError::from(io);
        assert!(matches!(err, EngineError::Common(CommonError::Io(_))));
    }
}
