//! Error types for the RTR client.
//!
//! Every failure class that can terminate a session has its own variant, so
//! callers can distinguish transport trouble from protocol violations and
//! from errors reported by the cache itself.

use std::io;
use thiserror::Error;

/// Terminating error of an RTR session.
#[derive(Error, Debug)]
pub enum RtrError {
    /// I/O failure on the underlying connection.
    #[error("I/O error on RTR transport: {0}")]
    Io(io::Error),

    /// The cache closed the connection mid-PDU or between PDUs.
    #[error("connection closed by the cache")]
    Closed,

    /// Inbound PDU carried a version byte other than the configured one.
    #[error("cache sent protocol version {got}, expected {expected}")]
    VersionMismatch { expected: u8, got: u8 },

    /// The version requested at dial time is not 0 or 1.
    #[error("unsupported RTR protocol version {0}")]
    UnsupportedVersion(u8),

    /// PDU type code not assigned by the protocol.
    #[error("unknown PDU type {0}")]
    UnknownPduType(u8),

    /// A known PDU type that only a client may send (Serial Query, Reset
    /// Query) arrived from the cache.
    #[error("cache sent a client-side query PDU (type {0})")]
    UnexpectedPduType(u8),

    /// Header length field smaller than the header itself.
    #[error("PDU header announces invalid length {0}")]
    BadLength(u32),

    /// Header length field above the 65536-octet ceiling.
    #[error("PDU length {0} exceeds the 65536 octet ceiling")]
    Oversized(u32),

    /// PDU length does not match the expected size for its type.
    #[error("PDU type {pdu_type} has length {got}, expected {expected}")]
    LengthMismatch {
        pdu_type: u8,
        expected: u32,
        got: u32,
    },

    /// Prefix PDU violating `length <= max_length <= address width`.
    #[error("invalid prefix: length {length} exceeds max length {max_length}")]
    InvalidPrefix { length: u8, max_length: u8 },

    /// Error Report whose nested length fields overrun the PDU.
    #[error("malformed Error Report PDU")]
    MalformedErrorReport,

    /// Router Key PDU received under version 0, where it does not exist.
    #[error("Router Key PDU is not valid under protocol version 0")]
    RouterKeyVersion,

    /// A PDU carried a session id different from the established one.
    #[error("session id {got} does not match established id {expected}; cache restarted?")]
    SessionIdMismatch { expected: u16, got: u16 },

    /// The cache terminated the session with an Error Report.
    #[error("cache reported error #{code}: \"{text}\"")]
    ErrorReport { code: u16, text: String },

    /// A Serial Query was due before any End of Data established the
    /// session id and serial it needs.
    #[error("serial query requires an established session id and serial number")]
    MissingSessionState,
}

impl From<io::Error> for RtrError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            RtrError::Closed
        } else {
            RtrError::Io(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_closed() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let err: RtrError = io_err.into();
        assert!(matches!(err, RtrError::Closed));

        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: RtrError = io_err.into();
        assert!(matches!(err, RtrError::Io(_)));
    }

    #[test]
    fn test_session_id_mismatch_names_both_ids() {
        let err = RtrError::SessionIdMismatch {
            expected: 0x1111,
            got: 0x2222,
        };
        let text = err.to_string();
        assert!(text.contains("4369"));
        assert!(text.contains("8738"));
        assert!(text.contains("cache restarted?"));
    }

    #[test]
    fn test_error_report_carries_code_and_text() {
        let err = RtrError::ErrorReport {
            code: 4,
            text: "Withdrawal of unknown record".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("#4"));
        assert!(text.contains("Withdrawal of unknown record"));
    }
}
