/// Protocol-level failures. These are always fatal to the single connection
/// that produced them and are never reported back to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    InvalidSecret(String),
    BadDigest,
    UnsupportedConnectionType,
    UnsupportedRecordType(u8),
    UnsupportedTlsVersion(u16),
    UnexpectedHandshakeType(u8),
    Truncated(&'static str),
    HostnameMismatch { expected: String, actual: String },
    TimeSkew { skew_secs: u64 },
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidSecret(reason) => write!(f, "invalid secret format: {reason}"),
            ProtocolError::BadDigest => write!(f, "bad digest"),
            ProtocolError::UnsupportedConnectionType => write!(f, "unsupported connection type"),
            ProtocolError::UnsupportedRecordType(t) => {
                write!(f, "unsupported record type: 0x{t:02x}")
            }
            ProtocolError::UnsupportedTlsVersion(v) => {
                write!(f, "unsupported tls version: 0x{v:04x}")
            }
            ProtocolError::UnexpectedHandshakeType(t) => {
                write!(f, "unexpected handshake type: 0x{t:02x}")
            }
            ProtocolError::Truncated(what) => write!(f, "truncated {what}"),
            ProtocolError::HostnameMismatch { expected, actual } => {
                write!(f, "incorrect hostname {actual:?}, expected {expected:?}")
            }
            ProtocolError::TimeSkew { skew_secs } => {
                write!(f, "time skew of {skew_secs}s is too big")
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for std::io::Error {
    fn from(err: ProtocolError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// Returns the protocol error carried by an io::Error, if any.
pub fn protocol_error(err: &std::io::Error) -> Option<&ProtocolError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<ProtocolError>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_survives_io_conversion() {
        let err: std::io::Error = ProtocolError::BadDigest.into();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert_eq!(protocol_error(&err), Some(&ProtocolError::BadDigest));
    }

    #[test]
    fn test_plain_io_error_has_no_protocol_error() {
        let err = std::io::Error::other("boom");
        assert!(protocol_error(&err).is_none());
    }
}
