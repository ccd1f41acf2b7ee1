use std::net::SocketAddr;
use std::time::Duration;

use nom::error::{ErrorKind, ParseError};

/// Errors that can occur during DNS packet codec operations
#[derive(Debug, thiserror::Error)]
pub enum DnsCodecError {
    #[error("Malformed packet: {kind:?} with {remaining} bytes remaining")]
    MalformedPacket { kind: ErrorKind, remaining: usize },

    #[error("Truncated record: RDLENGTH is {declared} but only {available} bytes remain")]
    TruncatedRecord { declared: u16, available: usize },

    #[error("Compression loop: pointer at offset {offset} exceeds {max_jumps} jumps")]
    CompressionLoop { offset: usize, max_jumps: usize },

    #[error("Compression pointer at offset {offset} targets {target}, outside the packet")]
    PointerOutOfBounds { offset: usize, target: usize },

    #[error("Invalid label type 0x{byte:02X} at offset {offset}")]
    InvalidLabelType { byte: u8, offset: usize },

    #[error("Domain name too long: {length} bytes exceeds maximum of 255")]
    NameTooLong { length: usize },

    #[error("RDATA of type {rtype} declares {declared} bytes but its fields span {consumed}")]
    RdataLengthMismatch {
        rtype: u16,
        declared: u16,
        consumed: usize,
    },

    #[error("Invalid domain name: {0}")]
    InvalidDomainName(String),

    #[error("Record RDATA is {length} bytes, more than a 16-bit RDLENGTH can describe")]
    RecordTooLong { length: usize },

    #[error("Section holds {count} entries, more than a 16-bit count can describe")]
    SectionTooLong { count: usize },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DnsCodecError {
    /// True for the errors a truncated or adversarial input buffer produces,
    /// as opposed to encode-side limits and I/O.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            DnsCodecError::MalformedPacket { .. }
                | DnsCodecError::TruncatedRecord { .. }
                | DnsCodecError::CompressionLoop { .. }
                | DnsCodecError::PointerOutOfBounds { .. }
                | DnsCodecError::InvalidLabelType { .. }
                | DnsCodecError::NameTooLong { .. }
                | DnsCodecError::RdataLengthMismatch { .. }
        )
    }
}

// Lets the nom parsers fail straight into the codec error instead of
// nom's generic error type.
impl<'a> ParseError<&'a [u8]> for DnsCodecError {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        DnsCodecError::MalformedPacket {
            kind,
            remaining: input.len(),
        }
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Errors talking to the upstream resolver. Each one is scoped to a single
/// sub-query and degrades to SERVFAIL for that question.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("Upstream {upstream} did not reply within {timeout:?}")]
    UpstreamTimeout {
        upstream: SocketAddr,
        timeout: Duration,
    },

    #[error("Upstream {upstream} unreachable: {source}")]
    UpstreamUnreachable {
        upstream: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream {upstream} sent a reply that failed to decode: {source}")]
    MalformedReply {
        upstream: SocketAddr,
        #[source]
        source: DnsCodecError,
    },

    #[error("Sub-query could not be encoded: {0}")]
    InvalidQuery(#[source] DnsCodecError),
}
