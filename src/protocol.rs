// Define DNS packet structure and the domain name representation

use std::fmt;
use std::str::FromStr;

use crate::errors::DnsCodecError;

/// Size of the fixed DNS header in bytes
pub const HEADER_LEN: usize = 12;

/// Largest datagram we accept, inbound or from the upstream
pub const MAX_DATAGRAM_SIZE: usize = 4096;

// Response codes https://www.rfc-editor.org/rfc/rfc1035#section-4.1.1
pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_FORMERR: u8 = 1;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;
pub const RCODE_NOTIMP: u8 = 4;
pub const RCODE_REFUSED: u8 = 5;

/// Mnemonic for a response code, for logging
pub fn rcode_name(rcode: u8) -> &'static str {
    match rcode {
        RCODE_NOERROR => "NOERROR",
        RCODE_FORMERR => "FORMERR",
        RCODE_SERVFAIL => "SERVFAIL",
        RCODE_NXDOMAIN => "NXDOMAIN",
        RCODE_NOTIMP => "NOTIMP",
        RCODE_REFUSED => "REFUSED",
        _ => "UNKNOWN",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DnsPacketHeader {
    pub id: u16,      // Identifier, 16 bits
    pub qr: bool,     // Query or Response, 1 bit
    pub opcode: u8,   // Operation code, 4 bits
    pub aa: bool,     // Authoritative answer, 1 bit
    pub tc: bool,     // Truncated, 1 bit
    pub rd: bool,     // Recursion desired, 1 bit
    pub ra: bool,     // Recursion available, 1 bit
    pub z: u8,        // Reserved for future use, 3 bits
    pub rcode: u8,    // Response code, 4 bits
    pub qdcount: u16, // Number of questions, 16 bits
    pub ancount: u16, // Number of answers, 16 bits
    pub nscount: u16, // Number of authority records, 16 bits
    pub arcount: u16, // Number of additional records, 16 bits
}

/// A fully expanded domain name in wire format: length-prefixed labels
/// ending with the zero-length root label.
///
/// Names never contain compression pointers. A name decoded from a
/// compressed packet owns a copy of every label it resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainName(Vec<u8>);

impl DomainName {
    pub const MAX_LEN: usize = 255;
    pub const MAX_LABEL_LEN: usize = 63;

    /// Encode a dotted name such as `www.example.com` into labels.
    /// Empty labels (e.g. from a trailing dot) are skipped.
    pub fn from_dotted(name: &str) -> Result<Self, DnsCodecError> {
        let mut wire = Vec::with_capacity(name.len() + 2);

        for label in name.split('.') {
            // Skip empty labels (e.g., from trailing dots)
            if label.is_empty() {
                continue;
            }

            // Check label length (DNS labels must be <= 63 bytes)
            if label.len() > Self::MAX_LABEL_LEN {
                return Err(DnsCodecError::InvalidDomainName(format!(
                    "Label '{}' exceeds maximum length of {} bytes",
                    label,
                    Self::MAX_LABEL_LEN
                )));
            }

            wire.push(label.len() as u8);
            wire.extend_from_slice(label.as_bytes());
        }

        // Null terminator
        wire.push(0);

        if wire.len() > Self::MAX_LEN {
            return Err(DnsCodecError::NameTooLong { length: wire.len() });
        }

        Ok(DomainName(wire))
    }

    /// Wrap label bytes the parser has already validated.
    pub(crate) fn from_wire(wire: Vec<u8>) -> Self {
        DomainName(wire)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bytes this name occupies when written uncompressed
    pub fn wire_len(&self) -> usize {
        self.0.len()
    }

    pub fn is_root(&self) -> bool {
        self.0 == [0]
    }

    /// Iterate over the label contents, excluding length bytes and the root
    pub fn labels(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut pos = 0;
        std::iter::from_fn(move || {
            let len = *self.0.get(pos)? as usize;
            if len == 0 {
                return None;
            }
            let label = self.0.get(pos + 1..pos + 1 + len)?;
            pos += 1 + len;
            Some(label)
        })
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for (i, label) in self.labels().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            f.write_str(&String::from_utf8_lossy(label))?;
        }
        Ok(())
    }
}

impl FromStr for DomainName {
    type Err = DnsCodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DomainName::from_dotted(s)
    }
}

// Define the DNS question section structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: DomainName, // Domain name, represented as a sequence of "labels"
    pub qtype: u16, // Query type (e.g., A, AAAA, CNAME) https://www.rfc-editor.org/rfc/rfc1035#section-3.2.2
    pub qclass: u16, // Query class (e.g., IN for Internet) https://www.rfc-editor.org/rfc/rfc1035#section-3.2.4
}

impl DnsQuestion {
    pub fn new(name: DomainName, qtype: u16, qclass: u16) -> Self {
        DnsQuestion {
            name,
            qtype,
            qclass,
        }
    }

    pub fn wire_len(&self) -> usize {
        self.name.wire_len() + 4
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.qtype, self.qclass)
    }
}

/// A resource record. RDLENGTH is not stored; it is always `rdata.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsResourceRecord {
    pub name: DomainName, // The domain name encoded as a sequence of labels
    pub rtype: u16, // Resource type (e.g., A, AAAA, CNAME) https://www.rfc-editor.org/rfc/rfc1035#section-3.2.2
    pub rclass: u16, // Resource class (e.g., IN for Internet)
    pub ttl: u32,   // Time to live in seconds
    pub rdata: Vec<u8>, // Resource data (variable length)
}

impl DnsResourceRecord {
    pub fn new(name: DomainName, rtype: u16, rclass: u16, ttl: u32, rdata: Vec<u8>) -> Self {
        DnsResourceRecord {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        }
    }

    pub fn rdlength(&self) -> usize {
        self.rdata.len()
    }

    // name + type + class + ttl + rdlength + rdata
    pub fn wire_len(&self) -> usize {
        self.name.wire_len() + 10 + self.rdata.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: DnsPacketHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsResourceRecord>,
    pub authorities: Vec<DnsResourceRecord>,
    pub additionals: Vec<DnsResourceRecord>,
}

impl DnsPacket {
    /// A packet with the given header and empty sections
    pub fn new(header: DnsPacketHeader) -> Self {
        DnsPacket {
            header,
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Exact number of bytes the uncompressed encoding occupies
    pub fn wire_len(&self) -> usize {
        HEADER_LEN
            + self.questions.iter().map(DnsQuestion::wire_len).sum::<usize>()
            + self
                .records()
                .map(DnsResourceRecord::wire_len)
                .sum::<usize>()
    }

    /// Every resource record in section order
    pub fn records(&self) -> impl Iterator<Item = &DnsResourceRecord> {
        self.answers
            .iter()
            .chain(self.authorities.iter())
            .chain(self.additionals.iter())
    }
}
