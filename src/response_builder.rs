use crate::protocol::{
    DnsPacket, DnsPacketHeader, DnsQuestion, DnsResourceRecord, DomainName, RCODE_NOERROR,
    RCODE_NOTIMP,
};
use std::net::Ipv4Addr;

// DNS Record Type Constants
pub const DNS_TYPE_A: u16 = 1; // IPv4 address

// DNS Class Constants
pub const DNS_CLASS_IN: u16 = 1; // Internet

/// Address every question resolves to when no upstream is configured
pub const PLACEHOLDER_ADDR: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
/// TTL of the placeholder records
pub const PLACEHOLDER_TTL: u32 = 60;

/// Builder for creating DNS response packets
pub struct DnsResponseBuilder {
    // Response header template
    response_header: DnsPacketHeader,
    // Explicit RCODE, otherwise derived from the query opcode
    rcode: Option<u8>,
    answers: Vec<DnsResourceRecord>,
}

impl DnsResponseBuilder {
    /// Create a new response builder
    pub fn new() -> Self {
        Self {
            response_header: DnsPacketHeader {
                id: 0,
                qr: true,  // Always a response
                opcode: 0, // Will be copied from query
                aa: false, // Not authoritative by default
                tc: false, // Not truncated
                rd: false, // Will be copied from query
                ra: false, // No recursion unless an upstream says so
                z: 0,      // Reserved
                rcode: 0,  // NOERROR by default
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            rcode: None,
            answers: Vec::new(),
        }
    }

    /// Build response with custom settings
    pub fn build_custom_response<'a>(
        &'a mut self,
        query_packet: &'a DnsPacket,
    ) -> ResponseBuilder<'a> {
        ResponseBuilder {
            builder: self,
            query_packet,
        }
    }

    /// A response carrying only an error code, for queries whose sections
    /// could not be read. Only the header of the query is needed.
    pub fn error_response(query_header: &DnsPacketHeader, rcode: u8) -> DnsPacket {
        DnsPacket::new(DnsPacketHeader {
            id: query_header.id,
            qr: true,
            opcode: query_header.opcode,
            rd: query_header.rd,
            rcode,
            ..DnsPacketHeader::default()
        })
    }
}

/// Fluent interface for building custom responses
pub struct ResponseBuilder<'a> {
    builder: &'a mut DnsResponseBuilder,
    query_packet: &'a DnsPacket,
}

impl<'a> ResponseBuilder<'a> {
    /// Set response code
    pub fn with_rcode(self, rcode: u8) -> Self {
        self.builder.rcode = Some(rcode);
        self
    }

    /// Set qr (query/response) flag
    pub fn with_qr(self, qr: bool) -> Self {
        self.builder.response_header.qr = qr;
        self
    }

    /// Set reserved bits (z)
    pub fn with_z(self, z: u8) -> Self {
        self.builder.response_header.z = z;
        self
    }

    /// Set authoritative flag
    pub fn with_authoritative(self, aa: bool) -> Self {
        self.builder.response_header.aa = aa;
        self
    }

    /// Set recursion available flag
    pub fn with_recursion_available(self, ra: bool) -> Self {
        self.builder.response_header.ra = ra;
        self
    }

    /// Append an answer record as-is
    pub fn with_answer(self, answer: DnsResourceRecord) -> Self {
        self.builder.answers.push(answer);
        self
    }

    /// Append answer records in order
    pub fn with_answers<I>(self, answers: I) -> Self
    where
        I: IntoIterator<Item = DnsResourceRecord>,
    {
        self.builder.answers.extend(answers);
        self
    }

    /// Add an A record answer (IPv4 address)
    pub fn with_a_answer(self, domain: &DomainName, ip: Ipv4Addr, ttl: u32) -> Self {
        let answer = DnsResourceRecord::new(
            domain.clone(),
            DNS_TYPE_A,
            DNS_CLASS_IN,
            ttl,
            ip.octets().to_vec(),
        );
        self.with_answer(answer)
    }

    /// Answer every question of the query with the placeholder A record
    pub fn with_placeholder_answers(self) -> Self {
        let query_packet = self.query_packet;
        query_packet.questions.iter().fold(self, |builder, question| {
            builder.with_a_answer(&question.name, PLACEHOLDER_ADDR, PLACEHOLDER_TTL)
        })
    }

    /// Build the final response. The questions are always the query's own,
    /// in their original order. Section counts are left to the encoder,
    /// which derives them from the sections and rejects any that overflow.
    pub fn build(self) -> DnsPacket {
        let query_header = &self.query_packet.header;
        let mut header = self.builder.response_header;

        // Copy the query ID, RD and opcode to the response
        header.id = query_header.id;
        header.rd = query_header.rd;
        header.opcode = query_header.opcode;

        // Set rcode: 0 (NOERROR) for standard query, 4 (NOTIMP) otherwise
        header.rcode = self.builder.rcode.unwrap_or(match query_header.opcode {
            0 => RCODE_NOERROR,
            _ => RCODE_NOTIMP,
        });

        let questions: Vec<DnsQuestion> = self.query_packet.questions.clone();
        let answers = std::mem::take(&mut self.builder.answers);

        let built_packet = DnsPacket {
            header,
            questions,
            answers,
            authorities: Vec::new(),
            additionals: Vec::new(),
        };

        tracing::debug!(
            "DNS Response built with custom settings: {:?}",
            built_packet.header
        );

        built_packet
    }
}

impl Default for DnsResponseBuilder {
    fn default() -> Self {
        Self::new()
    }
}
