//! DNS packet codec for tokio_util
//!
//! This module provides Decoder and Encoder implementations for DNS packets.
//! Every buffer handed to the codec is treated as exactly one UDP datagram:
//! decoding consumes the whole buffer, and encoding writes a packet whose
//! length is known before the first byte goes out.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::errors::DnsCodecError;
use crate::parsers::parse_dns_packet;
use crate::protocol::{DnsPacket, DnsPacketHeader, DnsQuestion, DnsResourceRecord, HEADER_LEN};

/// DNS packet codec for datagram transports
#[derive(Debug, Default)]
pub struct DnsCodec;

impl DnsCodec {
    /// Create a new DNS codec instance
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for DnsCodec {
    type Item = DnsPacket;
    type Error = DnsCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        // Take the whole datagram, so a failed decode never leaves bytes
        // behind to be decoded again.
        let datagram = src.split();

        match parse_dns_packet(&datagram) {
            Ok((remaining, packet)) => {
                if !remaining.is_empty() {
                    trace!("Ignoring {} trailing bytes after DNS packet", remaining.len());
                }
                Ok(Some(packet))
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                debug!("DNS parsing error on {} byte datagram: {}", datagram.len(), e);
                Err(e)
            }
            // Only streaming parsers report Incomplete, a datagram is always whole
            Err(nom::Err::Incomplete(_)) => Err(DnsCodecError::MalformedPacket {
                kind: nom::error::ErrorKind::Eof,
                remaining: datagram.len(),
            }),
        }
    }
}

impl Encoder<DnsPacket> for DnsCodec {
    type Error = DnsCodecError;

    fn encode(&mut self, item: DnsPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        debug!("DnsCodec::encode called for packet ID {}", item.header.id);

        // Everything that can fail is checked before writing, so a rejected
        // packet never leaves a partial encoding in `dst`.
        let header = corrected_header(&item)?;
        if let Some(record) = item.records().find(|r| r.rdlength() > u16::MAX as usize) {
            return Err(DnsCodecError::RecordTooLong {
                length: record.rdlength(),
            });
        }

        let wire_len = item.wire_len();
        let start = dst.len();
        dst.reserve(wire_len);

        self.encode_header(&header, dst);

        for question in &item.questions {
            self.encode_question(question, dst);
        }

        for record in item.records() {
            self.encode_record(record, dst);
        }

        debug_assert_eq!(dst.len() - start, wire_len);
        Ok(())
    }
}

/// The packet header with every count rewritten from its section length
fn corrected_header(packet: &DnsPacket) -> Result<DnsPacketHeader, DnsCodecError> {
    fn count(len: usize) -> Result<u16, DnsCodecError> {
        u16::try_from(len).map_err(|_| DnsCodecError::SectionTooLong { count: len })
    }

    let mut header = packet.header;
    header.qdcount = count(packet.questions.len())?;
    header.ancount = count(packet.answers.len())?;
    header.nscount = count(packet.authorities.len())?;
    header.arcount = count(packet.additionals.len())?;
    Ok(header)
}

impl DnsCodec {
    /// Encode DNS packet header into the destination buffer
    fn encode_header(&self, header: &DnsPacketHeader, dst: &mut BytesMut) {
        dst.reserve(HEADER_LEN);

        // ID (16 bits)
        dst.put_u16(header.id);

        // Flags (16 bits total)
        let mut flags: u16 = 0;

        // QR (1 bit) - bit 15
        if header.qr {
            flags |= 0x8000;
        }

        // OPCODE (4 bits) - bits 14-11
        flags |= ((header.opcode as u16) & 0x0F) << 11;

        // AA (1 bit) - bit 10
        if header.aa {
            flags |= 0x0400;
        }

        // TC (1 bit) - bit 9
        if header.tc {
            flags |= 0x0200;
        }

        // RD (1 bit) - bit 8
        if header.rd {
            flags |= 0x0100;
        }

        // RA (1 bit) - bit 7
        if header.ra {
            flags |= 0x0080;
        }

        // Z (3 bits) - bits 6-4, passed through as given
        flags |= ((header.z as u16) & 0x07) << 4;

        // RCODE (4 bits) - bits 3-0
        flags |= (header.rcode as u16) & 0x0F;

        dst.put_u16(flags);

        dst.put_u16(header.qdcount);
        dst.put_u16(header.ancount);
        dst.put_u16(header.nscount);
        dst.put_u16(header.arcount);
    }

    fn encode_question(&self, question: &DnsQuestion, dst: &mut BytesMut) {
        // Names are always written in full, never compressed
        dst.put_slice(question.name.as_bytes());
        dst.put_u16(question.qtype);
        dst.put_u16(question.qclass);
    }

    // Caller has already checked the RDATA length fits in 16 bits
    fn encode_record(&self, record: &DnsResourceRecord, dst: &mut BytesMut) {
        dst.put_slice(record.name.as_bytes());
        dst.put_u16(record.rtype);
        dst.put_u16(record.rclass);
        dst.put_u32(record.ttl);
        dst.put_u16(record.rdlength() as u16);
        dst.put_slice(&record.rdata);
    }
}
