use nom::{
    self,
    bytes::complete::take,
    number::complete::{be_u16, be_u32, be_u8},
    IResult, Parser,
};

use crate::errors::DnsCodecError;
use crate::protocol::{
    DnsPacket, DnsPacketHeader, DnsQuestion, DnsResourceRecord, DomainName, HEADER_LEN,
};

/// Maximum number of compression pointers followed while expanding one name.
const MAX_POINTER_JUMPS: usize = 64;

// Smallest possible question: root name + type + class
const MIN_QUESTION_LEN: usize = 5;
// Smallest possible record: root name + type + class + ttl + rdlength
const MIN_RECORD_LEN: usize = 11;

// Record types whose RDATA holds domain names that senders may compress
// https://www.rfc-editor.org/rfc/rfc1035#section-3.3
const TYPE_NS: u16 = 2;
const TYPE_MD: u16 = 3;
const TYPE_MF: u16 = 4;
const TYPE_CNAME: u16 = 5;
const TYPE_SOA: u16 = 6;
const TYPE_MB: u16 = 7;
const TYPE_MG: u16 = 8;
const TYPE_MR: u16 = 9;
const TYPE_PTR: u16 = 12;
const TYPE_MX: u16 = 15;
const TYPE_DNAME: u16 = 39;

// SOA serial, refresh, retry, expire and minimum
const SOA_TIMERS_LEN: usize = 20;

type ParseResult<'a, T> = IResult<&'a [u8], T, DnsCodecError>;

// Field readers pinned to our error type so `?` never has to guess it.
fn octet(input: &[u8]) -> ParseResult<'_, u8> {
    be_u8(input)
}

fn word(input: &[u8]) -> ParseResult<'_, u16> {
    be_u16(input)
}

fn dword(input: &[u8]) -> ParseResult<'_, u32> {
    be_u32(input)
}

fn bytes(input: &[u8], count: usize) -> ParseResult<'_, &[u8]> {
    take(count).parse(input)
}

/// Offset of `input` within the packet it was sliced from
fn offset_of(full_packet: &[u8], input: &[u8]) -> usize {
    full_packet.len() - input.len()
}

pub fn parse_dns_packet_header(input: &[u8]) -> ParseResult<'_, DnsPacketHeader> {
    let (input, id) = word(input)?;
    // take 1 bit for qr, 4 bits for opcode, 1 bit for aa,
    // 1 bit for tc, 1 bit for rd, 1 bit for ra, 3 bits for z,
    // and 4 bits for rcode
    let (input, flags) = word(input)?;
    let (input, qdcount) = word(input)?;
    let (input, ancount) = word(input)?;
    let (input, nscount) = word(input)?;
    let (input, arcount) = word(input)?;

    let header = DnsPacketHeader {
        id,
        // qr (Query/Response): bit 15
        qr: (flags & 0x8000) != 0,
        // opcode: bits 11-14
        opcode: ((flags & 0x7800) >> 11) as u8,
        // aa (Authoritative Answer): bit 10
        aa: (flags & 0x0400) != 0,
        // tc (Truncated): bit 9
        tc: (flags & 0x0200) != 0,
        // rd (Recursion Desired): bit 8
        rd: (flags & 0x0100) != 0,
        // ra (Recursion Available): bit 7
        ra: (flags & 0x0080) != 0,
        // z (Reserved for future use): bits 4-6
        z: ((flags & 0x0070) >> 4) as u8,
        // rcode (Response Code): bits 0-3
        rcode: (flags & 0x000F) as u8,
        qdcount,
        ancount,
        nscount,
        arcount,
    };

    Ok((input, header))
}

/// Appends the labels found at `input` to `name`, following compression
/// pointers into `full_packet`.
///
/// Ordinary labels are consumed in a loop. A pointer recurses at its target
/// with `jumps + 1` and ends the name; the returned cursor sits exactly two
/// bytes past the pointer no matter how much the recursion read.
///
/// where 'p: 'i: the full packet outlives the slice being parsed, so a
/// slice taken at a pointer target can stand in for the input.
fn parse_name_into<'p, 'i>(
    full_packet: &'p [u8],
    mut input: &'i [u8],
    jumps: usize,
    name: &mut Vec<u8>,
) -> ParseResult<'i, ()>
where
    'p: 'i,
{
    loop {
        let (i, length) = octet(input)?;

        match length {
            0 => {
                name.push(0);
                return Ok((i, ()));
            }
            l if (l & 0b1100_0000) == 0b1100_0000 => {
                let pointer_offset = offset_of(full_packet, input);
                let (i, next_byte) = octet(i)?;

                if jumps >= MAX_POINTER_JUMPS {
                    return Err(nom::Err::Failure(DnsCodecError::CompressionLoop {
                        offset: pointer_offset,
                        max_jumps: MAX_POINTER_JUMPS,
                    }));
                }

                let target = (u16::from_be_bytes([l, next_byte]) & 0x3FFF) as usize;
                let Some(jump) = full_packet.get(target..) else {
                    return Err(nom::Err::Failure(DnsCodecError::PointerOutOfBounds {
                        offset: pointer_offset,
                        target,
                    }));
                };

                parse_name_into(full_packet, jump, jumps + 1, name)?;
                return Ok((i, ()));
            }
            l if (l & 0b1100_0000) != 0 => {
                // 0b01 and 0b10 prefixes are reserved label types
                return Err(nom::Err::Failure(DnsCodecError::InvalidLabelType {
                    byte: l,
                    offset: offset_of(full_packet, input),
                }));
            }
            l => {
                let (i, label) = bytes(i, l as usize)?;

                // +1 for the root label still to come
                let length = name.len() + 1 + label.len() + 1;
                if length > DomainName::MAX_LEN {
                    return Err(nom::Err::Failure(DnsCodecError::NameTooLong { length }));
                }

                name.push(l);
                name.extend_from_slice(label);
                input = i;
            }
        }
    }
}

/// Parse a domain name, expanding any compression pointers.
/// Requires the full packet to resolve pointer offsets.
pub fn parse_domain_name<'p, 'i>(
    full_packet: &'p [u8],
    input: &'i [u8],
) -> ParseResult<'i, DomainName>
where
    'p: 'i,
{
    let mut wire = Vec::new();
    let (i, ()) = parse_name_into(full_packet, input, 0, &mut wire)?;
    Ok((i, DomainName::from_wire(wire)))
}

/// Parse a complete DNS question section, requires the full packet for compression.
fn parse_dns_question<'p, 'i>(full_packet: &'p [u8], input: &'i [u8]) -> ParseResult<'i, DnsQuestion>
where
    'p: 'i,
{
    let (input, name) = parse_domain_name(full_packet, input)?;
    let (input, qtype) = word(input)?;
    let (input, qclass) = word(input)?;

    Ok((input, DnsQuestion::new(name, qtype, qclass)))
}

/// Parse one resource record. Names embedded in the RDATA of the well-known
/// types are expanded, so the record stays valid when written into another
/// packet. Any other RDATA is copied verbatim.
fn parse_resource_record<'p, 'i>(
    full_packet: &'p [u8],
    input: &'i [u8],
) -> ParseResult<'i, DnsResourceRecord>
where
    'p: 'i,
{
    let (input, name) = parse_domain_name(full_packet, input)?;
    let (input, rtype) = word(input)?;
    let (input, rclass) = word(input)?;
    let (input, ttl) = dword(input)?;
    let (input, rdlength) = word(input)?;

    if input.len() < rdlength as usize {
        return Err(nom::Err::Failure(DnsCodecError::TruncatedRecord {
            declared: rdlength,
            available: input.len(),
        }));
    }
    let (input, rdata) = parse_rdata(full_packet, input, rtype, rdlength)?;

    Ok((
        input,
        DnsResourceRecord::new(name, rtype, rclass, ttl, rdata),
    ))
}

/// Read `rdlength` bytes of RDATA, rewriting compressed names as plain labels.
///
/// The fields of a known type must cover exactly `rdlength` bytes; a name
/// that runs past the end of the RDATA is an error, not a read into the
/// next record.
fn parse_rdata<'p, 'i>(
    full_packet: &'p [u8],
    input: &'i [u8],
    rtype: u16,
    rdlength: u16,
) -> ParseResult<'i, Vec<u8>>
where
    'p: 'i,
{
    let declared = rdlength as usize;
    // Empty RDATA (e.g. UPDATE prerequisites) carries no names
    if declared == 0 {
        return Ok((input, Vec::new()));
    }

    let mut rdata = Vec::with_capacity(declared);
    let rest = match rtype {
        TYPE_NS | TYPE_MD | TYPE_MF | TYPE_CNAME | TYPE_MB | TYPE_MG | TYPE_MR | TYPE_PTR
        | TYPE_DNAME => {
            let (rest, target) = parse_domain_name(full_packet, input)?;
            rdata.extend_from_slice(target.as_bytes());
            rest
        }
        TYPE_MX => {
            let (rest, preference) = bytes(input, 2)?;
            let (rest, exchange) = parse_domain_name(full_packet, rest)?;
            rdata.extend_from_slice(preference);
            rdata.extend_from_slice(exchange.as_bytes());
            rest
        }
        TYPE_SOA => {
            let (rest, mname) = parse_domain_name(full_packet, input)?;
            let (rest, rname) = parse_domain_name(full_packet, rest)?;
            let (rest, timers) = bytes(rest, SOA_TIMERS_LEN)?;
            rdata.extend_from_slice(mname.as_bytes());
            rdata.extend_from_slice(rname.as_bytes());
            rdata.extend_from_slice(timers);
            rest
        }
        _ => {
            let (rest, raw) = bytes(input, declared)?;
            return Ok((rest, raw.to_vec()));
        }
    };

    let consumed = offset_of(input, rest);
    if consumed != declared {
        return Err(nom::Err::Failure(DnsCodecError::RdataLengthMismatch {
            rtype,
            declared: rdlength,
            consumed,
        }));
    }

    Ok((rest, rdata))
}

fn parse_records<'p, 'i>(
    full_packet: &'p [u8],
    mut input: &'i [u8],
    count: u16,
) -> ParseResult<'i, Vec<DnsResourceRecord>>
where
    'p: 'i,
{
    // The count is attacker controlled; never reserve more than could fit.
    let mut records = Vec::with_capacity((count as usize).min(input.len() / MIN_RECORD_LEN));
    for _ in 0..count {
        let (i, record) = parse_resource_record(full_packet, input)?;
        records.push(record);
        input = i;
    }
    Ok((input, records))
}

// Parse a complete DNS packet
pub fn parse_dns_packet(input: &[u8]) -> ParseResult<'_, DnsPacket> {
    // Keep a reference to the start of the packet for handling compression offsets.
    let full_packet = input;

    let (mut remaining_input, header) = parse_dns_packet_header(full_packet)?;
    debug_assert_eq!(offset_of(full_packet, remaining_input), HEADER_LEN);

    let mut questions = Vec::with_capacity(
        (header.qdcount as usize).min(remaining_input.len() / MIN_QUESTION_LEN),
    );
    for _ in 0..header.qdcount {
        let (i, question) = parse_dns_question(full_packet, remaining_input)?;
        questions.push(question);
        remaining_input = i;
    }

    let (remaining_input, answers) = parse_records(full_packet, remaining_input, header.ancount)?;
    let (remaining_input, authorities) =
        parse_records(full_packet, remaining_input, header.nscount)?;
    let (remaining_input, additionals) =
        parse_records(full_packet, remaining_input, header.arcount)?;

    let packet = DnsPacket {
        header,
        questions,
        answers,
        authorities,
        additionals,
    };

    Ok((remaining_input, packet))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(qdcount: u16, ancount: u16) -> Vec<u8> {
        let mut bytes = vec![0x04, 0xD2, 0x01, 0x00];
        bytes.extend_from_slice(&qdcount.to_be_bytes());
        bytes.extend_from_slice(&ancount.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes
    }

    fn failure(result: ParseResult<'_, DnsPacket>) -> DnsCodecError {
        match result {
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => e,
            other => panic!("expected a parse failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_header_flags() {
        // ID 0x1234, QR=1 OPCODE=2 AA=1 TC=0 RD=1, RA=1 Z=5 RCODE=3
        let bytes = [
            0x12, 0x34, 0b1001_0101, 0b1101_0011, 0, 1, 0, 2, 0, 3, 0, 4,
        ];
        let (rest, header) = parse_dns_packet_header(&bytes).unwrap();

        assert!(rest.is_empty());
        assert_eq!(header.id, 0x1234);
        assert!(header.qr);
        assert_eq!(header.opcode, 2);
        assert!(header.aa);
        assert!(!header.tc);
        assert!(header.rd);
        assert!(header.ra);
        assert_eq!(header.z, 5);
        assert_eq!(header.rcode, 3);
        assert_eq!(
            (header.qdcount, header.ancount, header.nscount, header.arcount),
            (1, 2, 3, 4)
        );
    }

    #[test]
    fn test_parse_five_byte_packet_fails() {
        let err = failure(parse_dns_packet(&[0x12, 0x34, 0x01, 0x00, 0x00]));
        assert!(matches!(err, DnsCodecError::MalformedPacket { .. }));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_parse_missing_questions_fails() {
        // Header claims five questions but nothing follows
        let err = failure(parse_dns_packet(&header_bytes(5, 0)));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_parse_compressed_second_question() {
        let mut packet = header_bytes(2, 0);
        // Question 1 at offset 12: codecrafters.io A IN
        packet.extend_from_slice(b"\x0ccodecrafters\x02io\x00");
        packet.extend_from_slice(&[0, 1, 0, 1]);
        // Question 2: pointer to offset 12, A IN
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1]);

        let (rest, parsed) = parse_dns_packet(&packet).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.questions.len(), 2);
        assert_eq!(parsed.questions[0].name, parsed.questions[1].name);
        assert_eq!(parsed.questions[1].name.to_string(), "codecrafters.io");
        assert_eq!(
            parsed.questions[1].name.as_bytes(),
            b"\x0ccodecrafters\x02io\x00"
        );
    }

    #[test]
    fn test_parse_multi_level_compression() {
        let mut packet = header_bytes(3, 0);
        // offset 12: example.com
        packet.extend_from_slice(b"\x07example\x03com\x00");
        packet.extend_from_slice(&[0, 1, 0, 1]);
        // offset 29: www + pointer to 12
        packet.extend_from_slice(b"\x03www\xC0\x0C");
        packet.extend_from_slice(&[0, 1, 0, 1]);
        // offset 39: api + pointer to 29, which itself points to 12
        packet.extend_from_slice(b"\x03api\xC0\x1D");
        packet.extend_from_slice(&[0, 28, 0, 1]);

        let (rest, parsed) = parse_dns_packet(&packet).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.questions[1].name.to_string(), "www.example.com");
        assert_eq!(parsed.questions[2].name.to_string(), "api.www.example.com");
        assert_eq!(parsed.questions[2].qtype, 28);
    }

    #[test]
    fn test_pointer_advances_cursor_by_two() {
        let mut packet = header_bytes(0, 0);
        packet.extend_from_slice(b"\x07example\x03com\x00");
        let pointer_at = packet.len();
        packet.extend_from_slice(b"\x03www\xC0\x0C\xAA\xBB");

        let (rest, name) = parse_domain_name(&packet, &packet[pointer_at..]).unwrap();
        assert_eq!(name.to_string(), "www.example.com");
        assert_eq!(rest, &[0xAA, 0xBB][..]);
    }

    #[test]
    fn test_self_pointer_is_a_compression_loop() {
        let mut packet = header_bytes(1, 0);
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1]);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(
            err,
            DnsCodecError::CompressionLoop { offset: 12, .. }
        ));
    }

    #[test]
    fn test_forward_pointer_cycle_is_rejected() {
        let mut packet = header_bytes(1, 0);
        // offset 12 points to 14, offset 14 points back to 12
        packet.extend_from_slice(&[0xC0, 0x0E, 0xC0, 0x0C, 0, 1, 0, 1]);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(err, DnsCodecError::CompressionLoop { .. }));
    }

    #[test]
    fn test_growing_label_loop_hits_name_limit() {
        let mut packet = header_bytes(1, 0);
        // "a" followed by a pointer back to itself grows without bound
        packet.extend_from_slice(&[1, b'a', 0xC0, 0x0C, 0, 1, 0, 1]);

        let err = failure(parse_dns_packet(&packet));
        assert!(err.is_malformed());
    }

    #[test]
    fn test_pointer_out_of_bounds() {
        let mut packet = header_bytes(1, 0);
        packet.extend_from_slice(&[0xC1, 0xFF, 0, 1, 0, 1]);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(
            err,
            DnsCodecError::PointerOutOfBounds { target: 0x1FF, .. }
        ));
    }

    #[test]
    fn test_reserved_label_type_rejected() {
        let mut packet = header_bytes(1, 0);
        packet.extend_from_slice(&[0x41, b'a', 0, 0, 1, 0, 1]);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(
            err,
            DnsCodecError::InvalidLabelType { byte: 0x41, offset: 12 }
        ));
    }

    #[test]
    fn test_label_running_past_end_fails() {
        let mut packet = header_bytes(1, 0);
        packet.extend_from_slice(&[10, b'a', b'b']);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(err, DnsCodecError::MalformedPacket { .. }));
    }

    #[test]
    fn test_parse_answer_with_compressed_name() {
        let mut packet = header_bytes(1, 1);
        packet.extend_from_slice(b"\x07example\x03com\x00");
        packet.extend_from_slice(&[0, 1, 0, 1]);
        // Answer: pointer to question name, A IN, ttl 300, rdlength 4
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0x01, 0x2C, 0, 4]);
        packet.extend_from_slice(&[93, 184, 216, 34]);

        let (rest, parsed) = parse_dns_packet(&packet).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.answers.len(), 1);

        let answer = &parsed.answers[0];
        assert_eq!(answer.name, parsed.questions[0].name);
        assert_eq!(answer.rtype, 1);
        assert_eq!(answer.rclass, 1);
        assert_eq!(answer.ttl, 300);
        assert_eq!(answer.rdlength(), 4);
        assert_eq!(answer.rdata, vec![93, 184, 216, 34]);
    }

    #[test]
    fn test_truncated_rdata_fails() {
        let mut packet = header_bytes(0, 1);
        packet.extend_from_slice(b"\x07example\x03com\x00");
        packet.extend_from_slice(&[0, 1, 0, 1, 0, 0, 0, 60, 0, 4]);
        packet.extend_from_slice(&[10, 0]);

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(
            err,
            DnsCodecError::TruncatedRecord {
                declared: 4,
                available: 2
            }
        ));
    }

    #[test]
    fn test_cname_rdata_is_expanded() {
        let mut packet = header_bytes(1, 1);
        packet.extend_from_slice(b"\x06second\x04test\x00");
        packet.extend_from_slice(&[0, 5, 0, 1]);
        // Answer: owner -> question, CNAME IN, ttl 60, rdata "www" + pointer to offset 12
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 5, 0, 1, 0, 0, 0, 60, 0, 6]);
        packet.extend_from_slice(b"\x03www\xC0\x0C");

        let (rest, parsed) = parse_dns_packet(&packet).unwrap();
        assert!(rest.is_empty());

        let answer = &parsed.answers[0];
        let expected = DomainName::from_dotted("www.second.test").unwrap();
        assert_eq!(answer.rdata, expected.as_bytes());
        assert_eq!(answer.rdlength(), 17);
    }

    #[test]
    fn test_mx_and_soa_rdata_are_expanded() {
        let mut packet = header_bytes(1, 2);
        packet.extend_from_slice(b"\x07example\x03com\x00");
        packet.extend_from_slice(&[0, 15, 0, 1]);
        // MX: preference 10, exchange "mail" + pointer
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 15, 0, 1, 0, 0, 0, 60, 0, 9]);
        packet.extend_from_slice(&[0, 10]);
        packet.extend_from_slice(b"\x04mail\xC0\x0C");
        // SOA: mname "ns1" + pointer, rname "hostmaster" + pointer, five timers
        packet.extend_from_slice(&[0xC0, 0x0C, 0, 6, 0, 1, 0, 0, 0, 60, 0, 39]);
        packet.extend_from_slice(b"\x03ns1\xC0\x0C");
        packet.extend_from_slice(b"\x0Ahostmaster\xC0\x0C");
        let timers: Vec<u8> = (1..=20).collect();
        packet.extend_from_slice(&timers);

        let (_, parsed) = parse_dns_packet(&packet).unwrap();

        let mut mx = vec![0, 10];
        mx.extend_from_slice(DomainName::from_dotted("mail.example.com").unwrap().as_bytes());
        assert_eq!(parsed.answers[0].rdata, mx);

        let mut soa = DomainName::from_dotted("ns1.example.com").unwrap().as_bytes().to_vec();
        soa.extend_from_slice(DomainName::from_dotted("hostmaster.example.com").unwrap().as_bytes());
        soa.extend_from_slice(&timers);
        assert_eq!(parsed.answers[1].rdata, soa);
    }

    #[test]
    fn test_unknown_rdata_is_kept_verbatim() {
        let mut packet = header_bytes(0, 1);
        packet.push(0);
        // TXT-like type 16 whose bytes happen to look like a pointer
        packet.extend_from_slice(&[0, 16, 0, 1, 0, 0, 0, 60, 0, 3]);
        packet.extend_from_slice(&[2, 0xC0, 0x0C]);

        let (_, parsed) = parse_dns_packet(&packet).unwrap();
        assert_eq!(parsed.answers[0].rdata, vec![2, 0xC0, 0x0C]);
    }

    #[test]
    fn test_rdata_name_must_fill_rdlength() {
        // CNAME rdata claims 8 bytes but the name ends after 5
        let mut packet = header_bytes(0, 1);
        packet.push(0);
        packet.extend_from_slice(&[0, 5, 0, 1, 0, 0, 0, 60, 0, 8]);
        packet.extend_from_slice(b"\x03www\x00\xAA\xBB\xCC");

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(
            err,
            DnsCodecError::RdataLengthMismatch {
                rtype: 5,
                declared: 8,
                consumed: 5
            }
        ));
        assert!(err.is_malformed());

        // And a name may not spill into the bytes after the rdata
        let mut packet = header_bytes(0, 1);
        packet.push(0);
        packet.extend_from_slice(&[0, 5, 0, 1, 0, 0, 0, 60, 0, 2]);
        packet.extend_from_slice(b"\x03www\x00");

        let err = failure(parse_dns_packet(&packet));
        assert!(matches!(err, DnsCodecError::RdataLengthMismatch { consumed: 5, .. }));
    }

    #[test]
    fn test_empty_cname_rdata_is_accepted() {
        let mut packet = header_bytes(0, 1);
        packet.push(0);
        packet.extend_from_slice(&[0, 5, 0, 1, 0, 0, 0, 0, 0, 0]);

        let (_, parsed) = parse_dns_packet(&packet).unwrap();
        assert!(parsed.answers[0].rdata.is_empty());
    }

    #[test]
    fn test_huge_counts_do_not_overallocate() {
        // 65535 claimed answers with no bytes behind them
        let err = failure(parse_dns_packet(&header_bytes(0, u16::MAX)));
        assert!(err.is_malformed());
    }
}
