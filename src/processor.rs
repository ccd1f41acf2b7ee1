use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, warn};

use crate::codec::DnsCodec;
use crate::forwarder::Forwarder;
use crate::parsers::parse_dns_packet_header;
use crate::protocol::{rcode_name, DnsPacket, RCODE_FORMERR};
use crate::response_builder::DnsResponseBuilder;

/// Turn one inbound datagram into the datagram to send back, if any.
///
/// Without a forwarder every question gets a placeholder answer. With one,
/// the questions are resolved upstream. A datagram that fails to decode gets
/// a FORMERR reply when its header is readable and is dropped otherwise.
/// `None` means nothing should be sent.
pub async fn handle_query(datagram: &[u8], forwarder: Option<&Forwarder>) -> Option<BytesMut> {
    let mut codec = DnsCodec::new();
    let mut bytes_mut = BytesMut::from(datagram);

    let response_packet = match codec.decode(&mut bytes_mut) {
        Ok(Some(packet)) => {
            log_packet_details(&packet);
            match forwarder {
                Some(forwarder) => forwarder.resolve(&packet).await,
                None => local_response(&packet),
            }
        }
        Ok(None) => {
            debug!("Empty datagram, ignoring");
            return None;
        }
        Err(e) if e.is_malformed() => {
            warn!("Failed to decode DNS packet: {}", e);
            let (_, header) = parse_dns_packet_header(datagram).ok()?;
            DnsResponseBuilder::error_response(&header, RCODE_FORMERR)
        }
        Err(e) => {
            warn!("Dropping datagram: {}", e);
            return None;
        }
    };

    let mut response_buf = BytesMut::with_capacity(response_packet.wire_len());
    match codec.encode(response_packet, &mut response_buf) {
        Ok(()) => Some(response_buf),
        Err(e) => {
            // Never send a partial or invalid packet
            error!("Failed to encode DNS response: {}", e);
            None
        }
    }
}

/// Answer every question with the placeholder record
fn local_response(query: &DnsPacket) -> DnsPacket {
    let mut dns_response_builder = DnsResponseBuilder::new();

    dns_response_builder
        .build_custom_response(query)
        // leave Packet Identifier (ID), Opcode and RD as in the request
        .with_qr(true)
        .with_authoritative(false)
        .with_recursion_available(false)
        .with_z(0)
        .with_placeholder_answers()
        .build()
}

fn log_packet_details(packet: &DnsPacket) {
    debug!(
        target: "dns_forwarder::packet_details",
        packet_id = packet.header.id,
        query_response = if packet.header.qr { "Response" } else { "Query" },
        opcode = packet.header.opcode,
        authoritative = packet.header.aa,
        truncated = packet.header.tc,
        recursion_desired = packet.header.rd,
        recursion_available = packet.header.ra,
        response_code = rcode_name(packet.header.rcode),
        question_count = packet.header.qdcount,
        answer_count = packet.header.ancount,
        authority_count = packet.header.nscount,
        additional_count = packet.header.arcount,
        "DNS packet header parsed successfully"
    );
}
