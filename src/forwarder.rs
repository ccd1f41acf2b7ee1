//! Forwarding of client queries to a single upstream resolver.
//!
//! A query with N questions is split into N single-question sub-queries that
//! run concurrently, each on its own ephemeral socket with its own timeout.
//! Outcomes are tagged with the index of the question they answer and the
//! response is reassembled in question order, whatever order the upstream
//! replies arrive in.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use bytes::BytesMut;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::codec::DnsCodec;
use crate::errors::ForwardError;
use crate::protocol::{
    rcode_name, DnsPacket, DnsPacketHeader, DnsQuestion, DnsResourceRecord, MAX_DATAGRAM_SIZE,
    RCODE_NOERROR, RCODE_SERVFAIL,
};
use crate::response_builder::DnsResponseBuilder;

/// How long to wait for each upstream reply unless configured otherwise
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Chooses the RCODE of a reassembled response.
///
/// A failed sub-query (timeout, transport error, undecodable reply) always
/// yields SERVFAIL, whichever policy is selected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RcodePolicy {
    /// First non-zero RCODE the upstream returned, in question order.
    #[default]
    PassThrough,
    /// Always this RCODE.
    Fixed(u8),
}

impl RcodePolicy {
    fn resolve(&self, outcomes: &[QuestionOutcome]) -> u8 {
        if outcomes.iter().any(|o| o.failed) {
            return RCODE_SERVFAIL;
        }
        match self {
            RcodePolicy::PassThrough => outcomes
                .iter()
                .map(|o| o.rcode)
                .find(|&rcode| rcode != RCODE_NOERROR)
                .unwrap_or(RCODE_NOERROR),
            RcodePolicy::Fixed(rcode) => *rcode,
        }
    }
}

impl FromStr for RcodePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passthrough" | "pass-through" => Ok(RcodePolicy::PassThrough),
            _ => match s.parse::<u8>() {
                Ok(rcode) if rcode <= 0x0F => Ok(RcodePolicy::Fixed(rcode)),
                _ => Err(format!(
                    "Invalid RCODE policy: '{}'. Expected 'passthrough' or a code between 0 and 15",
                    s
                )),
            },
        }
    }
}

impl fmt::Display for RcodePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcodePolicy::PassThrough => f.write_str("passthrough"),
            RcodePolicy::Fixed(rcode) => write!(f, "{}", rcode),
        }
    }
}

/// What one sub-query produced
#[derive(Debug)]
struct QuestionOutcome {
    index: usize,
    rcode: u8,
    recursion_available: bool,
    failed: bool,
    answers: Vec<DnsResourceRecord>,
}

/// Build the single-question query sent upstream for `question`.
/// Reuses the client's ID and RD bit; every other field, opcode included,
/// is zeroed.
pub fn build_sub_query(header: &DnsPacketHeader, question: &DnsQuestion) -> DnsPacket {
    let mut sub_query = DnsPacket::new(DnsPacketHeader {
        id: header.id,
        rd: header.rd,
        qdcount: 1,
        ..DnsPacketHeader::default()
    });
    sub_query.questions.push(question.clone());
    sub_query
}

#[derive(Debug, Clone)]
pub struct Forwarder {
    upstream: SocketAddr,
    timeout: Duration,
    rcode_policy: RcodePolicy,
}

impl Forwarder {
    pub fn new(upstream: SocketAddr) -> Self {
        Self {
            upstream,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            rcode_policy: RcodePolicy::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_rcode_policy(mut self, rcode_policy: RcodePolicy) -> Self {
        self.rcode_policy = rcode_policy;
        self
    }

    pub fn upstream(&self) -> SocketAddr {
        self.upstream
    }

    /// Resolve every question of `query` upstream and reassemble one response.
    ///
    /// Never fails: questions whose sub-query failed contribute no answers and
    /// turn the response into SERVFAIL, while the other answers are kept.
    pub async fn resolve(&self, query: &DnsPacket) -> DnsPacket {
        let mut pending: FuturesUnordered<_> = query
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| self.forward_question(index, &query.header, question))
            .collect();

        let mut slots: Vec<Option<QuestionOutcome>> =
            (0..query.questions.len()).map(|_| None).collect();
        while let Some(outcome) = pending.next().await {
            let index = outcome.index;
            slots[index] = Some(outcome);
        }
        let outcomes: Vec<QuestionOutcome> = slots.into_iter().flatten().collect();

        let rcode = self.rcode_policy.resolve(&outcomes);
        let recursion_available = outcomes.iter().any(|o| o.recursion_available);

        let mut builder = DnsResponseBuilder::new();
        let response = builder
            .build_custom_response(query)
            .with_qr(true)
            .with_recursion_available(recursion_available)
            .with_rcode(rcode)
            .with_answers(outcomes.into_iter().flat_map(|o| o.answers))
            .build();

        debug!(
            "Reassembled response {} with {} questions, {} answers, rcode {}",
            response.header.id,
            response.questions.len(),
            response.answers.len(),
            rcode_name(rcode)
        );

        response
    }

    async fn forward_question(
        &self,
        index: usize,
        header: &DnsPacketHeader,
        question: &DnsQuestion,
    ) -> QuestionOutcome {
        debug!("Forwarding question {}: {} to {}", index + 1, question, self.upstream);

        match self.exchange(build_sub_query(header, question)).await {
            Ok(reply) => {
                debug!(
                    "Upstream answered {} with {} answers, rcode {}",
                    question.name,
                    reply.answers.len(),
                    rcode_name(reply.header.rcode)
                );
                QuestionOutcome {
                    index,
                    rcode: reply.header.rcode,
                    recursion_available: reply.header.ra,
                    failed: false,
                    answers: reply.answers,
                }
            }
            Err(e) => {
                warn!("Question {} failed: {}", question.name, e);
                QuestionOutcome {
                    index,
                    rcode: RCODE_SERVFAIL,
                    recursion_available: false,
                    failed: true,
                    answers: Vec::new(),
                }
            }
        }
    }

    /// One round trip on a fresh socket connected to the upstream
    async fn exchange(&self, sub_query: DnsPacket) -> Result<DnsPacket, ForwardError> {
        let id = sub_query.header.id;

        let mut wire = BytesMut::new();
        DnsCodec::new()
            .encode(sub_query, &mut wire)
            .map_err(ForwardError::InvalidQuery)?;

        let bind_addr: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| self.unreachable(e))?;
        socket
            .connect(self.upstream)
            .await
            .map_err(|e| self.unreachable(e))?;
        socket.send(&wire).await.map_err(|e| self.unreachable(e))?;

        timeout(self.timeout, self.receive_reply(&socket, id))
            .await
            .map_err(|_| ForwardError::UpstreamTimeout {
                upstream: self.upstream,
                timeout: self.timeout,
            })?
    }

    /// Wait for a reply carrying `id`, discarding anything else
    async fn receive_reply(&self, socket: &UdpSocket, id: u16) -> Result<DnsPacket, ForwardError> {
        let mut codec = DnsCodec::new();
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        loop {
            let len = socket.recv(&mut buf).await.map_err(|e| self.unreachable(e))?;
            let mut datagram = BytesMut::from(&buf[..len]);

            let reply = match codec.decode(&mut datagram) {
                Ok(Some(reply)) => reply,
                Ok(None) => continue,
                Err(source) => {
                    return Err(ForwardError::MalformedReply {
                        upstream: self.upstream,
                        source,
                    })
                }
            };

            if reply.header.id != id {
                debug!("Discarding upstream reply with ID {}, expected {}", reply.header.id, id);
                continue;
            }
            return Ok(reply);
        }
    }

    fn unreachable(&self, source: std::io::Error) -> ForwardError {
        ForwardError::UpstreamUnreachable {
            upstream: self.upstream,
            source,
        }
    }
}
