//! DNS message helpers on top of `hickory-proto`.

use std::net::Ipv4Addr;

use hickory_proto::op::{Message, MessageType, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RData, RecordType};

use crate::routes::pattern::normalize;

/// Return the question if it is a class IN, type A lookup.
///
/// Only the first question is considered; multi-question messages do not
/// occur in practice.
pub fn qualifying_question(message: &Message) -> Option<&Query> {
    message
        .queries()
        .first()
        .filter(|q| q.query_class() == DNSClass::IN && q.query_type() == RecordType::A)
}

/// Lowercased query name without the trailing root dot.
pub fn normalized_name(name: &Name) -> String {
    normalize(&name.to_ascii())
}

/// Clear the AD flag unless the reply carries EDNS with the DO bit set.
///
/// Returns whether the flag was cleared.
pub fn clear_unvouched_authentic_data(reply: &mut Message) -> bool {
    let dnssec_requested = reply
        .extensions()
        .as_ref()
        .is_some_and(|edns| edns.dnssec_ok());
    if dnssec_requested || !reply.authentic_data() {
        return false;
    }
    reply.set_authentic_data(false);
    true
}

/// Addresses of the class IN, type A answer records, in answer order.
pub fn a_records(reply: &Message) -> impl Iterator<Item = Ipv4Addr> + '_ {
    reply
        .answers()
        .iter()
        .filter(|record| {
            record.dns_class() == DNSClass::IN && record.record_type() == RecordType::A
        })
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(a.0),
            _ => None,
        })
}

/// Largest UDP response the sender of `query` accepts: its advertised EDNS
/// payload size, or 512 bytes without EDNS. Advertised sizes below 512
/// count as 512.
pub fn udp_payload_limit(query: &Message) -> usize {
    let advertised = query
        .extensions()
        .as_ref()
        .map_or(MIN_UDP_PAYLOAD, |edns| edns.max_payload());
    usize::from(advertised.max(MIN_UDP_PAYLOAD))
}

const MIN_UDP_PAYLOAD: u16 = 512;

/// `response` cut down to its header and question with TC set, telling
/// the client to retry over TCP.
pub fn truncated(response: &Message) -> Message {
    let mut cut = Message::new();
    cut.set_id(response.id())
        .set_message_type(MessageType::Response)
        .set_op_code(response.op_code())
        .set_response_code(response.response_code())
        .set_authoritative(response.authoritative())
        .set_recursion_desired(response.recursion_desired())
        .set_recursion_available(response.recursion_available())
        .set_truncated(true)
        .add_queries(response.queries().iter().cloned());
    if let Some(edns) = response.extensions().clone() {
        cut.set_edns(edns);
    }
    cut
}

/// SERVFAIL answer to `query`, with the question echoed back.
pub fn servfail(query: &Message) -> Message {
    let mut response = Message::error_msg(query.id(), query.op_code(), ResponseCode::ServFail);
    response
        .set_message_type(MessageType::Response)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .add_queries(query.queries().iter().cloned());
    response
}
