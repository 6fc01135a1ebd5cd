use crate::constants::{DNS_HEAD_SIZE, MAX_DOMAIN_LEN};

/// The parsed question section of a query or response. The owner name is
/// normalised to lowercase ASCII with a trailing dot (root is `"."`), which
/// is the form every cache and correlation key uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// Parse the first question of `msg`. Returns `None` on truncation,
/// compression pointers (never legal in the question of a freshly-encoded
/// query), overlong names or QDCOUNT of zero.
pub fn parse_question(msg: &[u8]) -> Option<Question> {
    if msg.len() < DNS_HEAD_SIZE || super::qdcount(msg) == 0 {
        return None;
    }

    let mut pos = DNS_HEAD_SIZE;
    let mut qname = String::with_capacity(64);
    let mut wire_len = 0usize;

    loop {
        let len = *msg.get(pos)? as usize;
        pos += 1;
        if len == 0 {
            wire_len += 1;
            break;
        }
        if len & 0xC0 != 0 {
            return None;
        }
        wire_len += 1 + len;
        if wire_len > MAX_DOMAIN_LEN {
            return None;
        }
        let label = msg.get(pos..pos + len)?;
        if !label.is_ascii() {
            return None;
        }
        for &b in label {
            qname.push(b.to_ascii_lowercase() as char);
        }
        qname.push('.');
        pos += len;
    }
    if qname.is_empty() {
        qname.push('.');
    }

    let qtype = u16::from_be_bytes([*msg.get(pos)?, *msg.get(pos + 1)?]);
    let qclass = u16::from_be_bytes([*msg.get(pos + 2)?, *msg.get(pos + 3)?]);

    Some(Question {
        qname,
        qtype,
        qclass,
    })
}

/// Encode a minimal query message: header plus one question. Used by the
/// loopback collaborators and the test suites; the forwarder itself never
/// synthesises queries.
pub fn encode_query(id: u16, qname: &str, qtype: u16) -> Vec<u8> {
    let mut msg = Vec::with_capacity(DNS_HEAD_SIZE + qname.len() + 6);
    msg.extend_from_slice(&id.to_be_bytes());
    msg.extend_from_slice(&[0x01, 0x00]); // RD=1
    msg.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    msg.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    for label in qname.split('.').filter(|l| !l.is_empty()) {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&qtype.to_be_bytes());
    msg.extend_from_slice(&1u16.to_be_bytes()); // IN
    msg
}
