//! Authoritative resolution seam. The zone database and its query engine
//! live behind `AuthResolver`; the pipeline only cares whether the payload
//! was answered or refused.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::dns;

/// Outcome of authoritative resolution for one query payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthAnswer {
    pub rcode: u8,
    /// Serialized reply, present whenever `rcode != RCODE_REFUSED`.
    pub reply: Option<Vec<u8>>,
}

impl AuthAnswer {
    pub fn refused() -> Self {
        Self {
            rcode: dns::RCODE_REFUSED,
            reply: None,
        }
    }

    pub fn is_refused(&self) -> bool {
        self.rcode == dns::RCODE_REFUSED
    }
}

pub trait AuthResolver: Send + Sync {
    fn resolve(&self, src: Ipv4Addr, payload: &[u8]) -> AuthAnswer;
}

/// Refuses everything: the pure-forwarder deployment, where no zones are
/// hosted locally and every query goes upstream.
#[derive(Debug, Default)]
pub struct RefusingResolver;

impl AuthResolver for RefusingResolver {
    fn resolve(&self, _src: Ipv4Addr, _payload: &[u8]) -> AuthAnswer {
        AuthAnswer::refused()
    }
}

/// Serves a fixed set of (qname, qtype) → response templates and refuses the
/// rest. The stored reply has its transaction ID patched to the query's.
#[derive(Debug, Default)]
pub struct StaticZoneResolver {
    answers: HashMap<(String, u16), Vec<u8>>,
}

impl StaticZoneResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, qname: &str, qtype: u16, reply: Vec<u8>) {
        self.answers
            .insert((qname.to_ascii_lowercase(), qtype), reply);
    }
}

impl AuthResolver for StaticZoneResolver {
    fn resolve(&self, _src: Ipv4Addr, payload: &[u8]) -> AuthAnswer {
        let Some(question) = dns::parse_question(payload) else {
            return AuthAnswer::refused();
        };
        match self.answers.get(&(question.qname, question.qtype)) {
            Some(template) => {
                let mut reply = template.clone();
                if reply.len() >= 2 {
                    dns::set_id(&mut reply, dns::id(payload));
                }
                AuthAnswer {
                    rcode: dns::rcode(&reply),
                    reply: Some(reply),
                }
            }
            None => AuthAnswer::refused(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{QTYPE_A, encode_query};

    fn answer_for(qname: &str) -> Vec<u8> {
        // header marked as response, question echoed, no records
        let mut reply = encode_query(0, qname, QTYPE_A);
        reply[2] |= 0x80;
        reply
    }

    #[test]
    fn refusing_resolver_always_refuses() {
        let r = RefusingResolver;
        let query = encode_query(9, "a.example.", QTYPE_A);
        let out = r.resolve(Ipv4Addr::LOCALHOST, &query);
        assert!(out.is_refused());
        assert!(out.reply.is_none());
    }

    #[test]
    fn static_zone_answers_known_name() {
        let mut r = StaticZoneResolver::new();
        r.insert("local.test.", QTYPE_A, answer_for("local.test."));

        let query = encode_query(0x4242, "Local.Test.", QTYPE_A);
        let out = r.resolve(Ipv4Addr::LOCALHOST, &query);
        assert!(!out.is_refused());
        let reply = out.reply.unwrap();
        assert_eq!(dns::id(&reply), 0x4242);
        assert!(dns::is_response(&reply));
    }

    #[test]
    fn static_zone_refuses_unknown_name() {
        let r = StaticZoneResolver::new();
        let query = encode_query(1, "other.test.", QTYPE_A);
        assert!(r.resolve(Ipv4Addr::LOCALHOST, &query).is_refused());
    }
}
