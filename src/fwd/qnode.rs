use std::net::{Ipv4Addr, SocketAddr};

use smallvec::SmallVec;

use crate::constants::FWD_MAX_ADDRS;
use crate::frame::Frame;

/// Control flags stamped on a query when it enters the forwarder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryFlags {
    /// Operator chose bypass mode: no cache reads or writes.
    pub direct: bool,
    /// Normal caching path.
    pub cache: bool,
    /// Background refresh probe; its answer updates the cache only and is
    /// never delivered to a client.
    pub detect: bool,
}

/// Where a query is in its lifecycle. Expired-ring re-entry is driven by
/// this explicit state rather than by control flow in the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Enqueued,
    AwaitingUpstream,
    Expired,
    Answered,
}

/// The in-flight state of one client query. A `QNode` is owned by exactly
/// one of the query ring, a correlation entry, the expired ring or the
/// response ring at any time; rings and the table pass the box by move.
#[derive(Debug)]
pub struct QNode {
    pub frame: Frame,
    pub src_addr: Ipv4Addr,
    /// The client's original transaction ID, restored on the way out.
    pub id: u16,
    pub qtype: u16,
    pub qname: String,
    pub flags: QueryFlags,
    pub state: QueryState,
    /// Receipt time, monotonic microseconds.
    pub query_ts: u64,
    pub timeout_secs: u64,
    pub current_server: usize,
    pub servers_len: usize,
    pub server_addrs: SmallVec<[SocketAddr; FWD_MAX_ADDRS]>,
}

impl QNode {
    /// Clone this query as a detect probe: deep-copied packet buffer, the
    /// upstream walk restarted from the first server.
    pub fn detect_clone(&self) -> QNode {
        QNode {
            frame: self.frame.deep_copy(),
            src_addr: self.src_addr,
            id: self.id,
            qtype: self.qtype,
            qname: self.qname.clone(),
            flags: QueryFlags {
                detect: true,
                ..self.flags
            },
            state: QueryState::Enqueued,
            query_ts: self.query_ts,
            timeout_secs: self.timeout_secs,
            current_server: 0,
            servers_len: self.servers_len,
            server_addrs: self.server_addrs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{QTYPE_A, encode_query};

    fn sample_qnode() -> QNode {
        let payload = encode_query(0x1234, "a.example.", QTYPE_A);
        let frame = Frame::build_udp(
            [2, 0, 0, 0, 0, 1],
            [2, 0, 0, 0, 0, 2],
            Ipv4Addr::new(10, 0, 0, 5),
            Ipv4Addr::new(10, 0, 0, 1),
            40000,
            53,
            &payload,
        );
        QNode {
            frame,
            src_addr: Ipv4Addr::new(10, 0, 0, 5),
            id: 0x1234,
            qtype: QTYPE_A,
            qname: "a.example.".to_string(),
            flags: QueryFlags {
                cache: true,
                ..Default::default()
            },
            state: QueryState::Enqueued,
            query_ts: 17,
            timeout_secs: 2,
            current_server: 1,
            servers_len: 2,
            server_addrs: SmallVec::from_vec(vec![
                "127.0.0.1:1053".parse().unwrap(),
                "127.0.0.1:1054".parse().unwrap(),
            ]),
        }
    }

    #[test]
    fn detect_clone_restarts_server_walk() {
        let q = sample_qnode();
        let probe = q.detect_clone();
        assert!(probe.flags.detect);
        assert!(probe.flags.cache);
        assert_eq!(probe.current_server, 0);
        assert_eq!(probe.id, q.id);
        assert_eq!(probe.qname, q.qname);
        assert_eq!(probe.server_addrs, q.server_addrs);
        assert_eq!(probe.query_ts, q.query_ts);
    }

    #[test]
    fn detect_clone_does_not_alias_buffer() {
        let q = sample_qnode();
        let mut probe = q.detect_clone();
        probe.frame.bytes_mut()[0] ^= 0xFF;
        assert_ne!(probe.frame.bytes()[0], q.frame.bytes()[0]);
    }
}
