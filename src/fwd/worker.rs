//! Forwarding worker: a single-threaded cooperative loop that drains the
//! expired ring, its upstream socket and the shared query ring, sweeping its
//! correlation table every 200 ms and idling for ~1 ms when nothing moved.

use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::constants::{
    DNS_HEAD_SIZE, EDNS_MAX_MESSAGE_LEN, FWD_DRAIN_BURST, FWD_RING_SIZE,
    FWD_SENDTO_MAX_TRIES, FWD_SWEEP_INTERVAL_US,
};
use crate::dns;
use crate::fwd::cache::CacheState;
use crate::fwd::qnode::{QNode, QueryState};
use crate::fwd::table::{CNode, CorrelationTable};
use crate::fwd::{Forwarder, now_usec, unix_now};

use crossbeam::queue::ArrayQueue;

pub struct FwdWorker {
    id: usize,
    sock: UdpSocket,
    table: CorrelationTable,
    expired_ring: ArrayQueue<Box<QNode>>,
    shared: Arc<Forwarder>,
    rwbuf: Vec<u8>,
}

impl FwdWorker {
    pub fn new(id: usize, shared: Arc<Forwarder>) -> crate::error::Result<Self> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        sock.set_nonblocking(true)?;
        Ok(Self {
            id,
            sock,
            table: CorrelationTable::new(),
            expired_ring: ArrayQueue::new(FWD_RING_SIZE),
            shared,
            rwbuf: vec![0; EDNS_MAX_MESSAGE_LEN],
        })
    }

    pub fn run(mut self) {
        info!(worker = self.id, "starting forwarding worker");
        let mut last_sweep = now_usec();
        while !self.shared.is_shutdown() {
            let exp_cnt = self.process_expired();
            let rsp_cnt = self.process_responses();
            let fwd_cnt = self.process_queries();

            let now = now_usec();
            if now - last_sweep >= FWD_SWEEP_INTERVAL_US {
                self.sweep_correlation(now);
                last_sweep = now;
            }

            if exp_cnt == 0 && rsp_cnt == 0 && fwd_cnt == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn lost(&self) {
        self.shared.stats.fwd_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Cache probe for a query; `direct`-flagged queries never touch the
    /// cache in either direction.
    fn cache_probe(&self, query: &QNode) -> CacheState {
        if query.flags.direct {
            return CacheState::NotFound;
        }
        self.shared
            .cache
            .lookup(&query.qname, query.qtype, unix_now())
    }

    /// Re-enter queries whose correlation entry timed out: advance to the
    /// next upstream while any remain, otherwise fall back to whatever the
    /// cache still holds.
    fn process_expired(&self) -> usize {
        let mut exp_cnt = 0;
        while let Some(mut query) = self.expired_ring.pop() {
            exp_cnt += 1;
            let status = self.cache_probe(&query);
            query.current_server += 1;
            if query.current_server < query.servers_len {
                match status {
                    CacheState::Fresh(data) => self.respond(query, &data),
                    _ => self.dispatch(query),
                }
            } else {
                match status {
                    CacheState::Fresh(data) | CacheState::Expiring(data) => {
                        self.respond(query, &data)
                    }
                    CacheState::Expired(data) => {
                        warn!(
                            domain = %query.qname,
                            qtype = query.qtype,
                            from = %query.src_addr,
                            detect = query.flags.detect,
                            "all upstreams timed out, serving expired cache"
                        );
                        self.shared
                            .cache
                            .update(&query.qname, query.qtype, &data, unix_now());
                        self.respond(query, &data);
                    }
                    CacheState::NotFound => {
                        error!(
                            domain = %query.qname,
                            qtype = query.qtype,
                            from = %query.src_addr,
                            detect = query.flags.detect,
                            "all upstreams timed out, dropping"
                        );
                        self.lost();
                    }
                }
            }
        }
        exp_cnt
    }

    /// Drain upstream replies from the worker socket, correlate each against
    /// the table, refresh the cache and hand the answer to the response
    /// ring. Unmatched or malformed datagrams are discarded.
    fn process_responses(&mut self) -> usize {
        let mut rsp_cnt = 0;
        while rsp_cnt < FWD_DRAIN_BURST {
            let (len, from) = match self.sock.recv_from(&mut self.rwbuf) {
                Ok(ok) => ok,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    break;
                }
                Err(e) => {
                    error!(worker = self.id, "recvfrom failed: {e}");
                    break;
                }
            };
            rsp_cnt += 1;

            let msg = &self.rwbuf[..len];
            if len < DNS_HEAD_SIZE {
                warn!(%from, len, "short datagram, dropping");
                continue;
            }
            if !dns::is_response(msg) {
                warn!(%from, "datagram is a query, not a response, dropping");
                continue;
            }
            if dns::opcode(msg) != dns::OPCODE_QUERY {
                warn!(%from, opcode = dns::opcode(msg), "illegal opcode, dropping");
                continue;
            }
            let Some(question) = dns::parse_question(msg) else {
                warn!(%from, "failed to parse question section, dropping");
                continue;
            };

            let id = dns::id(msg);
            let Some(cnode) = self.table.match_and_remove(id, question.qtype, &question.qname)
            else {
                debug!(
                    %from,
                    domain = %question.qname,
                    qtype = question.qtype,
                    id,
                    "no matching in-flight query, discarding"
                );
                continue;
            };

            let query = cnode.qnode;
            if !query.flags.direct {
                self.shared
                    .cache
                    .update(&query.qname, query.qtype, msg, unix_now());
            }
            self.respond(query, msg);
        }
        rsp_cnt
    }

    /// Drain fresh queries from the shared ring: serve from cache when
    /// possible, spawn a detect probe for entries about to expire, dispatch
    /// the rest upstream.
    fn process_queries(&self) -> usize {
        let mut fwd_cnt = 0;
        while fwd_cnt < FWD_DRAIN_BURST {
            let Some(query) = self.shared.query_ring.pop() else {
                break;
            };
            fwd_cnt += 1;

            match self.cache_probe(&query) {
                CacheState::Fresh(data) => self.respond(query, &data),
                CacheState::Expiring(data) => {
                    self.spawn_detect(&query);
                    self.respond(query, &data);
                }
                _ => self.dispatch(query),
            }
        }
        fwd_cnt
    }

    /// Background refresh: forward a deep copy of the query with the detect
    /// flag set. The clone's answer only updates the cache; the client reply
    /// has already been served from the expiring entry.
    fn spawn_detect(&self, query: &QNode) {
        self.dispatch(Box::new(query.detect_clone()));
    }

    /// Allocate an upstream transaction ID, send to the current upstream
    /// (walking the list on hard send errors) and register the correlation
    /// entry. Every failure path here drops the query and counts it lost.
    fn dispatch(&self, mut query: Box<QNode>) {
        query.state = QueryState::AwaitingUpstream;

        let new_id = match self.table.allocate_id(&query.qname, query.qtype) {
            Ok(id) => id,
            Err(_) => {
                error!(
                    domain = %query.qname,
                    qtype = query.qtype,
                    from = %query.src_addr,
                    detect = query.flags.detect,
                    "failed to allocate query id, dropping"
                );
                self.lost();
                return;
            }
        };

        if !self.send_upstream(&mut query, new_id) {
            error!(
                domain = %query.qname,
                qtype = query.qtype,
                from = %query.src_addr,
                detect = query.flags.detect,
                "failed to send to any upstream, dropping"
            );
            self.lost();
            return;
        }

        let expires_at = now_usec() + query.timeout_secs * 1_000_000;
        self.table.insert(CNode {
            qnode: query,
            new_id,
            expires_at,
        });
    }

    /// Overwrite the wire ID with the correlation ID and send to the first
    /// upstream that accepts the datagram, starting at `current_server`.
    fn send_upstream(&self, query: &mut QNode, new_id: u16) -> bool {
        match query.frame.dns_payload_mut() {
            Some(payload) => dns::set_id(payload, new_id),
            None => return false,
        }
        while query.current_server < query.servers_len {
            let addr = query.server_addrs[query.current_server];
            let Some(payload) = query.frame.dns_payload() else {
                return false;
            };
            match self.sendto_bounded(payload, addr) {
                Ok(()) => return true,
                Err(e) => {
                    error!(
                        domain = %query.qname,
                        qtype = query.qtype,
                        upstream = %addr,
                        try_cnt = query.current_server,
                        detect = query.flags.detect,
                        "sendto failed: {e}"
                    );
                    query.current_server += 1;
                }
            }
        }
        false
    }

    fn sendto_bounded(&self, payload: &[u8], addr: std::net::SocketAddr) -> std::io::Result<()> {
        let mut try_cnt = 0;
        loop {
            match self.sock.send_to(payload, addr) {
                Ok(_) => return Ok(()),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    try_cnt += 1;
                    if try_cnt >= FWD_SENDTO_MAX_TRIES {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Rebuild the client-facing packet around `payload` and enqueue it for
    /// TX. Detect probes are freed here without ever reaching the response
    /// ring.
    fn respond(&self, mut query: Box<QNode>, payload: &[u8]) {
        if query.flags.detect {
            return;
        }

        query.frame.write_response(payload);
        if let Some(p) = query.frame.dns_payload_mut() {
            dns::set_id(p, query.id);
        }
        query.state = QueryState::Answered;

        let (qname, qtype, src) = (query.qname.clone(), query.qtype, query.src_addr);
        if self.shared.response_ring.push(query).is_err() {
            error!(
                domain = %qname,
                qtype,
                from = %src,
                "response ring full, dropping response"
            );
            self.lost();
        }
    }

    /// Move timed-out correlation entries to the expired ring for re-entry.
    /// A reply that races this sweep finds the table entry gone and is
    /// silently discarded; the client is answered at most once.
    fn sweep_correlation(&self, now_us: u64) {
        self.table.sweep(now_us, |mut qnode| {
            qnode.state = QueryState::Expired;
            warn!(
                worker = self.id,
                domain = %qnode.qname,
                qtype = qnode.qtype,
                from = %qnode.src_addr,
                try_cnt = qnode.current_server,
                detect = qnode.flags.detect,
                "upstream timed out, moving to expired ring"
            );
            if self.expired_ring.push(qnode).is_err() {
                error!(worker = self.id, "expired ring full, dropping query");
                self.lost();
            }
        });
    }
}
