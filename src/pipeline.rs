//! Per-CPU packet pipeline: RX burst, classification, rate limiting,
//! authoritative resolution, then either in-place response TX or hand-off of
//! refused queries to the forwarder. Non-DNS traffic goes to the kernel tap
//! through the master.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::constants::{DNS_HEAD_SIZE, DNS_PORT, NETIF_MAX_PKT_BURST};
use crate::ctrl_msg::{CtrlMsg, CtrlRings};
use crate::dns;
use crate::frame::{
    ETHER_HDR_LEN, ETHER_TYPE_IPV4, Frame, IPPROTO_UDP, IPV4_HDR_LEN, UDP_HDR_LEN,
};
use crate::fwd::Forwarder;
use crate::netif::NetQueue;
use crate::rate_limiter::{RateClass, SourceRateLimiter};
use crate::resolver::AuthResolver;
use crate::stats::NetifStats;

const TX_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

pub struct Slave<N: NetQueue> {
    cpu: usize,
    netif: N,
    resolver: Arc<dyn AuthResolver>,
    limiter: SourceRateLimiter,
    fwd: Arc<Forwarder>,
    rings: Arc<CtrlRings>,
    stats: Arc<NetifStats>,
    last_flush: Instant,
    kni_pending: Vec<Frame>,
}

impl<N: NetQueue> Slave<N> {
    pub fn new(
        cpu: usize,
        netif: N,
        resolver: Arc<dyn AuthResolver>,
        limiter: SourceRateLimiter,
        fwd: Arc<Forwarder>,
        rings: Arc<CtrlRings>,
        stats: Arc<NetifStats>,
    ) -> Self {
        Self {
            cpu,
            netif,
            resolver,
            limiter,
            fwd,
            rings,
            stats,
            last_flush: Instant::now(),
            kni_pending: Vec::new(),
        }
    }

    pub fn run(mut self) {
        info!(cpu = self.cpu, "starting packet pipeline");
        while !self.fwd.is_shutdown() {
            if self.poll() == 0 {
                std::thread::yield_now();
            }
        }
        self.netif.tx_flush();
    }

    /// One loop iteration: control-ring drain plus TX flush on the 1 ms
    /// timer, then one RX burst. Returns the number of frames received.
    pub(crate) fn poll(&mut self) -> usize {
        if self.last_flush.elapsed() >= TX_FLUSH_INTERVAL {
            self.drain_ctrl();
            self.netif.tx_flush();
            self.last_flush = Instant::now();
        }

        let mut rx = Vec::with_capacity(NETIF_MAX_PKT_BURST);
        let rx_count = self.netif.rx_burst(&mut rx, NETIF_MAX_PKT_BURST);
        if rx_count == 0 {
            return 0;
        }

        for frame in rx {
            self.process_packet(frame);
        }
        self.netif.tx_flush();
        self.flush_kni();
        rx_count
    }

    fn drain_ctrl(&mut self) {
        let netif = &mut self.netif;
        self.rings.drain_slave(self.cpu, |msg| match msg {
            CtrlMsg::TxFrames(frames) => {
                for frame in frames {
                    netif.tx(frame);
                }
            }
            CtrlMsg::ToKni(_) => {
                warn!("kernel-tap batch addressed to a slave, dropping");
            }
        });
    }

    fn flush_kni(&mut self) {
        if self.kni_pending.is_empty() {
            return;
        }
        let frames = std::mem::take(&mut self.kni_pending);
        self.stats
            .pkts_to_kni
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        self.rings
            .send_to_master(CtrlMsg::ToKni(frames), &self.stats);
    }

    fn drop_len_err(&self, frame: Frame) {
        self.stats.pkt_len_err.fetch_add(1, Ordering::Relaxed);
        self.stats.pkt_dropped.fetch_add(1, Ordering::Relaxed);
        drop(frame);
    }

    fn drop_policed(&self, frame: Frame) {
        self.stats.pkt_dropped.fetch_add(1, Ordering::Relaxed);
        drop(frame);
    }

    fn process_packet(&mut self, mut frame: Frame) {
        self.stats.pkts_rcv.fetch_add(1, Ordering::Relaxed);

        if frame.ether_type() != Some(ETHER_TYPE_IPV4) {
            self.kni_pending.push(frame);
            return;
        }

        let Some(src) = frame.ipv4_src() else {
            self.drop_len_err(frame);
            return;
        };
        if !self.limiter.check(src, RateClass::All) {
            self.drop_policed(frame);
            return;
        }

        let (ihl, ip_total) = (frame.ipv4_ihl_bytes(), frame.ipv4_total_len());
        let header_ok = matches!(
            (ihl, ip_total),
            (Some(IPV4_HDR_LEN), Some(total))
                if total >= IPV4_HDR_LEN && frame.len() >= ETHER_HDR_LEN + total
        );
        if !header_ok {
            warn!(len = frame.len(), ?ihl, ?ip_total, "illegal IPv4 header, dropping");
            self.drop_len_err(frame);
            return;
        }

        if frame.ipv4_proto() != Some(IPPROTO_UDP) || frame.udp_dst_port() != Some(DNS_PORT) {
            self.kni_pending.push(frame);
            return;
        }

        self.stats.dns_pkts_rcv.fetch_add(1, Ordering::Relaxed);

        let ip_total = frame.ipv4_total_len().unwrap_or(0);
        let udp_ok = matches!(
            frame.udp_len(),
            Some(udp_len)
                if ip_total == IPV4_HDR_LEN + udp_len
                    && udp_len >= UDP_HDR_LEN + DNS_HEAD_SIZE
        );
        if !udp_ok {
            warn!(
                ip_total,
                udp_len = ?frame.udp_len(),
                "illegal UDP length, dropping"
            );
            self.drop_len_err(frame);
            return;
        }

        let resolved = frame
            .dns_payload()
            .map(|payload| (dns::flags(payload), self.resolver.resolve(src, payload)));
        let Some((old_flags, answer)) = resolved else {
            self.drop_len_err(frame);
            return;
        };

        if answer.is_refused() {
            if !self.limiter.check(src, RateClass::Fwd) {
                self.drop_policed(frame);
                return;
            }
            let parsed = frame
                .dns_payload()
                .and_then(|p| dns::parse_question(p).map(|q| (dns::id(p), q)));
            let Some((id, question)) = parsed else {
                debug!(%src, "refused query has no parsable question, dropping");
                self.drop_policed(frame);
                return;
            };
            // hand the original request upstream, not the refused answer
            if let Some(payload) = frame.dns_payload_mut() {
                dns::set_flags(payload, old_flags);
            }
            self.fwd
                .enqueue_query(frame, src, id, question.qtype, &question.qname, self.cpu);
            return;
        }

        match answer.reply {
            Some(reply) => {
                frame.write_response(&reply);
                self.netif.tx(frame);
            }
            None => {
                warn!(%src, rcode = answer.rcode, "resolver produced no reply, dropping");
                self.drop_policed(frame);
            }
        }
    }
}
