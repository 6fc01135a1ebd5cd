use std::sync::atomic::{AtomicU64, Ordering};

/// Data-plane counters, shared between the packet pipeline, the forwarding
/// workers and the master loop. Updates are relaxed atomics; nothing here is
/// used for synchronisation.
#[derive(Debug, Default)]
pub struct NetifStats {
    /// Queries handed to the forwarder
    pub fwd_rcv: AtomicU64,
    /// Forwarded responses delivered back to the TX path
    pub fwd_snd: AtomicU64,
    /// Queries lost anywhere in the forwarding path
    pub fwd_lost: AtomicU64,

    pub pkts_rcv: AtomicU64,
    pub dns_pkts_rcv: AtomicU64,
    pub pkt_dropped: AtomicU64,
    pub pkt_len_err: AtomicU64,
    pub pkts_to_kni: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub fwd_rcv: u64,
    pub fwd_snd: u64,
    pub fwd_lost: u64,
    pub pkts_rcv: u64,
    pub dns_pkts_rcv: u64,
    pub pkt_dropped: u64,
    pub pkt_len_err: u64,
    pub pkts_to_kni: u64,
}

impl NetifStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            fwd_rcv: self.fwd_rcv.load(Ordering::Relaxed),
            fwd_snd: self.fwd_snd.load(Ordering::Relaxed),
            fwd_lost: self.fwd_lost.load(Ordering::Relaxed),
            pkts_rcv: self.pkts_rcv.load(Ordering::Relaxed),
            dns_pkts_rcv: self.dns_pkts_rcv.load(Ordering::Relaxed),
            pkt_dropped: self.pkt_dropped.load(Ordering::Relaxed),
            pkt_len_err: self.pkt_len_err.load(Ordering::Relaxed),
            pkts_to_kni: self.pkts_to_kni.load(Ordering::Relaxed),
        }
    }

    /// Atomic clear of every counter.
    pub fn reset(&self) {
        self.fwd_rcv.store(0, Ordering::Relaxed);
        self.fwd_snd.store(0, Ordering::Relaxed);
        self.fwd_lost.store(0, Ordering::Relaxed);
        self.pkts_rcv.store(0, Ordering::Relaxed);
        self.dns_pkts_rcv.store(0, Ordering::Relaxed);
        self.pkt_dropped.store(0, Ordering::Relaxed);
        self.pkt_len_err.store(0, Ordering::Relaxed);
        self.pkts_to_kni.store(0, Ordering::Relaxed);
    }
}
