//! The forwarding and caching subsystem: accepts queries the authoritative
//! path refused, relays them upstream, correlates replies, caches answers
//! and re-enqueues responses for the outbound packet path.

pub mod cache;
pub mod control;
pub mod qnode;
pub mod table;
pub mod worker;

pub use cache::{CacheState, CacheView, FwdCache};
pub use control::{ControlSet, FwdControl, FwdMode, UpstreamGroup};
pub use qnode::{QNode, QueryFlags, QueryState};
pub use table::{CNode, CorrelationTable, IdExhausted};

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::queue::ArrayQueue;
use smallvec::SmallVec;
use tracing::{error, info};

use crate::constants::{FWD_CACHE_SWEEP_SECS, FWD_RING_SIZE};
use crate::error::Result;
use crate::frame::Frame;
use crate::stats::NetifStats;

/// Monotonic microseconds since the first call in this process.
pub fn now_usec() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Wall-clock epoch seconds, the unit of every cache expiry.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Process-lifetime context for the forwarding subsystem. The query ring,
/// the response ring and the cache are named singletons constructed at
/// startup and threaded to every worker; nothing reaches for hidden state
/// inside the inner loops.
pub struct Forwarder {
    /// Multi-producer (one per packet CPU), multi-consumer (one per
    /// forwarding worker).
    pub query_ring: ArrayQueue<Box<QNode>>,
    /// Workers produce, the master alone consumes.
    pub response_ring: ArrayQueue<Box<QNode>>,
    pub cache: FwdCache,
    pub controls: ControlSet,
    pub stats: Arc<NetifStats>,
    shutdown: AtomicBool,
}

impl Forwarder {
    pub fn new(ctrl: FwdControl, cpus: usize, stats: Arc<NetifStats>) -> Arc<Self> {
        Arc::new(Self {
            query_ring: ArrayQueue::new(FWD_RING_SIZE),
            response_ring: ArrayQueue::new(FWD_RING_SIZE),
            cache: FwdCache::new(),
            controls: ControlSet::new(ctrl, cpus),
            stats,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Hand a refused query to the forwarder. Called from the packet
    /// pipeline with the frame still carrying the original request payload.
    pub fn enqueue_query(
        &self,
        frame: Frame,
        src_addr: Ipv4Addr,
        id: u16,
        qtype: u16,
        qname: &str,
        cpu: usize,
    ) {
        self.stats.fwd_rcv.fetch_add(1, Ordering::Relaxed);

        let ctrl = self.controls.snapshot(cpu);
        if ctrl.mode == FwdMode::Disable {
            self.stats.fwd_lost.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let group = ctrl.addrs_for(qname);
        let query = Box::new(QNode {
            frame,
            src_addr,
            id,
            qtype,
            qname: qname.to_string(),
            flags: QueryFlags {
                direct: ctrl.mode == FwdMode::Direct,
                cache: ctrl.mode == FwdMode::Cache,
                detect: false,
            },
            state: QueryState::Enqueued,
            query_ts: now_usec(),
            timeout_secs: ctrl.timeout_secs,
            current_server: 0,
            servers_len: group.addrs.len(),
            server_addrs: SmallVec::from_slice(&group.addrs),
        });

        if self.query_ring.push(query).is_err() {
            error!(
                domain = qname,
                qtype,
                from = %src_addr,
                "query ring full, dropping query"
            );
            self.stats.fwd_lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drain ready responses into `out`, surrendering frame ownership to the
    /// TX path. Counts each as sent.
    pub fn dequeue_responses(&self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            let Some(response) = self.response_ring.pop() else {
                break;
            };
            out.push(response.frame);
            n += 1;
        }
        if n > 0 {
            self.stats.fwd_snd.fetch_add(n as u64, Ordering::Relaxed);
        }
        n
    }

    /// Start `n` forwarding workers, each with its own upstream socket and
    /// correlation table. Socket setup failures are fatal at startup.
    pub fn spawn_workers(self: &Arc<Self>, n: usize) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(n);
        for i in 0..n {
            let w = worker::FwdWorker::new(i, self.clone())?;
            let handle = thread::Builder::new()
                .name(format!("bifrost-fwd-{i}"))
                .spawn(move || w.run())
                .map_err(crate::error::BifrostError::from)?;
            handles.push(handle);
        }
        Ok(handles)
    }

    /// Start the slow sweeper that evicts cache entries whose salvage window
    /// has passed.
    pub fn spawn_cache_sweeper(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let fwd = self.clone();
        let handle = thread::Builder::new()
            .name("bifrost-fcache-clr".to_string())
            .spawn(move || {
                while !fwd.is_shutdown() {
                    for _ in 0..FWD_CACHE_SWEEP_SECS {
                        if fwd.is_shutdown() {
                            return;
                        }
                        thread::sleep(Duration::from_secs(1));
                    }
                    let dels = fwd.cache.sweep(unix_now());
                    if dels > 0 {
                        info!(dels, "cache sweep evicted expired records");
                    }
                }
            })
            .map_err(crate::error::BifrostError::from)?;
        Ok(handle)
    }

    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}
