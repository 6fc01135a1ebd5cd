//! Master loop: no packet parsing. It watches the reload flag, drains the
//! control-message ring, moves forwarded responses and kernel-tap traffic to
//! per-CPU TX queues (round-robin) and shuttles non-DNS frames through the
//! host network stack.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{error, info};

use crate::constants::NETIF_MAX_PKT_BURST;
use crate::ctrl_msg::{CtrlMsg, CtrlRings};
use crate::frame::Frame;
use crate::fwd::{Forwarder, FwdControl};
use crate::netif::KernelTap;

pub type ReloadFn = Box<dyn FnMut() -> Option<FwdControl> + Send>;

pub struct Master<T: KernelTap> {
    tap: T,
    fwd: Arc<Forwarder>,
    rings: Arc<CtrlRings>,
    reload_flag: Arc<AtomicBool>,
    reload_fn: ReloadFn,
    next_cpu: usize,
}

impl<T: KernelTap> Master<T> {
    pub fn new(
        tap: T,
        fwd: Arc<Forwarder>,
        rings: Arc<CtrlRings>,
        reload_flag: Arc<AtomicBool>,
        reload_fn: ReloadFn,
    ) -> Self {
        Self {
            tap,
            fwd,
            rings,
            reload_flag,
            reload_fn,
            next_cpu: 0,
        }
    }

    pub fn run(mut self) {
        info!("starting master loop");
        while !self.fwd.is_shutdown() {
            if self.poll() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    /// One iteration; returns the amount of work done so the caller can
    /// back off when idle.
    pub(crate) fn poll(&mut self) -> usize {
        if self.reload_flag.swap(false, Ordering::Relaxed) {
            info!("reload requested, re-reading configuration");
            match (self.reload_fn)() {
                Some(ctrl) => self.fwd.controls.reload(ctrl),
                None => error!("configuration reload failed, keeping current controls"),
            }
        }

        let tap = &mut self.tap;
        let nb_ctrl = self.rings.drain_master(|msg| match msg {
            CtrlMsg::ToKni(frames) => tap.egress(frames),
            CtrlMsg::TxFrames(_) => {
                error!("TX batch addressed to the master, dropping");
            }
        });

        let mut frames = Vec::with_capacity(NETIF_MAX_PKT_BURST);
        let nb_kni = self.tap.ingress(&mut frames, NETIF_MAX_PKT_BURST);
        if nb_kni > 0 {
            self.dispatch_tx(frames);
            frames = Vec::with_capacity(NETIF_MAX_PKT_BURST);
        }

        let nb_fwd = self
            .fwd
            .dequeue_responses(&mut frames, NETIF_MAX_PKT_BURST);
        if nb_fwd > 0 {
            self.dispatch_tx(frames);
        }

        nb_ctrl + nb_kni + nb_fwd
    }

    /// Hand a frame batch to the next packet CPU for transmission.
    fn dispatch_tx(&mut self, frames: Vec<Frame>) {
        self.next_cpu = (self.next_cpu + 1) % self.rings.slave_cnt();
        self.rings
            .send_to_slave(self.next_cpu, CtrlMsg::TxFrames(frames), &self.fwd.stats);
    }
}
