//! Inter-CPU control messages. Slaves hand kernel-bound frame batches to the
//! master; the master hands TX batches (forwarded responses, tap traffic) to
//! slaves. Each direction is a bounded lock-free ring.

use std::sync::atomic::Ordering;

use crossbeam::queue::ArrayQueue;
use tracing::error;

use crate::constants::CTRL_RING_SIZE;
use crate::frame::Frame;
use crate::stats::NetifStats;

#[derive(Debug)]
pub enum CtrlMsg {
    /// Master → slave: transmit these frames on the slave's TX queue.
    TxFrames(Vec<Frame>),
    /// Slave → master: bridge these frames to the kernel tap.
    ToKni(Vec<Frame>),
}

pub struct CtrlRings {
    master: ArrayQueue<CtrlMsg>,
    slaves: Vec<ArrayQueue<CtrlMsg>>,
}

impl CtrlRings {
    pub fn new(slave_cnt: usize) -> Self {
        Self {
            master: ArrayQueue::new(CTRL_RING_SIZE),
            slaves: (0..slave_cnt.max(1))
                .map(|_| ArrayQueue::new(CTRL_RING_SIZE))
                .collect(),
        }
    }

    pub fn slave_cnt(&self) -> usize {
        self.slaves.len()
    }

    /// Send a batch to the master, dropping it (with accounting) when the
    /// ring is full.
    pub fn send_to_master(&self, msg: CtrlMsg, stats: &NetifStats) {
        if let Err(msg) = self.master.push(msg) {
            let n = frames_in(&msg);
            error!(frames = n, "master ctrl ring full, dropping");
            stats.pkt_dropped.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn send_to_slave(&self, cpu: usize, msg: CtrlMsg, stats: &NetifStats) {
        if let Err(msg) = self.slaves[cpu % self.slaves.len()].push(msg) {
            let n = frames_in(&msg);
            error!(cpu, frames = n, "slave ctrl ring full, dropping");
            stats.pkt_dropped.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn drain_master(&self, mut handle: impl FnMut(CtrlMsg)) -> usize {
        let mut n = 0;
        while let Some(msg) = self.master.pop() {
            handle(msg);
            n += 1;
        }
        n
    }

    pub fn drain_slave(&self, cpu: usize, mut handle: impl FnMut(CtrlMsg)) -> usize {
        let mut n = 0;
        while let Some(msg) = self.slaves[cpu % self.slaves.len()].pop() {
            handle(msg);
            n += 1;
        }
        n
    }
}

fn frames_in(msg: &CtrlMsg) -> usize {
    match msg {
        CtrlMsg::TxFrames(frames) | CtrlMsg::ToKni(frames) => frames.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_per_slave() {
        let rings = CtrlRings::new(2);
        let stats = NetifStats::new();

        rings.send_to_slave(0, CtrlMsg::TxFrames(vec![Frame::new(vec![0])]), &stats);
        rings.send_to_slave(1, CtrlMsg::TxFrames(vec![Frame::new(vec![1])]), &stats);

        let mut seen = 0;
        assert_eq!(rings.drain_slave(0, |_| seen += 1), 1);
        assert_eq!(rings.drain_slave(1, |_| seen += 1), 1);
        assert_eq!(seen, 2);
        assert_eq!(rings.drain_slave(0, |_| ()), 0);
    }

    #[test]
    fn master_drain_empties_ring() {
        let rings = CtrlRings::new(1);
        let stats = NetifStats::new();
        for _ in 0..3 {
            rings.send_to_master(CtrlMsg::ToKni(vec![Frame::new(vec![9])]), &stats);
        }
        assert_eq!(rings.drain_master(|_| ()), 3);
        assert_eq!(stats.snapshot().pkt_dropped, 0);
    }
}
