use prometheus::{Encoder, IntGauge, Registry, TextEncoder, opts};

use crate::stats::NetifStats;

/// Prometheus view over the data-plane counters. The atomics in
/// `NetifStats` stay the source of truth; gauges are refreshed at scrape
/// time so a stats reset is reflected immediately.
pub struct Metrics {
    registry: Registry,

    fwd_rcv: IntGauge,
    fwd_snd: IntGauge,
    fwd_lost: IntGauge,
    pkts_rcv: IntGauge,
    dns_pkts_rcv: IntGauge,
    pkt_dropped: IntGauge,
    pkt_len_err: IntGauge,
    pkts_to_kni: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let fwd_rcv = IntGauge::with_opts(opts!(
            "bifrost_fwd_rcv_total",
            "Queries handed to the forwarder"
        ))?;
        let fwd_snd = IntGauge::with_opts(opts!(
            "bifrost_fwd_snd_total",
            "Forwarded responses delivered to the TX path"
        ))?;
        let fwd_lost = IntGauge::with_opts(opts!(
            "bifrost_fwd_lost_total",
            "Queries lost in the forwarding path"
        ))?;
        let pkts_rcv = IntGauge::with_opts(opts!(
            "bifrost_pkts_rcv_total",
            "Frames received by the packet pipeline"
        ))?;
        let dns_pkts_rcv = IntGauge::with_opts(opts!(
            "bifrost_dns_pkts_rcv_total",
            "DNS queries received by the packet pipeline"
        ))?;
        let pkt_dropped = IntGauge::with_opts(opts!(
            "bifrost_pkt_dropped_total",
            "Frames dropped by policing or errors"
        ))?;
        let pkt_len_err = IntGauge::with_opts(opts!(
            "bifrost_pkt_len_err_total",
            "Frames dropped for malformed headers"
        ))?;
        let pkts_to_kni = IntGauge::with_opts(opts!(
            "bifrost_pkts_to_kni_total",
            "Frames bridged to the kernel tap"
        ))?;

        registry.register(Box::new(fwd_rcv.clone()))?;
        registry.register(Box::new(fwd_snd.clone()))?;
        registry.register(Box::new(fwd_lost.clone()))?;
        registry.register(Box::new(pkts_rcv.clone()))?;
        registry.register(Box::new(dns_pkts_rcv.clone()))?;
        registry.register(Box::new(pkt_dropped.clone()))?;
        registry.register(Box::new(pkt_len_err.clone()))?;
        registry.register(Box::new(pkts_to_kni.clone()))?;

        Ok(Self {
            registry,
            fwd_rcv,
            fwd_snd,
            fwd_lost,
            pkts_rcv,
            dns_pkts_rcv,
            pkt_dropped,
            pkt_len_err,
            pkts_to_kni,
        })
    }

    pub fn render(&self, stats: &NetifStats) -> String {
        let snap = stats.snapshot();
        self.fwd_rcv.set(snap.fwd_rcv as i64);
        self.fwd_snd.set(snap.fwd_snd as i64);
        self.fwd_lost.set(snap.fwd_lost as i64);
        self.pkts_rcv.set(snap.pkts_rcv as i64);
        self.dns_pkts_rcv.set(snap.dns_pkts_rcv as i64);
        self.pkt_dropped.set(snap.pkt_dropped as i64);
        self.pkt_len_err.set(snap.pkt_len_err as i64);
        self.pkts_to_kni.set(snap.pkts_to_kni as i64);

        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn renders_counters() {
        let metrics = Metrics::new().unwrap();
        let stats = NetifStats::new();
        stats.fwd_rcv.fetch_add(5, Ordering::Relaxed);
        stats.fwd_lost.fetch_add(2, Ordering::Relaxed);

        let text = metrics.render(&stats);
        assert!(text.contains("bifrost_fwd_rcv_total 5"));
        assert!(text.contains("bifrost_fwd_lost_total 2"));
        assert!(text.contains("bifrost_fwd_snd_total 0"));
    }

    #[test]
    fn render_tracks_reset() {
        let metrics = Metrics::new().unwrap();
        let stats = NetifStats::new();
        stats.fwd_rcv.fetch_add(5, Ordering::Relaxed);
        metrics.render(&stats);
        stats.reset();
        let text = metrics.render(&stats);
        assert!(text.contains("bifrost_fwd_rcv_total 0"));
    }
}
