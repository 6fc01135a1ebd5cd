//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use bifrost::dns::encode_query;
use bifrost::frame::Frame;
use bifrost::fwd::{Forwarder, FwdControl, FwdMode};
use bifrost::stats::NetifStats;

pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const CLIENT_PORT: u16 = 40000;

/// A client request frame as the pipeline would hand it to the forwarder.
pub fn client_frame(id: u16, qname: &str, qtype: u16) -> Frame {
    let payload = encode_query(id, qname, qtype);
    Frame::build_udp(
        [0x02, 0, 0, 0, 0, 1],
        [0x02, 0, 0, 0, 0, 2],
        CLIENT_IP,
        SERVER_IP,
        CLIENT_PORT,
        53,
        &payload,
    )
}

/// Start a forwarder with one worker against the given upstream list.
pub fn start_forwarder(
    mode: FwdMode,
    timeout_secs: u64,
    upstreams: &str,
) -> (Arc<Forwarder>, Vec<std::thread::JoinHandle<()>>) {
    let ctrl = FwdControl::parse(mode, timeout_secs, upstreams, "").unwrap();
    let fwd = Forwarder::new(ctrl, 1, Arc::new(NetifStats::new()));
    let workers = fwd.spawn_workers(1).unwrap();
    (fwd, workers)
}

/// An upstream that echoes every query back with the QR bit set. Returns
/// the bound address and a hit counter.
pub fn spawn_echo_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = sock.local_addr().unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let thread_hits = hits.clone();

    std::thread::spawn(move || {
        let mut buf = [0u8; 4096];
        let mut idle = Instant::now();
        loop {
            match sock.recv_from(&mut buf) {
                Ok((len, from)) => {
                    idle = Instant::now();
                    thread_hits.fetch_add(1, Ordering::SeqCst);
                    buf[2] |= 0x80;
                    let _ = sock.send_to(&buf[..len], from);
                }
                Err(_) => {
                    if idle.elapsed() > Duration::from_secs(10) {
                        return;
                    }
                }
            }
        }
    });
    (addr, hits)
}

/// An upstream that receives and never answers. The socket is returned so
/// the port stays bound for the duration of the test.
pub fn spawn_silent_upstream() -> (SocketAddr, UdpSocket) {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = sock.local_addr().unwrap();
    (addr, sock)
}

/// Drain the response ring the way the master would, waiting up to
/// `timeout` for the first response frame.
pub fn wait_response(fwd: &Forwarder, timeout: Duration) -> Option<Frame> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    while Instant::now() < deadline {
        if fwd.dequeue_responses(&mut out, 8) > 0 {
            return out.pop();
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

/// Poll `cond` until it holds or the timeout passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Expiry of the (sole) cache entry for a key, via the management dump.
pub fn cache_expiry(fwd: &Forwarder, qname: &str, qtype: u16) -> Option<u64> {
    fwd.cache
        .dump()
        .into_iter()
        .find(|v| v.domain == qname && v.qtype == qtype)
        .map(|v| v.expires_at)
}
