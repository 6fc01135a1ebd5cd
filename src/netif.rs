//! Packet I/O seam. The NIC layer proper (poll-mode drivers, burst RX/TX,
//! the kernel tap) is a collaborator behind these traits; the crate ships a
//! channel-backed pair for tests and a UDP-socket adapter so the binary can
//! serve real traffic without a dedicated NIC.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crossbeam::channel::{Receiver, Sender, TryRecvError, unbounded};
use tracing::{debug, warn};

use crate::constants::NETIF_MAX_PKT_BURST;
use crate::frame::Frame;

/// One RX/TX queue pair of the packet device, with TX batching.
pub trait NetQueue: Send {
    /// Receive up to `max` frames into `out`, returning the count.
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize;

    /// Queue a frame for transmission; delivery may wait for `tx_flush`.
    fn tx(&mut self, frame: Frame);

    fn tx_flush(&mut self);
}

/// The bridge that hands non-DNS traffic to and from the host network stack.
pub trait KernelTap: Send {
    fn ingress(&mut self, out: &mut Vec<Frame>, max: usize) -> usize;
    fn egress(&mut self, frames: Vec<Frame>);
}

/// In-memory queue pair, used by the test suites as the wire.
pub struct ChannelNetif {
    rx: Receiver<Frame>,
    tx: Sender<Frame>,
    txbuf: Vec<Frame>,
}

/// The far end of a `ChannelNetif`: inject frames into RX, collect TX.
pub struct ChannelWire {
    pub inject: Sender<Frame>,
    pub sent: Receiver<Frame>,
}

impl ChannelNetif {
    pub fn pair() -> (Self, ChannelWire) {
        let (inject, rx) = unbounded();
        let (tx, sent) = unbounded();
        (
            Self {
                rx,
                tx,
                txbuf: Vec::with_capacity(NETIF_MAX_PKT_BURST),
            },
            ChannelWire { inject, sent },
        )
    }
}

impl NetQueue for ChannelNetif {
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.rx.try_recv() {
                Ok(frame) => {
                    out.push(frame);
                    n += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        n
    }

    fn tx(&mut self, frame: Frame) {
        self.txbuf.push(frame);
    }

    fn tx_flush(&mut self) {
        for frame in self.txbuf.drain(..) {
            let _ = self.tx.send(frame);
        }
    }
}

/// Channel-backed kernel tap for tests.
pub struct ChannelTap {
    from_kernel: Receiver<Frame>,
    to_kernel: Sender<Frame>,
}

pub struct ChannelTapWire {
    pub inject: Sender<Frame>,
    pub delivered: Receiver<Frame>,
}

impl ChannelTap {
    pub fn pair() -> (Self, ChannelTapWire) {
        let (inject, from_kernel) = unbounded();
        let (to_kernel, delivered) = unbounded();
        (
            Self {
                from_kernel,
                to_kernel,
            },
            ChannelTapWire { inject, delivered },
        )
    }
}

impl KernelTap for ChannelTap {
    fn ingress(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.from_kernel.try_recv() {
                Ok(frame) => {
                    out.push(frame);
                    n += 1;
                }
                Err(_) => break,
            }
        }
        n
    }

    fn egress(&mut self, frames: Vec<Frame>) {
        for frame in frames {
            let _ = self.to_kernel.send(frame);
        }
    }
}

/// A tap for deployments where the socket adapter below is the only ingress:
/// nothing ever arrives from the kernel side, and stray egress is dropped.
#[derive(Debug, Default)]
pub struct DiscardTap;

impl KernelTap for DiscardTap {
    fn ingress(&mut self, _out: &mut Vec<Frame>, _max: usize) -> usize {
        0
    }

    fn egress(&mut self, frames: Vec<Frame>) {
        if !frames.is_empty() {
            debug!(count = frames.len(), "no kernel tap, dropping frames");
        }
    }
}

/// Adapts a plain UDP socket to the frame-based pipeline: each datagram is
/// wrapped in a synthetic Ethernet/IPv4/UDP frame on RX, and response frames
/// are unwrapped and sent back to the client address they carry.
pub struct UdpSocketNetif {
    sock: UdpSocket,
    local_ip: Ipv4Addr,
    local_port: u16,
    rxbuf: Vec<u8>,
    txbuf: Vec<Frame>,
}

impl UdpSocketNetif {
    pub fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let sock = UdpSocket::bind(addr)?;
        sock.set_nonblocking(true)?;
        let local = sock.local_addr()?;
        let local_ip = match local.ip() {
            std::net::IpAddr::V4(ip) => ip,
            std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };
        Ok(Self {
            sock,
            local_ip,
            local_port: local.port(),
            rxbuf: vec![0; crate::constants::EDNS_MAX_MESSAGE_LEN],
            txbuf: Vec::with_capacity(NETIF_MAX_PKT_BURST),
        })
    }

    pub fn try_clone(&self) -> std::io::Result<Self> {
        Ok(Self {
            sock: self.sock.try_clone()?,
            local_ip: self.local_ip,
            local_port: self.local_port,
            rxbuf: vec![0; crate::constants::EDNS_MAX_MESSAGE_LEN],
            txbuf: Vec::with_capacity(NETIF_MAX_PKT_BURST),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.sock.local_addr()
    }
}

impl NetQueue for UdpSocketNetif {
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.sock.recv_from(&mut self.rxbuf) {
                Ok((len, SocketAddr::V4(from))) => {
                    out.push(Frame::build_udp(
                        [0; 6],
                        [0; 6],
                        *from.ip(),
                        self.local_ip,
                        from.port(),
                        self.local_port,
                        &self.rxbuf[..len],
                    ));
                    n += 1;
                }
                Ok((_, SocketAddr::V6(from))) => {
                    debug!(%from, "ignoring IPv6 client");
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {
                    break;
                }
                Err(e) => {
                    warn!("recvfrom failed: {e}");
                    break;
                }
            }
        }
        n
    }

    fn tx(&mut self, frame: Frame) {
        self.txbuf.push(frame);
    }

    fn tx_flush(&mut self) {
        for frame in self.txbuf.drain(..) {
            let (Some(dst_ip), Some(dst_port), Some(payload)) =
                (frame.ipv4_dst(), frame.udp_dst_port(), frame.dns_payload())
            else {
                warn!("malformed TX frame, dropping");
                continue;
            };
            if let Err(e) = self.sock.send_to(payload, (dst_ip, dst_port)) {
                warn!(%dst_ip, dst_port, "send failed: {e}");
            }
        }
    }
}
