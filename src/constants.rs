pub const DNS_PORT: u16 = 53;
pub const DNS_HEAD_SIZE: usize = 12;
pub const MAX_DOMAIN_LEN: usize = 255;
pub const EDNS_MAX_MESSAGE_LEN: usize = 4096;

// Forwarding subsystem sizing
pub const FWD_RING_SIZE: usize = 65536;
pub const FWD_LOCK_SIZE: usize = 0xF;
pub const FWD_MAX_ADDRS: usize = 8;

// Bounded retry counts
pub const FWD_ID_MAX_TRIES: usize = 64;
pub const FWD_SENDTO_MAX_TRIES: usize = 16;

// Per-iteration drain caps for the forwarding worker loop
pub const FWD_DRAIN_BURST: usize = 64;

// Correlation-table sweep period (microseconds)
pub const FWD_SWEEP_INTERVAL_US: u64 = 200 * 1000;

// Answer-cache policy: flat TTL, pre-expiry refresh window, stale salvage window
pub const FWD_CACHE_TTL_SECS: u64 = 60;
pub const FWD_CACHE_EXPIRING_SECS: u64 = 10;
pub const FWD_CACHE_SALVAGE_SECS: u64 = 600;
pub const FWD_CACHE_SWEEP_SECS: u64 = 600;

// Packet pipeline
pub const NETIF_MAX_PKT_BURST: usize = 32;
pub const CTRL_RING_SIZE: usize = 1024;
