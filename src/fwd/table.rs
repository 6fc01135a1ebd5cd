//! Per-worker correlation table: (upstream transaction ID, qtype, qname) →
//! in-flight query. Each forwarding worker owns its own UDP socket, so every
//! upstream reply lands on the worker that sent the request; the table is
//! never shared across threads.

use rand::Rng;

use crate::constants::FWD_ID_MAX_TRIES;
use crate::fwd::qnode::QNode;
use crate::striped::{StripedMap, TableEntry};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CKey {
    pub id: u16,
    pub qtype: u16,
    pub qname: String,
}

/// A correlation record tying a QNode to its in-flight upstream transaction.
/// The entry owns the node; a matched or swept entry hands it back by move.
#[derive(Debug)]
pub struct CNode {
    pub qnode: Box<QNode>,
    pub new_id: u16,
    /// Absolute deadline, monotonic microseconds.
    pub expires_at: u64,
}

impl TableEntry for CNode {
    type Key = CKey;

    fn key(&self) -> CKey {
        CKey {
            id: self.new_id,
            qtype: self.qnode.qtype,
            qname: self.qnode.qname.clone(),
        }
    }

    fn expired(&self, now_us: u64) -> bool {
        self.expires_at < now_us
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdExhausted;

pub struct CorrelationTable {
    map: StripedMap<CNode>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self {
            map: StripedMap::new(),
        }
    }

    /// Draw a random 16-bit ID not currently live for (qtype, qname). Gives
    /// up after a bounded number of collisions rather than scanning the ID
    /// space.
    pub fn allocate_id(&self, qname: &str, qtype: u16) -> Result<u16, IdExhausted> {
        let mut rng = rand::rng();
        let mut key = CKey {
            id: 0,
            qtype,
            qname: qname.to_string(),
        };
        for _ in 0..FWD_ID_MAX_TRIES {
            key.id = rng.random();
            if !self.map.contains(&key) {
                return Ok(key.id);
            }
        }
        Err(IdExhausted)
    }

    /// Register an entry. `allocate_id` guarantees the key is free; a live
    /// entry is never overwritten.
    pub fn insert(&self, cnode: CNode) {
        debug_assert!(!self.map.contains(&cnode.key()));
        self.map.insert(cnode);
    }

    /// Correlate an upstream reply. A reply whose entry was already swept
    /// (or that was never sent by this worker) finds nothing and is the
    /// caller's cue to discard the datagram.
    pub fn match_and_remove(&self, id: u16, qtype: u16, qname: &str) -> Option<CNode> {
        self.map.remove(&CKey {
            id,
            qtype,
            qname: qname.to_string(),
        })
    }

    /// Remove every timed-out entry, handing its QNode to `on_expired`.
    pub fn sweep(&self, now_us: u64, mut on_expired: impl FnMut(Box<QNode>)) -> usize {
        self.map.sweep(now_us, |cnode| on_expired(cnode.qnode))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self::new()
    }
}
