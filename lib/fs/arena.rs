//! Stable inode numbering for lazily materialized nodes.
//!
//! [`NodeArena`] maps between node identities and inode addresses using two [`scc::HashMap`]s
//! guarded by a coordination lock for cross-map atomicity. An identity keeps the address it was
//! first given for as long as the arena lives.

use std::hash::Hash;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::fs::InodeAddr;

/// Bidirectional `identity <-> inode address` map.
///
/// Uses two concurrent `scc::HashMap`s for lock-free reads. Interning touches both maps and is
/// serialized by a `Mutex<()>`, so two racing lookups of the same identity can never hand out
/// two addresses.
pub struct NodeArena<N> {
    /// addr -> identity
    by_addr: scc::HashMap<InodeAddr, N>,
    /// identity -> addr
    by_node: scc::HashMap<N, InodeAddr>,
    next_addr: AtomicU64,
    /// Serializes mutations that touch both maps.
    mu: Mutex<()>,
}

impl<N: Eq + Hash + Clone> NodeArena<N> {
    /// The address the root identity is always interned at.
    pub const ROOT_ADDR: InodeAddr = 1;

    /// Creates an arena holding only `root`, at [`ROOT_ADDR`](Self::ROOT_ADDR).
    #[must_use]
    pub fn new(root: N) -> Self {
        let arena = Self {
            by_addr: scc::HashMap::new(),
            by_node: scc::HashMap::new(),
            next_addr: AtomicU64::new(Self::ROOT_ADDR + 1),
            mu: Mutex::new(()),
        };
        let _ = arena.by_addr.insert_sync(Self::ROOT_ADDR, root.clone());
        let _ = arena.by_node.insert_sync(root, Self::ROOT_ADDR);
        arena
    }

    /// Resolve an address to its identity.
    #[must_use]
    pub fn resolve(&self, addr: InodeAddr) -> Option<N> {
        self.by_addr.read_sync(&addr, |_, node| node.clone())
    }

    /// The address of `node`, if it has been interned.
    #[must_use]
    pub fn addr_of(&self, node: &N) -> Option<InodeAddr> {
        self.by_node.read_sync(node, |_, &addr| addr)
    }

    /// Return the address of `node`, allocating a fresh one on first sight.
    pub fn intern(&self, node: N) -> InodeAddr {
        if let Some(addr) = self.addr_of(&node) {
            return addr;
        }

        let _guard = self
            .mu
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match self.by_node.entry_sync(node) {
            scc::hash_map::Entry::Occupied(occ) => *occ.get(),
            scc::hash_map::Entry::Vacant(vac) => {
                let addr = self.next_addr.fetch_add(1, Ordering::Relaxed);
                let node = vac.key().clone();
                vac.insert_entry(addr);
                let _ = self.by_addr.insert_sync(addr, node);
                addr
            }
        }
    }

    /// Number of interned identities, root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// Always `false`: the root is interned at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}
