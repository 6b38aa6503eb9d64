//! Chunk locator contract (component C3).
//!
//! The locator is the client's adapter to the master-server metadata layer:
//! it resolves which storage servers hold each part of a chunk, manages the
//! master-side write lock, and answers the repair reads the coordinator
//! needs to complete a partial stripe. Its implementation (master RPC,
//! caching, retries) is out of scope here; only the contract the
//! coordinator depends on lives in this crate.

use crate::chunk_type::ChunkType;
use crate::error::Result;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// The effective chunk-type family for a chunk: either unstriped or an
/// XOR-`L` stripe set (parts `1..=L` plus parity).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkLayout {
    /// Chunk stored as a single object, replicated across the chain.
    Standard,
    /// XOR striping at the given level.
    Xor(u8),
}

impl ChunkLayout {
    /// Every [`ChunkType`] this layout is responsible for, in a stable
    /// order (data parts first, parity last for XOR layouts).
    pub fn parts(&self) -> Vec<ChunkType> {
        match self {
            ChunkLayout::Standard => vec![ChunkType::standard()],
            ChunkLayout::Xor(level) => {
                let mut parts: Vec<ChunkType> =
                    (1..=*level).map(|p| ChunkType::xor(*level, p)).collect();
                parts.push(ChunkType::xor_parity(*level));
                parts
            }
        }
    }

    /// Stripe size: `L` for XOR layouts, `1` for `Standard`.
    pub fn stripe_size(&self) -> u32 {
        match self {
            ChunkLayout::Standard => 1,
            ChunkLayout::Xor(level) => *level as u32,
        }
    }
}

/// The resolved location of every part of a chunk, plus the chunk's
/// version as seen by the master at resolution time.
#[derive(Debug, Clone)]
pub struct Locations {
    /// Chunk version this resolution is valid for.
    pub version: u32,
    /// Effective layout.
    pub layout: ChunkLayout,
    /// Server holding each part.
    pub servers: BTreeMap<ChunkType, SocketAddr>,
}

impl Locations {
    /// Server chain in the fixed part order `ChunkLayout::parts()` returns.
    pub fn chain(&self) -> Vec<(ChunkType, SocketAddr)> {
        self.layout
            .parts()
            .into_iter()
            .filter_map(|ct| self.servers.get(&ct).map(|addr| (ct, *addr)))
            .collect()
    }
}

/// Adapter to the master-server metadata layer for one chunk's write.
///
/// Every method that performs I/O takes a millisecond timeout; `0` means
/// "do what is possible immediately and return".
pub trait Locator {
    /// Resolves the current server chain and version for this chunk.
    fn locations(&mut self, timeout_ms: u32) -> Result<Locations>;

    /// Acquires the master-side write lock for this chunk.
    fn lock_for_write(&mut self, timeout_ms: u32) -> Result<()>;

    /// Releases the write lock. Must be called exactly once after a
    /// successful `lock_for_write`.
    fn unlock(&mut self) -> Result<()>;

    /// The effective chunk-type family for this chunk.
    fn chunk_layout(&self) -> ChunkLayout;

    /// Repair-read primitive: returns the current bytes of `block_index`
    /// for `part`, or zeros if the chunkserver has never stored that
    /// block. Which server answers the read is this locator's policy;
    /// the coordinator doesn't need to know.
    fn read_block(&mut self, part: ChunkType, block_index: u32, timeout_ms: u32)
        -> Result<Vec<u8>>;
}
