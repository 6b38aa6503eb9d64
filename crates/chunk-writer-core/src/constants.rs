//! Global constants shared across the chunk write pipeline.

/// Block size `B`, in bytes: the smallest addressable sub-unit of a chunk.
/// Historically 64 KiB; kept as a plain constant rather than a config knob
/// because the wire protocol and stripe arithmetic both assume it.
pub const BLOCK_SIZE: usize = 64 * 1024;

/// XOR stripe levels recognized by [`crate::chunk_type::ChunkType`], in the
/// fixed order used to derive the 8-bit wire tag (see `chunk_type.rs`).
pub const XOR_LEVELS: &[u8] = &[2, 3, 4, 6, 7, 10];

/// `WriteId` value reserved for `WRITE_INIT`; never assigned to a real write.
pub const RESERVED_INIT_WRITE_ID: u32 = 0;
