//! # Chunk Writer Core
//!
//! Client-side coordinator for writing a chunk to a chained set of storage
//! servers, with optional XOR erasure coding across the chain.

#![warn(missing_docs)]

/// Core application components: configuration and logging.
pub mod core;

/// System constants shared across the write pipeline.
pub mod constants;

/// Error types returned throughout this crate.
pub mod error;

/// Chunk-type algebra: `Standard` vs XOR-`L` striping with parity.
pub mod chunk_type;

/// Caller-supplied write payload, the unit `ChunkWriter::add_operation` accepts.
pub mod write_cache_block;

/// Generational arena backing pending write payloads.
pub mod journal;

/// Adapter contract to the master-server metadata layer.
pub mod locator;

/// Chain connector: opens and pools chained TCP connections to storage servers.
pub mod connector;

/// Wire protocol between a client and one storage server in the chain.
pub mod protocol;

/// Per-server write state machine driving one chained TCP connection.
pub mod executor;

/// The `ChunkWriter` coordinator tying locator, connector and executors together.
pub mod writer;

// Re-export commonly used items.
pub use chunk_type::ChunkType;
pub use connector::{ChainHandle, ChunkConnector, TcpChunkConnector};
pub use core::Config;
pub use error::{Error, Result};
pub use journal::{Journal, JournalPosition};
pub use locator::{ChunkLayout, Locations, Locator};
pub use write_cache_block::WriteCacheBlock;
pub use writer::{ChunkWriter, Operation, OperationId, WriterState};
