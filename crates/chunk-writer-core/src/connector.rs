//! Chain connector (component C4).
//!
//! Opens and, where possible, reuses the chained TCP connection to the set
//! of storage servers that hold a chunk's parts. The coordinator treats the
//! resulting [`ChainHandle`] opaquely: it only uses it to hand each
//! [`crate::executor::WriteExecutor`] its own stream.

use crate::chunk_type::ChunkType;
use crate::error::{ConnectorError, Result};
use crate::log_debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// One connected chain: a stream per part, in chain order.
pub struct ChainHandle {
    /// Per-part connections, in the order the locator's chain was given.
    pub streams: Vec<(ChunkType, TcpStream)>,
}

/// Opens and caches chained connections to storage servers.
pub trait ChunkConnector {
    /// Connects to every server in `chain`, returning a handle with one
    /// stream per part. Fails with `Unreachable` if any server can't be
    /// reached within `timeout_ms`, or `Timeout` if the whole chain can't
    /// be established before the deadline.
    fn connect_chain(
        &self,
        chain: &[(ChunkType, SocketAddr)],
        timeout_ms: u32,
    ) -> Result<ChainHandle>;

    /// Returns a chain's streams for possible reuse by a later
    /// `connect_chain` call against the same server set, or tears them
    /// down if the implementation doesn't pool connections.
    fn release_chain(&self, handle: ChainHandle);
}

/// Default [`ChunkConnector`]: plain TCP, with a small pool of idle chains
/// keyed by their (sorted) server address set so a client repeatedly
/// writing chunks on the same chain doesn't pay a fresh handshake every
/// time.
#[derive(Default)]
pub struct TcpChunkConnector {
    idle: Mutex<HashMap<Vec<SocketAddr>, Vec<(ChunkType, TcpStream)>>>,
}

impl TcpChunkConnector {
    /// Creates an empty connector with no pooled connections.
    pub fn new() -> Self {
        Self::default()
    }

    fn pool_key(chain: &[(ChunkType, SocketAddr)]) -> Vec<SocketAddr> {
        chain.iter().map(|(_, addr)| *addr).collect()
    }
}

impl ChunkConnector for TcpChunkConnector {
    fn connect_chain(
        &self,
        chain: &[(ChunkType, SocketAddr)],
        timeout_ms: u32,
    ) -> Result<ChainHandle> {
        let key = Self::pool_key(chain);
        if let Some(pooled) = self.idle.lock().remove(&key) {
            log_debug!("reusing pooled chain connection for {:?}", key);
            return Ok(ChainHandle { streams: pooled });
        }

        let deadline = Instant::now() + Duration::from_millis(timeout_ms as u64);
        let mut streams = Vec::with_capacity(chain.len());
        for (part, addr) in chain {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && !streams.is_empty() {
                return Err(ConnectorError::Timeout.into());
            }
            let connect_timeout = remaining.max(Duration::from_millis(1));
            let stream = TcpStream::connect_timeout(addr, connect_timeout)
                .map_err(|_| ConnectorError::Unreachable(addr.to_string()))?;
            stream.set_nodelay(true).ok();
            streams.push((*part, stream));
        }
        Ok(ChainHandle { streams })
    }

    fn release_chain(&self, handle: ChainHandle) {
        if handle.streams.is_empty() {
            return;
        }
        let key: Vec<SocketAddr> = handle
            .streams
            .iter()
            .map(|(_, s)| s.peer_addr().expect("connected stream has a peer addr"))
            .collect();
        self.idle.lock().insert(key, handle.streams);
    }
}
