//! Chunk Writer CLI
//!
//! Drives `chunk_writer_core::ChunkWriter` against an in-process demo
//! chunkserver chain, so the write pipeline can be exercised end to end
//! without a real storage-server fleet.

mod mock_server;

use chunk_writer_core::{
    ChunkLayout, ChunkType, ChunkWriter, Config, Error, Locations, Locator, Result,
    TcpChunkConnector, WriteCacheBlock,
};
use clap::{Arg, Command};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = Command::new("chunk-writer")
        .version("0.1.0")
        .about("Writes a chunk to an in-process demo chunkserver chain")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("chunk-id")
                .long("chunk-id")
                .value_name("ID")
                .default_value("1")
                .help("Chunk identifier"),
        )
        .arg(
            Arg::new("layout")
                .long("layout")
                .value_name("LAYOUT")
                .default_value("standard")
                .help("standard, or xor2/xor3/xor4/xor6/xor7/xor10"),
        )
        .arg(
            Arg::new("input")
                .long("input")
                .value_name("FILE")
                .help("File to write; a small built-in payload is used if omitted"),
        )
        .get_matches();

    tracing_subscriber::fmt::init();

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = chunk_writer_core::core::config::load_config_or_default(config_path);

    let chunk_id: u64 = matches
        .get_one::<String>("chunk-id")
        .unwrap()
        .parse()
        .map_err(|_| anyhow::anyhow!("chunk-id must be an integer"))?;
    let layout = parse_layout(matches.get_one::<String>("layout").unwrap())?;
    let payload = match matches.get_one::<String>("input") {
        Some(path) => std::fs::read(path)?,
        None => b"the quick brown fox jumps over the lazy dog ".repeat(2048),
    };

    info!(chunk_id, ?layout, bytes = payload.len(), "starting demo write");

    let write_handle =
        tokio::task::spawn_blocking(move || run_write(chunk_id, layout, payload, config));

    tokio::select! {
        result = write_handle => {
            let summary = result.map_err(|e| anyhow::anyhow!("write task panicked: {e}"))??;
            info!(%summary, "write complete");
        }
        _ = signal::ctrl_c() => {
            warn!("received shutdown signal before write finished");
        }
    }

    Ok(())
}

fn parse_layout(s: &str) -> anyhow::Result<ChunkLayout> {
    match s {
        "standard" => Ok(ChunkLayout::Standard),
        "xor2" => Ok(ChunkLayout::Xor(2)),
        "xor3" => Ok(ChunkLayout::Xor(3)),
        "xor4" => Ok(ChunkLayout::Xor(4)),
        "xor6" => Ok(ChunkLayout::Xor(6)),
        "xor7" => Ok(ChunkLayout::Xor(7)),
        "xor10" => Ok(ChunkLayout::Xor(10)),
        other => Err(anyhow::anyhow!("unrecognized layout '{other}'")),
    }
}

/// Locator stand-in for the demo: the chain is whatever
/// [`mock_server::spawn_chain`] just bound, not a real master resolution.
struct DemoLocator {
    layout: ChunkLayout,
    servers: BTreeMap<ChunkType, SocketAddr>,
    version: u32,
}

impl Locator for DemoLocator {
    fn locations(&mut self, _timeout_ms: u32) -> Result<Locations> {
        Ok(Locations {
            version: self.version,
            layout: self.layout,
            servers: self.servers.clone(),
        })
    }

    fn lock_for_write(&mut self, _timeout_ms: u32) -> Result<()> {
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    fn chunk_layout(&self) -> ChunkLayout {
        self.layout
    }

    fn read_block(
        &mut self,
        _part: ChunkType,
        _block_index: u32,
        _timeout_ms: u32,
    ) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

fn run_write(chunk_id: u64, layout: ChunkLayout, payload: Vec<u8>, config: Config) -> Result<String> {
    let parts = layout.parts();
    let servers = mock_server::spawn_chain(&parts);
    let locator = DemoLocator {
        layout,
        servers,
        version: 1,
    };

    let block_size = config.write.block_size as usize;
    let mut writer: ChunkWriter<DemoLocator, TcpChunkConnector> =
        ChunkWriter::new(block_size as u64);
    writer.init(
        locator,
        TcpChunkConnector::new(),
        chunk_id,
        config.write.init_timeout_ms,
    )?;

    for (index, chunk) in payload.chunks(block_size).enumerate() {
        writer.add_operation(WriteCacheBlock::new(index as u32, 0, chunk.to_vec()))?;
    }

    let deadline = Instant::now() + Duration::from_millis(config.write.finish_timeout_ms as u64);
    loop {
        writer.start_new_operations(config.write.poll_timeout_ms)?;
        writer.process_operations(config.write.poll_timeout_ms)?;
        if writer.unfinished_operations_count() == 0 {
            break;
        }
        if Instant::now() >= deadline {
            return Err(Error::Timeout);
        }
    }

    writer.start_flush_mode()?;
    writer.finish(config.write.finish_timeout_ms)?;

    Ok(format!(
        "chunk {chunk_id} written: {} bytes across {} part(s)",
        payload.len(),
        parts.len()
    ))
}
