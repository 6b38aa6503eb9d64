//! In-process demo chunkserver chain.
//!
//! Stands in for a real storage-server fleet: one thread per chain part,
//! speaking the wire protocol `chunk_writer_core::protocol` defines,
//! always reporting success. Exists so `chunk-writer run` has something to
//! write to without a real cluster.

use bytes::BytesMut;
use chunk_writer_core::chunk_type::ChunkType;
use chunk_writer_core::protocol::{self, Frame, WriteInitStatus, WriteStatus};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;

/// Spawns one demo server per entry in `parts`, returning the address each
/// bound to. Every server accepts exactly one connection and then exits
/// once its client sends `WRITE_END` or disconnects.
pub fn spawn_chain(parts: &[ChunkType]) -> BTreeMap<ChunkType, SocketAddr> {
    let mut addrs = BTreeMap::new();
    for &part in parts {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind demo chunkserver");
        let addr = listener.local_addr().expect("demo chunkserver local addr");
        addrs.insert(part, addr);
        thread::spawn(move || serve_one(listener, part));
    }
    addrs
}

fn serve_one(listener: TcpListener, part: ChunkType) {
    let Ok((mut sock, peer)) = listener.accept() else {
        return;
    };
    tracing::debug!(?part, %peer, "demo chunkserver accepted connection");

    let mut buf = BytesMut::with_capacity(4096);
    let chunk_id = loop {
        match read_frame(&mut sock, &mut buf) {
            Some(Frame::Init(init)) => {
                let _ = sock.write_all(&WriteInitStatus { status: 0 }.encode());
                break init.chunk_id;
            }
            Some(_) | None => return,
        }
    };

    loop {
        match read_frame(&mut sock, &mut buf) {
            Some(Frame::Data(data)) => {
                tracing::debug!(?part, write_id = data.write_id, len = data.bytes.len(), "wrote block");
                let _ = sock.write_all(
                    &WriteStatus {
                        write_id: data.write_id,
                        chunk_id,
                        status: 0,
                    }
                    .encode(),
                );
            }
            Some(Frame::End) | None => return,
            Some(_) => return,
        }
    }
}

fn read_frame(sock: &mut TcpStream, buf: &mut BytesMut) -> Option<Frame> {
    loop {
        if let Ok(Some(frame)) = protocol::try_decode_frame(buf) {
            return Some(frame);
        }
        let mut tmp = [0u8; 4096];
        match sock.read(&mut tmp) {
            Ok(0) => return None,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(_) => return None,
        }
    }
}
