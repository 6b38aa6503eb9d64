//! Wire protocol between a `ChunkWriter` client and one storage server in
//! the chain (component: external interface §6.1).
//!
//! Frames are length-prefixed and tagged: `[u8 tag][u32 body_len][body]`.
//! All multi-byte integers are big-endian, via `bytes::{Buf, BufMut}`.

use crate::chunk_type::ChunkType;
use crate::error::{Error, ExecutorError};
use bytes::{Buf, BufMut, BytesMut};
use std::net::SocketAddr;
use std::str::FromStr;

const TAG_WRITE_INIT: u8 = 1;
const TAG_WRITE_INIT_STATUS: u8 = 2;
const TAG_WRITE_DATA: u8 = 3;
const TAG_WRITE_STATUS: u8 = 4;
const TAG_WRITE_END: u8 = 5;

/// Status code on the wire: `0` is success, nonzero is a server-defined
/// error code.
pub type StatusCode = u32;

/// `WRITE_INIT(chunkId, version, chunkType, chain)`.
#[derive(Debug, Clone)]
pub struct WriteInit {
    /// Chunk identity.
    pub chunk_id: u64,
    /// Chunk version at lock time.
    pub version: u32,
    /// Which part of the chunk this connection writes.
    pub chunk_type: ChunkType,
    /// Servers downstream of this one for this part (may be empty when the
    /// connector opens a direct connection per part).
    pub chain: Vec<SocketAddr>,
}

/// `WRITE_INIT_STATUS(status)`.
#[derive(Debug, Clone, Copy)]
pub struct WriteInitStatus {
    /// `0` on success.
    pub status: StatusCode,
}

/// `WRITE_DATA(writeId, blockIndex, offsetInBlock, size, crc, bytes)`.
#[derive(Debug, Clone)]
pub struct WriteData {
    /// Per-executor write identifier; never `0`.
    pub write_id: u32,
    /// Chunk-relative block index.
    pub block_index: u16,
    /// Intra-block byte offset.
    pub offset_in_block: u32,
    /// CRC-32/ISO-HDLC of `bytes` (the same polynomial `crc32fast` computes).
    pub crc: u32,
    /// Payload.
    pub bytes: Vec<u8>,
}

/// `WRITE_STATUS(writeId, chunkId, status)`.
#[derive(Debug, Clone, Copy)]
pub struct WriteStatus {
    /// The write this status acknowledges.
    pub write_id: u32,
    /// Chunk identity, echoed back for sanity-checking.
    pub chunk_id: u64,
    /// `0` on success.
    pub status: StatusCode,
}

/// Computes the wire CRC for a block's payload.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

impl WriteInit {
    /// Encodes a full length-prefixed `WRITE_INIT` frame.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u64(self.chunk_id);
        body.put_u32(self.version);
        body.put_u8(self.chunk_type.encode());
        body.put_u8(self.chain.len() as u8);
        for addr in &self.chain {
            let s = addr.to_string();
            body.put_u16(s.len() as u16);
            body.put_slice(s.as_bytes());
        }
        frame(TAG_WRITE_INIT, &body)
    }

    /// Decodes a `WRITE_INIT` body (tag and length already consumed). Used
    /// by a storage server implementation to parse what a client sent.
    pub fn decode(mut body: &[u8]) -> Result<Self, Error> {
        if body.len() < 14 {
            return Err(ExecutorError::ProtocolViolation("short WRITE_INIT".into()).into());
        }
        let chunk_id = body.get_u64();
        let version = body.get_u32();
        let chunk_type = ChunkType::decode(body.get_u8())?;
        let chain_len = body.get_u8();
        let mut chain = Vec::with_capacity(chain_len as usize);
        for _ in 0..chain_len {
            if body.remaining() < 2 {
                return Err(ExecutorError::ProtocolViolation("truncated WRITE_INIT chain".into()).into());
            }
            let len = body.get_u16() as usize;
            if body.remaining() < len {
                return Err(ExecutorError::ProtocolViolation("truncated WRITE_INIT chain entry".into()).into());
            }
            let s = std::str::from_utf8(&body[..len])
                .map_err(|_| ExecutorError::ProtocolViolation("non-utf8 chain entry".into()))?;
            let addr = SocketAddr::from_str(s)
                .map_err(|_| ExecutorError::ProtocolViolation("bad chain address".into()))?;
            body.advance(len);
            chain.push(addr);
        }
        Ok(WriteInit {
            chunk_id,
            version,
            chunk_type,
            chain,
        })
    }
}

impl WriteInitStatus {
    /// Encodes a full length-prefixed `WRITE_INIT_STATUS` frame.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u32(self.status);
        frame(TAG_WRITE_INIT_STATUS, &body)
    }

    /// Decodes a `WRITE_INIT_STATUS` body (tag and length already consumed).
    pub fn decode(mut body: &[u8]) -> Result<Self, Error> {
        if body.len() < 4 {
            return Err(ExecutorError::ProtocolViolation("short WRITE_INIT_STATUS".into()).into());
        }
        Ok(WriteInitStatus {
            status: body.get_u32(),
        })
    }
}

impl WriteData {
    /// Encodes a full length-prefixed `WRITE_DATA` frame.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::with_capacity(16 + self.bytes.len());
        body.put_u32(self.write_id);
        body.put_u16(self.block_index);
        body.put_u32(self.offset_in_block);
        body.put_u32(self.bytes.len() as u32);
        body.put_u32(self.crc);
        body.put_slice(&self.bytes);
        frame(TAG_WRITE_DATA, &body)
    }

    /// Decodes a `WRITE_DATA` body (tag and length already consumed).
    pub fn decode(mut body: &[u8]) -> Result<Self, Error> {
        if body.len() < 14 {
            return Err(ExecutorError::ProtocolViolation("short WRITE_DATA header".into()).into());
        }
        let write_id = body.get_u32();
        let block_index = body.get_u16();
        let offset_in_block = body.get_u32();
        let size = body.get_u32() as usize;
        let crc = body.get_u32();
        if body.remaining() < size {
            return Err(ExecutorError::ProtocolViolation("truncated WRITE_DATA payload".into()).into());
        }
        let bytes = body[..size].to_vec();
        Ok(WriteData {
            write_id,
            block_index,
            offset_in_block,
            crc,
            bytes,
        })
    }
}

impl WriteStatus {
    /// Encodes a full length-prefixed `WRITE_STATUS` frame.
    pub fn encode(&self) -> BytesMut {
        let mut body = BytesMut::new();
        body.put_u32(self.write_id);
        body.put_u64(self.chunk_id);
        body.put_u32(self.status);
        frame(TAG_WRITE_STATUS, &body)
    }

    /// Decodes a `WRITE_STATUS` body (tag and length already consumed).
    pub fn decode(mut body: &[u8]) -> Result<Self, Error> {
        if body.len() < 16 {
            return Err(ExecutorError::ProtocolViolation("short WRITE_STATUS".into()).into());
        }
        Ok(WriteStatus {
            write_id: body.get_u32(),
            chunk_id: body.get_u64(),
            status: body.get_u32(),
        })
    }
}

/// Encodes a bare `WRITE_END` frame (no body, no response expected).
pub fn encode_write_end() -> BytesMut {
    frame(TAG_WRITE_END, &[])
}

fn frame(tag: u8, body: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(5 + body.len());
    out.put_u8(tag);
    out.put_u32(body.len() as u32);
    out.put_slice(body);
    out
}

/// One decoded frame, tagged by variant. Covers both directions of the wire
/// protocol: a client decodes `Init{Status}`/`Status`, a storage server
/// decodes `Init`/`Data`/`End`.
#[derive(Debug, Clone)]
pub enum Frame {
    /// See [`WriteInit`].
    Init(WriteInit),
    /// See [`WriteInitStatus`].
    InitStatus(WriteInitStatus),
    /// See [`WriteData`].
    Data(WriteData),
    /// See [`WriteStatus`].
    Status(WriteStatus),
    /// `WRITE_END`, no body.
    End,
}

/// Attempts to decode exactly one frame from the front of `buf`, advancing
/// `buf` past it on success. Returns `Ok(None)` if `buf` doesn't yet hold a
/// complete frame.
pub fn try_decode_frame(buf: &mut BytesMut) -> Result<Option<Frame>, Error> {
    if buf.len() < 5 {
        return Ok(None);
    }
    let tag = buf[0];
    let body_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if buf.len() < 5 + body_len {
        return Ok(None);
    }

    let body = buf[5..5 + body_len].to_vec();
    buf.advance(5 + body_len);

    match tag {
        TAG_WRITE_INIT => Ok(Some(Frame::Init(WriteInit::decode(&body)?))),
        TAG_WRITE_INIT_STATUS => Ok(Some(Frame::InitStatus(WriteInitStatus::decode(&body)?))),
        TAG_WRITE_DATA => Ok(Some(Frame::Data(WriteData::decode(&body)?))),
        TAG_WRITE_STATUS => Ok(Some(Frame::Status(WriteStatus::decode(&body)?))),
        TAG_WRITE_END => Ok(Some(Frame::End)),
        other => Err(ExecutorError::ProtocolViolation(format!("unexpected frame tag {other}")).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_data_round_trips() {
        let wd = WriteData {
            write_id: 7,
            block_index: 3,
            offset_in_block: 0,
            crc: crc32(b"hello"),
            bytes: b"hello".to_vec(),
        };
        let frame_bytes = wd.encode();
        // tag(1) + len(4) + body
        let body = &frame_bytes[5..];
        let decoded = WriteData::decode(body).unwrap();
        assert_eq!(decoded.write_id, 7);
        assert_eq!(decoded.block_index, 3);
        assert_eq!(decoded.bytes, b"hello");
        assert_eq!(decoded.crc, crc32(b"hello"));
    }

    #[test]
    fn status_frame_round_trips_through_try_decode() {
        let status = WriteStatus {
            write_id: 42,
            chunk_id: 99,
            status: 0,
        };
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&status.encode());

        let decoded = try_decode_frame(&mut buf).unwrap().unwrap();
        match decoded {
            Frame::Status(s) => {
                assert_eq!(s.write_id, 42);
                assert_eq!(s.chunk_id, 99);
                assert_eq!(s.status, 0);
            }
            _ => panic!("wrong frame variant"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn try_decode_returns_none_on_partial_frame() {
        let status = WriteStatus {
            write_id: 1,
            chunk_id: 1,
            status: 0,
        };
        let full = status.encode();
        let mut partial = BytesMut::new();
        partial.extend_from_slice(&full[..full.len() - 2]);
        assert!(try_decode_frame(&mut partial).unwrap().is_none());
    }
}
