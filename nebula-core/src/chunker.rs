//! Stream chunking
//!
//! Splits an incoming byte stream into blocks of exactly `block_size`
//! bytes; only the final chunk may be shorter. No padding happens here:
//! uniform-length hashing, when required, is applied at the Merkle layer.

use crate::error::{NebulaError, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Splits an `AsyncRead` into fixed-size chunks, tracking the cumulative
/// offset. At EOF the offset equals the dataset size.
pub struct Chunker<R> {
    reader: R,
    block_size: usize,
    offset: u64,
    done: bool,
}

impl<R: AsyncRead + Unpin> Chunker<R> {
    pub fn new(reader: R, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(NebulaError::InvalidArgument(
                "block size must be positive".to_string(),
            ));
        }
        Ok(Self {
            reader,
            block_size,
            offset: 0,
            done: false,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next chunk. Returns `None` at end of stream.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.block_size];
        let mut filled = 0;
        while filled < self.block_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.done = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.offset += filled as u64;
        Ok(Some(Bytes::from(buf)))
    }
}

/// Zero-pad `chunk` to `block_size` for hash constructions that require
/// uniform leaf length. Chunks already at full length are returned as-is.
pub fn pad_to_block_size(chunk: &Bytes, block_size: usize) -> Bytes {
    if chunk.len() >= block_size {
        return chunk.clone();
    }
    let mut padded = Vec::with_capacity(block_size);
    padded.extend_from_slice(chunk);
    padded.resize(block_size, 0);
    Bytes::from(padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_exact_multiple() {
        let data = vec![7u8; 1024];
        let mut chunker = Chunker::new(Cursor::new(data), 256).unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.len() == 256));
        assert_eq!(chunker.offset(), 1024);
    }

    #[tokio::test]
    async fn test_short_final_chunk_not_padded() {
        let data = vec![1u8; 1000];
        let mut chunker = Chunker::new(Cursor::new(data), 256).unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = chunker.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[3].len(), 1000 - 3 * 256);
        assert_eq!(chunker.offset(), 1000);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut chunker = Chunker::new(Cursor::new(Vec::<u8>::new()), 256).unwrap();
        assert!(chunker.next_chunk().await.unwrap().is_none());
        assert_eq!(chunker.offset(), 0);
    }

    #[tokio::test]
    async fn test_zero_block_size_rejected() {
        let result = Chunker::new(Cursor::new(vec![0u8; 10]), 0);
        assert!(matches!(result, Err(NebulaError::InvalidArgument(_))));
    }

    #[test]
    fn test_padding() {
        let chunk = Bytes::from_static(b"abc");
        let padded = pad_to_block_size(&chunk, 8);
        assert_eq!(padded.as_ref(), b"abc\0\0\0\0\0");

        let full = Bytes::from_static(b"12345678");
        assert_eq!(pad_to_block_size(&full, 8), full);
    }
}
