//! Splitting a byte stream into bounded-size blocks.

use crate::block::Block;
use crate::error::{Error, Result};
use bytes::Bytes;
use futures::Stream;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Cuts an async byte stream into sequential blocks of at most `block_size`
/// bytes.
///
/// Blocks come out in strictly increasing offset order. Every block except the
/// last is exactly `block_size` long. Once the stream is exhausted, or a read
/// fails, the chunker yields nothing more. Read failures are not retried.
pub struct Chunker<R> {
    reader: R,
    block_size: u64,
    expected_size: Option<u64>,
    next_index: u32,
    offset: u64,
    finished: bool,
}

impl<R: AsyncRead + Unpin> Chunker<R> {
    /// Create a chunker over `reader`.
    pub fn new(reader: R, block_size: u64) -> Self {
        Self {
            reader,
            block_size,
            expected_size: None,
            next_index: 0,
            offset: 0,
            finished: false,
        }
    }

    /// Require the stream to produce exactly `size` bytes.
    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read the next block, or `None` at end of input.
    pub async fn next_block(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }

        match self.read_block().await {
            Ok(block) => {
                if block.is_none() {
                    self.finished = true;
                }
                Ok(block)
            }
            Err(e) => {
                self.finished = true;
                Err(e)
            }
        }
    }

    async fn read_block(&mut self) -> Result<Option<Block>> {
        let want = match self.expected_size {
            Some(expected) if self.offset >= expected => {
                self.ensure_exhausted(expected).await?;
                return Ok(None);
            }
            Some(expected) => self.block_size.min(expected - self.offset),
            None => self.block_size,
        };

        let want = usize::try_from(want).map_err(|_| Error::InvalidBlockSize {
            size: self.block_size,
            min: crate::MIN_BLOCK_SIZE,
            max: usize::MAX as u64,
        })?;

        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self
                .reader
                .read(&mut buf[filled..])
                .await
                .map_err(|source| Error::Read {
                    offset: self.offset + filled as u64,
                    source,
                })?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            if let Some(expected) = self.expected_size {
                return Err(Error::SizeMismatch {
                    declared: expected,
                    actual: self.offset,
                });
            }
            return Ok(None);
        }

        if filled < want
            && let Some(expected) = self.expected_size
        {
            return Err(Error::SizeMismatch {
                declared: expected,
                actual: self.offset + filled as u64,
            });
        }

        buf.truncate(filled);
        let block = Block::new(self.next_index, self.offset, Bytes::from(buf));
        self.next_index += 1;
        self.offset += filled as u64;

        tracing::trace!(
            index = block.index(),
            offset = block.span.offset,
            len = block.len(),
            "Cut block"
        );

        Ok(Some(block))
    }

    /// A stream with a declared size must end exactly at that size.
    async fn ensure_exhausted(&mut self, expected: u64) -> Result<()> {
        let mut probe = [0u8; 1];
        let n = self
            .reader
            .read(&mut probe)
            .await
            .map_err(|source| Error::Read {
                offset: self.offset,
                source,
            })?;
        if n > 0 {
            return Err(Error::SizeMismatch {
                declared: expected,
                actual: self.offset + n as u64,
            });
        }
        Ok(())
    }

    /// Turn the chunker into a stream of blocks.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Block>>
    where
        R: Send,
    {
        async_stream::try_stream! {
            while let Some(block) = self.next_block().await? {
                yield block;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    /// Reader that hands out data in small pieces and then fails.
    struct FailingReader {
        data: Vec<u8>,
        pos: usize,
        piece: usize,
    }

    impl AsyncRead for FailingReader {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.pos >= self.data.len() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "peer went away",
                )));
            }
            let end = (self.pos + self.piece)
                .min(self.data.len())
                .min(self.pos + buf.remaining());
            buf.put_slice(&self.data[self.pos..end]);
            self.pos = end;
            Poll::Ready(Ok(()))
        }
    }

    async fn collect(data: &[u8], block_size: u64) -> Vec<Block> {
        let mut chunker = Chunker::new(data, block_size).with_expected_size(data.len() as u64);
        let mut blocks = Vec::new();
        while let Some(block) = chunker.next_block().await.unwrap() {
            blocks.push(block);
        }
        blocks
    }

    #[tokio::test]
    async fn test_chunker_block_lengths() {
        let data: Vec<u8> = (0..100u8).collect();
        for block_size in [1u64, 7, 30, 50, 99, 100, 101] {
            let blocks = collect(&data, block_size).await;
            assert_eq!(blocks.len() as u64, 100u64.div_ceil(block_size));
            assert_eq!(blocks.iter().map(Block::len).sum::<u64>(), 100);

            for (i, block) in blocks.iter().enumerate() {
                assert_eq!(block.index() as usize, i);
                assert_eq!(block.span.offset, i as u64 * block_size);
                if i + 1 < blocks.len() {
                    assert_eq!(block.len(), block_size);
                }
            }

            let rebuilt: Vec<u8> = blocks.iter().flat_map(|b| b.data.to_vec()).collect();
            assert_eq!(rebuilt, data);
        }
    }

    #[tokio::test]
    async fn test_chunker_last_block_remainder() {
        let data = vec![1u8; 10];
        let blocks = collect(&data, 4).await;
        let lens: Vec<_> = blocks.iter().map(Block::len).collect();
        assert_eq!(lens, vec![4, 4, 2]);

        let blocks = collect(&data, 5).await;
        let lens: Vec<_> = blocks.iter().map(Block::len).collect();
        assert_eq!(lens, vec![5, 5]);
    }

    #[tokio::test]
    async fn test_chunker_read_error() {
        let reader = FailingReader {
            data: vec![9u8; 10],
            pos: 0,
            piece: 3,
        };
        let mut chunker = Chunker::new(reader, 4);
        assert_eq!(chunker.next_block().await.unwrap().unwrap().len(), 4);
        assert_eq!(chunker.next_block().await.unwrap().unwrap().len(), 4);
        match chunker.next_block().await {
            Err(Error::Read { offset, source }) => {
                assert_eq!(offset, 10);
                assert_eq!(source.kind(), io::ErrorKind::ConnectionReset);
            }
            other => panic!("expected read error, got {other:?}"),
        }
        // Not restartable after a failure.
        assert!(chunker.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_chunker_short_stream() {
        let data = vec![0u8; 6];
        let mut chunker = Chunker::new(&data[..], 4).with_expected_size(10);
        assert_eq!(chunker.next_block().await.unwrap().unwrap().len(), 4);
        assert!(matches!(
            chunker.next_block().await,
            Err(Error::SizeMismatch {
                declared: 10,
                actual: 6
            })
        ));
    }

    #[tokio::test]
    async fn test_chunker_long_stream() {
        let data = vec![0u8; 12];
        let mut chunker = Chunker::new(&data[..], 4).with_expected_size(8);
        assert!(chunker.next_block().await.unwrap().is_some());
        assert!(chunker.next_block().await.unwrap().is_some());
        assert!(matches!(
            chunker.next_block().await,
            Err(Error::SizeMismatch { declared: 8, .. })
        ));
    }

    #[tokio::test]
    async fn test_chunker_into_stream() {
        let data = vec![5u8; 9];
        let stream = Chunker::new(&data[..], 4).into_stream();
        let blocks: Vec<_> = stream.collect().await;
        let lens: Vec<_> = blocks.into_iter().map(|b| b.unwrap().len()).collect();
        assert_eq!(lens, vec![4, 4, 1]);
    }
}
