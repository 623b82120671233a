//! Block types and identifiers.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Width of the zero-padded decimal index inside a block identifier.
pub const BLOCK_ID_WIDTH: usize = 10;

/// Identifier a block is staged under.
///
/// The index is rendered as a fixed-width, zero-padded decimal string and then
/// hex encoded. Every identifier of an object has the same length, re-staging
/// a block after a failure reuses the same identifier, and the encoded strings
/// sort byte-wise in index order.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId {
    index: u32,
    encoded: String,
}

impl BlockId {
    /// Derive the identifier for the block at `index`.
    pub fn from_index(index: u32) -> Self {
        let padded = format!("{index:0width$}", width = BLOCK_ID_WIDTH);
        let encoded = padded.bytes().map(|b| format!("{b:02x}")).collect();
        Self { index, encoded }
    }

    /// Parse an encoded identifier back into its index.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let invalid = || {
            crate::Error::InvalidBlockId(format!(
                "expected {BLOCK_ID_WIDTH} hex-encoded decimal digits: {s}"
            ))
        };

        if s.len() != BLOCK_ID_WIDTH * 2 {
            return Err(invalid());
        }
        let digits = s
            .as_bytes()
            .chunks(2)
            .map(|pair| {
                std::str::from_utf8(pair)
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .filter(u8::is_ascii_digit)
                    .map(char::from)
            })
            .collect::<Option<String>>()
            .ok_or_else(invalid)?;
        let index = digits
            .parse::<u32>()
            .map_err(|e| crate::Error::InvalidBlockId(format!("index out of range: {e}")))?;

        Ok(Self {
            index,
            encoded: s.to_string(),
        })
    }

    /// The block index this identifier was derived from.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The encoded form sent to the block store.
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl Ord for BlockId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.index.cmp(&other.index)
    }
}

impl PartialOrd for BlockId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}:{})", self.index, self.encoded)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl TryFrom<String> for BlockId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.encoded
    }
}

/// Position of a block inside the source object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSpan {
    /// Position in the commit list (0-indexed).
    pub index: u32,
    /// Byte offset of the first byte.
    pub offset: u64,
    /// Length in bytes.
    pub len: u64,
}

/// A block with its data.
#[derive(Clone)]
pub struct Block {
    /// Where the block sits in the source object.
    pub span: BlockSpan,
    /// Identifier the block is staged under.
    pub id: BlockId,
    /// The block data.
    pub data: Bytes,
}

impl Block {
    /// Create a block at `index` starting at `offset`.
    pub fn new(index: u32, offset: u64, data: Bytes) -> Self {
        Self {
            span: BlockSpan {
                index,
                offset,
                len: data.len() as u64,
            },
            id: BlockId::from_index(index),
            data,
        }
    }

    /// Block index.
    pub fn index(&self) -> u32 {
        self.span.index
    }

    /// Block length in bytes.
    pub fn len(&self) -> u64 {
        self.span.len
    }

    /// Whether the block carries no data.
    pub fn is_empty(&self) -> bool {
        self.span.len == 0
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("index", &self.span.index)
            .field("offset", &self.span.offset)
            .field("len", &self.span.len)
            .finish()
    }
}

/// Number of blocks an object of `total_size` bytes splits into.
pub fn block_count(total_size: u64, block_size: u64) -> u64 {
    if block_size == 0 {
        return 0;
    }
    total_size.div_ceil(block_size)
}

/// Check that `block_size` is usable and that `total_size` fits in at most
/// `max_blocks` blocks. Returns the block count.
pub fn check_layout(total_size: u64, block_size: u64, max_blocks: u64) -> crate::Result<u64> {
    if block_size < crate::MIN_BLOCK_SIZE || block_size > crate::MAX_BLOCK_SIZE {
        return Err(crate::Error::InvalidBlockSize {
            size: block_size,
            min: crate::MIN_BLOCK_SIZE,
            max: crate::MAX_BLOCK_SIZE,
        });
    }

    let count = block_count(total_size, block_size);
    if count > max_blocks {
        return Err(crate::Error::TooManyBlocks {
            count,
            max: max_blocks,
        });
    }
    Ok(count)
}

/// Lay out the spans an object of `total_size` bytes splits into.
pub fn plan_blocks(total_size: u64, block_size: u64) -> Vec<BlockSpan> {
    let count = block_count(total_size, block_size);
    (0..count)
        .map(|i| {
            let offset = i * block_size;
            BlockSpan {
                index: i as u32,
                offset,
                len: block_size.min(total_size - offset),
            }
        })
        .collect()
}
