use bytes::Bytes;
use cask_core::BlockId;

/// Generate deterministic test data using a seeded pseudo-random generator
/// Same seed produces same output (reproducible tests)
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    // Simple LCG (Linear Congruential Generator)
    for chunk in data.chunks_mut(8) {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Split `data` into blocks of `block_size`, paired with their identifiers.
pub fn split_blocks(data: &Bytes, block_size: usize) -> Vec<(BlockId, Bytes)> {
    (0..data.len())
        .step_by(block_size)
        .enumerate()
        .map(|(i, start)| {
            let end = (start + block_size).min(data.len());
            (BlockId::from_index(i as u32), data.slice(start..end))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_bytes_deterministic() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(42, 1000);
        assert_eq!(data1, data2);
    }

    #[test]
    fn test_seeded_bytes_different_seeds() {
        let data1 = seeded_bytes(42, 1000);
        let data2 = seeded_bytes(43, 1000);
        assert_ne!(data1, data2);
    }

    #[test]
    fn test_split_blocks() {
        let data = seeded_bytes(1, 10);
        let blocks = split_blocks(&data, 4);
        let lens: Vec<_> = blocks.iter().map(|(_, b)| b.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert_eq!(blocks[2].0.index(), 2);
    }
}
