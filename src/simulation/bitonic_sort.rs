//! Bitonic merge sort over power-of-two buffers.
//!
//! The merge network is split into passes that each only compare elements
//! inside one block of `block_size` elements. Levels wider than a block are
//! handled by transposing the buffer (viewed as a `block_size x len/block_size`
//! matrix), so partners that were a multiple of `block_size` apart become
//! neighbors inside a block, and transposing back.

use super::concurrency::{par_chunks_mut1, par_iter_mut1};
use super::error::SortError;

pub const BITONIC_BLOCK_SIZE: usize = 512;

pub trait SortKey {
    fn sort_key(&self) -> u32;
}

impl SortKey for u32 {
    fn sort_key(&self) -> u32 {
        *self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BitonicSort {
    len: usize,
    block_size: usize,
}

impl BitonicSort {
    pub fn new(len: usize) -> Result<Self, SortError> {
        Self::with_block_size(len, BITONIC_BLOCK_SIZE)
    }

    pub fn with_block_size(len: usize, block_size: usize) -> Result<Self, SortError> {
        if block_size < 2 || !block_size.is_power_of_two() {
            return Err(SortError::BlockSizeNotPowerOfTwo { block_size });
        }
        if !len.is_power_of_two() {
            return Err(SortError::LengthNotPowerOfTwo { len });
        }
        if len % block_size != 0 {
            return Err(SortError::LengthNotBlockAligned { len, block_size });
        }
        let max = block_size * block_size;
        if len > max {
            return Err(SortError::LengthTooLarge { len, max, block_size });
        }
        Ok(BitonicSort { len, block_size })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Sorts `data` ascending by `sort_key`. `temp` is scratch space of the same length.
    pub fn sort<T: SortKey + Copy + Send + Sync>(&self, data: &mut [T], temp: &mut [T]) -> Result<(), SortError> {
        if data.len() != self.len || temp.len() != self.len {
            return Err(SortError::BufferLengthMismatch {
                expected: self.len,
                data: data.len(),
                temp: temp.len(),
            });
        }

        let block = self.block_size;
        let mut level = 2;
        while level <= block {
            local_pass(data, block, level, level);
            level <<= 1;
        }

        let width = block;
        let height = self.len / block;
        let mut level = block << 1;
        while level <= self.len {
            transpose(data, temp, width, height);
            local_pass(temp, block, level / block, (level & !self.len) / block);
            transpose(temp, data, height, width);
            local_pass(data, block, block, level);
            level <<= 1;
        }

        Ok(())
    }
}

/// One thread group per block: all merge steps `j = level/2 .. 1` of a level.
fn local_pass<T: SortKey + Copy + Send + Sync>(data: &mut [T], block: usize, level: usize, level_mask: usize) {
    par_chunks_mut1(data, block, |start, chunk| {
        let mut j = level >> 1;
        while j > 0 {
            for lo in 0..chunk.len() {
                if lo & j != 0 {
                    continue;
                }
                let hi = lo | j;
                let ascending_pair = chunk[lo].sort_key() <= chunk[hi].sort_key();
                if ascending_pair == (level_mask & (start + lo) != 0) {
                    chunk.swap(lo, hi);
                }
            }
            j >>= 1;
        }
    });
}

fn transpose<T: Copy + Send + Sync>(src: &[T], dst: &mut [T], width: usize, height: usize) {
    par_iter_mut1(dst, |i, d| {
        let x = i / height;
        let y = i % height;
        *d = src[y * width + x];
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
    struct KeyValue {
        key: u32,
        value: u32,
    }

    impl SortKey for KeyValue {
        fn sort_key(&self) -> u32 {
            self.key
        }
    }

    fn check_sorted(input: &[KeyValue], block_size: usize) {
        let sorter = BitonicSort::with_block_size(input.len(), block_size).unwrap();
        let mut data = input.to_vec();
        let mut temp = vec![KeyValue { key: 0, value: 0 }; input.len()];
        sorter.sort(&mut data, &mut temp).unwrap();

        assert!(data.windows(2).all(|w| w[0].key <= w[1].key), "keys not ascending");

        let mut expected = input.to_vec();
        let mut actual = data.clone();
        expected.sort();
        actual.sort();
        assert_eq!(expected, actual, "sort result is not a permutation of the input");
    }

    fn pairs(keys: &[u32]) -> Vec<KeyValue> {
        keys.iter()
            .enumerate()
            .map(|(i, &key)| KeyValue { key, value: i as u32 })
            .collect()
    }

    #[test]
    fn sorts_a_single_block() {
        let keys: Vec<u32> = (0..512).map(|i| (i * 7919 + 13) % 1000).collect();
        check_sorted(&pairs(&keys), BITONIC_BLOCK_SIZE);
    }

    #[test]
    fn sorts_across_blocks_with_default_block_size() {
        for &len in &[1024usize, 2048, 8192] {
            let keys: Vec<u32> = (0..len as u32).rev().map(|i| i.wrapping_mul(2654435761) >> 20).collect();
            check_sorted(&pairs(&keys), BITONIC_BLOCK_SIZE);
        }
    }

    #[test]
    fn sorts_reversed_and_constant_input() {
        let reversed: Vec<u32> = (0..64).rev().collect();
        check_sorted(&pairs(&reversed), 8);
        check_sorted(&pairs(&[5; 64]), 8);
    }

    #[test]
    fn rejects_invalid_lengths() {
        assert_eq!(
            BitonicSort::with_block_size(64, 3).unwrap_err(),
            SortError::BlockSizeNotPowerOfTwo { block_size: 3 }
        );
        assert_eq!(BitonicSort::new(1000).unwrap_err(), SortError::LengthNotPowerOfTwo { len: 1000 });
        assert_eq!(
            BitonicSort::new(256).unwrap_err(),
            SortError::LengthNotBlockAligned { len: 256, block_size: 512 }
        );
        assert_eq!(
            BitonicSort::with_block_size(128, 8).unwrap_err(),
            SortError::LengthTooLarge { len: 128, max: 64, block_size: 8 }
        );

        let sorter = BitonicSort::with_block_size(16, 4).unwrap();
        let mut data = vec![0u32; 16];
        let mut temp = vec![0u32; 8];
        assert_eq!(
            sorter.sort(&mut data, &mut temp).unwrap_err(),
            SortError::BufferLengthMismatch { expected: 16, data: 16, temp: 8 }
        );
    }

    fn sort_case() -> impl Strategy<Value = (usize, Vec<u32>)> {
        (1u32..5).prop_flat_map(|block_log| {
            let block = 1usize << block_log;
            (0..=block_log).prop_flat_map(move |extra_log| {
                let len = block << extra_log;
                proptest::collection::vec(0u32..32, len).prop_map(move |keys| (block, keys))
            })
        })
    }

    proptest! {
        #[test]
        fn sorted_permutation_of_random_keys((block, keys) in sort_case()) {
            check_sorted(&pairs(&keys), block);
        }
    }
}
