use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use tracing::warn;

use super::error::PoolError;
use super::ping_pong::PingPongBuffer;

/// Append/consume stack of `u32` indices with an atomic counter.
///
/// `append` and `consume` only take `&self`, so the work items of a parallel
/// pass can push candidates or pop free slots concurrently. A single pass must
/// either only append or only consume.
pub struct IndexPool {
    indices: Vec<AtomicU32>,
    count: AtomicUsize,
}

impl IndexPool {
    /// Empty stack that can hold up to `capacity` indices.
    pub fn new(capacity: usize) -> Self {
        IndexPool {
            indices: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            count: AtomicUsize::new(0),
        }
    }

    /// Stack holding every index of `0..capacity`. Consumes return `0, 1, 2, ...`.
    pub fn filled(capacity: usize) -> Self {
        IndexPool {
            indices: (0..capacity)
                .map(|k| AtomicU32::new((capacity - 1 - k) as u32))
                .collect(),
            count: AtomicUsize::new(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.indices.len()
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Pushes `index`. Returns `false` (and drops the index) if the stack is full.
    pub fn append(&self, index: u32) -> bool {
        let capacity = self.capacity();
        match self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| if c < capacity { Some(c + 1) } else { None })
        {
            Ok(slot) => {
                self.indices[slot].store(index, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    /// Pops one index, `None` if the stack is empty.
    pub fn consume(&self) -> Option<u32> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .ok()
            .map(|previous| self.indices[previous - 1].load(Ordering::Acquire))
    }

    pub fn clear(&mut self) {
        *self.count.get_mut() = 0;
    }

    /// Copy of the indices currently on the stack, bottom first.
    pub fn indices(&self) -> Vec<u32> {
        self.indices[..self.count()]
            .iter()
            .map(|i| i.load(Ordering::Acquire))
            .collect()
    }
}

/// A record that can live in an object pool: the alive flag is part of the record.
pub trait PoolObject: Copy + Send + Sync {
    fn dead() -> Self;
    fn is_alive(&self) -> bool;
    fn set_alive(&mut self, alive: bool);
}

fn pop_free(free: &IndexPool, n: usize) -> Vec<u32> {
    let take = n.min(free.count());
    (0..take).filter_map(|_| free.consume()).collect()
}

/// Checks a whole release request before anything is touched.
fn validate_release<T: PoolObject>(records: &[T], indices: &[u32]) -> Result<(), PoolError> {
    for &index in indices {
        let record = records.get(index as usize).ok_or(PoolError::IndexOutOfRange {
            index,
            capacity: records.len(),
        })?;
        if !record.is_alive() {
            return Err(PoolError::DoubleRelease { index });
        }
    }

    let mut sorted = indices.to_vec();
    sorted.sort_unstable();
    if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(PoolError::DoubleRelease { index: w[0] });
    }
    Ok(())
}

fn release_into<T: PoolObject>(records: &mut [T], free: &IndexPool, indices: &[u32]) -> Result<usize, PoolError> {
    if let Err(e) = validate_release(records, indices) {
        warn!("rejected release of {} indices: {}", indices.len(), e);
        return Err(e);
    }
    for &index in indices {
        records[index as usize].set_alive(false);
        // validation guarantees that the stack has room for every index
        let pushed = free.append(index);
        debug_assert!(pushed);
    }
    Ok(indices.len())
}

/// Fixed-capacity pool over a single record buffer.
pub struct ObjectPool<T: PoolObject> {
    records: Vec<T>,
    free: IndexPool,
}

impl<T: PoolObject> ObjectPool<T> {
    /// Every record dead, every index free.
    pub fn new(capacity: usize) -> Self {
        ObjectPool {
            records: vec![T::dead(); capacity],
            free: IndexPool::filled(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn remaining_count(&self) -> usize {
        self.free.count()
    }

    pub fn alive_count(&self) -> usize {
        self.capacity() - self.remaining_count()
    }

    /// Takes up to `n` free slots and marks their records alive.
    pub fn try_allocate(&mut self, n: usize) -> Vec<u32> {
        let indices = pop_free(&self.free, n);
        for &i in &indices {
            self.records[i as usize].set_alive(true);
        }
        indices
    }

    /// Like `try_allocate` but stores `init(k, index)` for the k-th allocated slot.
    pub fn emit(&mut self, n: usize, mut init: impl FnMut(usize, u32) -> T) -> Vec<u32> {
        let indices = pop_free(&self.free, n);
        for (k, &i) in indices.iter().enumerate() {
            let mut record = init(k, i);
            record.set_alive(true);
            self.records[i as usize] = record;
        }
        indices
    }

    pub fn release(&mut self, indices: &[u32]) -> Result<usize, PoolError> {
        release_into(&mut self.records, &self.free, indices)
    }

    pub fn records(&self) -> &[T] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [T] {
        &mut self.records
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.records.get(index as usize)
    }

    pub fn pool(&self) -> &IndexPool {
        &self.free
    }
}

/// Fixed-capacity pool over a double record buffer.
///
/// Allocation and release write the alive flag into both buffers, so the
/// free set matches the alive flags whichever buffer is read after a swap.
pub struct PingPongObjectPool<T: PoolObject> {
    records: PingPongBuffer<T>,
    free: IndexPool,
}

impl<T: PoolObject> PingPongObjectPool<T> {
    pub fn new(capacity: usize) -> Self {
        PingPongObjectPool {
            records: PingPongBuffer::new(capacity, T::dead()),
            free: IndexPool::filled(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn remaining_count(&self) -> usize {
        self.free.count()
    }

    pub fn alive_count(&self) -> usize {
        self.capacity() - self.remaining_count()
    }

    pub fn try_allocate(&mut self, n: usize) -> Vec<u32> {
        let indices = pop_free(&self.free, n);
        for buffer in 0..2 {
            let records = self.records.buffer_mut(buffer);
            for &i in &indices {
                records[i as usize].set_alive(true);
            }
        }
        indices
    }

    /// Stores `init(k, index)` in both buffers for the k-th allocated slot.
    pub fn emit(&mut self, n: usize, mut init: impl FnMut(usize, u32) -> T) -> Vec<u32> {
        let indices = pop_free(&self.free, n);
        for (k, &i) in indices.iter().enumerate() {
            let mut record = init(k, i);
            record.set_alive(true);
            self.records.read_mut()[i as usize] = record;
            self.records.write_mut()[i as usize] = record;
        }
        indices
    }

    pub fn release(&mut self, indices: &[u32]) -> Result<usize, PoolError> {
        let released = release_into(self.records.read_mut(), &self.free, indices)?;
        let write = self.records.write_mut();
        for &i in indices {
            write[i as usize].set_alive(false);
        }
        Ok(released)
    }

    pub fn read(&self) -> &[T] {
        self.records.read()
    }

    pub fn read_mut(&mut self) -> &mut [T] {
        self.records.read_mut()
    }

    pub fn read_write(&mut self) -> (&[T], &mut [T]) {
        self.records.read_write()
    }

    pub fn swap(&mut self) {
        self.records.swap();
    }

    pub fn buffers(&self) -> &PingPongBuffer<T> {
        &self.records
    }

    pub fn pool(&self) -> &IndexPool {
        &self.free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Slot {
        alive: bool,
        value: u32,
    }

    impl PoolObject for Slot {
        fn dead() -> Self {
            Slot { alive: false, value: 0 }
        }
        fn is_alive(&self) -> bool {
            self.alive
        }
        fn set_alive(&mut self, alive: bool) {
            self.alive = alive;
        }
    }

    #[test]
    fn filled_index_pool_pops_in_ascending_order() {
        let pool = IndexPool::filled(4);
        let popped: Vec<_> = (0..5).map(|_| pool.consume()).collect();
        assert_eq!(popped, vec![Some(0), Some(1), Some(2), Some(3), None]);
    }

    #[test]
    fn parallel_append_fills_without_losing_indices() {
        let mut pool = IndexPool::new(100);
        crate::simulation::concurrency::par_iter_mut0(150, |i| {
            pool.append(i as u32);
        });
        assert_eq!(pool.count(), 100);
        let unique: HashSet<u32> = pool.indices().into_iter().collect();
        assert_eq!(unique.len(), 100);

        pool.clear();
        assert_eq!(pool.count(), 0);
        assert_eq!(pool.consume(), None);
    }

    #[test]
    fn allocate_until_exhausted() {
        let mut pool: ObjectPool<Slot> = ObjectPool::new(1024);
        let indices = pool.try_allocate(1024);
        assert_eq!(indices.len(), 1024);
        assert_eq!(pool.remaining_count(), 0);

        let more = pool.try_allocate(1);
        assert!(more.is_empty());
        assert_eq!(pool.alive_count(), 1024);
    }

    #[test]
    fn released_indices_are_reallocated() {
        let mut pool: ObjectPool<Slot> = ObjectPool::new(64);
        let indices = pool.try_allocate(64);
        let remaining = pool.remaining_count();

        let released: Vec<u32> = indices[5..15].to_vec();
        assert_eq!(pool.release(&released), Ok(10));
        assert_eq!(pool.remaining_count(), remaining + 10);

        let again: HashSet<u32> = pool.try_allocate(10).into_iter().collect();
        let released: HashSet<u32> = released.into_iter().collect();
        assert_eq!(again, released);
        assert_eq!(pool.remaining_count(), 0);
    }

    #[test]
    fn double_release_is_rejected_atomically() {
        let mut pool: ObjectPool<Slot> = ObjectPool::new(8);
        let indices = pool.try_allocate(4);
        pool.release(&indices[..1]).unwrap();

        let before = pool.remaining_count();
        assert_eq!(
            pool.release(&[indices[1], indices[0]]),
            Err(PoolError::DoubleRelease { index: indices[0] })
        );
        assert_eq!(
            pool.release(&[indices[2], indices[2]]),
            Err(PoolError::DoubleRelease { index: indices[2] })
        );
        assert_eq!(
            pool.release(&[indices[3], 8]),
            Err(PoolError::IndexOutOfRange { index: 8, capacity: 8 })
        );
        assert_eq!(pool.remaining_count(), before);
        assert!(pool.get(indices[1]).unwrap().is_alive());
        assert!(pool.get(indices[3]).unwrap().is_alive());
    }

    #[test]
    fn ping_pong_pool_emits_into_both_buffers() {
        let mut pool: PingPongObjectPool<Slot> = PingPongObjectPool::new(16);
        let emitted = pool.emit(3, |k, _| Slot { alive: false, value: 10 + k as u32 });
        assert_eq!(emitted, vec![0, 1, 2]);
        assert_eq!(pool.read()[1], Slot { alive: true, value: 11 });
        assert_eq!(pool.buffers().write()[1], Slot { alive: true, value: 11 });

        pool.swap();
        assert!(pool.read()[1].is_alive());
        assert_eq!(pool.release(&emitted[1..]), Ok(2));
        pool.swap();
        assert!(!pool.read()[1].is_alive() && !pool.read()[2].is_alive());
        assert!(pool.read()[0].is_alive());
        assert_eq!(pool.release(&emitted[..1]), Ok(1));
        assert_eq!(pool.remaining_count(), 16);
    }

    #[test]
    fn ping_pong_alive_flags_match_free_set_after_any_swap() {
        let mut pool: PingPongObjectPool<Slot> = PingPongObjectPool::new(32);
        let allocated = pool.try_allocate(10);
        pool.release(&allocated[2..6]).unwrap();
        pool.emit(3, |_, _| Slot::dead());

        for _ in 0..2 {
            pool.swap();
            let flagged = pool.read().iter().filter(|r| r.is_alive()).count();
            assert_eq!(flagged, pool.alive_count());
            assert_eq!(pool.remaining_count() + flagged, pool.capacity());
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Allocate(usize),
        Release(Vec<usize>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..40).prop_map(Op::Allocate),
            proptest::collection::vec(0usize..1000, 0..20).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn pool_conserves_capacity(ops in proptest::collection::vec(op_strategy(), 1..60)) {
            let capacity = 64;
            let mut pool: ObjectPool<Slot> = ObjectPool::new(capacity);
            let mut alive: Vec<u32> = Vec::new();

            for op in ops {
                match op {
                    Op::Allocate(n) => {
                        let free_before = pool.remaining_count();
                        let got = pool.try_allocate(n);
                        prop_assert_eq!(got.len(), n.min(free_before));
                        for &i in &got {
                            prop_assert!(!alive.contains(&i));
                            alive.push(i);
                        }
                    }
                    Op::Release(picks) => {
                        if alive.is_empty() {
                            continue;
                        }
                        let mut chosen: Vec<u32> = picks.iter().map(|p| alive[p % alive.len()]).collect();
                        chosen.sort_unstable();
                        chosen.dedup();
                        prop_assert_eq!(pool.release(&chosen), Ok(chosen.len()));
                        alive.retain(|i| !chosen.contains(i));
                    }
                }
                prop_assert_eq!(pool.remaining_count() + pool.alive_count(), capacity);
                prop_assert_eq!(pool.alive_count(), alive.len());
                let flagged = pool.records().iter().filter(|r| r.is_alive()).count();
                prop_assert_eq!(flagged, alive.len());
            }
        }
    }
}
