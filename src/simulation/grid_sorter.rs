use std::ops::Range;

use tracing::trace;

use super::bitonic_sort::{BitonicSort, SortKey, BITONIC_BLOCK_SIZE};
use super::concurrency::{par_iter_mut0, par_iter_mut1, par_iter_mut2};
use super::error::GridSortError;
use super::grid::{GridObject, UniformGrid};
use super::thread_safe_ptr::ThreadSafeMutSlice;
use super::VF;

/// Key of dead objects. Sorts behind every real cell.
pub const DEAD_CELL: u32 = u32::MAX - 1;
/// Key of the padding entries that fill the sort buffer up to a power of two.
pub const PADDING_CELL: u32 = u32::MAX;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridObjectPair {
    pub cell: u32,
    pub object: u32,
}

impl SortKey for GridObjectPair {
    fn sort_key(&self) -> u32 {
        self.cell
    }
}

impl<const D: usize> GridObject<D> for VF<D> {
    fn grid_position(&self) -> VF<D> {
        *self
    }
}

/// Buckets objects into the cells of a uniform grid.
///
/// `rebuild` computes the sorted `(cell, object)` pairs and a `[start, end)`
/// range over them per cell. `grid_sort` additionally moves the objects into
/// sorted order, so the objects of a cell are contiguous.
pub struct GridSorter<const D: usize> {
    grid: UniformGrid<D>,
    object_count: usize,
    pairs: Vec<GridObjectPair>,
    pairs_temp: Vec<GridObjectPair>,
    cell_start: Vec<u32>,
    cell_end: Vec<u32>,
    bitonic: BitonicSort,
    live_count: usize,
    has_permutation: bool,
}

impl<const D: usize> GridSorter<D> {
    pub fn new(grid: UniformGrid<D>, object_count: usize) -> Result<Self, GridSortError> {
        let sort_len = object_count.max(1).next_power_of_two().max(BITONIC_BLOCK_SIZE);
        let bitonic = BitonicSort::new(sort_len)?;
        let padding = GridObjectPair {
            cell: PADDING_CELL,
            object: 0,
        };

        Ok(GridSorter {
            grid,
            object_count,
            pairs: vec![padding; sort_len],
            pairs_temp: vec![padding; sort_len],
            cell_start: vec![0; grid.cell_count()],
            cell_end: vec![0; grid.cell_count()],
            bitonic,
            live_count: 0,
            has_permutation: false,
        })
    }

    pub fn grid(&self) -> &UniformGrid<D> {
        &self.grid
    }

    pub fn object_count(&self) -> usize {
        self.object_count
    }

    /// Number of alive objects found by the last rebuild.
    pub fn live_object_count(&self) -> usize {
        self.live_count
    }

    /// Sorted pairs of the last rebuild: live objects first, dead ones after.
    pub fn sorted_pairs(&self) -> &[GridObjectPair] {
        &self.pairs[..self.object_count]
    }

    /// Sorted positions of the objects in `cell`, empty for ids outside of the grid.
    pub fn cell_range(&self, cell: u32) -> Range<usize> {
        let cell = cell as usize;
        match (self.cell_start.get(cell), self.cell_end.get(cell)) {
            (Some(&start), Some(&end)) => start as usize..end as usize,
            _ => 0..0,
        }
    }

    pub fn rebuild<O: GridObject<D>>(&mut self, objects: &[O]) -> Result<(), GridSortError> {
        if objects.len() != self.object_count {
            return Err(GridSortError::InconsistentObjectCount {
                expected: self.object_count,
                actual: objects.len(),
            });
        }
        self.has_permutation = false;

        // hash
        let grid = self.grid;
        let object_count = self.object_count;
        par_iter_mut1(&mut self.pairs, |k, pair| {
            *pair = if k >= object_count {
                GridObjectPair {
                    cell: PADDING_CELL,
                    object: k as u32,
                }
            } else if objects[k].is_alive() {
                GridObjectPair {
                    cell: grid.cell_of(objects[k].grid_position()),
                    object: k as u32,
                }
            } else {
                GridObjectPair {
                    cell: DEAD_CELL,
                    object: k as u32,
                }
            };
        });

        self.bitonic.sort(&mut self.pairs, &mut self.pairs_temp)?;

        // clear
        par_iter_mut2(&mut self.cell_start, &mut self.cell_end, |_, start, end| {
            *start = 0;
            *end = 0;
        });

        // build ranges
        let cell_count = grid.cell_count() as u32;
        let live_count = self.pairs.partition_point(|p| p.cell < cell_count);
        {
            let pairs = &self.pairs;
            let starts = ThreadSafeMutSlice::new(&mut self.cell_start);
            let ends = ThreadSafeMutSlice::new(&mut self.cell_end);
            par_iter_mut0(live_count, |k| {
                let cell = pairs[k].cell;
                // only the first and the last entry of a run write, so every field has one writer
                if k == 0 || pairs[k - 1].cell != cell {
                    unsafe { starts.write(cell as usize, k as u32) };
                }
                if k + 1 == live_count || pairs[k + 1].cell != cell {
                    unsafe { ends.write(cell as usize, k as u32 + 1) };
                }
            });
        }

        self.live_count = live_count;
        self.has_permutation = true;
        Ok(())
    }

    /// `rebuild` followed by moving `objects` into sorted order.
    pub fn grid_sort<O: GridObject<D> + Copy + Send>(&mut self, objects: &mut [O]) -> Result<(), GridSortError> {
        self.rebuild(objects)?;
        self.rearrange_with_last_permutation(objects)
    }

    /// Applies the permutation of the last rebuild to a buffer that is parallel to the sorted objects.
    pub fn rearrange_with_last_permutation<U: Copy + Send + Sync>(&self, buffer: &mut [U]) -> Result<(), GridSortError> {
        if !self.has_permutation {
            return Err(GridSortError::NoPermutation);
        }
        if buffer.len() != self.object_count {
            return Err(GridSortError::InconsistentObjectCount {
                expected: self.object_count,
                actual: buffer.len(),
            });
        }

        let source = buffer.to_vec();
        let pairs = &self.pairs;
        par_iter_mut1(buffer, |k, dst| {
            *dst = source[pairs[k].object as usize];
        });
        Ok(())
    }

    pub fn log_grid_indices(&self) {
        trace!(
            "grid sorter: {} objects, {} live, {} cells",
            self.object_count,
            self.live_count,
            self.grid.cell_count()
        );
        for cell in 0..self.grid.cell_count() as u32 {
            let range = self.cell_range(cell);
            if !range.is_empty() {
                trace!("  cell {:>6}: [{}, {})", cell, range.start, range.end);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{vec2f, vec3f, V2};
    use proptest::prelude::*;

    #[derive(Clone, Copy, Debug)]
    struct Ball {
        position: V2,
        alive: bool,
    }

    impl GridObject<2> for Ball {
        fn grid_position(&self) -> V2 {
            self.position
        }
        fn is_alive(&self) -> bool {
            self.alive
        }
    }

    fn grid_4x4() -> UniformGrid<2> {
        UniformGrid::new([4, 4].into(), 1.0, vec2f(0.0, 0.0))
    }

    #[test]
    fn ranges_of_four_objects() {
        let grid = grid_4x4();
        let positions = vec![vec2f(0.2, 0.3), vec2f(0.7, 0.9), vec2f(1.5, 0.5), vec2f(2.5, 2.5)];
        let mut sorter = GridSorter::new(grid, positions.len()).unwrap();
        sorter.rebuild(&positions).unwrap();

        let cell = |x: i32, y: i32| grid.cell_index([x, y].into()).unwrap();
        assert_eq!(sorter.cell_range(cell(0, 0)).len(), 2);
        assert_eq!(sorter.cell_range(cell(1, 0)).len(), 1);
        assert_eq!(sorter.cell_range(cell(2, 2)).len(), 1);

        let occupied = [cell(0, 0), cell(1, 0), cell(2, 2)];
        for c in 0..grid.cell_count() as u32 {
            if !occupied.contains(&c) {
                assert!(sorter.cell_range(c).is_empty(), "cell {} should be empty", c);
            }
        }
        assert_eq!(sorter.live_object_count(), 4);
    }

    #[test]
    fn ranges_are_cleared_between_rebuilds() {
        let grid = grid_4x4();
        let mut sorter = GridSorter::new(grid, 2).unwrap();
        sorter.rebuild(&[vec2f(0.5, 0.5), vec2f(3.5, 3.5)]).unwrap();
        sorter.rebuild(&[vec2f(1.5, 1.5), vec2f(1.6, 1.4)]).unwrap();

        assert!(sorter.cell_range(0).is_empty());
        assert!(sorter.cell_range(15).is_empty());
        assert_eq!(sorter.cell_range(5), 0..2);
    }

    #[test]
    fn dead_objects_are_excluded() {
        let grid = grid_4x4();
        let balls = vec![
            Ball { position: vec2f(0.5, 0.5), alive: false },
            Ball { position: vec2f(0.5, 0.5), alive: true },
            Ball { position: vec2f(3.5, 0.5), alive: false },
        ];
        let mut sorter = GridSorter::new(grid, balls.len()).unwrap();
        sorter.rebuild(&balls).unwrap();

        assert_eq!(sorter.live_object_count(), 1);
        assert_eq!(sorter.cell_range(0), 0..1);
        assert!(sorter.cell_range(3).is_empty());
        assert_eq!(sorter.sorted_pairs()[0].object, 1);
        assert!(sorter.sorted_pairs()[1..].iter().all(|p| p.cell == DEAD_CELL));
    }

    #[test]
    fn grid_sort_orders_objects_by_cell() {
        let grid: UniformGrid<3> = UniformGrid::new([2, 2, 2].into(), 1.0, vec3f(0.0, 0.0, 0.0));
        let mut positions = vec![
            vec3f(1.5, 1.5, 1.5),
            vec3f(0.5, 0.5, 0.5),
            vec3f(1.5, 0.5, 1.5),
            vec3f(0.5, 0.5, 0.6),
        ];
        let mut ids: Vec<u32> = (0..4).collect();
        let mut sorter = GridSorter::new(grid, positions.len()).unwrap();
        sorter.grid_sort(&mut positions).unwrap();
        sorter.rearrange_with_last_permutation(&mut ids).unwrap();

        let cells: Vec<u32> = positions.iter().map(|p| grid.cell_of(*p)).collect();
        assert!(cells.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(cells, vec![0, 0, 5, 7]);
        assert_eq!(ids[3], 0);
        assert_eq!(ids[2], 2);
        assert_eq!(sorter.cell_range(7), 3..4);
    }

    #[test]
    fn rearrange_rejects_bad_input() {
        let mut sorter = GridSorter::new(grid_4x4(), 3).unwrap();
        let mut buffer = vec![0u32; 3];
        assert_eq!(
            sorter.rearrange_with_last_permutation(&mut buffer),
            Err(GridSortError::NoPermutation)
        );

        sorter.rebuild(&[vec2f(0.0, 0.0); 3]).unwrap();
        let mut short = vec![0u32; 2];
        assert_eq!(
            sorter.rearrange_with_last_permutation(&mut short),
            Err(GridSortError::InconsistentObjectCount { expected: 3, actual: 2 })
        );
        assert!(matches!(
            sorter.rebuild(&[vec2f(0.0, 0.0); 4]),
            Err(GridSortError::InconsistentObjectCount { expected: 3, actual: 4 })
        ));
    }

    #[test]
    fn unknown_cells_have_empty_ranges() {
        let mut sorter = GridSorter::new(grid_4x4(), 3).unwrap();
        sorter.rebuild(&[vec2f(0.5, 0.5); 3]).unwrap();
        assert_eq!(sorter.cell_range(0), 0..3);
        assert_eq!(sorter.cell_range(16), 0..0);
        assert_eq!(sorter.cell_range(DEAD_CELL), 0..0);
        assert_eq!(sorter.cell_range(PADDING_CELL), 0..0);
    }

    proptest! {
        #[test]
        fn ranges_cover_live_objects_without_gaps(
            balls in proptest::collection::vec((-1.0f32..9.0, -1.0f32..9.0, proptest::bool::weighted(0.8)), 0..700)
        ) {
            let grid = UniformGrid::new([8, 4].into(), 1.0, vec2f(0.0, 0.0));
            let balls: Vec<Ball> = balls
                .into_iter()
                .map(|(x, y, alive)| Ball { position: vec2f(x, y), alive })
                .collect();
            let mut sorter = GridSorter::new(grid, balls.len()).unwrap();
            sorter.rebuild(&balls).unwrap();

            let live = balls.iter().filter(|b| b.alive).count();
            prop_assert_eq!(sorter.live_object_count(), live);

            let mut ranges: Vec<(u32, Range<usize>)> = (0..grid.cell_count() as u32)
                .map(|c| (c, sorter.cell_range(c)))
                .filter(|(_, r)| !r.is_empty())
                .collect();
            ranges.sort_by_key(|(_, r)| r.start);

            let mut next = 0;
            for (cell, range) in ranges {
                prop_assert_eq!(range.start, next);
                next = range.end;
                for k in range {
                    let object = sorter.sorted_pairs()[k].object as usize;
                    prop_assert!(balls[object].alive);
                    prop_assert_eq!(grid.cell_of(balls[object].position), cell);
                }
            }
            prop_assert_eq!(next, live);
        }
    }
}
