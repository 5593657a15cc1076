use serde::{Deserialize, Serialize};

use super::{floating_type_mod::FT, V, VF, VI};

/// Axis-aligned uniform grid covering `origin .. origin + dim * cell_size`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformGrid<const D: usize> {
    pub dim: V<u32, D>,
    pub cell_size: FT,
    pub origin: VF<D>,
}

/// Anything a `GridSorter` can bucket.
pub trait GridObject<const D: usize>: Sync {
    fn grid_position(&self) -> VF<D>;

    /// Dead objects are sorted behind every cell and never show up in a range.
    fn is_alive(&self) -> bool {
        true
    }
}

impl<const D: usize> UniformGrid<D> {
    pub fn new(dim: V<u32, D>, cell_size: FT, origin: VF<D>) -> Self {
        UniformGrid { dim, cell_size, origin }
    }

    pub fn cell_count(&self) -> usize {
        self.dim.fold(1, |acc, x| acc * x as usize)
    }

    pub fn extent(&self) -> VF<D> {
        self.dim.map(|x| x as FT) * self.cell_size
    }

    /// Cell coordinates of `p`, clamped to the grid so outside points land in border cells.
    pub fn cell_coords(&self, p: VF<D>) -> VI<D> {
        let mut coords = VI::<D>::zeros();
        for d in 0..D {
            let c = ((p[d] - self.origin[d]) / self.cell_size).floor();
            let max = self.dim[d] as FT - 1.0;
            // NaN clamps to the first cell
            coords[d] = if c >= 0.0 { c.min(max) as i32 } else { 0 };
        }
        coords
    }

    /// Linear index with x running fastest, `None` for coordinates outside of the grid.
    pub fn cell_index(&self, coords: VI<D>) -> Option<u32> {
        let mut multiplier = 1u64;
        let mut idx = 0u64;
        for d in 0..D {
            if coords[d] < 0 || coords[d] as u32 >= self.dim[d] {
                return None;
            }
            idx += multiplier * coords[d] as u64;
            multiplier *= self.dim[d] as u64;
        }
        u32::try_from(idx).ok()
    }

    pub fn cell_of(&self, p: VF<D>) -> u32 {
        // clamped coordinates are always inside, only an empty grid has no cell
        self.cell_index(self.cell_coords(p)).unwrap_or(0)
    }

    /// All offsets in `{-1, 0, 1}^D`, the centre cell included.
    pub fn neighbor_cell_offsets(&self) -> Vec<VI<D>> {
        let count = 3usize.pow(D as u32);
        (0..count)
            .map(|mut k| {
                let mut offset = VI::<D>::zeros();
                for d in 0..D {
                    offset[d] = (k % 3) as i32 - 1;
                    k /= 3;
                }
                offset
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{vec2f, vec3f};

    fn grid_4x4() -> UniformGrid<2> {
        UniformGrid::new([4, 4].into(), 1.0, vec2f(0.0, 0.0))
    }

    #[test]
    fn cell_index_is_row_major() {
        let grid = grid_4x4();
        assert_eq!(grid.cell_count(), 16);
        assert_eq!(grid.cell_of(vec2f(0.5, 0.5)), 0);
        assert_eq!(grid.cell_of(vec2f(1.5, 0.5)), 1);
        assert_eq!(grid.cell_of(vec2f(2.5, 2.5)), 10);
        assert_eq!(grid.cell_index([4, 0].into()), None);
        assert_eq!(grid.cell_index([0, -1].into()), None);
    }

    #[test]
    fn cell_index_beyond_u32_is_none() {
        let grid = UniformGrid::new([70000, 70000].into(), 1.0, vec2f(0.0, 0.0));
        assert_eq!(grid.cell_index([5, 1].into()), Some(70005));
        assert_eq!(grid.cell_index([69999, 69999].into()), None);
    }

    #[test]
    fn outside_positions_are_clamped() {
        let grid = UniformGrid::new([4, 4].into(), 0.5, vec2f(-1.0, -1.0));
        assert_eq!(grid.cell_coords(vec2f(-5.0, 0.1)), VI::<2>::from([0, 2]));
        assert_eq!(grid.cell_coords(vec2f(100.0, 0.9)), VI::<2>::from([3, 3]));
        assert_eq!(grid.extent(), vec2f(2.0, 2.0));
    }

    #[test]
    fn neighbor_offsets_cover_the_block() {
        let grid = grid_4x4();
        let offsets = grid.neighbor_cell_offsets();
        assert_eq!(offsets.len(), 9);
        assert!(offsets.contains(&VI::<2>::zeros()));
        assert!(offsets.contains(&VI::<2>::from([-1, 1])));

        let grid3: UniformGrid<3> = UniformGrid::new([2, 3, 4].into(), 1.0, vec3f(0.0, 0.0, 0.0));
        assert_eq!(grid3.cell_count(), 24);
        assert_eq!(grid3.neighbor_cell_offsets().len(), 27);
        assert_eq!(grid3.cell_of(vec3f(1.5, 2.5, 3.5)), 1 + 2 * 2 + 3 * 6);
    }
}
