use rstar::{primitives::GeomWithData, Point, RTree};

use crate::simulation::{
    concurrency::par_iter_mut1, floating_type_mod::FT, grid_sorter::GridSorter,
    simulation_parameters::NeighborhoodSearchAlgorithm, VF, VI,
};

const MAX_NEIGHBOR_COUNT: usize = 20000;

/// Calls `f(sorted_pos, object)` for every object in the 3^D cells around the cell of `position`.
///
/// After `grid_sort` the rearranged buffer is indexed with `sorted_pos`, after
/// a plain `rebuild` the original buffer is indexed with `object`.
pub fn for_each_neighbor_candidate<const D: usize>(
    sorter: &GridSorter<D>,
    position: VF<D>,
    mut f: impl FnMut(usize, u32),
) {
    let grid = sorter.grid();
    let center = grid.cell_coords(position);
    let pairs = sorter.sorted_pairs();

    for mut k in 0..3usize.pow(D as u32) {
        let mut cell_pos: VI<D> = center;
        for d in 0..D {
            cell_pos[d] += (k % 3) as i32 - 1;
            k /= 3;
        }

        let cell = match grid.cell_index(cell_pos) {
            Some(cell) => cell,
            None => continue,
        };
        for sorted_pos in sorter.cell_range(cell) {
            f(sorted_pos, pairs[sorted_pos].object);
        }
    }
}

/**
 * This lists stores for each position the indices (into the same position
 * buffer) of its neighbors, itself included, in ascending order.
 */
pub struct NeighborhoodCache {
    neighs: Vec<Vec<u32>>,
}

impl NeighborhoodCache {
    pub fn new(num_objects: usize) -> Self {
        NeighborhoodCache {
            neighs: (0..num_objects).map(|_| Vec::new()).collect(),
        }
    }

    pub fn iter<'a>(&'a self, i: usize) -> impl Iterator<Item = usize> + 'a {
        self.neighs[i].iter().map(|&x| x as usize)
    }

    pub fn neighbor_count(&self, i: usize) -> usize {
        self.neighs[i].len()
    }

    pub fn len(&self) -> usize {
        self.neighs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighs.is_empty()
    }

    /// `positions` must be the buffer that `sorter` grid sorted last, so
    /// neighbor indices are sorted positions.
    pub fn build_neighborhood_list_grid<const D: usize>(
        &mut self,
        sorter: &GridSorter<D>,
        positions: &[VF<D>],
        radius: FT,
    ) {
        assert!(
            radius <= sorter.grid().cell_size,
            "grid search radius {} exceeds the cell size {}",
            radius,
            sorter.grid().cell_size
        );
        self.neighs.resize_with(positions.len(), Vec::new);

        par_iter_mut1(&mut self.neighs, |i, p_neighs| {
            p_neighs.clear();
            let this_particle_position = positions[i];

            for_each_neighbor_candidate(sorter, this_particle_position, |j, _| {
                if (positions[j] - this_particle_position).norm_squared() >= radius * radius {
                    return;
                }
                if p_neighs.len() == MAX_NEIGHBOR_COUNT {
                    panic!("exceeded maximum allowed number of {} neighbors", MAX_NEIGHBOR_COUNT);
                }
                p_neighs.push(j as u32);
            });
            p_neighs.sort_unstable();
        });
    }

    pub fn build_neighborhood_list_rstar<const D: usize>(&mut self, positions: &[VF<D>], radius: FT) {
        #[derive(Debug, PartialEq, Clone, Copy)]
        struct CustomRTreePoint<const D: usize> {
            p: VF<D>,
        }
        impl<const D: usize> Point for CustomRTreePoint<D> {
            type Scalar = FT;

            const DIMENSIONS: usize = D;

            fn generate(mut generator: impl FnMut(usize) -> Self::Scalar) -> Self {
                CustomRTreePoint {
                    p: VF::<D>::from_iterator((0..D).map(|d| generator(d))),
                }
            }

            fn nth(&self, index: usize) -> Self::Scalar {
                self.p[index]
            }

            fn nth_mut(&mut self, index: usize) -> &mut Self::Scalar {
                &mut self.p[index]
            }
        }

        type CustomRTreeElem<const D: usize> = GeomWithData<CustomRTreePoint<D>, u32>;

        let rtree_elems: Vec<_> = positions
            .iter()
            .enumerate()
            .map(|(idx, pos)| CustomRTreeElem::new(CustomRTreePoint { p: *pos }, idx as u32))
            .collect();
        let rtree = RTree::<CustomRTreeElem<D>>::bulk_load(rtree_elems);

        self.neighs.resize_with(positions.len(), Vec::new);
        let max_dist_sq = radius * radius;

        par_iter_mut1(&mut self.neighs, |i, p_neighs| {
            p_neighs.clear();
            let this_particle_position = positions[i];

            for neigh_point in rtree.locate_within_distance(CustomRTreePoint { p: this_particle_position }, max_dist_sq) {
                // rstar includes the boundary, the grid search does not
                if (positions[neigh_point.data as usize] - this_particle_position).norm_squared() >= max_dist_sq {
                    continue;
                }
                p_neighs.push(neigh_point.data);
            }
            p_neighs.sort_unstable();
        });
    }

    /// Panics with the first object whose neighbor list differs.
    pub fn assert_same_as(&self, other: &NeighborhoodCache) {
        assert_eq!(self.len(), other.len(), "neighborhood lists have different lengths");
        for i in 0..self.len() {
            if self.neighs[i] != other.neighs[i] {
                panic!(
                    "neighborhood search mismatch for object {}: {:?} != {:?}",
                    i, self.neighs[i], other.neighs[i]
                );
            }
        }
    }
}

pub fn build_neighborhood_list<const D: usize>(
    algorithm: NeighborhoodSearchAlgorithm,
    sorter: &GridSorter<D>,
    positions: &[VF<D>],
    radius: FT,
    neighs: &mut NeighborhoodCache,
) {
    match algorithm {
        NeighborhoodSearchAlgorithm::Grid => neighs.build_neighborhood_list_grid(sorter, positions, radius),
        NeighborhoodSearchAlgorithm::RStar => neighs.build_neighborhood_list_rstar(positions, radius),
    }
}
