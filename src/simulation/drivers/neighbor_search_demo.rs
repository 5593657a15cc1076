use std::io::{self, Write};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::info;

use super::cellular_growth::random_direction;
use super::{DriverStatistics, SimulationDriver};
use crate::simulation::{
    concurrency::par_iter_mut1,
    counters::{PerformanceCounters, ValueCounters},
    error::SandboxError,
    floating_type_mod::FT,
    grid::UniformGrid,
    grid_sorter::GridSorter,
    neighborhood_search::{build_neighborhood_list, NeighborhoodCache},
    records::{write_records, NeighborParticle},
    simulation_parameters::NeighborSearchParams,
    vec2f, V2, VI,
};

/// Particles bouncing in a box, counting their neighbors through the grid every step.
pub struct NeighborSearchDemo {
    params: NeighborSearchParams,
    domain: V2,

    particles: Vec<NeighborParticle>,
    positions: Vec<V2>,
    neighs: NeighborhoodCache,
    sorter: GridSorter<2>,

    time: FT,
    step_number: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

impl NeighborSearchDemo {
    pub fn new(params: NeighborSearchParams, counters_enabled: bool) -> Result<Self, SandboxError> {
        let grid = UniformGrid::new(params.grid_dim.into(), params.grid_cell_size, vec2f(0., 0.));
        let domain = grid.extent();
        let sorter = GridSorter::new(grid, params.particle_count)?;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let center = domain * 0.5;
        let radius = FT::min(domain.x, domain.y) * 0.5;
        let particles: Vec<NeighborParticle> = (0..params.particle_count)
            .map(|_| NeighborParticle {
                position: center + random_direction(&mut rng) * radius * rng.gen::<FT>().sqrt(),
                velocity: vec2f(rng.gen_range(-1.0..=1.0), rng.gen_range(-1.0..=1.0)),
                neighbor_count: 0,
                highlighted: 0,
            })
            .collect();

        info!(
            "neighbor search demo: {} particles, {:?} search, display cell {}",
            params.particle_count, params.search_algorithm, params.display_cell
        );

        Ok(NeighborSearchDemo {
            domain,
            positions: Vec::with_capacity(particles.len()),
            neighs: NeighborhoodCache::new(particles.len()),
            particles,
            sorter,
            time: 0.,
            step_number: 0,
            pcounters: PerformanceCounters::new(counters_enabled),
            vcounters: ValueCounters::new(counters_enabled),
            params,
        })
    }

    pub fn particles(&self) -> &[NeighborParticle] {
        &self.particles
    }

    fn move_particles(&mut self, dt: FT) {
        let domain = self.domain;
        par_iter_mut1(&mut self.particles, |_, p| {
            p.position += p.velocity * dt;
            for d in 0..2 {
                if p.position[d] < 0. {
                    p.position[d] = -p.position[d];
                    p.velocity[d] = p.velocity[d].abs();
                } else if p.position[d] > domain[d] {
                    p.position[d] = 2. * domain[d] - p.position[d];
                    p.velocity[d] = -p.velocity[d].abs();
                }
            }
        });
    }

    /// Sorted positions inside the 3x3 block of cells around `display_cell`.
    fn highlighted_ranges(&self) -> Vec<std::ops::Range<usize>> {
        let grid = self.sorter.grid();
        let dim_x = grid.dim.x;
        let center: VI<2> = [
            (self.params.display_cell % dim_x) as i32,
            (self.params.display_cell / dim_x) as i32,
        ]
        .into();

        grid.neighbor_cell_offsets()
            .into_iter()
            .filter_map(|offset| grid.cell_index(center + offset))
            .map(|cell| self.sorter.cell_range(cell))
            .filter(|range| !range.is_empty())
            .collect()
    }

    fn count_neighbors(&mut self) {
        self.positions.clear();
        self.positions.extend(self.particles.iter().map(|p| p.position));
        build_neighborhood_list(
            self.params.search_algorithm,
            &self.sorter,
            &self.positions,
            self.params.grid_cell_size,
            &mut self.neighs,
        );

        let ranges = self.highlighted_ranges();
        let neighs = &self.neighs;
        par_iter_mut1(&mut self.particles, |i, p| {
            p.neighbor_count = neighs.neighbor_count(i) as u32;
            p.highlighted = ranges.iter().any(|range| range.contains(&i)) as u32;
        });
    }
}

impl SimulationDriver for NeighborSearchDemo {
    fn step(&mut self, dt: FT) -> Result<(), SandboxError> {
        self.pcounters.begin("simulation-step");

        self.move_particles(dt);

        self.pcounters.begin("grid-sort");
        self.sorter.grid_sort(&mut self.particles)?;
        self.pcounters.end("grid-sort");
        self.sorter.log_grid_indices();

        self.pcounters.begin("neighborhood");
        self.count_neighbors();
        self.pcounters.end("neighborhood");

        self.time += dt;
        self.step_number += 1;

        let total: u64 = self.particles.iter().map(|p| p.neighbor_count as u64).sum();
        self.vcounters
            .add_value("avg-neighbors", total as FT / self.particles.len() as FT);
        self.pcounters.end("simulation-step");
        Ok(())
    }

    fn time(&self) -> FT {
        self.time
    }

    fn step_number(&self) -> u64 {
        self.step_number
    }

    fn statistics(&self) -> DriverStatistics {
        DriverStatistics {
            alive_particles: self.particles.len(),
            ..Default::default()
        }
    }

    fn write_records(&self, w: &mut dyn Write) -> io::Result<()> {
        write_records(w, &self.particles)
    }

    fn counters(&self) -> &PerformanceCounters {
        &self.pcounters
    }

    fn value_counters(&self) -> &ValueCounters {
        &self.vcounters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::simulation_parameters::NeighborhoodSearchAlgorithm;

    fn params(search_algorithm: NeighborhoodSearchAlgorithm) -> NeighborSearchParams {
        NeighborSearchParams {
            seed: 7,
            particle_count: 600,
            grid_dim: [8, 8],
            grid_cell_size: 1.0,
            display_cell: 9,
            search_algorithm,
        }
    }

    #[test]
    fn particles_stay_inside_the_box() {
        let mut demo = NeighborSearchDemo::new(params(NeighborhoodSearchAlgorithm::Grid), false).unwrap();
        for _ in 0..100 {
            demo.step(0.05).unwrap();
        }
        for p in demo.particles() {
            assert!(p.position.x >= 0. && p.position.x <= 8.);
            assert!(p.position.y >= 0. && p.position.y <= 8.);
        }
    }

    #[test]
    fn both_algorithms_count_the_same_neighbors() {
        let mut by_grid = NeighborSearchDemo::new(params(NeighborhoodSearchAlgorithm::Grid), false).unwrap();
        let mut by_rstar = NeighborSearchDemo::new(params(NeighborhoodSearchAlgorithm::RStar), false).unwrap();
        for _ in 0..5 {
            by_grid.step(0.016).unwrap();
            by_rstar.step(0.016).unwrap();
        }

        let count = |demo: &NeighborSearchDemo| demo.particles().iter().map(|p| p.neighbor_count).collect::<Vec<_>>();
        assert_eq!(count(&by_grid), count(&by_rstar));

        let brute_force = |i: usize| {
            let ps = by_grid.particles();
            ps.iter()
                .filter(|q| (q.position - ps[i].position).norm_squared() < 1.0)
                .count() as u32
        };
        for i in (0..600).step_by(37) {
            assert_eq!(by_grid.particles()[i].neighbor_count, brute_force(i));
        }
    }

    #[test]
    fn highlights_the_block_around_the_display_cell() {
        let mut demo = NeighborSearchDemo::new(params(NeighborhoodSearchAlgorithm::Grid), false).unwrap();
        demo.step(0.016).unwrap();

        // display cell 9 is (1, 1) in an 8x8 grid, so the block spans cells [0, 3)^2
        let grid = *demo.sorter.grid();
        for p in demo.particles() {
            let c = grid.cell_coords(p.position);
            let inside = c.x < 3 && c.y < 3;
            assert_eq!(p.highlighted, inside as u32, "particle at {:?}", p.position);
        }
        assert!(demo.particles().iter().any(|p| p.highlighted == 1));
    }
}
