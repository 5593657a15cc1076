//! Weakly compressible 2d SPH on top of the grid sorter.

use std::io::{self, Write};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{info, warn};

use super::cellular_growth::random_direction;
use super::{DriverStatistics, SimulationDriver};
use crate::simulation::{
    concurrency::par_iter_mut1,
    counters::{PerformanceCounters, ValueCounters},
    error::SandboxError,
    floating_type_mod::FT,
    grid::UniformGrid,
    grid_sorter::GridSorter,
    neighborhood_search::{for_each_neighbor_candidate, NeighborhoodCache},
    ping_pong::PingPongBuffer,
    records::{write_records, SphParticle},
    simulation_parameters::SphParams,
    sph_kernels::{poly6_unnormalized, spiky_pressure_term, viscosity_term, SphCoefficients},
    vec2f, V2,
};

pub struct SphFluid {
    params: SphParams,
    coefficients: SphCoefficients,
    domain: V2,

    particles: PingPongBuffer<SphParticle>,
    /// Initial index of the particle stored at each position of the read buffer.
    particle_ids: Vec<u32>,
    sorter: GridSorter<2>,

    time: FT,
    step_number: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

/// Runs one pass over all particles: `f(i, read, out)` computes the new state of `read[i]`.
fn particle_pass(particles: &mut PingPongBuffer<SphParticle>, f: impl Fn(usize, &[SphParticle], &mut SphParticle) + Send + Sync) {
    let (read, write) = particles.read_write();
    par_iter_mut1(write, |i, out| f(i, read, out));
    particles.swap();
}

impl SphFluid {
    pub fn new(params: SphParams, counters_enabled: bool) -> Result<Self, SandboxError> {
        let grid = UniformGrid::new(params.grid_dim.into(), params.grid_cell_size, vec2f(0., 0.));
        let domain = grid.extent();
        let sorter = GridSorter::new(grid, params.particle_count)?;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let center = domain * 0.5;
        let radius = FT::min(domain.x, domain.y) * 0.5;
        let initial: Vec<SphParticle> = (0..params.particle_count)
            .map(|_| SphParticle {
                position: center + random_direction(&mut rng) * radius * rng.gen::<FT>().sqrt(),
                velocity: V2::zeros(),
                acceleration: V2::zeros(),
                density: 0.,
                pressure: 0.,
            })
            .collect();

        info!(
            "sph: {} particles in a {}x{} domain, h={}",
            params.particle_count, domain.x, domain.y, params.smoothlen
        );

        Ok(SphFluid {
            coefficients: SphCoefficients::new(params.particle_mass, params.smoothlen),
            domain,
            particles: PingPongBuffer::from_vec(initial),
            particle_ids: (0..params.particle_count as u32).collect(),
            sorter,
            time: 0.,
            step_number: 0,
            pcounters: PerformanceCounters::new(counters_enabled),
            vcounters: ValueCounters::new(counters_enabled),
            params,
        })
    }

    pub fn particles(&self) -> &[SphParticle] {
        self.particles.read()
    }

    pub fn particle_ids(&self) -> &[u32] {
        &self.particle_ids
    }

    /// Substeps run for a frame of `frame_dt` seconds.
    pub fn iterations_for(&self, frame_dt: FT) -> usize {
        let iterations = (frame_dt / self.params.timestep).floor() as usize;
        iterations.max(1).min(self.params.max_iterations.max(1))
    }

    /// Sorts the read buffer by cell and carries the identity tags along.
    /// On error neither the particles nor the tags have been moved.
    fn grid_sort(&mut self) -> Result<(), SandboxError> {
        self.sorter.rebuild(self.particles.read())?;
        self.sorter.rearrange_with_last_permutation(&mut self.particle_ids)?;
        self.sorter.rearrange_with_last_permutation(self.particles.read_mut())?;
        Ok(())
    }

    fn density_pass(&mut self) {
        let sorter = &self.sorter;
        let h = self.params.smoothlen;
        let coef = self.coefficients.density;
        particle_pass(&mut self.particles, |i, read, out| {
            let p = read[i];
            let mut density = 0.;
            for_each_neighbor_candidate(sorter, p.position, |j, _| {
                let r_sq = (read[j].position - p.position).norm_squared();
                density += poly6_unnormalized(r_sq, h);
            });
            *out = SphParticle {
                density: density * coef,
                ..p
            };
        });
    }

    fn pressure_pass(&mut self) {
        let stiffness = self.params.pressure_stiffness;
        let rest_density = self.params.rest_density;
        particle_pass(&mut self.particles, |i, read, out| {
            let p = read[i];
            *out = SphParticle {
                pressure: stiffness * FT::max((p.density / rest_density).powi(7) - 1., 0.),
                ..p
            };
        });
    }

    fn force_pass(&mut self) {
        let sorter = &self.sorter;
        let h = self.params.smoothlen;
        let viscosity = self.params.viscosity;
        let coefficients = self.coefficients;
        particle_pass(&mut self.particles, |i, read, out| {
            let p = read[i];
            let mut press = V2::zeros();
            let mut visc = V2::zeros();
            for_each_neighbor_candidate(sorter, p.position, |j, _| {
                if j == i {
                    return;
                }
                let q = read[j];
                let diff = q.position - p.position;
                let r = diff.norm();
                if r > 0. && r < h {
                    let avg_pressure = 0.5 * (p.pressure + q.pressure);
                    press += diff * (coefficients.grad_pressure * spiky_pressure_term(r, h, avg_pressure, q.density));
                    visc += (q.velocity - p.velocity) * (coefficients.lap_viscosity * viscosity_term(r, h, q.density));
                }
            });
            *out = SphParticle {
                acceleration: press / p.density + visc * (viscosity / p.density),
                ..p
            };
        });
    }

    fn integrate_pass(&mut self, dt: FT) {
        let gravity = self.params.gravity;
        let wall_stiffness = self.params.wall_stiffness;
        let domain = self.domain;
        particle_pass(&mut self.particles, |i, read, out| {
            let p = read[i];
            let mut a = p.acceleration + gravity;

            // (distance to the wall, inward normal) for the four walls
            let walls = [
                (p.position.x, vec2f(1., 0.)),
                (domain.x - p.position.x, vec2f(-1., 0.)),
                (p.position.y, vec2f(0., 1.)),
                (domain.y - p.position.y, vec2f(0., -1.)),
            ];
            for &(d, n) in walls.iter() {
                a += n * (FT::min(d, 0.) * -wall_stiffness);
            }

            let velocity = p.velocity + a * dt;
            *out = SphParticle {
                position: p.position + velocity * dt,
                velocity,
                acceleration: a,
                ..p
            };
        });
    }

    /// Compares the grid neighborhoods of the read buffer with an R*-tree search. Panics on mismatch.
    pub fn check_neighborhood(&self) {
        warn!("=====> SLOW: CHECK GRID NEIGHBORHOOD <=====");
        let positions: Vec<V2> = self.particles.read().iter().map(|p| p.position).collect();
        let mut by_grid = NeighborhoodCache::new(positions.len());
        let mut by_rstar = NeighborhoodCache::new(positions.len());
        by_grid.build_neighborhood_list_grid(&self.sorter, &positions, self.params.smoothlen);
        by_rstar.build_neighborhood_list_rstar(&positions, self.params.smoothlen);
        by_grid.assert_same_as(&by_rstar);
    }

    fn substep(&mut self, dt: FT) -> Result<(), SandboxError> {
        self.pcounters.begin("grid-sort");
        self.grid_sort()?;
        self.pcounters.end("grid-sort");

        if self.params.check_neighborhood {
            self.check_neighborhood();
        }

        self.pcounters.begin("density");
        self.density_pass();
        self.pcounters.end("density");

        self.pcounters.begin("pressure");
        self.pressure_pass();
        self.pcounters.end("pressure");

        self.pcounters.begin("force");
        self.force_pass();
        self.pcounters.end("force");

        self.pcounters.begin("integrate");
        self.integrate_pass(dt);
        self.pcounters.end("integrate");

        self.time += dt;
        Ok(())
    }
}

impl SimulationDriver for SphFluid {
    fn step(&mut self, dt: FT) -> Result<(), SandboxError> {
        self.pcounters.begin("simulation-step");
        let iterations = self.iterations_for(dt);
        for _ in 0..iterations {
            self.substep(self.params.timestep)?;
        }
        self.step_number += 1;

        let read = self.particles.read();
        let avg_density = read.iter().map(|p| p.density).sum::<FT>() / read.len() as FT;
        self.vcounters.add_value("avg-density", avg_density);
        self.vcounters.add_value("iterations", iterations as FT);
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
        write_records(w, self.particles.read())
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
    use crate::simulation::error::GridSortError;

    fn small_params(particle_count: usize) -> SphParams {
        SphParams {
            particle_count,
            grid_dim: [8, 8],
            grid_cell_size: 0.5,
            smoothlen: 0.5,
            ..Default::default()
        }
    }

    fn set_particles(sim: &mut SphFluid, positions: &[V2]) {
        for (p, &x) in sim.particles.read_mut().iter_mut().zip(positions) {
            *p = SphParticle {
                position: x,
                velocity: V2::zeros(),
                acceleration: V2::zeros(),
                density: 0.,
                pressure: 0.,
            };
        }
    }

    #[test]
    fn iteration_count_is_clamped() {
        let sim = SphFluid::new(small_params(16), false).unwrap();
        assert_eq!(sim.iterations_for(0.0001), 1);
        assert_eq!(sim.iterations_for(0.0035), 3);
        assert_eq!(sim.iterations_for(0.016), 8);
    }

    #[test]
    fn iteration_count_survives_zero_max_iterations() {
        let mut params = small_params(16);
        params.max_iterations = 0;
        let sim = SphFluid::new(params, false).unwrap();
        assert_eq!(sim.iterations_for(0.0001), 1);
        assert_eq!(sim.iterations_for(0.016), 1);
    }

    #[test]
    fn rejected_permutation_leaves_particles_and_tags_untouched() {
        let mut sim = SphFluid::new(small_params(50), false).unwrap();
        sim.particle_ids.pop();
        let particles = sim.particles().to_vec();
        let ids = sim.particle_ids().to_vec();

        match sim.step(0.016) {
            Err(SandboxError::GridSort(GridSortError::InconsistentObjectCount { expected: 50, actual: 49 })) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert_eq!(sim.particles(), &particles[..]);
        assert_eq!(sim.particle_ids(), &ids[..]);
        assert_eq!(sim.step_number(), 0);
    }

    #[test]
    fn compressed_pair_accelerates_apart() {
        let mut params = small_params(2);
        params.particle_mass = 1.0;
        params.gravity = V2::zeros();
        let mut sim = SphFluid::new(params, false).unwrap();
        set_particles(&mut sim, &[vec2f(2.0, 2.0), vec2f(2.1, 2.0)]);

        sim.grid_sort().unwrap();
        sim.density_pass();
        sim.pressure_pass();
        sim.force_pass();

        let read = sim.particles();
        assert!(read.iter().all(|p| p.pressure > 0.), "pair should be compressed");
        let (left, right) = if read[0].position.x < read[1].position.x {
            (read[0], read[1])
        } else {
            (read[1], read[0])
        };
        assert!(left.acceleration.x < 0.);
        assert!(right.acceleration.x > 0.);
        crate::simulation::assert_ft_approx_eq(left.acceleration.x / -right.acceleration.x, 1.0, 1e-3, || {
            "pressure forces should be symmetric".into()
        });
    }

    #[test]
    fn identity_tags_follow_the_particles() {
        let mut sim = SphFluid::new(small_params(300), false).unwrap();
        let initial: Vec<V2> = sim.particles().iter().map(|p| p.position).collect();
        sim.grid_sort().unwrap();

        let mut seen = vec![false; 300];
        for (p, &id) in sim.particles().iter().zip(sim.particle_ids()) {
            assert_eq!(p.position, initial[id as usize]);
            seen[id as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn fluid_stays_finite_and_inside_the_domain() {
        let mut params = small_params(400);
        // about rest density for 400 particles in a disc of radius 2
        params.particle_mass = 0.03;
        params.check_neighborhood = true;
        let mut sim = SphFluid::new(params, false).unwrap();
        for _ in 0..20 {
            sim.step(0.0085).unwrap();
        }

        let margin = 0.5;
        for p in sim.particles() {
            assert!(p.position.x.is_finite() && p.position.y.is_finite());
            assert!(p.position.x > -margin && p.position.x < 4.0 + margin, "x={}", p.position.x);
            assert!(p.position.y > -margin && p.position.y < 4.0 + margin, "y={}", p.position.y);
            assert!(p.density > 0.);
        }
        assert_eq!(sim.step_number(), 20);
        crate::simulation::assert_ft_approx_eq(sim.time(), 0.16, 1e-3, || "simulated time".into());
    }
}
