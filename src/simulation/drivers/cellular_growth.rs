//! Growing, repelling and dividing particles without any connections.

use std::io::{self, Write};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, trace};

use super::{DriverStatistics, SimulationDriver};
use crate::simulation::{
    concurrency::{par_iter_mut0, par_iter_mut1},
    counters::{PerformanceCounters, ValueCounters},
    error::{PoolError, SandboxError},
    floating_type_mod::{FT, TAU},
    grid::UniformGrid,
    grid_sorter::GridSorter,
    neighborhood_search::for_each_neighbor_candidate,
    object_pool::{IndexPool, PingPongObjectPool},
    records::{write_records, Particle},
    simulation_parameters::{CellularGrowthParams, Emitter},
    vec2f, V2,
};

/// Two particles repel each other while closer than `(r_i + r_j) * REPULSION_RANGE`.
pub const REPULSION_RANGE: FT = 1.25;

/// Per-particle update constants shared by the growth simulations.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GrowthPhysics {
    pub drag: FT,
    pub velocity_limit: FT,
    pub repulsion: FT,
    pub grow: FT,
}

pub(crate) fn random_direction(rng: &mut StdRng) -> V2 {
    let angle = rng.gen_range(0.0..TAU);
    vec2f(angle.cos(), angle.sin())
}

fn random_threshold(rng: &mut StdRng, min: FT, max: FT) -> FT {
    if max > min {
        rng.gen_range(min..max)
    } else {
        min
    }
}

/// Emits the particles of all active emitters, capped by the free slots. Returns the emitted count.
pub(crate) fn emit_particles(
    particles: &mut PingPongObjectPool<Particle>,
    emitters: &[Emitter],
    step_number: u64,
    (threshold_min, threshold_max, jitter): (FT, FT, FT),
    rng: &mut StdRng,
) -> usize {
    let mut emitted = 0;
    for emitter in emitters.iter().filter(|e| e.is_active(step_number)) {
        let count = emitter.count.min(particles.remaining_count());
        if count == 0 {
            continue;
        }
        let indices = particles.emit(count, |_, _| {
            let offset = random_direction(rng) * jitter * rng.gen::<FT>().sqrt();
            Particle {
                position: emitter.point + offset,
                velocity: V2::zeros(),
                radius: 0.,
                threshold: random_threshold(rng, threshold_min, threshold_max),
                links: 0,
                alive: 1,
            }
        });
        emitted += indices.len();
    }
    emitted
}

/// Repulsion, velocity clamp, integration, drag and growth (read -> write, then swap).
///
/// `extra_forces` holds one gathered force per particle (spring forces of the edges).
pub(crate) fn update_particles(
    particles: &mut PingPongObjectPool<Particle>,
    sorter: &GridSorter<2>,
    physics: GrowthPhysics,
    extra_forces: Option<&[V2]>,
    dt: FT,
) {
    let (read, write) = particles.read_write();
    par_iter_mut1(write, |i, out| {
        let p = read[i];
        if p.alive == 0 {
            *out = p;
            return;
        }

        let mut force = V2::zeros();
        for_each_neighbor_candidate(sorter, p.position, |_, j| {
            let j = j as usize;
            if j == i {
                return;
            }
            let q = read[j];
            let diff = p.position - q.position;
            let dist = diff.norm();
            let range = (p.radius + q.radius) * REPULSION_RANGE;
            if dist > 0. && dist < range {
                force += diff / dist * (range - dist);
            }
        });

        let mut velocity = p.velocity + force * physics.repulsion;
        if let Some(extra) = extra_forces {
            velocity += extra[i];
        }
        let speed = velocity.norm();
        if speed > physics.velocity_limit {
            velocity *= physics.velocity_limit / speed;
        }

        *out = Particle {
            position: p.position + velocity * dt,
            velocity: velocity * physics.drag,
            radius: FT::min(p.threshold, p.radius + physics.grow * dt),
            ..p
        };
    });
    particles.swap();
}

/// Splits `parent` in two: the child goes half a radius along `direction`, the parent the other way.
pub(crate) fn split_particle(parent: &mut Particle, direction: V2, child_links: i32) -> Particle {
    let offset = direction * (parent.radius * 0.5);
    let center = parent.position;
    parent.position = center - offset;
    parent.radius *= 0.5;
    Particle {
        position: center + offset,
        velocity: V2::zeros(),
        radius: parent.radius,
        threshold: parent.threshold,
        links: child_links,
        alive: 1,
    }
}

pub(crate) fn build_sorter(grid_dim: [u32; 2], cell_size: FT, origin: V2, capacity: usize) -> Result<GridSorter<2>, SandboxError> {
    let grid = UniformGrid::new(grid_dim.into(), cell_size, origin);
    Ok(GridSorter::new(grid, capacity)?)
}

pub struct CellularGrowth {
    params: CellularGrowthParams,
    physics: GrowthPhysics,

    particles: PingPongObjectPool<Particle>,
    dividable: IndexPool,
    sorter: GridSorter<2>,
    rng: StdRng,

    time: FT,
    next_divide_time: FT,
    step_number: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

impl CellularGrowth {
    pub fn new(params: CellularGrowthParams, counters_enabled: bool) -> Result<Self, SandboxError> {
        let capacity = params.particle_capacity;
        let sorter = build_sorter(params.grid_dim, params.grid_cell_size, params.grid_origin, capacity)?;

        Ok(CellularGrowth {
            physics: GrowthPhysics {
                drag: params.drag,
                velocity_limit: params.velocity_limit,
                repulsion: params.repulsion,
                grow: params.grow,
            },
            particles: PingPongObjectPool::new(capacity),
            dividable: IndexPool::new(capacity),
            sorter,
            rng: StdRng::seed_from_u64(params.seed),
            time: 0.,
            next_divide_time: params.divide_interval,
            step_number: 0,
            pcounters: PerformanceCounters::new(counters_enabled),
            vcounters: ValueCounters::new(counters_enabled),
            params,
        })
    }

    pub fn particles(&self) -> &[Particle] {
        self.particles.read()
    }

    pub fn particle_pool(&self) -> &PingPongObjectPool<Particle> {
        &self.particles
    }

    /// Places `count` particles by hand, capped by the free slots.
    pub fn emit_at(&mut self, point: V2, count: usize) -> Vec<u32> {
        let (min, max) = (self.params.threshold_min, self.params.threshold_max);
        let rng = &mut self.rng;
        self.particles.emit(count, |_, _| Particle {
            position: point,
            velocity: V2::zeros(),
            radius: 0.,
            threshold: random_threshold(rng, min, max),
            links: 0,
            alive: 1,
        })
    }

    pub fn release_particles(&mut self, indices: &[u32]) -> Result<usize, PoolError> {
        self.particles.release(indices)
    }

    /// Divides fully grown particles. Returns the number of new particles.
    pub fn divide_particles(&mut self) -> usize {
        self.dividable.clear();
        {
            let read = self.particles.read();
            let dividable = &self.dividable;
            par_iter_mut0(read.len(), |i| {
                let p = read[i];
                if p.alive != 0 && p.radius >= p.threshold {
                    dividable.append(i as u32);
                }
            });
        }

        let batch = self
            .params
            .max_divide_count
            .min(self.dividable.count())
            .min(self.particles.remaining_count());
        if batch == 0 {
            return 0;
        }

        let mut candidates = self.dividable.indices();
        candidates.sort_unstable();

        let mut divided = 0;
        for &parent_idx in candidates.iter().take(batch) {
            let direction = random_direction(&mut self.rng);
            let mut parent = self.particles.read()[parent_idx as usize];
            let child = split_particle(&mut parent, direction, 0);
            if self.particles.emit(1, |_, _| child).is_empty() {
                break;
            }
            self.particles.read_mut()[parent_idx as usize] = parent;
            divided += 1;
        }

        debug!(
            "divide cycle: {} candidates, {} divided, {} free",
            candidates.len(),
            divided,
            self.particles.remaining_count()
        );
        divided
    }
}

impl SimulationDriver for CellularGrowth {
    fn step(&mut self, dt: FT) -> Result<(), SandboxError> {
        self.pcounters.begin("simulation-step");

        let emitted = emit_particles(
            &mut self.particles,
            &self.params.emitters,
            self.step_number,
            (self.params.threshold_min, self.params.threshold_max, self.params.emit_jitter),
            &mut self.rng,
        );
        if emitted > 0 {
            trace!("emitted {} particles", emitted);
        }

        self.pcounters.begin("grid-sort");
        self.sorter.rebuild(self.particles.read())?;
        self.pcounters.end("grid-sort");

        self.pcounters.begin("update");
        update_particles(&mut self.particles, &self.sorter, self.physics, None, dt);
        self.pcounters.end("update");

        self.time += dt;
        if self.time >= self.next_divide_time {
            self.next_divide_time += self.params.divide_interval;
            self.pcounters.begin("divide");
            let divided = self.divide_particles();
            self.pcounters.end("divide");
            self.vcounters.add_value("divided", divided as FT);
        }

        self.step_number += 1;
        self.vcounters
            .add_value("particle-count", self.particles.alive_count() as FT);
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
            alive_particles: self.particles.alive_count(),
            free_particles: self.particles.remaining_count(),
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
