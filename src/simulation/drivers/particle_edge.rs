//! Growing particles connected by springs. Dividing an edge inserts a new particle.

use std::io::{self, Write};

use rand::{rngs::StdRng, SeedableRng};
use tracing::{debug, trace, warn};

use super::cellular_growth::{build_sorter, emit_particles, random_direction, split_particle, update_particles, GrowthPhysics};
use super::{DriverStatistics, SimulationDriver};
use crate::simulation::{
    concurrency::{par_iter_mut0, par_iter_mut1},
    counters::{PerformanceCounters, ValueCounters},
    error::{PoolError, SandboxError},
    floating_type_mod::FT,
    grid_sorter::GridSorter,
    object_pool::{IndexPool, ObjectPool, PingPongObjectPool},
    records::{write_records, Edge, Particle},
    simulation_parameters::{DivideMode, ParticleEdgeParams},
    V2,
};

fn grown(p: &Particle) -> bool {
    p.alive != 0 && p.radius >= p.threshold
}

pub struct ParticleEdgeGrowth {
    params: ParticleEdgeParams,
    physics: GrowthPhysics,

    particles: PingPongObjectPool<Particle>,
    edges: ObjectPool<Edge>,
    dividable: IndexPool,
    edge_forces: Vec<V2>,
    sorter: GridSorter<2>,
    rng: StdRng,

    time: FT,
    next_divide_time: FT,
    step_number: u64,

    pcounters: PerformanceCounters,
    vcounters: ValueCounters,
}

impl ParticleEdgeGrowth {
    pub fn new(params: ParticleEdgeParams, counters_enabled: bool) -> Result<Self, SandboxError> {
        let capacity = params.particle_capacity;
        let sorter = build_sorter(params.grid_dim, params.grid_cell_size, params.grid_origin, capacity)?;

        Ok(ParticleEdgeGrowth {
            physics: GrowthPhysics {
                drag: params.drag,
                velocity_limit: params.velocity_limit,
                repulsion: params.repulsion,
                grow: params.grow,
            },
            particles: PingPongObjectPool::new(capacity),
            edges: ObjectPool::new(capacity),
            dividable: IndexPool::new(capacity),
            edge_forces: vec![V2::zeros(); capacity],
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

    pub fn edges(&self) -> &[Edge] {
        self.edges.records()
    }

    pub fn particle_pool(&self) -> &PingPongObjectPool<Particle> {
        &self.particles
    }

    pub fn edge_pool(&self) -> &ObjectPool<Edge> {
        &self.edges
    }

    /// Spring force of every edge, then gathered per particle (`+` on `a`, `-` on `b`).
    fn update_edges(&mut self) {
        let particles = self.particles.read();
        let spring = self.params.spring;
        par_iter_mut1(self.edges.records_mut(), |_, e| {
            if e.alive == 0 {
                return;
            }
            let a = particles[e.a as usize];
            let b = particles[e.b as usize];
            let diff = b.position - a.position;
            let len = diff.norm();
            e.force = if len > 0. {
                diff / len * (len - (a.radius + b.radius)) * spring
            } else {
                V2::zeros()
            };
        });

        for f in self.edge_forces.iter_mut() {
            *f = V2::zeros();
        }
        for e in self.edges.records().iter().filter(|e| e.alive != 0) {
            self.edge_forces[e.a as usize] += e.force;
            self.edge_forces[e.b as usize] -= e.force;
        }
    }

    fn connect(&mut self, a: u32, b: u32) -> Option<u32> {
        self.edges
            .emit(1, |_, _| Edge {
                a: a as i32,
                b: b as i32,
                force: V2::zeros(),
                alive: 1,
            })
            .first()
            .copied()
    }

    fn is_dividable(&self, e: &Edge) -> bool {
        if e.alive == 0 {
            return false;
        }
        let particles = self.particles.read();
        let (a, b) = (&particles[e.a as usize], &particles[e.b as usize]);
        if a.alive == 0 || b.alive == 0 {
            return false;
        }
        match self.params.divide_mode {
            DivideMode::Closed => grown(a) && grown(b),
            DivideMode::Branch => self.branch_endpoint(e).is_some(),
        }
    }

    /// The endpoint that splits off a child in branch mode.
    fn branch_endpoint(&self, e: &Edge) -> Option<u32> {
        let particles = self.particles.read();
        let max_links = self.params.max_links;
        [e.a, e.b]
            .iter()
            .map(|&i| i as u32)
            .find(|&i| {
                let p = &particles[i as usize];
                grown(p) && p.links < max_links
            })
    }

    /// Candidates go into the dividable pool. Returns their number.
    fn store_dividable_edges(&mut self) -> usize {
        self.dividable.clear();
        {
            let this = &*self;
            let edges = this.edges.records();
            par_iter_mut0(edges.len(), |i| {
                if this.is_dividable(&edges[i]) {
                    this.dividable.append(i as u32);
                }
            });
        }
        self.dividable.count()
    }

    /// Child at the midpoint of `(a, b)`; the edge becomes `(a, c)` and a new edge `(c, b)` is added.
    fn divide_edge_closed(&mut self, edge_idx: u32) -> bool {
        let e = self.edges.records()[edge_idx as usize];
        let (ia, ib) = (e.a as usize, e.b as usize);
        let mut a = self.particles.read()[ia];
        let mut b = self.particles.read()[ib];
        a.radius *= 0.5;
        b.radius *= 0.5;
        let child = Particle {
            position: (a.position + b.position) * 0.5,
            velocity: V2::zeros(),
            radius: (a.radius + b.radius) * 0.5,
            threshold: (a.threshold + b.threshold) * 0.5,
            links: 2,
            alive: 1,
        };

        let c = match self.particles.emit(1, |_, _| child).first() {
            Some(&c) => c,
            None => return false,
        };
        if self.connect(c, ib as u32).is_none() {
            let rolled_back = self.particles.release(&[c]);
            debug_assert!(rolled_back.is_ok(), "rollback of child {} failed: {:?}", c, rolled_back);
            return false;
        }
        self.edges.records_mut()[edge_idx as usize].b = c as i32;

        let read = self.particles.read_mut();
        read[ia] = a;
        read[ib] = b;
        true
    }

    /// A grown endpoint with link slack splits off a child joined by a new edge.
    fn divide_edge_branch(&mut self, edge_idx: u32) -> bool {
        let e = self.edges.records()[edge_idx as usize];
        let parent_idx = match self.branch_endpoint(&e) {
            Some(p) => p,
            None => return false,
        };
        let direction = random_direction(&mut self.rng);
        let mut parent = self.particles.read()[parent_idx as usize];
        let child = split_particle(&mut parent, direction, 1);

        let c = match self.particles.emit(1, |_, _| child).first() {
            Some(&c) => c,
            None => return false,
        };
        if self.connect(parent_idx, c).is_none() {
            let rolled_back = self.particles.release(&[c]);
            debug_assert!(rolled_back.is_ok(), "rollback of child {} failed: {:?}", c, rolled_back);
            return false;
        }
        parent.links += 1;
        self.particles.read_mut()[parent_idx as usize] = parent;
        true
    }

    /// Joins alive particles without links pairwise, in index order. Returns the new edge count.
    fn divide_unconnected_particles(&mut self) -> usize {
        let unconnected: Vec<u32> = self
            .particles
            .read()
            .iter()
            .enumerate()
            .filter(|(_, p)| p.alive != 0 && p.links == 0)
            .map(|(i, _)| i as u32)
            .collect();

        let pairs = self.edges.remaining_count().min(unconnected.len() / 2);
        let mut connected = 0;
        for pair in unconnected.chunks_exact(2).take(pairs) {
            if self.connect(pair[0], pair[1]).is_none() {
                break;
            }
            let read = self.particles.read_mut();
            read[pair[0] as usize].links += 1;
            read[pair[1] as usize].links += 1;
            connected += 1;
        }
        connected
    }

    /// One divide cycle. Returns `(new particles, new edges)`.
    pub fn divide_edges(&mut self) -> (usize, usize) {
        let candidates = self.store_dividable_edges();
        if candidates == 0 {
            let edges = self.divide_unconnected_particles();
            debug!("divide cycle: no dividable edges, connected {} particle pairs", edges);
            return (0, edges);
        }

        let batch = self
            .params
            .max_divide_edge_count
            .min(candidates)
            .min(self.particles.remaining_count())
            .min(self.edges.remaining_count());

        let mut order = self.dividable.indices();
        order.sort_unstable();

        let mut divided = 0;
        for edge_idx in order {
            if divided == batch {
                break;
            }
            // an earlier division in this batch may have used up the candidate
            let edge = self.edges.records()[edge_idx as usize];
            if !self.is_dividable(&edge) {
                continue;
            }
            let ok = match self.params.divide_mode {
                DivideMode::Closed => self.divide_edge_closed(edge_idx),
                DivideMode::Branch => self.divide_edge_branch(edge_idx),
            };
            if !ok {
                break;
            }
            divided += 1;
        }

        debug!(
            "divide cycle: {} candidates, batch {}, divided {}",
            candidates, batch, divided
        );
        (divided, divided)
    }

    /// Releases particles together with every edge that touches one of them.
    pub fn release_particles(&mut self, indices: &[u32]) -> Result<usize, PoolError> {
        let released = self.particles.release(indices)?;

        let read = self.particles.read_mut();
        let mut dead_edges = Vec::new();
        for (edge_idx, e) in self.edges.records().iter().enumerate() {
            if e.alive == 0 {
                continue;
            }
            let a_dead = read[e.a as usize].alive == 0;
            let b_dead = read[e.b as usize].alive == 0;
            if !a_dead && !b_dead {
                continue;
            }
            if !a_dead {
                read[e.a as usize].links -= 1;
            }
            if !b_dead {
                read[e.b as usize].links -= 1;
            }
            dead_edges.push(edge_idx as u32);
        }

        if let Err(e) = self.edges.release(&dead_edges) {
            warn!("failed to release the edges of released particles: {}", e);
            return Err(e);
        }
        trace!("released {} particles and {} edges", released, dead_edges.len());
        Ok(released)
    }
}

impl SimulationDriver for ParticleEdgeGrowth {
    fn step(&mut self, dt: FT) -> Result<(), SandboxError> {
        self.pcounters.begin("simulation-step");

        emit_particles(
            &mut self.particles,
            &self.params.emitters,
            self.step_number,
            (self.params.threshold_min, self.params.threshold_max, self.params.emit_jitter),
            &mut self.rng,
        );

        self.pcounters.begin("grid-sort");
        self.sorter.rebuild(self.particles.read())?;
        self.pcounters.end("grid-sort");

        self.pcounters.begin("edges");
        self.update_edges();
        self.pcounters.end("edges");

        self.pcounters.begin("update");
        update_particles(
            &mut self.particles,
            &self.sorter,
            self.physics,
            Some(&self.edge_forces),
            dt,
        );
        self.pcounters.end("update");

        self.time += dt;
        if self.time >= self.next_divide_time {
            self.next_divide_time += self.params.divide_interval;
            self.pcounters.begin("divide");
            let (particles, edges) = self.divide_edges();
            self.pcounters.end("divide");
            self.vcounters.add_value("divided-particles", particles as FT);
            self.vcounters.add_value("new-edges", edges as FT);
        }

        self.step_number += 1;
        self.vcounters
            .add_value("particle-count", self.particles.alive_count() as FT);
        self.vcounters.add_value("edge-count", self.edges.alive_count() as FT);
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
            alive_edges: self.edges.alive_count(),
            free_edges: self.edges.remaining_count(),
        }
    }

    fn write_records(&self, w: &mut dyn Write) -> io::Result<()> {
        write_records(w, self.particles.read())?;
        write_records(w, self.edges.records())
    }

    fn counters(&self) -> &PerformanceCounters {
        &self.pcounters
    }

    fn value_counters(&self) -> &ValueCounters {
        &self.vcounters
    }
}
