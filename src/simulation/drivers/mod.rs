pub mod cellular_growth;
pub mod neighbor_search_demo;
pub mod particle_edge;
pub mod sph;

use std::io::{self, Write};

use enum_dispatch::enum_dispatch;

pub use cellular_growth::CellularGrowth;
pub use neighbor_search_demo::NeighborSearchDemo;
pub use particle_edge::ParticleEdgeGrowth;
pub use sph::SphFluid;

use super::counters::{PerformanceCounters, ValueCounters};
use super::error::SandboxError;
use super::floating_type_mod::FT;
use super::simulation_parameters::SimulationConfig;

/// Pool occupancy after a step. Drivers without edges report zero edges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStatistics {
    pub alive_particles: usize,
    pub free_particles: usize,
    pub alive_edges: usize,
    pub free_edges: usize,
}

#[enum_dispatch]
pub trait SimulationDriver {
    /// Advances the simulation by `dt` seconds of simulated time.
    fn step(&mut self, dt: FT) -> Result<(), SandboxError>;

    fn time(&self) -> FT;

    fn step_number(&self) -> u64;

    fn statistics(&self) -> DriverStatistics;

    /// Binary dump of the current read buffers.
    fn write_records(&self, w: &mut dyn Write) -> io::Result<()>;

    fn counters(&self) -> &PerformanceCounters;

    fn value_counters(&self) -> &ValueCounters;
}

#[enum_dispatch(SimulationDriver)]
pub enum Simulation {
    CellularGrowth(CellularGrowth),
    ParticleEdgeGrowth(ParticleEdgeGrowth),
    SphFluid(SphFluid),
    NeighborSearchDemo(NeighborSearchDemo),
}

impl Simulation {
    pub fn from_config(config: SimulationConfig, counters_enabled: bool) -> Result<Simulation, SandboxError> {
        config.validate()?;
        Ok(match config {
            SimulationConfig::CellularGrowth(p) => CellularGrowth::new(p, counters_enabled)?.into(),
            SimulationConfig::ParticleEdge(p) => ParticleEdgeGrowth::new(p, counters_enabled)?.into(),
            SimulationConfig::Sph(p) => SphFluid::new(p, counters_enabled)?.into(),
            SimulationConfig::NeighborSearch(p) => NeighborSearchDemo::new(p, counters_enabled)?.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::simulation_parameters::SIMULATION_KINDS;

    #[test]
    fn every_kind_builds_and_steps() {
        for kind in SIMULATION_KINDS {
            let mut config = SimulationConfig::default_for(kind).unwrap();
            // keep the fluid and the demo small
            match &mut config {
                SimulationConfig::Sph(p) => p.particle_count = 512,
                SimulationConfig::NeighborSearch(p) => p.particle_count = 512,
                _ => {}
            }
            let mut simulation = Simulation::from_config(config, true).unwrap();
            for _ in 0..3 {
                simulation.step(0.016).unwrap();
            }
            assert_eq!(simulation.step_number(), 3);
            assert!(simulation.time() > 0.);

            let stats = simulation.statistics();
            assert!(stats.alive_particles > 0, "{} has no particles", kind);

            let mut dump = Vec::new();
            simulation.write_records(&mut dump).unwrap();
            assert!(dump.len() > 4);
            assert!(simulation.counters().get("simulation-step").is_some());
        }
    }
}
