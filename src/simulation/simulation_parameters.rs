use serde::{Deserialize, Serialize};
use tracing::warn;

use super::drivers::cellular_growth::REPULSION_RANGE;
use super::error::SandboxError;
use super::grid_sorter::DEAD_CELL;
use super::{floating_type_mod::FT, vec2f, V2};

/// Scripted stand-in for mouse input: emits `count` particles per step at `point`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emitter {
    pub point: V2,
    pub count: usize,
    /// Number of steps the emitter is active, forever if unset.
    #[serde(default)]
    pub steps: Option<u64>,
}

impl Emitter {
    pub fn is_active(&self, step_number: u64) -> bool {
        self.steps.map_or(true, |steps| step_number < steps)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DivideMode {
    /// Insert a child in the middle of an edge, keeping closed chains closed.
    Closed,
    /// Split a child off one endpoint and join it with a new edge.
    Branch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborhoodSearchAlgorithm {
    Grid,
    RStar,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CellularGrowthParams {
    pub seed: u64,
    pub particle_capacity: usize,
    pub grid_dim: [u32; 2],
    pub grid_cell_size: FT,
    pub grid_origin: V2,

    pub drag: FT,
    pub velocity_limit: FT,
    pub repulsion: FT,
    pub grow: FT,
    pub threshold_min: FT,
    pub threshold_max: FT,
    pub emit_jitter: FT,

    /// Simulated seconds between two divide cycles.
    pub divide_interval: FT,
    pub max_divide_count: usize,

    pub emitters: Vec<Emitter>,
}

impl Default for CellularGrowthParams {
    fn default() -> Self {
        CellularGrowthParams {
            seed: 0,
            particle_capacity: 2000,
            grid_dim: [32, 32],
            grid_cell_size: 1.0,
            grid_origin: vec2f(-16., -16.),
            drag: 1.0,
            velocity_limit: 1.0,
            repulsion: 1.0,
            grow: 1.0,
            threshold_min: 0.2,
            threshold_max: 0.4,
            emit_jitter: 0.1,
            divide_interval: 0.5,
            max_divide_count: 16,
            emitters: vec![Emitter {
                point: vec2f(0., 0.),
                count: 8,
                steps: Some(1),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleEdgeParams {
    pub seed: u64,
    pub particle_capacity: usize,
    pub grid_dim: [u32; 2],
    pub grid_cell_size: FT,
    pub grid_origin: V2,

    pub drag: FT,
    pub velocity_limit: FT,
    pub repulsion: FT,
    pub spring: FT,
    pub grow: FT,
    pub threshold_min: FT,
    pub threshold_max: FT,
    pub emit_jitter: FT,
    pub max_links: i32,

    pub divide_mode: DivideMode,
    pub divide_interval: FT,
    pub max_divide_edge_count: usize,

    pub emitters: Vec<Emitter>,
}

impl Default for ParticleEdgeParams {
    fn default() -> Self {
        ParticleEdgeParams {
            seed: 0,
            particle_capacity: 2048,
            grid_dim: [32, 32],
            grid_cell_size: 1.0,
            grid_origin: vec2f(-16., -16.),
            drag: 0.9,
            velocity_limit: 1.0,
            repulsion: 1.0,
            spring: 1.0,
            grow: 1.0,
            threshold_min: 0.2,
            threshold_max: 0.4,
            emit_jitter: 0.1,
            max_links: 2,
            divide_mode: DivideMode::Closed,
            divide_interval: 0.1,
            max_divide_edge_count: 2,
            emitters: vec![Emitter {
                point: vec2f(0., 0.),
                count: 2,
                steps: Some(1),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SphParams {
    pub seed: u64,
    pub particle_count: usize,
    pub max_iterations: usize,
    pub timestep: FT,

    pub grid_dim: [u32; 2],
    pub grid_cell_size: FT,

    pub smoothlen: FT,
    pub particle_mass: FT,
    pub rest_density: FT,
    pub pressure_stiffness: FT,
    pub viscosity: FT,
    pub gravity: V2,
    pub wall_stiffness: FT,

    /// Compare every grid neighborhood against an R*-tree search (slow).
    pub check_neighborhood: bool,
}

impl Default for SphParams {
    fn default() -> Self {
        SphParams {
            seed: 0,
            particle_count: 8192,
            max_iterations: 8,
            timestep: 0.001,
            grid_dim: [32, 32],
            grid_cell_size: 0.5,
            smoothlen: 0.5,
            particle_mass: 0.08,
            rest_density: 1.0,
            pressure_stiffness: 5.0,
            viscosity: 1.0,
            gravity: vec2f(0., -9.8),
            wall_stiffness: 3000.0,
            check_neighborhood: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct NeighborSearchParams {
    pub seed: u64,
    pub particle_count: usize,
    pub grid_dim: [u32; 2],
    pub grid_cell_size: FT,
    /// Linear index of the cell whose 3x3 block gets highlighted.
    pub display_cell: u32,
    pub search_algorithm: NeighborhoodSearchAlgorithm,
}

impl Default for NeighborSearchParams {
    fn default() -> Self {
        NeighborSearchParams {
            seed: 0,
            particle_count: 8192,
            grid_dim: [16, 16],
            grid_cell_size: 1.0,
            display_cell: 0,
            search_algorithm: NeighborhoodSearchAlgorithm::Grid,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SimulationConfig {
    CellularGrowth(CellularGrowthParams),
    ParticleEdge(ParticleEdgeParams),
    Sph(SphParams),
    NeighborSearch(NeighborSearchParams),
}

pub const SIMULATION_KINDS: [&str; 4] = ["cellular-growth", "particle-edge", "sph", "neighbor-search"];

fn invalid(msg: impl Into<String>) -> SandboxError {
    SandboxError::InvalidConfig(msg.into())
}

fn validate_grid(grid_dim: [u32; 2], cell_size: FT) -> Result<(), SandboxError> {
    if grid_dim.iter().any(|&d| d == 0) {
        return Err(invalid(format!("grid_dim must be non-zero, got {:?}", grid_dim)));
    }
    if !(cell_size > 0.) {
        return Err(invalid(format!("grid_cell_size must be positive, got {}", cell_size)));
    }
    // cell ids share the u32 key space with the dead and padding sentinels
    let cell_count = grid_dim.iter().map(|&d| d as u64).product::<u64>();
    if cell_count >= DEAD_CELL as u64 {
        return Err(invalid(format!(
            "grid_dim {:?} has {} cells, at most {} are supported",
            grid_dim,
            cell_count,
            DEAD_CELL as u64 - 1
        )));
    }
    Ok(())
}

fn validate_growth(capacity: usize, threshold_min: FT, threshold_max: FT, cell_size: FT, interval: FT) -> Result<(), SandboxError> {
    if capacity == 0 {
        return Err(invalid("particle_capacity must be non-zero"));
    }
    if !(threshold_min > 0.) || threshold_max < threshold_min {
        return Err(invalid(format!(
            "thresholds must satisfy 0 < threshold_min <= threshold_max, got {} and {}",
            threshold_min, threshold_max
        )));
    }
    if !(interval > 0.) {
        return Err(invalid(format!("divide_interval must be positive, got {}", interval)));
    }
    let max_range = 2. * threshold_max * REPULSION_RANGE;
    if max_range > cell_size {
        warn!(
            "repulsion range {} exceeds the grid cell size {}; some neighbors will be missed",
            max_range, cell_size
        );
    }
    Ok(())
}

impl SimulationConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SimulationConfig::CellularGrowth(_) => SIMULATION_KINDS[0],
            SimulationConfig::ParticleEdge(_) => SIMULATION_KINDS[1],
            SimulationConfig::Sph(_) => SIMULATION_KINDS[2],
            SimulationConfig::NeighborSearch(_) => SIMULATION_KINDS[3],
        }
    }

    pub fn default_for(kind: &str) -> Result<SimulationConfig, SandboxError> {
        match kind {
            "cellular-growth" => Ok(SimulationConfig::CellularGrowth(Default::default())),
            "particle-edge" => Ok(SimulationConfig::ParticleEdge(Default::default())),
            "sph" => Ok(SimulationConfig::Sph(Default::default())),
            "neighbor-search" => Ok(SimulationConfig::NeighborSearch(Default::default())),
            _ => Err(SandboxError::UnknownSimulationKind(kind.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), SandboxError> {
        match self {
            SimulationConfig::CellularGrowth(p) => {
                validate_grid(p.grid_dim, p.grid_cell_size)?;
                validate_growth(
                    p.particle_capacity,
                    p.threshold_min,
                    p.threshold_max,
                    p.grid_cell_size,
                    p.divide_interval,
                )
            }
            SimulationConfig::ParticleEdge(p) => {
                validate_grid(p.grid_dim, p.grid_cell_size)?;
                validate_growth(
                    p.particle_capacity,
                    p.threshold_min,
                    p.threshold_max,
                    p.grid_cell_size,
                    p.divide_interval,
                )?;
                if p.divide_mode == DivideMode::Closed && p.max_links < 2 {
                    return Err(invalid(format!(
                        "closed divide mode needs max_links >= 2, got {}",
                        p.max_links
                    )));
                }
                if p.max_links < 1 {
                    return Err(invalid("max_links must be at least 1"));
                }
                Ok(())
            }
            SimulationConfig::Sph(p) => {
                validate_grid(p.grid_dim, p.grid_cell_size)?;
                if p.particle_count == 0 {
                    return Err(invalid("particle_count must be non-zero"));
                }
                if !(p.timestep > 0.) {
                    return Err(invalid(format!("timestep must be positive, got {}", p.timestep)));
                }
                if p.max_iterations == 0 {
                    return Err(invalid("max_iterations must be non-zero"));
                }
                if !(p.smoothlen > 0.) || p.smoothlen > p.grid_cell_size {
                    return Err(invalid(format!(
                        "smoothlen {} must be positive and not exceed grid_cell_size {}",
                        p.smoothlen, p.grid_cell_size
                    )));
                }
                if !(p.rest_density > 0.) {
                    return Err(invalid("rest_density must be positive"));
                }
                Ok(())
            }
            SimulationConfig::NeighborSearch(p) => {
                validate_grid(p.grid_dim, p.grid_cell_size)?;
                if p.particle_count == 0 {
                    return Err(invalid("particle_count must be non-zero"));
                }
                let cell_count = p.grid_dim[0] as u64 * p.grid_dim[1] as u64;
                if p.display_cell as u64 >= cell_count {
                    warn!("display_cell {} is outside of the {} cells, nothing will be highlighted", p.display_cell, cell_count);
                }
                Ok(())
            }
        }
    }
}
