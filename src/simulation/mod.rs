pub mod bitonic_sort;
pub mod concurrency;
pub mod counters;
pub mod drivers;
pub mod error;
pub mod grid;
pub mod grid_sorter;
pub mod neighborhood_search;
pub mod object_pool;
pub mod ping_pong;
pub mod records;
pub mod simulation_parameters;
pub mod sph_kernels;
pub mod thread_safe_ptr;

pub type IT = i32;

/// Records are read back through a fixed binary layout, so the scalar type is not configurable.
pub mod floating_type_mod {
    pub type FT = f32;
    pub use std::f32::consts::{PI, TAU};
}

use floating_type_mod::FT;

use nalgebra::SVector;
use num_traits::Float;
use std::fmt::Display;

pub type V<T, const D: usize> = SVector<T, D>;

pub type VF<const D: usize> = V<FT, D>;
pub type VI<const D: usize> = V<IT, D>;

pub type V2 = V<FT, 2>;
pub type V3 = V<FT, 3>;

pub fn vec2f(x: FT, y: FT) -> V<FT, 2> {
    [x, y].into()
}

pub fn vec3f(x: FT, y: FT, z: FT) -> V<FT, 3> {
    [x, y, z].into()
}

pub use drivers::{Simulation, SimulationDriver};
pub use error::{GridSortError, PoolError, SandboxError, SortError};
pub use grid::UniformGrid;
pub use grid_sorter::GridSorter;
pub use object_pool::{IndexPool, ObjectPool, PingPongObjectPool, PoolObject};
pub use ping_pong::PingPongBuffer;
pub use records::{Edge, NeighborParticle, Particle, SphParticle};
pub use simulation_parameters::SimulationConfig;

pub fn is_ft_approx_eq<T: Float>(a: T, b: T, tolerance: T) -> bool {
    assert!(!a.is_nan());
    assert!(!b.is_nan());
    b <= a + tolerance && b >= a - tolerance
}

pub fn assert_ft_approx_eq<T: Float + Display>(a: T, b: T, tolerance: T, s: impl FnOnce() -> String) {
    if !is_ft_approx_eq(a, b, tolerance) {
        panic!(
            "{} value not equal with a tolerance of {}:\n\ta={}\n\tb={}\n",
            s(),
            tolerance,
            a,
            b
        );
    }
}
