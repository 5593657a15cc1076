/*!
Object pools, ping-pong buffers and grid sorting for particle simulations, with
a headless runner for the growth, SPH and neighbor-search drivers.
*/

mod platform;
pub mod simulation;

pub use simulation::*;

pub use platform::{parse_config, start};
