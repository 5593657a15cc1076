mod main_loop;

pub use main_loop::{parse_config, start};
