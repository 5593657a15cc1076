use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    str::FromStr,
    time::{Duration, Instant},
};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

use crate::simulation::{
    counters::write_statistics, floating_type_mod::FT, simulation_parameters::SIMULATION_KINDS, SandboxError,
    Simulation, SimulationConfig, SimulationDriver,
};

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Settings of the `run` subcommand.
#[derive(Debug)]
struct RunOptions {
    config_path: PathBuf,
    overwrite_config_path: Option<PathBuf>,
    steps: u64,
    max_seconds: Option<FT>,
    frame_time: FT,
    dump_path: Option<PathBuf>,
    counters_enabled: bool,
    statistics_path: Option<PathBuf>,
    log_every: u64,
}

fn build_app() -> App<'static, 'static> {
    App::new("Pooled Grid Simulation")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("YAML file with the simulation kind and its parameters")
                        .required(true)
                        .index(1),
                )
                .arg(
                    Arg::with_name("STEPS")
                        .long("steps")
                        .short("n")
                        .takes_value(true)
                        .default_value("1000")
                        .help("Stop simulation after the given number of steps"),
                )
                .arg(
                    Arg::with_name("MAX_SECONDS")
                        .long("max-seconds")
                        .short("s")
                        .required(false)
                        .takes_value(true)
                        .help("Stop simulation after the given amount of simulated seconds"),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("YAML mapping whose keys replace the keys of the simulation config"),
                )
                .arg(
                    Arg::with_name("FRAME_TIME")
                        .long("frame-time")
                        .short("t")
                        .takes_value(true)
                        .default_value("0.016")
                        .help("Simulated seconds per step"),
                )
                .arg(
                    Arg::with_name("DUMP")
                        .long("dump")
                        .short("d")
                        .required(false)
                        .takes_value(true)
                        .help("Write the final records to this binary file"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                )
                .arg(
                    Arg::with_name("LOG_EVERY")
                        .long("log-every")
                        .takes_value(true)
                        .default_value("100")
                        .help("Log pool statistics every N steps (0 disables)"),
                ),
        )
        .subcommand(
            SubCommand::with_name("default-config")
                .about("Print the default config of a simulation kind")
                .arg(
                    Arg::with_name("KIND")
                        .help("Simulation kind")
                        .possible_values(&SIMULATION_KINDS)
                        .required(true)
                        .index(1),
                ),
        )
}

fn init_logging(verbosity: u64) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn parse_value<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>, SandboxError>
where
    T::Err: std::fmt::Display,
{
    matches
        .value_of(name)
        .map(|s| {
            s.parse::<T>()
                .map_err(|e| SandboxError::InvalidConfig(format!("invalid value '{}' for {}: {}", s, name, e)))
        })
        .transpose()
}

fn run_options(matches: &ArgMatches) -> Result<RunOptions, SandboxError> {
    Ok(RunOptions {
        config_path: matches.value_of("SIMULATION_CONFIG").map(PathBuf::from).unwrap_or_default(),
        overwrite_config_path: matches.value_of("OVERWRITE_CONFIG_FILE").map(PathBuf::from),
        steps: parse_value(matches, "STEPS")?.unwrap_or(1000),
        max_seconds: parse_value(matches, "MAX_SECONDS")?,
        frame_time: parse_value(matches, "FRAME_TIME")?.unwrap_or(0.016),
        dump_path: matches.value_of("DUMP").map(PathBuf::from),
        counters_enabled: matches.is_present("STATISTICS_ENABLED"),
        statistics_path: matches.value_of("STATISTICS_PATH").map(PathBuf::from),
        log_every: parse_value(matches, "LOG_EVERY")?.unwrap_or(100),
    })
}

/// Replaces the top-level keys of `base` with the ones of `overwrite`.
fn merge_top_level(base: &mut serde_yaml::Value, overwrite: serde_yaml::Value) -> Result<(), SandboxError> {
    let overwrite = match overwrite {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(()),
        _ => return Err(SandboxError::InvalidConfig("overwrite config is not a mapping".into())),
    };
    let mapping = base
        .as_mapping_mut()
        .ok_or_else(|| SandboxError::InvalidConfig("simulation config is not a mapping".into()))?;
    for (k, v) in overwrite.into_iter() {
        debug!("overwriting config key {:?}", k);
        mapping.insert(k, v);
    }
    Ok(())
}

pub fn parse_config(yaml: &str, overwrite_yaml: Option<&str>) -> Result<SimulationConfig, SandboxError> {
    let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
    if let Some(overwrite_yaml) = overwrite_yaml {
        merge_top_level(&mut value, serde_yaml::from_str(overwrite_yaml)?)?;
    }
    Ok(serde_yaml::from_value(value)?)
}

fn load_config(path: &Path, overwrite_path: Option<&Path>) -> Result<SimulationConfig, SandboxError> {
    let yaml = std::fs::read_to_string(path)?;
    let overwrite_yaml = overwrite_path.map(std::fs::read_to_string).transpose()?;
    parse_config(&yaml, overwrite_yaml.as_deref())
}

fn log_statistics(simulation: &Simulation, total_duration: Duration) {
    let stats = simulation.statistics();
    let frames = simulation.step_number().max(1) as u32;
    info!(
        "{:05}: t={:.3}s particles {}/{} free, edges {}/{} free ({:.3}msec AVG)",
        simulation.step_number(),
        simulation.time(),
        stats.alive_particles,
        stats.free_particles,
        stats.alive_edges,
        stats.free_edges,
        (total_duration / frames).as_secs_f32() * 1000.
    );
}

fn run(options: RunOptions) -> Result<(), SandboxError> {
    let config = load_config(&options.config_path, options.overwrite_config_path.as_deref())?;
    info!("running {} simulation", config.kind());
    debug!("{:?}", config);

    let mut simulation = Simulation::from_config(config, options.counters_enabled)?;
    let mut total_duration = Duration::from_nanos(0);

    while simulation.step_number() < options.steps {
        if let Some(max_seconds) = options.max_seconds {
            if simulation.time() >= max_seconds {
                break;
            }
        }

        let a = Instant::now();
        simulation.step(options.frame_time)?;
        total_duration += a.elapsed();

        if options.log_every > 0 && simulation.step_number() % options.log_every == 0 {
            log_statistics(&simulation, total_duration);
        }
    }
    log_statistics(&simulation, total_duration);

    if options.counters_enabled {
        let s = write_statistics(simulation.counters(), simulation.value_counters());
        print!("{}", s);
        if let Some(statistics_path) = &options.statistics_path {
            std::fs::write(statistics_path, s)?;
        }
    }

    if let Some(dump_path) = &options.dump_path {
        let mut w = BufWriter::new(File::create(dump_path)?);
        simulation.write_records(&mut w)?;
        info!("records written to {}", dump_path.display());
    }
    Ok(())
}

fn print_default_config(kind: &str) -> Result<(), SandboxError> {
    let config = SimulationConfig::default_for(kind)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

pub fn start() {
    let matches = build_app().get_matches();
    init_logging(matches.occurrences_of("v"));

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run_options(run_matches).and_then(run)
    } else if let Some(subcmd_matches) = matches.subcommand_matches("default-config") {
        print_default_config(subcmd_matches.value_of("KIND").unwrap_or_default())
    } else {
        unreachable!()
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
