//! Erasure-coded storage durability simulator
//!
//! Runs Monte Carlo iterations of the failure and repair timeline of a
//! simulated datacenter and prints how many stripes were lost or became
//! unavailable. With `--tui` the finished run can be browsed in the terminal.

use clap::{Arg, ArgAction, ArgMatches, Command};
use erasure_sim::simulation::failure::GeneratorSpec;
use erasure_sim::{Config, Result, SimError, Simulator, TerminalUI};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    let count = |name: &'static str, help: &'static str, default: &'static str| {
        Arg::new(name)
            .long(name)
            .value_name("COUNT")
            .help(help)
            .default_value(default)
    };
    let generator = |name: &'static str, help: &'static str| {
        Arg::new(name)
            .long(name)
            .value_name("SPEC")
            .help(help)
    };

    Command::new("erasure-sim")
        .version("0.1.0")
        .about("Durability and availability simulator for erasure-coded storage")
        .arg(
            Arg::new("redundancy")
                .short('r')
                .long("redundancy")
                .value_name("SPEC")
                .help("Redundancy schemes, e.g. RS_9_6 or (RS_9_6):(LRC_6_2_1_2)")
                .default_value("RS_9_6"),
        )
        .arg(count("tiers", "Number of storage tiers in the redundancy spec", "1"))
        .arg(count("datacenters", "Number of datacenters", "1"))
        .arg(count("racks", "Racks per datacenter", "20"))
        .arg(count("machines", "Machines per rack", "10"))
        .arg(count("disks", "Disks per machine", "4"))
        .arg(count("chunks-per-disk", "Chunk slots per disk", "2000"))
        .arg(
            Arg::new("chunk-size")
                .long("chunk-size")
                .value_name("MB")
                .help("Chunk size in MB")
                .default_value("256"),
        )
        .arg(
            Arg::new("stripes")
                .long("stripes")
                .value_name("COUNT")
                .help("Stripe count; derived from --storage when omitted"),
        )
        .arg(
            Arg::new("storage")
                .long("storage")
                .value_name("PB")
                .help("Logical data stored, in PB")
                .default_value("0.1"),
        )
        .arg(
            Arg::new("diff-racks")
                .long("diff-racks")
                .value_name("COUNT")
                .help("Leading chunks of each stripe placed on distinct racks"),
        )
        .arg(
            Arg::new("total-time")
                .short('t')
                .long("total-time")
                .value_name("HOURS")
                .help("Simulated horizon in hours")
                .default_value("87600"),
        )
        .arg(count("iterations", "Independent iterations per tier", "1").short('i'))
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_name("SEED")
                .help("Base random seed")
                .default_value("0"),
        )
        .arg(
            Arg::new("recovery-threshold")
                .long("recovery-threshold")
                .value_name("COUNT")
                .help("Surviving chunks below which a stripe is repaired"),
        )
        .arg(
            Arg::new("lazy")
                .long("lazy")
                .help("Enable lazy recovery")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("lazy-table")
                .long("lazy-table")
                .value_name("HOURS=P,...")
                .help("Lazy recovery breakpoints and recovery probabilities"),
        )
        .arg(
            Arg::new("eager")
                .long("eager")
                .help("Enable eager recovery of long machine outages")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("availability-counts")
                .long("availability-counts")
                .help("Unavailable chunks count towards the recovery threshold")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("bandwidth-efficient")
                .long("bandwidth-efficient")
                .help("Single-chunk repairs read half a stripe")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("bandwidth-cap")
                .long("bandwidth-cap")
                .value_name("MB_PER_HOUR")
                .help("Reconstruction bandwidth ceiling")
                .default_value("1000000"),
        )
        .arg(count("installment-size", "Chunks per eager recovery installment", "1000"))
        .arg(
            Arg::new("scrubbing")
                .long("scrubbing")
                .help("Model latent sector errors and scrubbing")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("fail-fraction")
                .long("fail-fraction")
                .value_name("FRACTION")
                .help("Monthly fraction of machine failures that are permanent"),
        )
        .arg(
            Arg::new("fail-timeout")
                .long("fail-timeout")
                .value_name("HOURS")
                .help("Outage length after which a machine failure counts as long"),
        )
        .arg(generator("rack-failure", "Rack failure generator, e.g. weibull:1:87600"))
        .arg(generator("rack-recovery", "Rack recovery generator"))
        .arg(generator("machine-failure", "Machine failure generator"))
        .arg(generator("machine-recovery", "Machine recovery generator"))
        .arg(generator("disk-failure", "Disk failure generator"))
        .arg(generator("disk-recovery", "Disk recovery generator"))
        .arg(generator("latent-error", "Latent sector error generator"))
        .arg(generator("scrub", "Scrub generator"))
        .arg(
            Arg::new("event-log")
                .long("event-log")
                .value_name("PATH")
                .help("Write every generated timeline to this file"),
        )
        .arg(
            Arg::new("tui")
                .long("tui")
                .help("Browse the results in the terminal UI")
                .action(ArgAction::SetTrue),
        )
}

/// Parse a required argument that carries a default value
fn parse_arg<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<T> {
    parse_optional(matches, name)?
        .ok_or_else(|| SimError::config(format!("missing value for --{}", name)))
}

fn parse_optional<T: FromStr>(matches: &ArgMatches, name: &str) -> Result<Option<T>> {
    matches
        .get_one::<String>(name)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| SimError::config(format!("invalid value '{}' for --{}", raw, name)))
        })
        .transpose()
}

fn parse_generator(matches: &ArgMatches, name: &str, current: &mut GeneratorSpec) -> Result<()> {
    if let Some(raw) = matches.get_one::<String>(name) {
        *current = raw.parse::<GeneratorSpec>()?;
    }
    Ok(())
}

/// `--lazy-table 24=0.1,48=0.5,72=1`
fn parse_lazy_table(raw: &str) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut breakpoints = Vec::new();
    let mut probabilities = Vec::new();
    for row in raw.split(',').filter(|r| !r.trim().is_empty()) {
        let (hours, probability) = row
            .split_once('=')
            .ok_or_else(|| SimError::config(format!("lazy table row '{}' is not HOURS=P", row)))?;
        let number = |s: &str| {
            s.trim()
                .parse::<f64>()
                .map_err(|_| SimError::config(format!("invalid number '{}' in lazy table", s)))
        };
        breakpoints.push(number(hours)?);
        probabilities.push(number(probability)?);
    }
    Ok((breakpoints, probabilities))
}

fn build_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = Config::new(parse_arg::<String>(matches, "redundancy")?)
        .with_layout(
            parse_arg(matches, "datacenters")?,
            parse_arg(matches, "racks")?,
            parse_arg(matches, "machines")?,
            parse_arg(matches, "disks")?,
        )
        .with_chunks_per_disk(parse_arg(matches, "chunks-per-disk")?)
        .with_total_time(parse_arg(matches, "total-time")?)
        .with_iterations(parse_arg(matches, "iterations")?)
        .with_seed(parse_arg(matches, "seed")?);

    config.tiers = parse_arg(matches, "tiers")?;
    config.chunk_size = parse_arg(matches, "chunk-size")?;
    config.total_active_storage = parse_arg(matches, "storage")?;
    config.stripes = parse_optional(matches, "stripes")?;
    config.num_chunks_diff_racks = parse_optional(matches, "diff-racks")?;
    if let Some(path) = matches.get_one::<String>("event-log") {
        config = config.with_event_log(path);
    }

    let recovery = &mut config.recovery;
    recovery.recovery_threshold = parse_optional(matches, "recovery-threshold")?;
    recovery.lazy_recovery = matches.get_flag("lazy");
    recovery.eager_recovery = matches.get_flag("eager");
    recovery.availability_counts_for_recovery = matches.get_flag("availability-counts");
    recovery.bandwidth_efficient_scheme = matches.get_flag("bandwidth-efficient");
    recovery.bandwidth_cap = parse_arg(matches, "bandwidth-cap")?;
    recovery.installment_size = parse_arg(matches, "installment-size")?;
    if let Some(raw) = matches.get_one::<String>("lazy-table") {
        let (breakpoints, probabilities) = parse_lazy_table(raw)?;
        recovery.lazy_table = erasure_sim::LazyRecoveryTable::new(breakpoints, probabilities);
    }

    let hardware = &mut config.hardware;
    hardware.scrubbing = matches.get_flag("scrubbing");
    if let Some(fraction) = parse_optional(matches, "fail-fraction")? {
        hardware.fail_fraction = fraction;
    }
    if let Some(timeout) = parse_optional(matches, "fail-timeout")? {
        hardware.fail_timeout = timeout;
    }
    parse_generator(matches, "rack-failure", &mut hardware.rack_failure)?;
    parse_generator(matches, "rack-recovery", &mut hardware.rack_recovery)?;
    parse_generator(matches, "machine-failure", &mut hardware.machine_failure)?;
    parse_generator(matches, "machine-recovery", &mut hardware.machine_recovery)?;
    parse_generator(matches, "disk-failure", &mut hardware.disk_failure)?;
    parse_generator(matches, "disk-recovery", &mut hardware.disk_recovery)?;
    parse_generator(matches, "latent-error", &mut hardware.latent_error)?;
    parse_generator(matches, "scrub", &mut hardware.scrub)?;

    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,erasure_sim=info")),
        )
        .init();

    let matches = cli().get_matches();
    let config = build_config(&matches)?;
    let simulator = Simulator::new(config)?;

    let summary = simulator.run().await?;

    if matches.get_flag("tui") {
        let mut ui = TerminalUI::new()?;
        ui.run(summary).await?;
        return Ok(());
    }

    for report in &summary.reports {
        println!("{}", report);
    }
    for aggregate in &summary.aggregates {
        println!("{}", aggregate);
    }
    Ok(())
}
