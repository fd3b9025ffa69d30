//! Discrete-event simulation driver
//!
//! One iteration builds a fresh topology, places the stripes, generates the
//! whole failure timeline and then drains it through a
//! [`DurabilityHandler`]. Iterations are independent and run on the tokio
//! blocking pool.

pub mod eager;
pub mod event;
pub mod failure;
pub mod handler;
pub mod placement;
pub mod queue;
pub mod stats;

use crate::config::Config;
use crate::erasure::{RedundancySpec, SchemeDescriptor};
use crate::error::SimError;
use crate::storage::Topology;
use crate::Result;
use failure::SimRng;
use handler::DurabilityHandler;
use queue::EventQueue;
use rand::SeedableRng;
use stats::{SimulationReport, TierAggregate};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hours in the month the fail fraction is expressed against
const HOURS_PER_MONTH: f64 = 24.0 * 30.0;

/// Run-scoped state shared by generation and handling
#[derive(Debug)]
pub struct SimContext {
    pub rng: SimRng,
    /// Probability that a machine failure is permanent
    pub fail_fraction: f64,
}

impl SimContext {
    pub fn new(rng: SimRng, fail_fraction: f64) -> Self {
        Self { rng, fail_fraction }
    }

    /// Context whose per-failure permanence probability matches the
    /// configured monthly fraction for the machines' failure rate
    pub fn calibrated(config: &Config, topology: &Topology, seed: u64) -> Self {
        let monthly = config.hardware.fail_fraction;
        let interval = topology
            .machines()
            .first()
            .and_then(|&m| topology.unit(m).failure_generator.as_ref())
            .and_then(|g| g.expected_interval());
        let fail_fraction = match interval {
            Some(hours) if hours > 0.0 => (monthly * hours / HOURS_PER_MONTH).min(1.0),
            _ => monthly,
        };
        Self::new(SimRng::seed_from_u64(seed), fail_fraction)
    }
}

/// Result of one iteration
#[derive(Debug, Clone)]
pub struct IterationOutcome {
    pub report: SimulationReport,
    /// Rendered timeline, when an event log was requested
    pub event_log: Option<String>,
}

/// Reports of a finished campaign
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<SimulationReport>,
    pub aggregates: Vec<TierAggregate>,
}

/// Runs every iteration of every tier of a configuration
#[derive(Debug, Clone)]
pub struct Simulator {
    config: Arc<Config>,
    spec: RedundancySpec,
}

impl Simulator {
    pub fn new(config: Config) -> Result<Self> {
        let spec = config.validate()?;
        for (tier, schemes) in spec.tiers.iter().enumerate() {
            if schemes.len() > 1 {
                warn!(
                    tier,
                    schemes = schemes.len(),
                    primary = %schemes[0],
                    "heterogeneous tier, simulating its first scheme only"
                );
            }
        }
        Ok(Self {
            config: Arc::new(config),
            spec,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn spec(&self) -> &RedundancySpec {
        &self.spec
    }

    /// Seed of one iteration, derived from the campaign seed
    pub fn iteration_seed(&self, tier: usize, iteration: usize) -> u64 {
        self.config
            .seed
            .wrapping_add((tier as u64) << 32)
            .wrapping_add(iteration as u64)
    }

    /// Run a single iteration on the current thread
    pub fn run_iteration(&self, tier: usize, iteration: usize) -> Result<IterationOutcome> {
        let descriptor = self.spec.primary(tier)?.clone();
        run_iteration(
            &self.config,
            &descriptor,
            tier,
            iteration,
            self.iteration_seed(tier, iteration),
        )
    }

    /// Run every iteration of every tier concurrently
    pub async fn run(&self) -> Result<RunSummary> {
        let mut handles = Vec::new();
        for tier in 0..self.spec.tier_count() {
            let descriptor = self.spec.primary(tier)?.clone();
            for iteration in 0..self.config.iterations {
                let config = Arc::clone(&self.config);
                let descriptor = descriptor.clone();
                let seed = self.iteration_seed(tier, iteration);
                handles.push(tokio::task::spawn_blocking(move || {
                    run_iteration(&config, &descriptor, tier, iteration, seed)
                }));
            }
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| SimError::invariant(format!("iteration task failed: {}", e)))??;
            outcomes.push(outcome);
        }

        if let Some(path) = &self.config.event_log {
            let mut writer = BufWriter::new(File::create(path)?);
            for outcome in &outcomes {
                if let Some(log) = &outcome.event_log {
                    writer.write_all(log.as_bytes())?;
                }
            }
            writer.flush()?;
            info!(path = %path.display(), "event log written");
        }

        let reports: Vec<SimulationReport> = outcomes.into_iter().map(|o| o.report).collect();
        let aggregates = (0..self.spec.tier_count())
            .map(|tier| TierAggregate::from_reports(tier, &reports))
            .collect();
        Ok(RunSummary {
            reports,
            aggregates,
        })
    }
}

/// One independent iteration: topology, placement, timeline, handling
pub fn run_iteration(
    config: &Config,
    descriptor: &SchemeDescriptor,
    tier: usize,
    iteration: usize,
    seed: u64,
) -> Result<IterationOutcome> {
    let scheme = descriptor.build()?;
    let (n, k) = (scheme.total_chunks(), scheme.data_chunks());
    let stripe_count = config.stripe_count(n, k);

    let mut topology = Topology::from_config(config)?;
    let mut ctx = SimContext::calibrated(config, &topology, seed);
    let mut handler = DurabilityHandler::new(scheme, config)?;
    handler.start(&mut topology, stripe_count, &mut ctx)?;

    let mut queue = EventQueue::new();
    topology.generate_events(&mut queue, 0.0, config.total_time, &mut ctx)?;
    info!(
        tier,
        iteration,
        scheme = %descriptor,
        stripes = stripe_count,
        events = queue.len(),
        fail_fraction = ctx.fail_fraction,
        "timeline generated"
    );

    let event_log = match config.event_log {
        Some(_) => {
            let mut buf = Vec::new();
            let header = format!("tier {} iteration {} seed {}", tier, iteration, seed);
            queue.write_log(&mut buf, &header)?;
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        None => None,
    };

    let mut handled = 0usize;
    while let Some(event) = queue.remove_earliest() {
        for follow_up in handler.handle(&event, &mut topology, &mut ctx)? {
            queue.add(follow_up);
        }
        handled += 1;
    }
    debug!(tier, iteration, handled, "timeline drained");

    let report = handler.finish(tier, iteration)?;
    info!(
        tier,
        iteration,
        undurable = report.undurable_count,
        unavailable = report.unavailable_count,
        "iteration finished"
    );
    Ok(IterationOutcome { report, event_log })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareConfig;
    use crate::simulation::failure::GeneratorSpec;

    fn small_config() -> Config {
        Config::new("RS_3_2")
            .with_layout(1, 3, 2, 2)
            .with_stripes(20)
            .with_chunks_per_disk(20)
            .with_total_time(24.0 * 365.0)
            .with_seed(42)
    }

    #[test]
    fn test_calibrated_fail_fraction() {
        let config = small_config();
        let topology = Topology::from_config(&config).unwrap();
        let ctx = SimContext::calibrated(&config, &topology, 1);
        // weibull scale 2160 h is three months
        assert!((ctx.fail_fraction - 0.008 * 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_iteration_is_deterministic() {
        let simulator = Simulator::new(small_config()).unwrap();
        let a = simulator.run_iteration(0, 0).unwrap().report;
        let b = simulator.run_iteration(0, 0).unwrap().report;
        assert_eq!(a.totals, b.totals);
        assert_eq!(a.undurable_count, b.undurable_count);
        assert_eq!(a.unavailable_count, b.unavailable_count);
        assert_eq!(a.stripes, 20);
    }

    #[test]
    fn test_quiet_hardware_stays_durable() {
        let hardware = HardwareConfig {
            rack_failure: GeneratorSpec::NoFailure,
            machine_failure: GeneratorSpec::NoFailure,
            disk_failure: GeneratorSpec::NoFailure,
            ..HardwareConfig::default()
        };
        let simulator = Simulator::new(small_config().with_hardware(hardware)).unwrap();
        let report = simulator.run_iteration(0, 0).unwrap().report;
        assert_eq!(report.undurable_count, 0);
        assert_eq!(report.unavailable_count, 0);
        assert_eq!(report.totals.disk_failures, 0);
        assert_eq!(report.durability(), 100.0);
    }

    #[test]
    fn test_tier_mismatch_rejected() {
        let mut config = small_config();
        config.redundancy = "(RS_3_2):(RS_3_2)".to_string();
        assert!(matches!(
            Simulator::new(config),
            Err(SimError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_run_all_iterations() {
        let mut config = small_config().with_iterations(3);
        config.redundancy = "(RS_3_2):(RS_3_1)".to_string();
        config.tiers = 2;
        let simulator = Simulator::new(config).unwrap();
        let summary = simulator.run().await.unwrap();
        assert_eq!(summary.reports.len(), 6);
        assert_eq!(summary.aggregates.len(), 2);
        assert!(summary.aggregates.iter().all(|a| a.iterations == 3));
        assert_ne!(
            simulator.iteration_seed(0, 1),
            simulator.iteration_seed(1, 1)
        );
    }

    #[tokio::test]
    async fn test_event_log_written() {
        let path = std::env::temp_dir().join(format!("erasure-sim-log-{}.txt", std::process::id()));
        let config = small_config().with_event_log(&path);
        let simulator = Simulator::new(config).unwrap();
        simulator.run().await.unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("tier 0 iteration 0 seed 42"));
        let _ = std::fs::remove_file(&path);
    }
}
