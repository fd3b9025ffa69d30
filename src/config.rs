//! Simulation configuration
//!
//! Everything a run needs besides the random seed's consequences: hardware
//! layout, coding scheme, recovery policy and the event-time distributions
//! of each hardware level.

use crate::erasure::RedundancySpec;
use crate::error::SimError;
use crate::simulation::failure::GeneratorSpec;
use crate::Result;
use std::path::PathBuf;
use tracing::warn;

/// Piecewise table driving the lazy recovery threshold.
///
/// `breakpoints[i]` is a number of hours since the original failure and
/// `probabilities[i]` the chance of relaxing the threshold at that age.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LazyRecoveryTable {
    pub breakpoints: Vec<f64>,
    pub probabilities: Vec<f64>,
}

impl LazyRecoveryTable {
    pub fn new(breakpoints: Vec<f64>, probabilities: Vec<f64>) -> Self {
        Self {
            breakpoints,
            probabilities,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.breakpoints.is_empty()
    }

    /// Probability at `elapsed` hours, linearly interpolated between rows
    /// and clamped to the first and last rows outside the table.
    pub fn probability_at(&self, elapsed: f64) -> f64 {
        let (bp, probs) = (&self.breakpoints, &self.probabilities);
        match bp.len() {
            0 => 0.0,
            _ if elapsed <= bp[0] => probs[0],
            len if elapsed >= bp[len - 1] => probs[len - 1],
            _ => {
                let i = bp.windows(2).position(|w| elapsed < w[1]).unwrap_or(0);
                let span = bp[i + 1] - bp[i];
                if span <= 0.0 {
                    return probs[i + 1];
                }
                let frac = (elapsed - bp[i]) / span;
                probs[i] + frac * (probs[i + 1] - probs[i])
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.breakpoints.len() != self.probabilities.len() {
            return Err(SimError::config(format!(
                "lazy recovery table has {} breakpoints but {} probabilities",
                self.breakpoints.len(),
                self.probabilities.len()
            )));
        }
        if self.breakpoints.windows(2).any(|w| w[1] < w[0]) {
            return Err(SimError::config("lazy recovery breakpoints must be non-decreasing"));
        }
        if self.probabilities.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(SimError::config("recovery probabilities must lie in [0, 1]"));
        }
        Ok(())
    }
}

/// Recovery policy switches
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Surviving chunks below which a stripe is repaired; `None` repairs on first loss
    pub recovery_threshold: Option<usize>,
    pub lazy_recovery: bool,
    /// Only relax the threshold for availability (not durability) losses
    pub lazy_only_available: bool,
    pub eager_recovery: bool,
    pub availability_counts_for_recovery: bool,
    /// Single-chunk repairs read half a stripe
    pub bandwidth_efficient_scheme: bool,
    /// Reconstruction bandwidth ceiling, MB per hour
    pub bandwidth_cap: f64,
    /// Chunks per eager recovery installment
    pub installment_size: usize,
    /// Fraction of stripes that may be degraded before lazy repair tightens
    pub max_degraded_slices: f64,
    pub lazy_table: LazyRecoveryTable,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_threshold: None,
            lazy_recovery: false,
            lazy_only_available: true,
            eager_recovery: false,
            availability_counts_for_recovery: false,
            bandwidth_efficient_scheme: false,
            bandwidth_cap: 1_000_000.0,
            installment_size: 1000,
            max_degraded_slices: 0.1,
            lazy_table: LazyRecoveryTable::default(),
        }
    }
}

/// Failure behavior of each hardware level
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareConfig {
    /// Monthly fraction of machines whose failure destroys their disks
    pub fail_fraction: f64,
    /// Hours before a machine outage counts as long
    pub fail_timeout: f64,
    pub rack_fast_forward: bool,
    pub machine_fast_forward: bool,
    pub scrubbing: bool,
    /// Hours between full scrub scans
    pub scan_period: f64,
    pub rack_failure: GeneratorSpec,
    pub rack_recovery: GeneratorSpec,
    pub machine_failure: GeneratorSpec,
    pub machine_recovery: GeneratorSpec,
    pub disk_failure: GeneratorSpec,
    pub disk_recovery: GeneratorSpec,
    pub latent_error: GeneratorSpec,
    pub scrub: GeneratorSpec,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            fail_fraction: 0.008,
            fail_timeout: 0.25,
            rack_fast_forward: false,
            machine_fast_forward: false,
            scrubbing: false,
            scan_period: 336.0,
            rack_failure: GeneratorSpec::Weibull {
                shape: 1.0,
                scale: 87_600.0,
                location: 0.0,
            },
            rack_recovery: GeneratorSpec::Gaussian {
                mean: 10.0,
                stddev: 2.0,
            },
            machine_failure: GeneratorSpec::Weibull {
                shape: 1.0,
                scale: 2_160.0,
                location: 0.0,
            },
            machine_recovery: GeneratorSpec::Uniform { min: 0.05, max: 2.0 },
            disk_failure: GeneratorSpec::Weibull {
                shape: 1.12,
                scale: 87_600.0,
                location: 0.0,
            },
            disk_recovery: GeneratorSpec::Uniform {
                min: 12.0,
                max: 36.0,
            },
            latent_error: GeneratorSpec::NoFailure,
            scrub: GeneratorSpec::NoFailure,
        }
    }
}

/// Full configuration of a simulation campaign
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub datacenters: usize,
    pub racks_per_datacenter: usize,
    pub machines_per_rack: usize,
    pub disks_per_machine: usize,
    pub chunks_per_disk: usize,
    /// Chunk size in MB
    pub chunk_size: f64,
    /// Simulated horizon in hours
    pub total_time: f64,
    /// Logical data stored, in PB; used when `stripes` is not set
    pub total_active_storage: f64,
    pub stripes: Option<usize>,
    /// Redundancy spec, e.g. `RS_9_6` or `(RS_9_6):(LRC_6_2_1_2)`
    pub redundancy: String,
    pub tiers: usize,
    /// Leading chunks of a stripe placed on distinct racks; `None` means all
    pub num_chunks_diff_racks: Option<usize>,
    pub recovery: RecoveryConfig,
    pub hardware: HardwareConfig,
    pub iterations: usize,
    pub seed: u64,
    pub event_log: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datacenters: 1,
            racks_per_datacenter: 20,
            machines_per_rack: 10,
            disks_per_machine: 4,
            chunks_per_disk: 2000,
            chunk_size: 256.0,
            total_time: 87_600.0,
            total_active_storage: 0.1,
            stripes: None,
            redundancy: "RS_9_6".to_string(),
            tiers: 1,
            num_chunks_diff_racks: None,
            recovery: RecoveryConfig::default(),
            hardware: HardwareConfig::default(),
            iterations: 1,
            seed: 0,
            event_log: None,
        }
    }
}

impl Config {
    /// Create a configuration with the given redundancy spec
    pub fn new(redundancy: impl Into<String>) -> Self {
        Self {
            redundancy: redundancy.into(),
            ..Self::default()
        }
    }

    pub fn with_layout(
        mut self,
        datacenters: usize,
        racks_per_datacenter: usize,
        machines_per_rack: usize,
        disks_per_machine: usize,
    ) -> Self {
        self.datacenters = datacenters;
        self.racks_per_datacenter = racks_per_datacenter;
        self.machines_per_rack = machines_per_rack;
        self.disks_per_machine = disks_per_machine;
        self
    }

    pub fn with_stripes(mut self, stripes: usize) -> Self {
        self.stripes = Some(stripes);
        self
    }

    pub fn with_chunks_per_disk(mut self, chunks: usize) -> Self {
        self.chunks_per_disk = chunks;
        self
    }

    pub fn with_total_time(mut self, hours: f64) -> Self {
        self.total_time = hours;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_recovery(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_hardware(mut self, hardware: HardwareConfig) -> Self {
        self.hardware = hardware;
        self
    }

    pub fn with_event_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_log = Some(path.into());
        self
    }

    pub fn rack_count(&self) -> usize {
        self.datacenters * self.racks_per_datacenter
    }

    pub fn machine_count(&self) -> usize {
        self.rack_count() * self.machines_per_rack
    }

    pub fn disk_count(&self) -> usize {
        self.machine_count() * self.disks_per_machine
    }

    /// Parse the redundancy spec and check it against the tier count
    pub fn redundancy_spec(&self) -> Result<RedundancySpec> {
        let spec: RedundancySpec = self.redundancy.parse()?;
        if spec.tier_count() != self.tiers {
            return Err(SimError::config(format!(
                "redundancy spec '{}' describes {} tiers but the system has {}",
                self.redundancy,
                spec.tier_count(),
                self.tiers
            )));
        }
        Ok(spec)
    }

    /// Number of stripes for a code with `n` chunks of which `k` carry data
    pub fn stripe_count(&self, n: usize, k: usize) -> usize {
        if let Some(stripes) = self.stripes {
            return stripes;
        }
        let storage_mb = self.total_active_storage * 1024f64.powi(3);
        let with_overhead = storage_mb * n as f64 / k as f64;
        (with_overhead / (self.chunk_size * n as f64)).ceil() as usize
    }

    /// Effective recovery threshold for a stripe of width `n`
    pub fn recovery_threshold(&self, n: usize) -> Result<usize> {
        match self.recovery.recovery_threshold {
            None => Ok(n.saturating_sub(1)),
            Some(t) if t == n => {
                warn!(threshold = t, "recovery threshold equals stripe width, lowering by one");
                Ok(n - 1)
            }
            Some(t) if t > n => Err(SimError::config(format!(
                "recovery threshold {} exceeds stripe width {}",
                t, n
            ))),
            Some(t) => Ok(t),
        }
    }

    /// Validate everything that does not depend on a particular tier
    pub fn validate(&self) -> Result<RedundancySpec> {
        if self.datacenters == 0
            || self.racks_per_datacenter == 0
            || self.machines_per_rack == 0
            || self.disks_per_machine == 0
        {
            return Err(SimError::config("every hardware level needs at least one unit"));
        }
        if self.chunks_per_disk == 0 {
            return Err(SimError::config("chunks per disk must be greater than 0"));
        }
        if !(self.chunk_size > 0.0) {
            return Err(SimError::config("chunk size must be positive"));
        }
        if !(self.total_time > 0.0 && self.total_time.is_finite()) {
            return Err(SimError::config("total time must be positive and finite"));
        }
        if self.iterations == 0 {
            return Err(SimError::config("at least one iteration is required"));
        }
        if !(0.0..=1.0).contains(&self.hardware.fail_fraction) {
            return Err(SimError::config("fail fraction must lie in [0, 1]"));
        }
        if !(self.recovery.bandwidth_cap >= 0.0) {
            return Err(SimError::config("bandwidth cap must be non-negative"));
        }
        if self.recovery.lazy_recovery && self.recovery.lazy_table.is_empty() {
            return Err(SimError::config(
                "lazy recovery requires breakpoints and recovery probabilities",
            ));
        }
        self.recovery.lazy_table.validate()?;

        let spec = self.redundancy_spec()?;
        for (tier, schemes) in spec.tiers.iter().enumerate() {
            let mut widths = Vec::with_capacity(schemes.len());
            for descriptor in schemes {
                let scheme = descriptor.build()?;
                widths.push((scheme.total_chunks(), scheme.data_chunks()));
            }
            let (n, k) = widths[0];
            self.recovery_threshold(n)?;
            let chunks = self.stripe_count(n, k) * n;
            let capacity = self.disk_count() * self.chunks_per_disk;
            if chunks > capacity {
                return Err(SimError::config(format!(
                    "tier {} needs {} chunk slots but disks only hold {}",
                    tier, chunks, capacity
                )));
            }
            if n > self.disk_count() {
                return Err(SimError::config(format!(
                    "stripe width {} exceeds disk count {}",
                    n,
                    self.disk_count()
                )));
            }
        }
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let spec = Config::default().validate().unwrap();
        assert_eq!(spec.tier_count(), 1);
    }

    #[test]
    fn test_stripe_count_from_storage() {
        let config = Config::default();
        // 0.1 PB of data in 256 MB chunks with 6 data chunks per stripe
        assert_eq!(config.stripe_count(9, 6), 69_905);
        assert_eq!(config.clone().with_stripes(10).stripe_count(9, 6), 10);
    }

    #[test]
    fn test_tier_mismatch() {
        let config = Config::new("RS_9_6:RS_14_10");
        assert!(matches!(config.validate(), Err(SimError::Configuration(_))));

        let mut config = Config::new("RS_9_6:RS_14_10");
        config.tiers = 2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_recovery_threshold_adjustment() {
        let mut config = Config::default();
        assert_eq!(config.recovery_threshold(9).unwrap(), 8);
        config.recovery.recovery_threshold = Some(9);
        assert_eq!(config.recovery_threshold(9).unwrap(), 8);
        config.recovery.recovery_threshold = Some(7);
        assert_eq!(config.recovery_threshold(9).unwrap(), 7);
        config.recovery.recovery_threshold = Some(10);
        assert!(config.recovery_threshold(9).is_err());
    }

    #[test]
    fn test_lazy_recovery_needs_table() {
        let mut config = Config::default();
        config.recovery.lazy_recovery = true;
        assert!(config.validate().is_err());

        config.recovery.lazy_table = LazyRecoveryTable::new(vec![0.0, 1.0], vec![0.5]);
        assert!(config.validate().is_err());

        config.recovery.lazy_table = LazyRecoveryTable::new(vec![0.0, 1.0], vec![0.5, 1.0]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_capacity_check() {
        let config = Config::new("RS_3_2")
            .with_layout(1, 1, 2, 2)
            .with_stripes(10);
        assert!(config.clone().with_chunks_per_disk(10).validate().is_ok());
        assert!(config.clone().with_chunks_per_disk(5).validate().is_err());
        // wider than the disk count
        assert!(Config::new("RS_9_6")
            .with_layout(1, 1, 2, 2)
            .with_stripes(1)
            .validate()
            .is_err());
    }

    #[test]
    fn test_lazy_table_interpolation() {
        let table = LazyRecoveryTable::new(vec![1.0, 3.0, 5.0], vec![0.0, 1.0, 0.5]);
        assert_eq!(table.probability_at(0.0), 0.0);
        assert_eq!(table.probability_at(2.0), 0.5);
        assert_eq!(table.probability_at(3.0), 1.0);
        assert_eq!(table.probability_at(4.0), 0.75);
        assert_eq!(table.probability_at(10.0), 0.5);
        assert_eq!(LazyRecoveryTable::default().probability_at(3.0), 0.0);
    }
}
