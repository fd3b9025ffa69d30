//! Run statistics and their reductions
//!
//! The handler records raw samples while it drains the queue. Reports turn
//! them into daily averages, yearly averages and a reconstruction
//! bandwidth profile.

use super::queue::Timestamp;
use crate::error::SimError;
use crate::Result;
use std::collections::BTreeMap;
use std::fmt;

const HOURS_PER_DAY: usize = 24;
const MINUTES_PER_HOUR: usize = 60;
const DAYS_PER_YEAR: usize = 365;

/// One reconstruction job: `data_recovered` MB moved between `start` and `end`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recovery {
    pub start: f64,
    pub end: f64,
    pub data_recovered: f64,
}

impl Recovery {
    pub fn new(start: f64, end: f64, data_recovered: f64) -> Self {
        Self {
            start,
            end,
            data_recovered,
        }
    }

    /// Average transfer rate in GB per day
    pub fn bandwidth(&self) -> f64 {
        let duration = self.end - self.start;
        if duration <= 0.0 {
            return 0.0;
        }
        self.data_recovered / duration * HOURS_PER_DAY as f64 / 1024.0
    }
}

/// Interval add/subtract points swept into an instantaneous bandwidth curve
#[derive(Debug, Clone, Default)]
pub struct BandwidthTimeline {
    points: BTreeMap<Timestamp, Vec<(bool, f64)>>,
    max_bandwidth: f64,
}

impl BandwidthTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished reconstruction; jobs with no duration are dropped
    pub fn add(&mut self, recovery: Recovery) {
        if recovery.end - recovery.start <= 0.0 {
            return;
        }
        let bandwidth = recovery.bandwidth();
        self.max_bandwidth = self.max_bandwidth.max(bandwidth);
        self.points
            .entry(Timestamp(recovery.start))
            .or_default()
            .push((true, bandwidth));
        self.points
            .entry(Timestamp(recovery.end))
            .or_default()
            .push((false, bandwidth));
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Largest single-job bandwidth seen, GB/day
    pub fn max_bandwidth(&self) -> f64 {
        self.max_bandwidth
    }

    /// Aggregate bandwidth after each change point
    pub fn sweep(&self) -> Result<Vec<(f64, f64)>> {
        let mut current = 0.0;
        let mut curve = Vec::with_capacity(self.points.len());
        for (time, changes) in &self.points {
            for &(start, bandwidth) in changes {
                if start {
                    current += bandwidth;
                } else {
                    current -= bandwidth;
                }
            }
            current = clamp_drift(current, "bandwidth timeline")?;
            curve.push((time.0, current));
        }
        Ok(curve)
    }
}

/// Absorb floating point drift just below zero; anything larger is a bug
pub fn clamp_drift(value: f64, what: &str) -> Result<f64> {
    if value >= 0.0 {
        Ok(value)
    } else if value > -1.0 {
        Ok(0.0)
    } else {
        Err(SimError::invariant(format!("{} went negative: {}", what, value)))
    }
}

/// Daily reduction of a step series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSummary {
    pub daily: Vec<f64>,
    pub mean: f64,
    pub stdev: f64,
    pub max: f64,
    pub yearly: Vec<f64>,
}

impl SeriesSummary {
    /// Sample `samples` once per simulated minute, carrying the last value
    /// forward, and average each day.
    ///
    /// Samples sharing a minute are averaged together.
    pub fn from_samples(samples: &[(f64, f64)], total_time: f64) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let days = ((total_time / HOURS_PER_DAY as f64).ceil() as usize).max(1);
        let per_day = HOURS_PER_DAY * MINUTES_PER_HOUR;

        let mut daily = Vec::with_capacity(days);
        let mut max = 0.0f64;
        let mut previous = 0.0;
        let mut next = 0;

        for day in 0..days {
            let mut sum = 0.0;
            for minute in 0..per_day {
                let at = (day * HOURS_PER_DAY) as f64 + minute as f64 / MINUTES_PER_HOUR as f64;
                let mut value = previous;
                let mut count = 0usize;
                while next < samples.len() && samples[next].0 <= at {
                    value = if count == 0 {
                        samples[next].1
                    } else {
                        (value * count as f64 + samples[next].1) / (count + 1) as f64
                    };
                    previous = samples[next].1;
                    count += 1;
                    next += 1;
                }
                max = max.max(value);
                sum += value;
            }
            daily.push(sum / per_day as f64);
        }

        let mean = daily.iter().sum::<f64>() / daily.len() as f64;
        let stdev = if daily.len() > 1 {
            let var = daily.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>()
                / (daily.len() - 1) as f64;
            var.sqrt()
        } else {
            0.0
        };
        let yearly = daily
            .chunks(DAYS_PER_YEAR)
            .map(|year| year.iter().sum::<f64>() / year.len() as f64)
            .collect();

        Self {
            daily,
            mean,
            stdev,
            max,
            yearly,
        }
    }
}

impl fmt::Display for SeriesSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.3} stdev:{:.3} max:{:.3}",
            self.mean, self.stdev, self.max
        )?;
        for (year, avg) in self.yearly.iter().enumerate() {
            write!(f, " y{}:{:.3}", year + 1, avg)?;
        }
        Ok(())
    }
}

/// Per event-type totals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventTotals {
    pub latent_failures: usize,
    pub scrubs: usize,
    pub scrub_repairs: usize,
    pub disk_failures: usize,
    pub disk_repairs: usize,
    pub machine_failures: usize,
    pub machine_repairs: usize,
    pub permanent_machine_failures: usize,
    pub short_transient_failures: usize,
    pub long_transient_failures: usize,
    pub rack_induced_failures: usize,
    pub eager_machine_repairs: usize,
    pub eager_slice_repairs: usize,
    pub skipped_latent: usize,
    pub incomplete_recovery_attempts: usize,
    pub empty_disk_failures: usize,
}

/// Outcome of one iteration of one tier
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    pub tier: usize,
    pub iteration: usize,
    pub scheme: String,
    pub stripes: usize,
    pub unavailable_count: usize,
    pub undurable_count: usize,
    pub anomalous_available_count: usize,
    /// Peak projected reconstruction bandwidth, MB/hour
    pub max_recovery_bandwidth: f64,
    /// Times the projected bandwidth exceeded the configured cap
    pub bandwidth_overruns: usize,
    pub unavailable_hours: f64,
    pub totals: EventTotals,
    pub durable_degraded: SeriesSummary,
    pub available_degraded: SeriesSummary,
    /// Swept reconstruction bandwidth, GB/day
    pub bandwidth: SeriesSummary,
}

impl SimulationReport {
    /// Percentage of stripes that survived the run
    pub fn durability(&self) -> f64 {
        if self.stripes == 0 {
            return 100.0;
        }
        (1.0 - self.undurable_count as f64 / self.stripes as f64) * 100.0
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(
            f,
            "tier {} iteration {} ({}, {} stripes)",
            self.tier, self.iteration, self.scheme, self.stripes
        )?;
        writeln!(
            f,
            "  anomalous available count: {}, total latent failures: {}, total scrubs: {}, total scrub repairs: {}",
            self.anomalous_available_count, t.latent_failures, t.scrubs, t.scrub_repairs
        )?;
        writeln!(
            f,
            "  disk failures: {}, disk repairs: {}, machine failures: {}, machine repairs: {}",
            t.disk_failures, t.disk_repairs, t.machine_failures, t.machine_repairs
        )?;
        writeln!(
            f,
            "  permanent: {}, short transient: {}, long transient: {}, rack induced: {}",
            t.permanent_machine_failures,
            t.short_transient_failures,
            t.long_transient_failures,
            t.rack_induced_failures
        )?;
        writeln!(
            f,
            "  eager machine repairs: {}, eager slice repairs: {}, skipped latent: {}, incomplete recovery: {}",
            t.eager_machine_repairs,
            t.eager_slice_repairs,
            t.skipped_latent,
            t.incomplete_recovery_attempts
        )?;
        writeln!(
            f,
            "  max recovery bandwidth: {:.3} MB/h ({} over cap)",
            self.max_recovery_bandwidth, self.bandwidth_overruns
        )?;
        writeln!(
            f,
            "  unavailable_slice_count: {}, undurable_slice_count: {}, unavailable hours: {:.3}",
            self.unavailable_count, self.undurable_count, self.unavailable_hours
        )?;
        writeln!(f, "  durability: {:.6}%", self.durability())?;
        writeln!(f, "  avg durable degraded slices per day: {}", self.durable_degraded)?;
        writeln!(f, "  avg available degraded slices per day: {}", self.available_degraded)?;
        write!(f, "  avg bandwidth GB/day: {}", self.bandwidth)
    }
}

/// Averages across the iterations of one tier
#[derive(Debug, Clone, PartialEq)]
pub struct TierAggregate {
    pub tier: usize,
    pub iterations: usize,
    pub average_unavailable: f64,
    pub average_undurable: f64,
}

impl TierAggregate {
    pub fn from_reports(tier: usize, reports: &[SimulationReport]) -> Self {
        let tier_reports: Vec<_> = reports.iter().filter(|r| r.tier == tier).collect();
        let iterations = tier_reports.len();
        let average = |f: fn(&SimulationReport) -> usize| {
            if iterations == 0 {
                0.0
            } else {
                tier_reports.iter().map(|r| f(r) as f64).sum::<f64>() / iterations as f64
            }
        };
        Self {
            tier,
            iterations,
            average_unavailable: average(|r| r.unavailable_count),
            average_undurable: average(|r| r.undurable_count),
        }
    }
}

impl fmt::Display for TierAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tier {}: {} iterations, average unavailable count: {:.3}, average undurable count: {:.3}",
            self.tier, self.iterations, self.average_unavailable, self.average_undurable
        )
    }
}
