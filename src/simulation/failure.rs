//! Event-time generators
//!
//! Every hardware unit draws its failure, recovery, latent-defect and scrub
//! timestamps from one of these. A generator is `reset` to the time its
//! renewal process restarts and then asked for the next event after a given
//! simulated time.

use crate::error::SimError;
use crate::Result;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Uniform, Weibull};
use statrs::function::gamma::gamma;
use std::fmt;
use std::str::FromStr;

/// Random source shared by generation and handling within one run
pub type SimRng = ChaCha8Rng;

/// Smallest interval a sampled distribution may produce
const MIN_INTERVAL: f64 = 1e-6;

/// Capability interface for pluggable event-time distributions
pub trait EventGenerator: Send + fmt::Debug {
    /// Restart the renewal process at `current_time`
    fn reset(&mut self, current_time: f64);

    /// Next event time after `current_time`; infinity means never
    fn next_event(&mut self, current_time: f64, rng: &mut SimRng) -> f64;

    /// Mean time between events, if the distribution has one
    fn expected_interval(&self) -> Option<f64>;
}

/// Weibull lifetimes with residual-life sampling since the last reset
#[derive(Debug, Clone)]
pub struct WeibullGenerator {
    shape: f64,
    scale: f64,
    location: f64,
    start: f64,
    fresh: Weibull<f64>,
}

impl WeibullGenerator {
    pub fn new(shape: f64, scale: f64, location: f64) -> Result<Self> {
        let fresh = Weibull::new(scale, shape)
            .map_err(|e| SimError::config(format!("invalid weibull parameters: {}", e)))?;
        if location < 0.0 || !location.is_finite() {
            return Err(SimError::config("weibull location must be finite and >= 0"));
        }
        Ok(Self {
            shape,
            scale,
            location,
            start: 0.0,
            fresh,
        })
    }
}

impl EventGenerator for WeibullGenerator {
    fn reset(&mut self, current_time: f64) {
        self.start = current_time;
    }

    fn next_event(&mut self, current_time: f64, rng: &mut SimRng) -> f64 {
        let age = (current_time - self.start - self.location).max(0.0);
        let lifetime = if age == 0.0 {
            self.fresh.sample(rng)
        } else {
            // conditional on surviving `age` hours
            let u: f64 = rng.gen_range(f64::EPSILON..1.0);
            let scaled = (age / self.scale).powf(self.shape) - u.ln();
            self.scale * scaled.powf(1.0 / self.shape)
        };
        let next = self.start + self.location + lifetime;
        if next > current_time {
            next
        } else {
            current_time + MIN_INTERVAL
        }
    }

    /// `scale * Γ(1 + 1/shape) + location`
    fn expected_interval(&self) -> Option<f64> {
        Some(self.scale * gamma(1.0 + 1.0 / self.shape) + self.location)
    }
}

/// Normally distributed intervals, truncated to stay positive
#[derive(Debug, Clone)]
pub struct GaussianGenerator {
    mean: f64,
    normal: Normal<f64>,
}

impl GaussianGenerator {
    pub fn new(mean: f64, stddev: f64) -> Result<Self> {
        let normal = Normal::new(mean, stddev)
            .map_err(|e| SimError::config(format!("invalid gaussian parameters: {}", e)))?;
        Ok(Self { mean, normal })
    }
}

impl EventGenerator for GaussianGenerator {
    fn reset(&mut self, _current_time: f64) {}

    fn next_event(&mut self, current_time: f64, rng: &mut SimRng) -> f64 {
        current_time + self.normal.sample(rng).max(MIN_INTERVAL)
    }

    fn expected_interval(&self) -> Option<f64> {
        Some(self.mean)
    }
}

/// Uniformly distributed intervals in `[min, max)`
#[derive(Debug, Clone)]
pub struct UniformGenerator {
    min: f64,
    max: f64,
    uniform: Uniform<f64>,
}

impl UniformGenerator {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !(min > 0.0 && max > min && max.is_finite()) {
            return Err(SimError::config(format!(
                "uniform bounds must satisfy 0 < min < max, got [{}, {})",
                min, max
            )));
        }
        Ok(Self {
            min,
            max,
            uniform: Uniform::new(min, max),
        })
    }
}

impl EventGenerator for UniformGenerator {
    fn reset(&mut self, _current_time: f64) {}

    fn next_event(&mut self, current_time: f64, rng: &mut SimRng) -> f64 {
        current_time + self.uniform.sample(rng)
    }

    fn expected_interval(&self) -> Option<f64> {
        Some((self.min + self.max) / 2.0)
    }
}

/// Fixed interval
#[derive(Debug, Clone)]
pub struct ConstantGenerator {
    interval: f64,
}

impl ConstantGenerator {
    pub fn new(interval: f64) -> Result<Self> {
        if !(interval > 0.0 && interval.is_finite()) {
            return Err(SimError::config(format!(
                "constant interval must be positive, got {}",
                interval
            )));
        }
        Ok(Self { interval })
    }
}

impl EventGenerator for ConstantGenerator {
    fn reset(&mut self, _current_time: f64) {}

    fn next_event(&mut self, current_time: f64, _rng: &mut SimRng) -> f64 {
        current_time + self.interval
    }

    fn expected_interval(&self) -> Option<f64> {
        Some(self.interval)
    }
}

/// Never fires
#[derive(Debug, Clone, Default)]
pub struct NoFailureGenerator;

impl EventGenerator for NoFailureGenerator {
    fn reset(&mut self, _current_time: f64) {}

    fn next_event(&mut self, _current_time: f64, _rng: &mut SimRng) -> f64 {
        f64::INFINITY
    }

    fn expected_interval(&self) -> Option<f64> {
        None
    }
}

/// Declarative description of a generator, parsed from strings such as
/// `weibull:1.12:87600`, `gaussian:24:4`, `uniform:12:36`, `constant:336`
/// or `none`.
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorSpec {
    Weibull {
        shape: f64,
        scale: f64,
        location: f64,
    },
    Gaussian {
        mean: f64,
        stddev: f64,
    },
    Uniform {
        min: f64,
        max: f64,
    },
    Constant {
        interval: f64,
    },
    NoFailure,
}

impl GeneratorSpec {
    /// Instantiate a fresh generator
    pub fn build(&self) -> Result<Box<dyn EventGenerator>> {
        Ok(match *self {
            GeneratorSpec::Weibull {
                shape,
                scale,
                location,
            } => Box::new(WeibullGenerator::new(shape, scale, location)?),
            GeneratorSpec::Gaussian { mean, stddev } => {
                Box::new(GaussianGenerator::new(mean, stddev)?)
            }
            GeneratorSpec::Uniform { min, max } => Box::new(UniformGenerator::new(min, max)?),
            GeneratorSpec::Constant { interval } => Box::new(ConstantGenerator::new(interval)?),
            GeneratorSpec::NoFailure => Box::new(NoFailureGenerator),
        })
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GeneratorSpec::NoFailure)
    }
}

impl FromStr for GeneratorSpec {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split(':');
        let name = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args = parts
            .map(|p| {
                p.trim()
                    .parse::<f64>()
                    .map_err(|_| SimError::config(format!("invalid number '{}' in '{}'", p, s)))
            })
            .collect::<Result<Vec<_>>>()?;
        let arity_error =
            || SimError::config(format!("wrong number of parameters for generator '{}'", s));
        let spec = match (name.as_str(), args.as_slice()) {
            ("weibull", [shape, scale]) => GeneratorSpec::Weibull {
                shape: *shape,
                scale: *scale,
                location: 0.0,
            },
            ("weibull", [shape, scale, location]) => GeneratorSpec::Weibull {
                shape: *shape,
                scale: *scale,
                location: *location,
            },
            ("gaussian", [mean, stddev]) => GeneratorSpec::Gaussian {
                mean: *mean,
                stddev: *stddev,
            },
            ("uniform", [min, max]) => GeneratorSpec::Uniform {
                min: *min,
                max: *max,
            },
            ("constant", [interval]) => GeneratorSpec::Constant {
                interval: *interval,
            },
            ("none", []) => GeneratorSpec::NoFailure,
            ("weibull" | "gaussian" | "uniform" | "constant" | "none", _) => {
                return Err(arity_error())
            }
            (other, _) => {
                return Err(SimError::config(format!(
                    "unknown generator '{}'",
                    other
                )))
            }
        };
        // surface parameter errors at parse time
        spec.build()?;
        Ok(spec)
    }
}

impl fmt::Display for GeneratorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorSpec::Weibull {
                shape,
                scale,
                location,
            } => write!(f, "weibull:{}:{}:{}", shape, scale, location),
            GeneratorSpec::Gaussian { mean, stddev } => write!(f, "gaussian:{}:{}", mean, stddev),
            GeneratorSpec::Uniform { min, max } => write!(f, "uniform:{}:{}", min, max),
            GeneratorSpec::Constant { interval } => write!(f, "constant:{}", interval),
            GeneratorSpec::NoFailure => write!(f, "none"),
        }
    }
}
