//! Redundancy models
//!
//! Each scheme answers two questions about a stripe state (a vector of n
//! flags, 1 for a present chunk and 0 for a missing one): can it still be
//! repaired, and how many chunk transfers does the repair cost.

pub mod local_repair;
pub mod reed_solomon;
pub mod regenerating;

pub use local_repair::{Lrc, Xorbas};
pub use reed_solomon::ReedSolomon;
pub use regenerating::{Mbr, Msr};

use crate::error::SimError;
use crate::Result;
use std::fmt;
use std::str::FromStr;

/// How a single repair step reconstructs the missing chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairKind {
    /// Bandwidth-efficient repair (local group or regenerating helpers)
    Optimal,
    /// Full-cost repair reading k chunks
    Normal,
}

/// One repaired chunk: its cost and the stripe state afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct RepairStep {
    pub cost: f64,
    pub kind: RepairKind,
    pub state: Vec<u8>,
}

/// Trait for redundancy schemes
pub trait RedundancyScheme: Send + Sync + fmt::Debug {
    /// Short scheme name used in reports
    fn name(&self) -> &'static str;

    /// Number of data chunks (k)
    fn data_chunks(&self) -> usize;

    /// Number of redundant chunks (m)
    fn parity_chunks(&self) -> usize;

    /// Total chunks per stripe (n)
    fn total_chunks(&self) -> usize {
        self.data_chunks() + self.parity_chunks()
    }

    /// Whether any k chunks rebuild the stripe
    fn is_systematic_mds(&self) -> bool;

    /// Storage consumed per device, in units of one data chunk
    fn device_storage_cost(&self) -> f64 {
        1.0
    }

    /// Storage consumed by a whole stripe
    fn system_storage_cost(&self) -> f64 {
        self.total_chunks() as f64 * self.device_storage_cost()
    }

    /// Chunks transferred by a full reconstruction
    fn normal_repair_cost(&self) -> f64 {
        self.data_chunks() as f64
    }

    /// Chunks transferred by the cheapest repair the scheme supports
    fn optimal_repair_cost(&self) -> f64 {
        self.normal_repair_cost()
    }

    /// Check whether the state still holds enough information to rebuild
    fn is_repairable(&self, state: &[u8]) -> Result<bool>;

    /// Repair one missing chunk; `None` when the stripe cannot be repaired
    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>>;

    /// Repair every missing chunk at once; `None` when unrepairable
    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>>;
}

/// Validate a stripe state and return the number of present chunks.
///
/// A state of the wrong length, with non-binary entries, or with nothing
/// missing is rejected.
pub(crate) fn check_state(state: &[u8], n: usize) -> Result<usize> {
    if state.len() != n {
        return Err(SimError::InvalidState(format!(
            "expected {} chunk flags, got {}",
            n,
            state.len()
        )));
    }
    if let Some(bad) = state.iter().find(|&&flag| flag > 1) {
        return Err(SimError::InvalidState(format!(
            "chunk flag {} is not binary",
            bad
        )));
    }
    let available = state.iter().filter(|&&flag| flag == 1).count();
    if available == n {
        return Err(SimError::InvalidState("no failures to repair".into()));
    }
    Ok(available)
}

pub(crate) fn zeros(state: &[u8]) -> usize {
    state.iter().filter(|&&flag| flag == 0).count()
}

/// Copy of `state` with the first missing chunk at or after `from` restored
pub(crate) fn heal_first(state: &[u8], from: usize, to: usize) -> Vec<u8> {
    let mut healed = state.to_vec();
    if let Some(pos) = (from..to).find(|&i| healed[i] == 0) {
        healed[pos] = 1;
    }
    healed
}

/// Supported scheme families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    ReedSolomon,
    Lrc,
    Xorbas,
    Msr,
    Mbr,
}

impl SchemeKind {
    fn arity(&self) -> usize {
        match self {
            SchemeKind::ReedSolomon => 2,
            SchemeKind::Lrc => 4,
            SchemeKind::Xorbas => 3,
            SchemeKind::Msr | SchemeKind::Mbr => 3,
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            SchemeKind::ReedSolomon => "RS",
            SchemeKind::Lrc => "LRC",
            SchemeKind::Xorbas => "XORBAS",
            SchemeKind::Msr => "MSR",
            SchemeKind::Mbr => "MBR",
        };
        write!(f, "{}", name)
    }
}

/// A parsed scheme descriptor such as `RS_9_6` or `LRC_6_2_1_2`.
///
/// Parameter order per family: `RS_n_k`, `LRC_k_l_m0_m1`, `XORBAS_k_l_m1`,
/// `MSR_n_k_d`, `MBR_n_k_d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemeDescriptor {
    pub kind: SchemeKind,
    pub params: Vec<usize>,
}

impl SchemeDescriptor {
    /// Construct the scheme this descriptor names
    pub fn build(&self) -> Result<Box<dyn RedundancyScheme>> {
        let p = &self.params;
        let scheme: Box<dyn RedundancyScheme> = match self.kind {
            SchemeKind::ReedSolomon => {
                if p[0] < p[1] {
                    return Err(SimError::config(format!(
                        "RS stripe width {} is smaller than data chunk count {}",
                        p[0], p[1]
                    )));
                }
                Box::new(ReedSolomon::new(p[1], p[0] - p[1])?)
            }
            SchemeKind::Lrc => Box::new(Lrc::new(p[0], p[1], p[2], p[3])?),
            SchemeKind::Xorbas => Box::new(Xorbas::new(p[0], p[1], p[2])?),
            SchemeKind::Msr | SchemeKind::Mbr => {
                if p[0] < p[1] {
                    return Err(SimError::config(format!(
                        "{} stripe width {} is smaller than data chunk count {}",
                        self.kind, p[0], p[1]
                    )));
                }
                if self.kind == SchemeKind::Msr {
                    Box::new(Msr::new(p[1], p[0] - p[1], p[2])?)
                } else {
                    Box::new(Mbr::new(p[1], p[0] - p[1], p[2])?)
                }
            }
        };
        Ok(scheme)
    }
}

impl FromStr for SchemeDescriptor {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split('_');
        let name = parts.next().unwrap_or_default();
        let kind = match name.to_ascii_uppercase().as_str() {
            "RS" => SchemeKind::ReedSolomon,
            "LRC" => SchemeKind::Lrc,
            "XORBAS" => SchemeKind::Xorbas,
            "MSR" => SchemeKind::Msr,
            "MBR" => SchemeKind::Mbr,
            other => {
                return Err(SimError::config(format!(
                    "unknown redundancy scheme '{}'",
                    other
                )))
            }
        };
        let params = parts
            .map(|p| {
                p.parse::<usize>().map_err(|_| {
                    SimError::config(format!("invalid parameter '{}' in scheme '{}'", p, s))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if params.len() != kind.arity() {
            return Err(SimError::config(format!(
                "scheme '{}' expects {} parameters, got {}",
                s,
                kind.arity(),
                params.len()
            )));
        }
        Ok(Self { kind, params })
    }
}

impl fmt::Display for SchemeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for p in &self.params {
            write!(f, "_{}", p)?;
        }
        Ok(())
    }
}

/// Redundancy configuration of every storage tier.
///
/// Tiers are separated by `:`, heterogeneous schemes within a tier by `,`.
/// A tier group may be wrapped in brackets, e.g. `(RS_9_6):(LRC_6_2_1_2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedundancySpec {
    pub tiers: Vec<Vec<SchemeDescriptor>>,
}

impl RedundancySpec {
    pub fn tier_count(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_heterogeneous(&self) -> bool {
        self.tiers.iter().any(|tier| tier.len() > 1)
    }

    /// The scheme that drives stripe geometry for a tier
    pub fn primary(&self, tier: usize) -> Result<&SchemeDescriptor> {
        self.tiers
            .get(tier)
            .and_then(|schemes| schemes.first())
            .ok_or_else(|| SimError::config(format!("no redundancy scheme for tier {}", tier)))
    }
}

impl FromStr for RedundancySpec {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        let tiers = s
            .split(':')
            .map(|group| {
                let group = group
                    .trim()
                    .trim_start_matches(['(', '['])
                    .trim_end_matches([')', ']']);
                if group.is_empty() {
                    return Err(SimError::config(format!("empty tier in '{}'", s)));
                }
                group.split(',').map(str::parse).collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tiers })
    }
}

impl fmt::Display for RedundancySpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let groups: Vec<String> = self
            .tiers
            .iter()
            .map(|tier| {
                let names: Vec<String> = tier.iter().map(|d| d.to_string()).collect();
                format!("({})", names.join(","))
            })
            .collect();
        write!(f, "{}", groups.join(":"))
    }
}

/// Create a scheme from a single descriptor string
pub fn create_scheme(descriptor: &str) -> Result<Box<dyn RedundancyScheme>> {
    descriptor.parse::<SchemeDescriptor>()?.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_tier() {
        let spec: RedundancySpec = "RS_9_6".parse().unwrap();
        assert_eq!(spec.tier_count(), 1);
        assert!(!spec.is_heterogeneous());
        let scheme = spec.primary(0).unwrap().build().unwrap();
        assert_eq!(scheme.total_chunks(), 9);
        assert_eq!(scheme.data_chunks(), 6);
    }

    #[test]
    fn test_parse_tiers_with_brackets() {
        let spec: RedundancySpec = "(RS_14_10,LRC_6_2_1_2):[MSR_9_6_8]".parse().unwrap();
        assert_eq!(spec.tier_count(), 2);
        assert!(spec.is_heterogeneous());
        assert_eq!(spec.tiers[0][1].kind, SchemeKind::Lrc);
        assert_eq!(spec.tiers[1][0].params, vec![9, 6, 8]);
        assert_eq!(spec.to_string(), "(RS_14_10,LRC_6_2_1_2):(MSR_9_6_8)");
    }

    #[test]
    fn test_parse_rejects_bad_descriptors() {
        assert!(matches!(
            "FOO_3_2".parse::<RedundancySpec>(),
            Err(SimError::Configuration(_))
        ));
        assert!(matches!(
            "RS_9".parse::<RedundancySpec>(),
            Err(SimError::Configuration(_))
        ));
        assert!(matches!(
            "RS_9_x".parse::<RedundancySpec>(),
            Err(SimError::Configuration(_))
        ));
        assert!("RS_9_6::RS_3_2".parse::<RedundancySpec>().is_err());
        assert!(create_scheme("RS_2_6").is_err());
    }

    #[test]
    fn test_check_state() {
        assert_eq!(check_state(&[1, 0, 1], 3).unwrap(), 2);
        assert!(matches!(
            check_state(&[1, 1, 1], 3),
            Err(SimError::InvalidState(_))
        ));
        assert!(matches!(
            check_state(&[1, 0], 3),
            Err(SimError::InvalidState(_))
        ));
        assert!(check_state(&[1, 2, 0], 3).is_err());
    }
}
