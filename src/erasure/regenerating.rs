//! Regenerating codes (MSR and MBR)

use super::{check_state, heal_first, zeros, RedundancyScheme, RepairKind, RepairStep};
use crate::error::SimError;
use crate::Result;

/// Minimum Storage Regenerating code with `d` repair helpers
#[derive(Debug, Clone)]
pub struct Msr {
    k: usize,
    m: usize,
    d: usize,
}

impl Msr {
    pub fn new(k: usize, m: usize, d: usize) -> Result<Self> {
        if k == 0 {
            return Err(SimError::config("regenerating codes need k > 0"));
        }
        if d < k || d >= k + m {
            return Err(SimError::config(format!(
                "helper count d={} must lie in [{}, {})",
                d,
                k,
                k + m
            )));
        }
        Ok(Self { k, m, d })
    }

    fn repair(&self, state: &[u8], optimal: f64) -> Result<Option<RepairStep>> {
        let available = check_state(state, self.k + self.m)?;
        if available < self.k {
            return Ok(None);
        }
        let (cost, kind) = if available >= self.d {
            (optimal, RepairKind::Optimal)
        } else {
            (self.k as f64, RepairKind::Normal)
        };
        Ok(Some(RepairStep {
            cost,
            kind,
            state: heal_first(state, 0, state.len()),
        }))
    }

    fn parallel(&self, state: &[u8], optimal: f64) -> Result<Option<f64>> {
        let available = check_state(state, self.k + self.m)?;
        if available < self.k {
            return Ok(None);
        }
        if available == self.k + self.m - 1 {
            return Ok(Some(optimal));
        }
        Ok(Some((zeros(state) + self.k - 1) as f64))
    }
}

impl RedundancyScheme for Msr {
    fn name(&self) -> &'static str {
        "MSR"
    }

    fn data_chunks(&self) -> usize {
        self.k
    }

    fn parity_chunks(&self) -> usize {
        self.m
    }

    fn is_systematic_mds(&self) -> bool {
        true
    }

    fn optimal_repair_cost(&self) -> f64 {
        self.d as f64 / (self.d - self.k + 1) as f64
    }

    fn is_repairable(&self, state: &[u8]) -> Result<bool> {
        Ok(check_state(state, self.total_chunks())? >= self.k)
    }

    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>> {
        self.repair(state, self.optimal_repair_cost())
    }

    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>> {
        self.parallel(state, self.optimal_repair_cost())
    }
}

/// Minimum Bandwidth Regenerating code: stores extra sub-chunks per device
#[derive(Debug, Clone)]
pub struct Mbr {
    inner: Msr,
}

impl Mbr {
    pub fn new(k: usize, m: usize, d: usize) -> Result<Self> {
        Ok(Self {
            inner: Msr::new(k, m, d)?,
        })
    }
}

impl RedundancyScheme for Mbr {
    fn name(&self) -> &'static str {
        "MBR"
    }

    fn data_chunks(&self) -> usize {
        self.inner.k
    }

    fn parity_chunks(&self) -> usize {
        self.inner.m
    }

    fn is_systematic_mds(&self) -> bool {
        true
    }

    fn device_storage_cost(&self) -> f64 {
        let d = self.inner.d as f64;
        2.0 * d / (2.0 * d - self.inner.k as f64 + 1.0)
    }

    fn optimal_repair_cost(&self) -> f64 {
        self.device_storage_cost()
    }

    fn is_repairable(&self, state: &[u8]) -> Result<bool> {
        self.inner.is_repairable(state)
    }

    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>> {
        self.inner.repair(state, self.optimal_repair_cost())
    }

    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>> {
        self.inner.parallel(state, self.optimal_repair_cost())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msr_helper_bounds() {
        assert!(Msr::new(10, 4, 9).is_err());
        assert!(Msr::new(10, 4, 14).is_err());
        assert!(Msr::new(10, 4, 13).is_ok());
    }

    #[test]
    fn test_msr_costs() {
        let msr = Msr::new(10, 4, 12).unwrap();
        assert_eq!(msr.optimal_repair_cost(), 4.0);

        let one_missing = [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 1, 1];
        let step = msr.single_repair_cost(&one_missing).unwrap().unwrap();
        assert_eq!(step.kind, RepairKind::Optimal);
        assert_eq!(step.cost, 4.0);
        assert_eq!(msr.parallel_repair_cost(&one_missing).unwrap(), Some(4.0));

        // below d helpers the repair falls back to k
        let three_missing = [0, 1, 1, 1, 1, 0, 1, 1, 1, 1, 1, 0, 1, 1];
        let step = msr.single_repair_cost(&three_missing).unwrap().unwrap();
        assert_eq!(step.kind, RepairKind::Normal);
        assert_eq!(step.cost, 10.0);
        assert_eq!(msr.parallel_repair_cost(&three_missing).unwrap(), Some(12.0));
    }

    #[test]
    fn test_mbr_costs() {
        let mbr = Mbr::new(6, 3, 6).unwrap();
        let expected = 12.0 / 7.0;
        assert!((mbr.device_storage_cost() - expected).abs() < 1e-12);
        assert!((mbr.optimal_repair_cost() - expected).abs() < 1e-12);
        assert!((mbr.system_storage_cost() - 9.0 * expected).abs() < 1e-12);
        assert_eq!(mbr.normal_repair_cost(), 6.0);

        let state = [1, 1, 1, 1, 1, 1, 1, 0, 1];
        let step = mbr.single_repair_cost(&state).unwrap().unwrap();
        assert!((step.cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_regenerating_unrepairable() {
        let msr = Msr::new(2, 2, 3).unwrap();
        assert!(!msr.is_repairable(&[0, 0, 0, 1]).unwrap());
        assert!(msr.single_repair_cost(&[0, 0, 0, 1]).unwrap().is_none());
    }
}
