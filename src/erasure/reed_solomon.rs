//! Reed-Solomon (MDS) redundancy model

use super::{check_state, heal_first, zeros, RedundancyScheme, RepairKind, RepairStep};
use crate::error::SimError;
use crate::Result;

/// Reed-Solomon code: any k of n chunks rebuild the stripe
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    data_chunks: usize,
    parity_chunks: usize,
}

impl ReedSolomon {
    /// Create a new RS scheme with k data and m parity chunks
    pub fn new(data_chunks: usize, parity_chunks: usize) -> Result<Self> {
        if data_chunks == 0 {
            return Err(SimError::config("RS needs at least one data chunk"));
        }
        Ok(Self {
            data_chunks,
            parity_chunks,
        })
    }
}

impl RedundancyScheme for ReedSolomon {
    fn name(&self) -> &'static str {
        "RS"
    }

    fn data_chunks(&self) -> usize {
        self.data_chunks
    }

    fn parity_chunks(&self) -> usize {
        self.parity_chunks
    }

    fn is_systematic_mds(&self) -> bool {
        true
    }

    fn is_repairable(&self, state: &[u8]) -> Result<bool> {
        let available = check_state(state, self.total_chunks())?;
        Ok(available >= self.data_chunks)
    }

    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        Ok(Some(RepairStep {
            cost: self.normal_repair_cost(),
            kind: RepairKind::Normal,
            state: heal_first(state, 0, state.len()),
        }))
    }

    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        Ok(Some((zeros(state) + self.data_chunks - 1) as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rs_costs() {
        let rs = ReedSolomon::new(6, 3).unwrap();
        let state = [1, 1, 1, 0, 1, 0, 1, 1, 1];

        assert!(rs.is_repairable(&state).unwrap());
        let step = rs.single_repair_cost(&state).unwrap().unwrap();
        assert_eq!(step.cost, 6.0);
        assert_eq!(step.kind, RepairKind::Normal);
        assert_eq!(step.state, vec![1, 1, 1, 1, 1, 0, 1, 1, 1]);
        assert_eq!(rs.parallel_repair_cost(&state).unwrap(), Some(7.0));
    }

    #[test]
    fn test_rs_unrepairable() {
        let rs = ReedSolomon::new(6, 3).unwrap();
        let state = [0, 1, 0, 0, 1, 0, 1, 1, 1];

        assert!(!rs.is_repairable(&state).unwrap());
        assert!(rs.single_repair_cost(&state).unwrap().is_none());
        assert!(rs.parallel_repair_cost(&state).unwrap().is_none());
    }

    #[test]
    fn test_rs_storage_cost() {
        let rs = ReedSolomon::new(10, 4).unwrap();
        assert_eq!(rs.total_chunks(), 14);
        assert_eq!(rs.system_storage_cost(), 14.0);
        assert!(rs.is_systematic_mds());
    }

    #[test]
    fn test_rs_full_state_is_invalid() {
        let rs = ReedSolomon::new(2, 1).unwrap();
        assert!(matches!(
            rs.single_repair_cost(&[1, 1, 1]),
            Err(SimError::InvalidState(_))
        ));
        assert!(ReedSolomon::new(0, 3).is_err());
    }
}
