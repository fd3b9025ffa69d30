//! Local reconstruction codes (LRC and XORBAS)
//!
//! Chunk layout of a stripe state:
//! `[data (k) | local parities (l * m0, grouped) | global parities (m1)]`.
//! Local group `x` is data `x*k/l .. (x+1)*k/l` plus its `m0` local parities.

use super::{check_state, zeros, RedundancyScheme, RepairKind, RepairStep};
use crate::error::SimError;
use crate::Result;

/// Local Reconstruction Code with `l` groups, `m0` local and `m1` global parities
#[derive(Debug, Clone)]
pub struct Lrc {
    k: usize,
    l: usize,
    m0: usize,
    m1: usize,
}

impl Lrc {
    pub fn new(k: usize, l: usize, m0: usize, m1: usize) -> Result<Self> {
        if k == 0 || l == 0 {
            return Err(SimError::config("LRC needs k > 0 and l > 0"));
        }
        if k % l != 0 {
            return Err(SimError::config(format!(
                "LRC data chunks {} do not split into {} local groups",
                k, l
            )));
        }
        Ok(Self { k, l, m0, m1 })
    }

    fn group_size(&self) -> usize {
        self.k / self.l
    }

    /// Positions of local group `x` within a stripe state
    fn local_positions(&self, x: usize) -> Vec<usize> {
        let b = self.group_size();
        let data = x * b..(x + 1) * b;
        let parity = self.k + x * self.m0..self.k + (x + 1) * self.m0;
        data.chain(parity).collect()
    }

    fn global_positions(&self) -> std::ops::Range<usize> {
        let n = self.total_chunks();
        n - self.m1..n
    }

    fn missing_in(state: &[u8], positions: impl IntoIterator<Item = usize>) -> Vec<usize> {
        positions.into_iter().filter(|&p| state[p] == 0).collect()
    }

    fn repaired(state: &[u8], pos: usize, cost: f64, kind: RepairKind) -> RepairStep {
        let mut next = state.to_vec();
        next[pos] = 1;
        RepairStep {
            cost,
            kind,
            state: next,
        }
    }

    /// Shared repair ordering: local groups within capacity first, then
    /// `extra` (an optional cheap repair), then the global parities, then
    /// any over-capacity local group.
    fn repair_step(
        &self,
        state: &[u8],
        extra: impl FnOnce() -> Option<usize>,
    ) -> Option<RepairStep> {
        let mut overloaded = None;
        for x in 0..self.l {
            let missing = Self::missing_in(state, self.local_positions(x));
            if missing.is_empty() {
                continue;
            }
            if missing.len() <= self.m0 {
                return Some(Self::repaired(
                    state,
                    missing[0],
                    self.optimal_repair_cost(),
                    RepairKind::Optimal,
                ));
            }
            overloaded = Some(missing[0]);
        }

        if let Some(pos) = extra() {
            return Some(Self::repaired(
                state,
                pos,
                self.optimal_repair_cost(),
                RepairKind::Optimal,
            ));
        }

        if let Some(&pos) = Self::missing_in(state, self.global_positions()).first() {
            return Some(Self::repaired(
                state,
                pos,
                self.normal_repair_cost(),
                RepairKind::Normal,
            ));
        }

        overloaded
            .map(|pos| Self::repaired(state, pos, self.normal_repair_cost(), RepairKind::Normal))
    }

    /// Failures per local group, or `None` when some group exceeds `m0`
    fn local_failures(&self, state: &[u8]) -> Option<Vec<usize>> {
        let mut counts = Vec::with_capacity(self.l);
        for x in 0..self.l {
            let fails = Self::missing_in(state, self.local_positions(x)).len();
            if fails > self.m0 {
                return None;
            }
            counts.push(fails);
        }
        Some(counts)
    }

    fn global_failures(&self, state: &[u8]) -> usize {
        Self::missing_in(state, self.global_positions()).len()
    }

    fn repairable_counts(&self, state: &[u8], available: usize) -> bool {
        if available < self.k {
            return false;
        }
        let mut equations = 0;
        let mut losses = 0;
        for x in 0..self.l {
            let positions = self.local_positions(x);
            let fails = Self::missing_in(state, positions.iter().copied()).len();
            if fails <= self.m0 {
                continue;
            }
            equations += (positions.len() - fails).min(self.m0);
            losses += fails;
        }
        let global_fails = self.global_failures(state);
        equations += self.m1 - global_fails;
        losses += global_fails;
        equations >= losses
    }
}

impl RedundancyScheme for Lrc {
    fn name(&self) -> &'static str {
        "LRC"
    }

    fn data_chunks(&self) -> usize {
        self.k
    }

    fn parity_chunks(&self) -> usize {
        self.l * self.m0 + self.m1
    }

    fn is_systematic_mds(&self) -> bool {
        false
    }

    fn optimal_repair_cost(&self) -> f64 {
        self.k as f64 / self.l as f64
    }

    fn is_repairable(&self, state: &[u8]) -> Result<bool> {
        let available = check_state(state, self.total_chunks())?;
        Ok(self.repairable_counts(state, available))
    }

    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        Ok(self.repair_step(state, || None))
    }

    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        let missing = zeros(state);
        if let Some(counts) = self.local_failures(state) {
            let failed_groups = counts.iter().filter(|&&c| c > 0).count();
            if failed_groups == 1 && self.global_failures(state) == 0 {
                let local: usize = counts.iter().sum();
                return Ok(Some(self.optimal_repair_cost() + local as f64 - 1.0));
            }
        }
        Ok(Some(self.normal_repair_cost() + missing as f64 - 1.0))
    }
}

/// XORBAS: an LRC with `m0 = 1` whose parities form one more local group
#[derive(Debug, Clone)]
pub struct Xorbas {
    inner: Lrc,
}

impl Xorbas {
    pub fn new(k: usize, l: usize, m1: usize) -> Result<Self> {
        Ok(Self {
            inner: Lrc::new(k, l, 1, m1)?,
        })
    }

    /// The implicit group made of every local and global parity
    fn parity_positions(&self) -> std::ops::Range<usize> {
        self.inner.k..self.inner.total_chunks()
    }

    fn single_parity_failure(&self, state: &[u8]) -> Option<usize> {
        let missing = Lrc::missing_in(state, self.parity_positions());
        (missing.len() == 1).then(|| missing[0])
    }
}

impl RedundancyScheme for Xorbas {
    fn name(&self) -> &'static str {
        "XORBAS"
    }

    fn data_chunks(&self) -> usize {
        self.inner.data_chunks()
    }

    fn parity_chunks(&self) -> usize {
        self.inner.parity_chunks()
    }

    fn is_systematic_mds(&self) -> bool {
        false
    }

    fn optimal_repair_cost(&self) -> f64 {
        self.inner.optimal_repair_cost()
    }

    fn is_repairable(&self, state: &[u8]) -> Result<bool> {
        let available = check_state(state, self.total_chunks())?;
        match self.single_parity_failure(state) {
            Some(pos) => {
                let mut healed = state.to_vec();
                healed[pos] = 1;
                let available = available + 1;
                Ok(available == healed.len() || self.inner.repairable_counts(&healed, available))
            }
            None => Ok(self.inner.repairable_counts(state, available)),
        }
    }

    fn single_repair_cost(&self, state: &[u8]) -> Result<Option<RepairStep>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        Ok(self
            .inner
            .repair_step(state, || self.single_parity_failure(state)))
    }

    fn parallel_repair_cost(&self, state: &[u8]) -> Result<Option<f64>> {
        if !self.is_repairable(state)? {
            return Ok(None);
        }
        if let Some(counts) = self.inner.local_failures(state) {
            let failed_groups = counts.iter().filter(|&&c| c > 0).count();
            let global = self.inner.global_failures(state);
            if failed_groups == 1 && global == 0 {
                let local: usize = counts.iter().sum();
                return Ok(Some(self.optimal_repair_cost() + local as f64 - 1.0));
            }
            if failed_groups == 0 && global == 1 {
                return Ok(Some(self.optimal_repair_cost()));
            }
        }
        Ok(Some(self.normal_repair_cost() + zeros(state) as f64 - 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lrc() -> Lrc {
        Lrc::new(6, 2, 1, 2).unwrap()
    }

    #[test]
    fn test_lrc_geometry() {
        let code = lrc();
        assert_eq!(code.total_chunks(), 10);
        assert_eq!(code.local_positions(0), vec![0, 1, 2, 6]);
        assert_eq!(code.local_positions(1), vec![3, 4, 5, 7]);
        assert_eq!(code.optimal_repair_cost(), 3.0);
        assert_eq!(code.normal_repair_cost(), 6.0);
        assert!(!code.is_systematic_mds());
    }

    #[test]
    fn test_lrc_overloaded_group_needs_normal_repair() {
        let code = lrc();
        let state = [1, 1, 1, 0, 0, 0, 0, 1, 1, 1];
        assert!(code.is_repairable(&state).unwrap());

        // group 0 lost only its local parity and heals cheaply first
        let first = code.single_repair_cost(&state).unwrap().unwrap();
        assert_eq!(first.kind, RepairKind::Optimal);
        assert_eq!(first.cost, 3.0);
        assert_eq!(first.state, vec![1, 1, 1, 0, 0, 0, 1, 1, 1, 1]);

        // group 1 is beyond local capacity
        let second = code.single_repair_cost(&first.state).unwrap().unwrap();
        assert_eq!(second.kind, RepairKind::Normal);
        assert_eq!(second.cost, 6.0);
        assert_eq!(second.state, vec![1, 1, 1, 1, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn test_lrc_repairs_converge() {
        let code = lrc();
        let mut state = vec![1, 1, 1, 0, 0, 0, 0, 1, 1, 1];
        let failures = zeros(&state);
        let mut calls = 0;
        while zeros(&state) > 0 {
            state = code.single_repair_cost(&state).unwrap().unwrap().state;
            calls += 1;
        }
        assert_eq!(calls, failures);
        assert!(matches!(
            code.single_repair_cost(&state),
            Err(SimError::InvalidState(_))
        ));
    }

    #[test]
    fn test_lrc_global_before_overloaded_group() {
        let code = Lrc::new(6, 2, 1, 3).unwrap();
        let state = [1, 1, 1, 0, 0, 1, 1, 1, 0, 1, 1];
        assert!(code.is_repairable(&state).unwrap());
        let step = code.single_repair_cost(&state).unwrap().unwrap();
        assert_eq!(step.kind, RepairKind::Normal);
        assert_eq!(step.state, vec![1, 1, 1, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_lrc_unrepairable() {
        let code = lrc();
        let state = [0, 0, 0, 0, 1, 1, 0, 1, 1, 1];
        assert!(!code.is_repairable(&state).unwrap());
        assert!(code.parallel_repair_cost(&state).unwrap().is_none());
    }

    #[test]
    fn test_lrc_parallel_costs() {
        let code = lrc();
        // one failure in a single local group
        assert_eq!(
            code.parallel_repair_cost(&[1, 0, 1, 1, 1, 1, 1, 1, 1, 1]).unwrap(),
            Some(3.0)
        );
        // failures spread across groups
        assert_eq!(
            code.parallel_repair_cost(&[1, 0, 1, 1, 0, 1, 1, 1, 1, 1]).unwrap(),
            Some(7.0)
        );
    }

    #[test]
    fn test_xorbas_single_parity_failure_is_cheap() {
        let code = Xorbas::new(6, 2, 2).unwrap();
        assert_eq!(code.total_chunks(), 10);
        let state = [1, 1, 1, 1, 1, 1, 1, 1, 0, 1];
        assert!(code.is_repairable(&state).unwrap());

        let step = code.single_repair_cost(&state).unwrap().unwrap();
        assert_eq!(step.kind, RepairKind::Optimal);
        assert_eq!(step.cost, 3.0);
        assert_eq!(code.parallel_repair_cost(&state).unwrap(), Some(3.0));
    }

    #[test]
    fn test_xorbas_mixed_failures() {
        let code = Xorbas::new(6, 2, 2).unwrap();
        let state = [1, 1, 1, 1, 0, 1, 1, 0, 1, 1];
        assert!(code.is_repairable(&state).unwrap());

        // the parity-group failure heals through the implicit parity group
        let step = code.single_repair_cost(&state).unwrap().unwrap();
        assert_eq!(step.kind, RepairKind::Optimal);
        assert_eq!(step.state, vec![1, 1, 1, 1, 0, 1, 1, 1, 1, 1]);
        assert_eq!(code.parallel_repair_cost(&state).unwrap(), Some(7.0));
    }
}
