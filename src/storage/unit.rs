//! Hardware units
//!
//! A unit is one node of the hardware tree. Its kind decides how it
//! generates events and how the handler reacts to them.

use crate::simulation::failure::EventGenerator;
use std::collections::BTreeSet;
use std::fmt;

/// Index of a unit inside its topology arena
pub type UnitId = usize;

/// Rack behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct RackSettings {
    /// Generate events but exclude them from statistics
    pub fast_forward: bool,
}

/// Machine behavior
#[derive(Debug, Clone, Copy)]
pub struct MachineSettings {
    pub fast_forward: bool,
    /// Outages shorter than this (hours) count as short transients
    pub fail_timeout: f64,
    /// Schedule eager recovery for long transient outages
    pub eager_recovery: bool,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            fast_forward: false,
            fail_timeout: 0.25,
            eager_recovery: false,
        }
    }
}

/// Periodic scrubbing of a disk
#[derive(Debug)]
pub struct Scrubbing {
    /// Hours between full scans; latent defects are repaired at the next boundary
    pub scan_period: f64,
    pub scrub_generator: Option<Box<dyn EventGenerator>>,
}

/// Disk behavior and per-disk generation state
#[derive(Debug, Default)]
pub struct DiskSettings {
    pub latent_generator: Option<Box<dyn EventGenerator>>,
    pub scrubbing: Option<Scrubbing>,
    pub last_recovery_time: f64,
    pub last_scrub_start: f64,
}

/// Closed set of hardware unit kinds
#[derive(Debug)]
pub enum UnitKind {
    DataCenter,
    Rack(RackSettings),
    Machine(MachineSettings),
    Disk(DiskSettings),
}

impl UnitKind {
    pub fn is_machine(&self) -> bool {
        matches!(self, UnitKind::Machine(_))
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, UnitKind::Disk(_))
    }

    pub fn is_rack(&self) -> bool {
        matches!(self, UnitKind::Rack(_))
    }

    /// Whether this unit's own failures are excluded from statistics
    pub fn fast_forward(&self) -> bool {
        match self {
            UnitKind::Rack(settings) => settings.fast_forward,
            UnitKind::Machine(settings) => settings.fast_forward,
            UnitKind::DataCenter | UnitKind::Disk(_) => false,
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitKind::DataCenter => write!(f, "DataCenter"),
            UnitKind::Rack(_) => write!(f, "Rack"),
            UnitKind::Machine(_) => write!(f, "Machine"),
            UnitKind::Disk(_) => write!(f, "Disk"),
        }
    }
}

/// Stripe chunks assigned to a disk and its exceptional state
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Stripe index per chunk slot
    pub slices: Vec<usize>,
    capacity: usize,
    /// Chunks lost to this disk's failure
    pub nonexistent: BTreeSet<usize>,
    /// Chunks with a suspected latent defect
    pub defective: BTreeSet<usize>,
    /// Defects confirmed by a scrub
    pub known_defective: BTreeSet<usize>,
}

impl Metadata {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slices: Vec::with_capacity(capacity),
            capacity,
            ..Self::default()
        }
    }

    pub fn slice_count(&self) -> usize {
        self.slices.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.slices.len() >= self.capacity
    }

    /// Assign a stripe chunk to the next free slot
    pub fn assign(&mut self, stripe: usize) -> bool {
        if self.is_full() {
            return false;
        }
        self.slices.push(stripe);
        true
    }

    /// Promote every suspected defect to known
    pub fn confirm_defects(&mut self) {
        self.known_defective = self.defective.clone();
    }

    pub fn clear_defects(&mut self) {
        self.defective.clear();
        self.known_defective.clear();
    }
}

/// A node of the hardware tree
#[derive(Debug)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub parent: Option<UnitId>,
    pub children: Vec<UnitId>,
    pub kind: UnitKind,
    pub failure_generator: Option<Box<dyn EventGenerator>>,
    pub recovery_generator: Option<Box<dyn EventGenerator>>,
    pub last_failure_time: f64,
    /// Bandwidth reserved by the unit's in-flight reconstruction (MB/hour)
    pub last_bandwidth_need: f64,
    pub metadata: Metadata,
}

impl Unit {
    pub fn new(id: UnitId, name: String, parent: Option<UnitId>, kind: UnitKind) -> Self {
        Self {
            id,
            name,
            parent,
            children: Vec::new(),
            kind,
            failure_generator: None,
            recovery_generator: None,
            last_failure_time: 0.0,
            last_bandwidth_need: 0.0,
            metadata: Metadata::default(),
        }
    }

    pub fn disk_settings(&self) -> Option<&DiskSettings> {
        match &self.kind {
            UnitKind::Disk(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn disk_settings_mut(&mut self) -> Option<&mut DiskSettings> {
        match &mut self.kind {
            UnitKind::Disk(settings) => Some(settings),
            _ => None,
        }
    }

    pub fn machine_settings(&self) -> Option<MachineSettings> {
        match &self.kind {
            UnitKind::Machine(settings) => Some(*settings),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_capacity() {
        let mut meta = Metadata::with_capacity(2);
        assert!(meta.assign(4));
        assert!(meta.assign(9));
        assert!(meta.is_full());
        assert!(!meta.assign(11));
        assert_eq!(meta.slices, vec![4, 9]);
    }

    #[test]
    fn test_confirm_and_clear_defects() {
        let mut meta = Metadata::with_capacity(4);
        meta.defective.insert(3);
        meta.confirm_defects();
        assert!(meta.known_defective.contains(&3));
        meta.clear_defects();
        assert!(meta.defective.is_empty() && meta.known_defective.is_empty());
    }

    #[test]
    fn test_fast_forward_by_kind() {
        let rack = UnitKind::Rack(RackSettings { fast_forward: true });
        assert!(rack.fast_forward());
        assert!(!UnitKind::Disk(DiskSettings::default()).fast_forward());
        assert_eq!(rack.to_string(), "Rack");
    }
}
