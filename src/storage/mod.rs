//! Hardware topology
//!
//! The simulated storage system is a tree of datacenters, racks, machines
//! and disks kept in an arena. Each unit owns its event-time generators and,
//! for disks, the stripe chunks placed on it.

pub mod generation;
pub mod topology;
pub mod unit;

pub use topology::Topology;
pub use unit::{
    DiskSettings, MachineSettings, Metadata, RackSettings, Scrubbing, Unit, UnitId, UnitKind,
};
