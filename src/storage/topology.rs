//! Hardware tree arena

use super::unit::{
    DiskSettings, MachineSettings, Metadata, RackSettings, Scrubbing, Unit, UnitId, UnitKind,
};
use crate::config::Config;
use crate::simulation::failure::{EventGenerator, GeneratorSpec};
use crate::Result;

/// Arena holding every unit of one simulated system
#[derive(Debug, Default)]
pub struct Topology {
    units: Vec<Unit>,
    roots: Vec<UnitId>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize datacenters, racks, machines and disks from `config`
    pub fn from_config(config: &Config) -> Result<Self> {
        let hw = &config.hardware;
        let mut topology = Self::new();

        for dc in 0..config.datacenters {
            let dc_id = topology.add_unit(format!("dc{}", dc), None, UnitKind::DataCenter);
            for r in 0..config.racks_per_datacenter {
                let rack = topology.add_unit(
                    format!("rack{}", r),
                    Some(dc_id),
                    UnitKind::Rack(RackSettings {
                        fast_forward: hw.rack_fast_forward,
                    }),
                );
                topology.attach(rack, &hw.rack_failure, &hw.rack_recovery)?;

                for m in 0..config.machines_per_rack {
                    let machine = topology.add_unit(
                        format!("machine{}", m),
                        Some(rack),
                        UnitKind::Machine(MachineSettings {
                            fast_forward: hw.machine_fast_forward,
                            fail_timeout: hw.fail_timeout,
                            eager_recovery: config.recovery.eager_recovery,
                        }),
                    );
                    topology.attach(machine, &hw.machine_failure, &hw.machine_recovery)?;

                    for d in 0..config.disks_per_machine {
                        let scrubbing = if hw.scrubbing {
                            Some(Scrubbing {
                                scan_period: hw.scan_period,
                                scrub_generator: optional(&hw.scrub)?,
                            })
                        } else {
                            None
                        };
                        let settings = DiskSettings {
                            latent_generator: optional(&hw.latent_error)?,
                            scrubbing,
                            ..DiskSettings::default()
                        };
                        let disk =
                            topology.add_unit(format!("disk{}", d), Some(machine), UnitKind::Disk(settings));
                        topology.attach(disk, &hw.disk_failure, &hw.disk_recovery)?;
                        topology.units[disk].metadata = Metadata::with_capacity(config.chunks_per_disk);
                    }
                }
            }
        }
        Ok(topology)
    }

    /// Add a unit under `parent`, or as a new root
    pub fn add_unit(
        &mut self,
        name: impl Into<String>,
        parent: Option<UnitId>,
        kind: UnitKind,
    ) -> UnitId {
        let id = self.units.len();
        self.units.push(Unit::new(id, name.into(), parent, kind));
        match parent {
            Some(p) => self.units[p].children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Install failure and recovery generators. A `none` failure leaves the
    /// unit as a pass-through that still recovers from failures cascading
    /// down from its parent.
    fn attach(&mut self, id: UnitId, failure: &GeneratorSpec, recovery: &GeneratorSpec) -> Result<()> {
        let unit = &mut self.units[id];
        unit.failure_generator = optional(failure)?;
        unit.recovery_generator = optional(recovery)?;
        Ok(())
    }

    pub fn set_generators(
        &mut self,
        id: UnitId,
        failure: Box<dyn EventGenerator>,
        recovery: Box<dyn EventGenerator>,
    ) {
        let unit = &mut self.units[id];
        unit.failure_generator = Some(failure);
        unit.recovery_generator = Some(recovery);
    }

    pub fn unit(&self, id: UnitId) -> &Unit {
        &self.units[id]
    }

    pub fn unit_mut(&mut self, id: UnitId) -> &mut Unit {
        &mut self.units[id]
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn roots(&self) -> &[UnitId] {
        &self.roots
    }

    /// Dot-separated path from the root, e.g. `dc0.rack3.machine1.disk0`
    pub fn full_name(&self, id: UnitId) -> String {
        let mut parts = vec![self.units[id].name.as_str()];
        let mut current = self.units[id].parent;
        while let Some(p) = current {
            parts.push(self.units[p].name.as_str());
            current = self.units[p].parent;
        }
        parts.reverse();
        parts.join(".")
    }

    fn ids_where(&self, pred: impl Fn(&UnitKind) -> bool) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|u| pred(&u.kind))
            .map(|u| u.id)
            .collect()
    }

    pub fn racks(&self) -> Vec<UnitId> {
        self.ids_where(UnitKind::is_rack)
    }

    pub fn machines(&self) -> Vec<UnitId> {
        self.ids_where(UnitKind::is_machine)
    }

    pub fn disks(&self) -> Vec<UnitId> {
        self.ids_where(UnitKind::is_disk)
    }

    /// Disks directly below `id`
    pub fn child_disks(&self, id: UnitId) -> Vec<UnitId> {
        self.units[id]
            .children
            .iter()
            .copied()
            .filter(|&c| self.units[c].kind.is_disk())
            .collect()
    }

    /// All disks in the subtree of `id`
    pub fn disks_under(&self, id: UnitId) -> Vec<UnitId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let unit = &self.units[current];
            if unit.kind.is_disk() {
                out.push(current);
            }
            stack.extend(unit.children.iter().rev());
        }
        out
    }

    /// Disks grouped by their rack, in topology order
    pub fn disks_by_rack(&self) -> Vec<Vec<UnitId>> {
        self.racks()
            .into_iter()
            .map(|rack| self.disks_under(rack))
            .filter(|disks| !disks.is_empty())
            .collect()
    }
}

fn optional(spec: &GeneratorSpec) -> Result<Option<Box<dyn EventGenerator>>> {
    if spec.is_none() {
        Ok(None)
    } else {
        spec.build().map(Some)
    }
}
