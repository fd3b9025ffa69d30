//! Durability and availability accounting
//!
//! The handler owns every per-stripe counter of one run. Events are handled
//! one at a time in timestamp order; a handler returns the follow-up events
//! it wants scheduled instead of touching the queue itself.

use super::event::{Event, EventKind, EventTarget, FailureCause};
use super::placement::place_stripes;
use super::stats::{
    clamp_drift, BandwidthTimeline, EventTotals, Recovery, SeriesSummary, SimulationReport,
};
use super::SimContext;
use crate::config::{Config, RecoveryConfig};
use crate::erasure::RedundancyScheme;
use crate::error::SimError;
use crate::storage::generation::TIME_EPSILON;
use crate::storage::{Topology, UnitId, UnitKind};
use crate::Result;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

/// Per-stripe counters
#[derive(Debug, Clone, Default)]
pub struct StripeTable {
    pub durable: Vec<usize>,
    pub available: Vec<usize>,
    pub latent: Vec<bool>,
    pub known_latent: Vec<bool>,
    pub lost: Vec<bool>,
    /// Disk holding chunk `i` of each stripe
    pub locations: Vec<Vec<UnitId>>,
}

impl StripeTable {
    fn new(locations: Vec<Vec<UnitId>>, n: usize) -> Self {
        let count = locations.len();
        Self {
            durable: vec![n; count],
            available: vec![n; count],
            latent: vec![false; count],
            known_latent: vec![false; count],
            lost: vec![false; count],
            locations,
        }
    }

    pub fn len(&self) -> usize {
        self.durable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.durable.is_empty()
    }
}

/// Coarse state of a stripe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StripeHealth {
    Healthy,
    DegradedAvailable,
    DegradedDurable,
    Lost,
}

/// A `[start, end)` interval during which a stripe could not be read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnavailableWindow {
    pub start: f64,
    pub end: Option<f64>,
}

/// Batch of stripes repaired together during eager recovery
#[derive(Debug, Clone, Default)]
pub struct Installment {
    pub stripes: Vec<usize>,
    pub last_failure_time: f64,
    pub original_failure_time: f64,
    /// Bandwidth released when this batch completes; `None` for placeholders
    pub bandwidth_need: Option<f64>,
}

/// Consumes the event timeline of one run and accumulates its statistics
#[derive(Debug)]
pub struct DurabilityHandler {
    pub(super) scheme: Box<dyn RedundancyScheme>,
    pub(super) n: usize,
    pub(super) k: usize,
    pub(super) recovery: RecoveryConfig,
    pub(super) recovery_threshold: usize,
    pub(super) chunk_size: f64,
    pub(super) end_time: f64,
    pub(super) diff_racks: usize,
    pub(super) stripes: StripeTable,
    pub(super) installments: Vec<Installment>,
    /// Machines whose outage is currently reflected in `available`
    pub(super) down_machines: BTreeSet<UnitId>,

    pub(super) unavailable_count: usize,
    pub(super) undurable_count: usize,
    pub(super) anomalous_available_count: usize,
    pub(super) current_slice_degraded: i64,
    pub(super) current_avail_slice_degraded: i64,
    pub(super) current_recovery_bandwidth: f64,
    pub(super) max_recovery_bandwidth: f64,
    pub(super) bandwidth_overruns: usize,
    pub(super) totals: EventTotals,

    pub(super) unavailable_windows: BTreeMap<usize, Vec<UnavailableWindow>>,
    pub(super) durable_degraded: Vec<(f64, f64)>,
    pub(super) available_degraded: Vec<(f64, f64)>,
    pub(super) timeline: BandwidthTimeline,
}

impl DurabilityHandler {
    pub fn new(scheme: Box<dyn RedundancyScheme>, config: &Config) -> Result<Self> {
        let n = scheme.total_chunks();
        let k = scheme.data_chunks();
        let recovery_threshold = config.recovery_threshold(n)?;
        if config.recovery.lazy_recovery && config.recovery.lazy_table.is_empty() {
            return Err(SimError::config(
                "lazy recovery requires breakpoints and recovery probabilities",
            ));
        }
        Ok(Self {
            n,
            k,
            recovery: config.recovery.clone(),
            recovery_threshold,
            chunk_size: config.chunk_size,
            end_time: config.total_time,
            diff_racks: config.num_chunks_diff_racks.unwrap_or(n),
            stripes: StripeTable::default(),
            installments: Vec::new(),
            down_machines: BTreeSet::new(),
            unavailable_count: 0,
            undurable_count: 0,
            anomalous_available_count: 0,
            current_slice_degraded: 0,
            current_avail_slice_degraded: 0,
            current_recovery_bandwidth: 0.0,
            max_recovery_bandwidth: 0.0,
            bandwidth_overruns: 0,
            totals: EventTotals::default(),
            unavailable_windows: BTreeMap::new(),
            durable_degraded: Vec::new(),
            available_degraded: Vec::new(),
            timeline: BandwidthTimeline::new(),
            scheme,
        })
    }

    /// Place `stripe_count` stripes on the topology's disks
    pub fn start(
        &mut self,
        topology: &mut Topology,
        stripe_count: usize,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let locations = place_stripes(topology, stripe_count, self.n, self.diff_racks, &mut ctx.rng)?;
        self.stripes = StripeTable::new(locations, self.n);
        Ok(())
    }

    pub fn stripes(&self) -> &StripeTable {
        &self.stripes
    }

    pub fn totals(&self) -> &EventTotals {
        &self.totals
    }

    pub fn undurable_count(&self) -> usize {
        self.undurable_count
    }

    pub fn unavailable_count(&self) -> usize {
        self.unavailable_count
    }

    pub fn current_recovery_bandwidth(&self) -> f64 {
        self.current_recovery_bandwidth
    }

    pub fn max_recovery_bandwidth(&self) -> f64 {
        self.max_recovery_bandwidth
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn health(&self, stripe: usize) -> StripeHealth {
        if self.stripes.lost[stripe] {
            StripeHealth::Lost
        } else if self.stripes.durable[stripe] < self.n || self.stripes.latent[stripe] {
            StripeHealth::DegradedDurable
        } else if self.stripes.available[stripe] < self.n {
            StripeHealth::DegradedAvailable
        } else {
            StripeHealth::Healthy
        }
    }

    /// Apply one event and return the events it schedules
    pub fn handle(
        &mut self,
        event: &Event,
        topology: &mut Topology,
        ctx: &mut SimContext,
    ) -> Result<Vec<Event>> {
        debug!(event = %event, "handling event");
        let mut scheduled = Vec::new();
        match (event.kind, event.target) {
            (EventKind::EagerRecoveryInstallment, EventTarget::Installment(id)) => {
                self.handle_installment(id, event, topology, ctx)?;
            }
            (EventKind::EagerRecoveryInstallment, EventTarget::Unit(_)) => {
                return Err(SimError::invariant("eager installment targets a hardware unit"));
            }
            (kind, EventTarget::Installment(_)) => {
                return Err(SimError::invariant(format!(
                    "{} event targets an installment",
                    kind
                )));
            }
            (EventKind::Failure, EventTarget::Unit(id)) => {
                if !event.ignore {
                    self.handle_failure(id, event, topology, &mut scheduled)?;
                }
            }
            (EventKind::Recovered, EventTarget::Unit(id)) => {
                if !event.ignore {
                    self.handle_recovery(id, event, topology)?;
                }
            }
            (EventKind::EagerRecoveryStart, EventTarget::Unit(id)) => {
                self.handle_eager_start(id, event, topology, ctx, &mut scheduled)?;
            }
            (EventKind::LatentDefect, EventTarget::Unit(id)) => {
                self.handle_latent_defect(id, event.time, topology, ctx)?;
            }
            (EventKind::LatentRecovered, EventTarget::Unit(id)) => {
                self.handle_latent_recovered(id, event.time, topology)?;
            }
            (EventKind::ScrubStart, EventTarget::Unit(id)) => {
                self.handle_scrub_start(id, event.time, topology)?;
            }
            (EventKind::ScrubComplete, EventTarget::Unit(id)) => {
                self.handle_scrub_complete(id, event.time, topology)?;
            }
        }
        Ok(scheduled)
    }

    fn handle_failure(
        &mut self,
        id: UnitId,
        event: &Event,
        topology: &mut Topology,
        scheduled: &mut Vec<Event>,
    ) -> Result<()> {
        let kind = &topology.unit(id).kind;
        if kind.is_machine() {
            self.machine_failure(id, event, topology, scheduled)
        } else if kind.is_disk() {
            self.disk_failure(id, event, topology)
        } else {
            for child in topology.unit(id).children.clone() {
                self.handle_failure(child, event, topology, scheduled)?;
            }
            Ok(())
        }
    }

    fn machine_failure(
        &mut self,
        id: UnitId,
        event: &Event,
        topology: &mut Topology,
        scheduled: &mut Vec<Event>,
    ) -> Result<()> {
        let time = event.time;
        if !self.down_machines.insert(id) {
            debug!(machine = %topology.full_name(id), time, "failure of a machine that is already down");
            return Ok(());
        }
        self.totals.machine_failures += 1;
        topology.unit_mut(id).last_failure_time = time;

        match event.cause {
            FailureCause::Permanent => {
                // durability loss arrives through the disks' own events
                self.totals.permanent_machine_failures += 1;
                return Ok(());
            }
            FailureCause::ShortTransient => self.totals.short_transient_failures += 1,
            FailureCause::LongTransient => self.totals.long_transient_failures += 1,
            FailureCause::Inherited => {
                self.totals.rack_induced_failures += 1;
                let settings = topology
                    .unit(id)
                    .machine_settings()
                    .ok_or_else(|| SimError::invariant("machine failure on a non-machine"))?;
                let next_recovery = event.next_recovery_time.ok_or_else(|| {
                    SimError::invariant(format!(
                        "inherited failure of {} has no recovery time",
                        topology.full_name(id)
                    ))
                })?;
                if next_recovery - time <= settings.fail_timeout {
                    self.totals.short_transient_failures += 1;
                } else {
                    self.totals.long_transient_failures += 1;
                    if settings.eager_recovery {
                        scheduled.push(
                            Event::new(
                                EventKind::EagerRecoveryStart,
                                time + settings.fail_timeout,
                                id,
                            )
                            .with_next_recovery(next_recovery - TIME_EPSILON),
                        );
                    }
                }
            }
        }

        for disk in topology.child_disks(id) {
            let slices = topology.unit(disk).metadata.slices.clone();
            if slices.is_empty() {
                warn!(disk = %topology.full_name(disk), "machine failure on a disk without chunks");
                self.totals.empty_disk_failures += 1;
                continue;
            }
            for stripe in slices {
                if self.stripes.lost[stripe] {
                    continue;
                }
                self.slice_degraded_availability(stripe);
                self.stripes.available[stripe] =
                    self.stripes.available[stripe].checked_sub(1).ok_or_else(|| {
                        SimError::invariant(format!("stripe {} availability below zero", stripe))
                    })?;
                if self.stripes.available[stripe] < self.k {
                    self.unavailable_count += 1;
                    self.start_unavailable(stripe, time);
                }
            }
        }
        self.sample_available(time);
        Ok(())
    }

    fn disk_failure(&mut self, id: UnitId, event: &Event, topology: &mut Topology) -> Result<()> {
        let time = event.time;
        self.totals.disk_failures += 1;
        topology.unit_mut(id).last_failure_time = time;

        let slices = topology.unit(id).metadata.slices.clone();
        if slices.is_empty() {
            warn!(disk = %topology.full_name(id), time, "failure on a disk without chunks");
            self.totals.empty_disk_failures += 1;
        }

        let mut projected = 0.0;
        for stripe in slices {
            if self.stripes.lost[stripe] || topology.unit(id).metadata.nonexistent.contains(&stripe)
            {
                continue;
            }
            self.slice_degraded(stripe);
            self.stripes.durable[stripe] =
                self.stripes.durable[stripe].checked_sub(1).ok_or_else(|| {
                    SimError::invariant(format!("stripe {} durability below zero", stripe))
                })?;
            let meta = &mut topology.unit_mut(id).metadata;
            meta.nonexistent.insert(stripe);
            if meta.defective.contains(&stripe) {
                self.stripes.latent[stripe] = false;
            }
            if meta.known_defective.contains(&stripe) {
                self.stripes.known_latent[stripe] = false;
            }

            let durable = self.stripes.durable[stripe];
            if durable < self.k {
                self.mark_lost(stripe, time, &format!("disk {}", topology.full_name(id)));
                continue;
            }
            if durable == self.k && self.stripes.latent[stripe] {
                self.mark_lost(
                    stripe,
                    time,
                    &format!("latent defect and disk {}", topology.full_name(id)),
                );
                continue;
            }

            let (crossed, missing) = self.threshold_crossed(stripe, self.recovery_threshold);
            if crossed {
                projected += self.reconstruction_bandwidth(missing)?;
            }
        }

        let duration = event
            .next_recovery_time
            .map_or(0.0, |next| next - time);
        let need = if duration > 0.0 { projected / duration } else { 0.0 };
        topology.unit_mut(id).last_bandwidth_need = need;
        self.reserve_bandwidth(need);
        topology.unit_mut(id).metadata.clear_defects();

        self.sample_durable(time);
        self.sample_available(time);
        Ok(())
    }

    fn handle_recovery(&mut self, id: UnitId, event: &Event, topology: &mut Topology) -> Result<()> {
        let kind = &topology.unit(id).kind;
        if kind.is_machine() {
            self.machine_recovery(id, event, topology)
        } else if kind.is_disk() {
            self.disk_recovery(id, event.time, topology)
        } else {
            for child in topology.unit(id).children.clone() {
                self.handle_recovery(child, event, topology)?;
            }
            Ok(())
        }
    }

    fn machine_recovery(&mut self, id: UnitId, event: &Event, topology: &Topology) -> Result<()> {
        let time = event.time;
        let was_down = self.down_machines.remove(&id);
        if event.cause == FailureCause::Inherited && !was_down {
            // its own recovery already restored it
            debug!(machine = %topology.full_name(id), time, "rack recovery of a machine that is up");
            return Ok(());
        }
        self.totals.machine_repairs += 1;
        // permanent failures recover durability through disk events
        if event.cause == FailureCause::Permanent {
            return Ok(());
        }

        for disk in topology.child_disks(id) {
            for &stripe in &topology.unit(disk).metadata.slices {
                if self.stripes.lost[stripe] {
                    continue;
                }
                if self.stripes.available[stripe] < self.n {
                    let was_unavailable = self.is_unavailable(stripe);
                    self.stripes.available[stripe] += 1;
                    self.close_if_available(stripe, was_unavailable, time);
                    self.slice_recovered_availability(stripe);
                } else if event.cause == FailureCause::ShortTransient {
                    self.anomalous_available_count += 1;
                }
            }
        }
        self.sample_available(time);
        Ok(())
    }

    fn disk_recovery(&mut self, id: UnitId, time: f64, topology: &mut Topology) -> Result<()> {
        self.totals.disk_repairs += 1;
        let need = topology.unit(id).last_bandwidth_need;
        self.release_bandwidth(need)?;
        topology.unit_mut(id).last_bandwidth_need = 0.0;

        let lazy_window = (self.current_slice_degraded as f64)
            < self.recovery.max_degraded_slices * self.stripes.len() as f64;
        let threshold = if self.recovery.lazy_recovery && lazy_window {
            self.recovery_threshold
        } else {
            self.n - 1
        };

        let mut transfer = 0.0;
        for stripe in topology.unit(id).metadata.slices.clone() {
            if self.stripes.lost[stripe] {
                continue;
            }
            let (crossed, _) = self.threshold_crossed(stripe, threshold);
            if !crossed {
                continue;
            }
            let was_unavailable = self.is_unavailable(stripe);
            if self.recovery.lazy_recovery {
                let recovered = self.slice_recovery(stripe, true, topology)?;
                if recovered > 0 {
                    transfer += self.reconstruction_bandwidth(recovered)?;
                }
            } else if topology.unit_mut(id).metadata.nonexistent.remove(&stripe) {
                self.stripes.durable[stripe] += 1;
                transfer += self.reconstruction_bandwidth(1)?;
            }
            self.close_if_available(stripe, was_unavailable, time);
            self.slice_recovered(stripe);
        }

        self.sample_durable(time);
        self.sample_available(time);
        let started = topology.unit(id).last_failure_time;
        self.timeline.add(Recovery::new(started, time, transfer));
        Ok(())
    }

    fn handle_latent_defect(
        &mut self,
        id: UnitId,
        time: f64,
        topology: &mut Topology,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let name = topology.full_name(id);
        let unit = topology.unit_mut(id);
        if !unit.kind.is_disk() {
            return Err(SimError::invariant(format!("latent defect on non-disk {}", name)));
        }
        let meta = &mut unit.metadata;
        if meta.slices.is_empty() {
            return Ok(());
        }

        let slot = ctx.rng.gen_range(0..meta.capacity().max(1));
        let Some(&stripe) = meta.slices.get(slot) else {
            self.totals.skipped_latent += 1;
            return Ok(());
        };
        if self.stripes.lost[stripe]
            || meta.nonexistent.contains(&stripe)
            || self.stripes.latent[stripe]
        {
            self.totals.skipped_latent += 1;
            return Ok(());
        }

        self.slice_degraded(stripe);
        self.stripes.latent[stripe] = true;
        self.totals.latent_failures += 1;
        meta.defective.insert(stripe);

        if self.stripes.durable[stripe] == self.k {
            meta.defective.remove(&stripe);
            self.mark_lost(stripe, time, &format!("latent defect on disk {}", name));
        }

        self.sample_durable(time);
        self.sample_available(time);
        Ok(())
    }

    fn handle_latent_recovered(&mut self, id: UnitId, time: f64, topology: &mut Topology) -> Result<()> {
        let unit = topology.unit_mut(id);
        if !unit.kind.is_disk() {
            return Err(SimError::invariant("latent recovery on a non-disk unit"));
        }
        self.totals.scrubs += 1;
        if unit.metadata.defective.is_empty() {
            return Ok(());
        }
        unit.metadata.confirm_defects();
        for &stripe in &unit.metadata.known_defective {
            self.stripes.known_latent[stripe] = true;
        }
        self.repair_known_defects(id, time, topology)
    }

    fn handle_scrub_start(&mut self, id: UnitId, time: f64, topology: &mut Topology) -> Result<()> {
        let unit = topology.unit_mut(id);
        let Some(settings) = unit.disk_settings_mut() else {
            return Err(SimError::invariant("scrub start on a non-disk unit"));
        };
        settings.last_scrub_start = time;
        self.totals.scrubs += 1;
        unit.metadata.confirm_defects();
        for &stripe in &unit.metadata.known_defective {
            if !self.stripes.lost[stripe] {
                self.stripes.known_latent[stripe] = true;
            }
        }
        Ok(())
    }

    fn handle_scrub_complete(&mut self, id: UnitId, time: f64, topology: &mut Topology) -> Result<()> {
        let unit = topology.unit(id);
        if !unit.kind.is_disk() {
            return Err(SimError::invariant("scrub completion on a non-disk unit"));
        }
        if unit.metadata.known_defective.is_empty() {
            return Ok(());
        }
        self.repair_known_defects(id, time, topology)
    }

    /// Rebuild every known-defective chunk of a disk
    fn repair_known_defects(&mut self, id: UnitId, time: f64, topology: &mut Topology) -> Result<()> {
        let known: Vec<usize> = topology.unit(id).metadata.known_defective.iter().copied().collect();
        let mut transfer = 0.0;
        for stripe in known {
            if self.stripes.lost[stripe] {
                continue;
            }
            self.totals.scrub_repairs += 1;
            self.stripes.latent[stripe] = false;
            self.stripes.known_latent[stripe] = false;
            transfer += self.reconstruction_bandwidth(1)?;
            self.slice_recovered(stripe);
        }
        let unit = topology.unit_mut(id);
        unit.metadata.clear_defects();
        let started = unit.disk_settings().map_or(0.0, |s| s.last_scrub_start);

        self.sample_durable(time);
        self.sample_available(time);
        self.timeline.add(Recovery::new(started, time, transfer));
        Ok(())
    }

    /// Restore every missing or known-defective chunk of a stripe; returns
    /// the number of chunks rebuilt
    pub(super) fn slice_recovery(
        &mut self,
        stripe: usize,
        durability_triggered: bool,
        topology: &mut Topology,
    ) -> Result<usize> {
        if self.stripes.lost[stripe] {
            return Ok(0);
        }
        let mut recovered = 0;
        for disk in self.stripes.locations[stripe].clone() {
            let meta = &mut topology.unit_mut(disk).metadata;
            if meta.known_defective.remove(&stripe) {
                meta.defective.remove(&stripe);
                self.stripes.latent[stripe] = false;
                self.stripes.known_latent[stripe] = false;
                recovered += 1;
            }
            if meta.nonexistent.remove(&stripe) {
                self.stripes.durable[stripe] += 1;
                recovered += 1;
            }
        }
        if self.stripes.known_latent[stripe] || self.stripes.durable[stripe] != self.n {
            return Err(SimError::invariant(format!(
                "stripe {} still degraded after repair (durable {}, known defect {})",
                stripe, self.stripes.durable[stripe], self.stripes.known_latent[stripe]
            )));
        }

        if self.recovery.availability_counts_for_recovery
            && (!durability_triggered || !self.recovery.lazy_only_available)
        {
            recovered += self.n - self.stripes.available[stripe];
            self.stripes.available[stripe] = self.n;
        }
        Ok(recovered)
    }

    /// Whether `stripe` needs repair under `threshold`, and how many chunks
    /// the repair would rebuild
    pub(super) fn threshold_crossed(&self, stripe: usize, threshold: usize) -> (bool, usize) {
        let tolerated = self.n.saturating_sub(threshold);
        let mut undurable = self.n - self.stripes.durable[stripe];
        if self.stripes.known_latent[stripe] {
            undurable += 1;
        }
        let mut crossed = undurable >= tolerated;
        let mut unavailable = 0;
        if self.recovery.availability_counts_for_recovery {
            unavailable = self.n - self.stripes.available[stripe];
            crossed |= undurable + unavailable >= tolerated;
        }
        (crossed, undurable + unavailable)
    }

    /// MB that must be read to rebuild `missing` chunks of one stripe
    pub(super) fn reconstruction_bandwidth(&self, missing: usize) -> Result<f64> {
        if missing == 0 {
            return Ok(0.0);
        }
        if self.recovery.bandwidth_efficient_scheme && missing == 1 {
            return Ok(self.k as f64 / 2.0 * self.chunk_size);
        }
        let fallback = (self.k + missing - 1) as f64 * self.chunk_size;
        if missing >= self.n {
            return Ok(fallback);
        }
        let mut state = vec![1u8; self.n];
        for flag in state.iter_mut().skip(self.n - missing) {
            *flag = 0;
        }
        if self.scheme.is_repairable(&state)? {
            match self.scheme.parallel_repair_cost(&state)? {
                Some(cost) => Ok(cost * self.chunk_size),
                None => Ok(fallback),
            }
        } else {
            Ok(fallback)
        }
    }

    pub(super) fn reserve_bandwidth(&mut self, need: f64) {
        self.current_recovery_bandwidth += need;
        if self.current_recovery_bandwidth > self.max_recovery_bandwidth {
            self.max_recovery_bandwidth = self.current_recovery_bandwidth;
        }
        if self.current_recovery_bandwidth > self.recovery.bandwidth_cap {
            self.bandwidth_overruns += 1;
        }
    }

    pub(super) fn release_bandwidth(&mut self, need: f64) -> Result<()> {
        self.current_recovery_bandwidth = clamp_drift(
            self.current_recovery_bandwidth - need,
            "recovery bandwidth",
        )?;
        Ok(())
    }

    fn mark_lost(&mut self, stripe: usize, time: f64, cause: &str) {
        info!(
            time,
            stripe,
            durable = self.stripes.durable[stripe],
            latent = self.stripes.latent[stripe],
            cause,
            "stripe lost"
        );
        self.stripes.lost[stripe] = true;
        self.undurable_count += 1;
        self.end_unavailable(stripe, time);
    }

    fn degraded_chunks(&self, stripe: usize) -> (usize, usize) {
        let latent = usize::from(self.stripes.latent[stripe]);
        let undurable = (self.n + latent).saturating_sub(self.stripes.durable[stripe]);
        let unavailable = self.n - self.stripes.available[stripe];
        (undurable, unavailable)
    }

    fn durably_healthy(&self, stripe: usize) -> bool {
        self.stripes.durable[stripe] == self.n && !self.stripes.latent[stripe]
    }

    pub(super) fn slice_degraded(&mut self, stripe: usize) {
        if self.durably_healthy(stripe) {
            self.current_slice_degraded += 1;
        }
        self.slice_degraded_availability(stripe);
    }

    pub(super) fn slice_recovered(&mut self, stripe: usize) {
        if self.durably_healthy(stripe) {
            self.current_slice_degraded -= 1;
        }
        self.slice_recovered_availability(stripe);
    }

    pub(super) fn slice_degraded_availability(&mut self, stripe: usize) {
        // replication is not tracked for availability
        if self.k == 1 {
            return;
        }
        if self.degraded_chunks(stripe) == (0, 0) {
            self.current_avail_slice_degraded += 1;
        }
    }

    pub(super) fn slice_recovered_availability(&mut self, stripe: usize) {
        if self.k == 1 {
            return;
        }
        match self.degraded_chunks(stripe) {
            (0, 0) => self.current_avail_slice_degraded -= 1,
            (_, 0) => self.totals.incomplete_recovery_attempts += 1,
            _ => {}
        }
    }

    /// More chunks missing or unreachable than the code tolerates
    pub(super) fn is_unavailable(&self, stripe: usize) -> bool {
        let missing = (self.n - self.stripes.durable[stripe]) + (self.n - self.stripes.available[stripe]);
        missing > self.n - self.k
    }

    pub(super) fn close_if_available(&mut self, stripe: usize, was_unavailable: bool, time: f64) {
        if was_unavailable && !self.is_unavailable(stripe) {
            self.end_unavailable(stripe, time);
        }
    }

    fn start_unavailable(&mut self, stripe: usize, time: f64) {
        let windows = self.unavailable_windows.entry(stripe).or_default();
        if windows.last().map_or(true, |w| w.end.is_some()) {
            windows.push(UnavailableWindow {
                start: time,
                end: None,
            });
        }
    }

    /// Close the open window of `stripe`; a lost stripe stays unavailable
    /// until the end of the run
    fn end_unavailable(&mut self, stripe: usize, time: f64) {
        let end_time = self.end_time;
        let lost = self.stripes.lost[stripe];
        let windows = self.unavailable_windows.entry(stripe).or_default();
        match windows.last_mut() {
            Some(window) if window.end.is_none() => {
                window.end = Some(if lost { end_time } else { time });
            }
            _ if lost => windows.push(UnavailableWindow {
                start: time,
                end: Some(end_time),
            }),
            _ => {}
        }
    }

    pub(super) fn sample_durable(&mut self, time: f64) {
        self.durable_degraded
            .push((time, self.current_slice_degraded as f64));
    }

    pub(super) fn sample_available(&mut self, time: f64) {
        self.available_degraded
            .push((time, self.current_avail_slice_degraded as f64));
    }

    /// Every unavailability window, open ones closed at the end of the run
    pub fn unavailable_windows(&self) -> impl Iterator<Item = (usize, f64, f64)> + '_ {
        self.unavailable_windows.iter().flat_map(move |(&stripe, windows)| {
            windows
                .iter()
                .map(move |w| (stripe, w.start, w.end.unwrap_or(self.end_time)))
        })
    }

    /// Reduce the run's raw statistics into a report
    pub fn finish(&self, tier: usize, iteration: usize) -> Result<SimulationReport> {
        let unavailable_hours = self
            .unavailable_windows()
            .map(|(_, start, end)| (end - start).max(0.0))
            .sum();
        let bandwidth_curve = self.timeline.sweep()?;

        Ok(SimulationReport {
            tier,
            iteration,
            scheme: self.scheme.name().to_string(),
            stripes: self.stripes.len(),
            unavailable_count: self.unavailable_count,
            undurable_count: self.undurable_count,
            anomalous_available_count: self.anomalous_available_count,
            max_recovery_bandwidth: self.max_recovery_bandwidth,
            bandwidth_overruns: self.bandwidth_overruns,
            unavailable_hours,
            totals: self.totals.clone(),
            durable_degraded: SeriesSummary::from_samples(&self.durable_degraded, self.end_time),
            available_degraded: SeriesSummary::from_samples(&self.available_degraded, self.end_time),
            bandwidth: SeriesSummary::from_samples(&bandwidth_curve, self.end_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::erasure::create_scheme;
    use crate::simulation::failure::SimRng;
    use crate::storage::{DiskSettings, MachineSettings};
    use rand::SeedableRng;
    use tracing_test::traced_test;

    /// One machine holding three disks; stripe `i` has its chunks on the
    /// three disks in order
    fn fixture(stripes: usize, config: Config) -> (DurabilityHandler, Topology, Vec<UnitId>, UnitId) {
        let mut topology = Topology::new();
        let machine = topology.add_unit(
            "machine0",
            None,
            UnitKind::Machine(MachineSettings::default()),
        );
        let disks: Vec<UnitId> = (0..3)
            .map(|d| {
                let disk = topology.add_unit(
                    format!("disk{}", d),
                    Some(machine),
                    UnitKind::Disk(DiskSettings::default()),
                );
                topology.unit_mut(disk).metadata =
                    crate::storage::Metadata::with_capacity(stripes.max(1));
                disk
            })
            .collect();

        let scheme = create_scheme(&config.redundancy).unwrap();
        let mut handler = DurabilityHandler::new(scheme, &config).unwrap();
        let mut locations = Vec::new();
        for stripe in 0..stripes {
            for &disk in &disks {
                topology.unit_mut(disk).metadata.assign(stripe);
            }
            locations.push(disks.clone());
        }
        handler.stripes = StripeTable::new(locations, handler.n);
        (handler, topology, disks, machine)
    }

    fn ctx() -> SimContext {
        SimContext::new(SimRng::seed_from_u64(5), 0.0)
    }

    #[test]
    fn test_disk_failure_and_recovery_restores_stripes() {
        let (mut handler, mut topology, disks, _) = fixture(4, Config::new("RS_3_2"));
        let mut ctx = ctx();

        let failure = Event::new(EventKind::Failure, 10.0, disks[0]).with_next_recovery(20.0);
        handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        assert!((0..4).all(|s| handler.health(s) == StripeHealth::DegradedDurable));
        // 4 stripes, one missing chunk each, k chunks read per rebuild over 10 hours
        assert!((handler.current_recovery_bandwidth() - 4.0 * 2.0 * 256.0 / 10.0).abs() < 1e-9);

        let recovered = Event::new(EventKind::Recovered, 20.0, disks[0]);
        handler.handle(&recovered, &mut topology, &mut ctx).unwrap();
        assert!((0..4).all(|s| handler.health(s) == StripeHealth::Healthy));
        assert_eq!(handler.current_recovery_bandwidth(), 0.0);
        assert_eq!(handler.undurable_count(), 0);
        assert!(topology.unit(disks[0]).metadata.nonexistent.is_empty());
    }

    #[test]
    #[traced_test]
    fn test_stripe_lost_below_k() {
        let (mut handler, mut topology, disks, _) = fixture(2, Config::new("RS_3_2"));
        let mut ctx = ctx();
        for (i, &disk) in disks.iter().take(2).enumerate() {
            let failure = Event::new(EventKind::Failure, 1.0 + i as f64, disk).with_next_recovery(50.0);
            handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        }
        assert_eq!(handler.undurable_count(), 2);
        assert!(handler.stripes().lost.iter().all(|&l| l));
        assert!(logs_contain("stripe lost"));

        // lost stripes are frozen
        let recovered = Event::new(EventKind::Recovered, 50.0, disks[0]);
        handler.handle(&recovered, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().durable, vec![1, 1]);

        let report = handler.finish(0, 0).unwrap();
        assert_eq!(report.undurable_count, 2);
        assert!(report.durability().abs() < 1e-9);
    }

    #[test]
    fn test_machine_transient_failure_availability() {
        let (mut handler, mut topology, _, machine) = fixture(3, Config::new("RS_3_2"));
        let mut ctx = ctx();

        let failure = Event::new(EventKind::Failure, 5.0, machine)
            .with_cause(FailureCause::LongTransient)
            .with_next_recovery(9.0);
        handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        // all three chunks sit behind the machine
        assert_eq!(handler.stripes().available, vec![0, 0, 0]);
        assert_eq!(handler.unavailable_count(), 3 * 2);
        assert_eq!(handler.totals().long_transient_failures, 1);

        let recovered = Event::new(EventKind::Recovered, 9.0, machine)
            .with_cause(FailureCause::LongTransient);
        handler.handle(&recovered, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().available, vec![3, 3, 3]);
        let windows: Vec<_> = handler.unavailable_windows().collect();
        assert_eq!(windows.len(), 3);
        assert!(windows.iter().all(|&(_, start, end)| start == 5.0 && end == 9.0));
    }

    #[test]
    fn test_short_transient_anomaly() {
        let (mut handler, mut topology, _, machine) = fixture(2, Config::new("RS_3_2"));
        let recovered = Event::new(EventKind::Recovered, 1.0, machine)
            .with_cause(FailureCause::ShortTransient);
        handler.handle(&recovered, &mut topology, &mut ctx()).unwrap();
        // one per chunk behind the machine
        assert_eq!(handler.anomalous_available_count, 6);
    }

    #[test]
    fn test_rack_induced_failure_schedules_eager_start() {
        let config = Config::new("RS_3_2");
        let (mut handler, mut topology, _, machine) = fixture(1, config);
        if let UnitKind::Machine(settings) = &mut topology.unit_mut(machine).kind {
            settings.eager_recovery = true;
        }
        let failure = Event::new(EventKind::Failure, 100.0, machine).with_next_recovery(110.0);
        let scheduled = handler.handle(&failure, &mut topology, &mut ctx()).unwrap();
        assert_eq!(handler.totals().rack_induced_failures, 1);
        assert_eq!(handler.totals().long_transient_failures, 1);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].kind, EventKind::EagerRecoveryStart);
        assert_eq!(scheduled[0].time, 100.25);
    }

    #[test]
    fn test_ignored_events_change_nothing() {
        let (mut handler, mut topology, disks, _) = fixture(2, Config::new("RS_3_2"));
        let failure = Event::new(EventKind::Failure, 1.0, disks[1])
            .with_next_recovery(2.0)
            .ignored(true);
        handler.handle(&failure, &mut topology, &mut ctx()).unwrap();
        assert_eq!(handler.stripes().durable, vec![3, 3]);
        assert_eq!(handler.totals().disk_failures, 0);
    }

    #[test]
    fn test_ignored_machine_failure_keeps_availability() {
        let (mut handler, mut topology, _, machine) = fixture(2, Config::new("RS_3_2"));
        let mut ctx = ctx();
        let failure = Event::new(EventKind::Failure, 1.0, machine)
            .with_next_recovery(2.0)
            .ignored(true);
        handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        let recovered = Event::new(EventKind::Recovered, 2.0, machine).ignored(true);
        handler.handle(&recovered, &mut topology, &mut ctx).unwrap();

        assert_eq!(handler.stripes().available, vec![3, 3]);
        assert_eq!(handler.totals().machine_failures, 0);
        assert_eq!(handler.unavailable_count(), 0);
    }

    #[test]
    fn test_rack_failure_of_machine_already_down() {
        let (mut handler, mut topology, _, machine) = fixture(2, Config::new("RS_3_2"));
        let mut ctx = ctx();

        let own = Event::new(EventKind::Failure, 1.0, machine)
            .with_cause(FailureCause::LongTransient)
            .with_next_recovery(5.0);
        handler.handle(&own, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().available, vec![0, 0]);

        // the rack goes down while the machine is still out
        let inherited = Event::new(EventKind::Failure, 2.0, machine).with_next_recovery(8.0);
        handler.handle(&inherited, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().available, vec![0, 0]);
        assert_eq!(handler.totals().machine_failures, 1);
        assert_eq!(handler.totals().rack_induced_failures, 0);

        let own_recovery = Event::new(EventKind::Recovered, 5.0, machine)
            .with_cause(FailureCause::LongTransient);
        handler.handle(&own_recovery, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().available, vec![3, 3]);

        let rack_recovery = Event::new(EventKind::Recovered, 8.0, machine);
        handler.handle(&rack_recovery, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.stripes().available, vec![3, 3]);
        assert_eq!(handler.totals().machine_repairs, 1);
        assert_eq!(handler.anomalous_available_count, 0);
    }

    #[test]
    fn test_latent_defect_then_disk_failure_loses_stripe() {
        let (mut handler, mut topology, disks, _) = fixture(1, Config::new("RS_3_2"));
        let mut ctx = ctx();
        // single slot disk, the draw always lands on stripe 0
        handler
            .handle(&Event::new(EventKind::LatentDefect, 1.0, disks[2]), &mut topology, &mut ctx)
            .unwrap();
        assert!(handler.stripes().latent[0]);
        assert!(topology.unit(disks[2]).metadata.defective.contains(&0));

        let failure = Event::new(EventKind::Failure, 2.0, disks[0]).with_next_recovery(3.0);
        handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        assert_eq!(handler.health(0), StripeHealth::Lost);
        assert_eq!(handler.undurable_count(), 1);
    }

    #[test]
    fn test_duplicate_latent_defect_skipped() {
        let (mut handler, mut topology, disks, _) = fixture(1, Config::new("RS_3_2"));
        let mut ctx = ctx();
        handler
            .handle(&Event::new(EventKind::LatentDefect, 1.0, disks[0]), &mut topology, &mut ctx)
            .unwrap();
        handler
            .handle(&Event::new(EventKind::LatentDefect, 2.0, disks[1]), &mut topology, &mut ctx)
            .unwrap();
        assert_eq!(handler.totals().latent_failures, 1);
        assert_eq!(handler.totals().skipped_latent, 1);
    }

    #[test]
    fn test_scrub_repairs_known_defects() {
        let (mut handler, mut topology, disks, _) = fixture(1, Config::new("RS_3_2"));
        let mut ctx = ctx();
        handler
            .handle(&Event::new(EventKind::LatentDefect, 1.0, disks[0]), &mut topology, &mut ctx)
            .unwrap();
        handler
            .handle(&Event::new(EventKind::ScrubStart, 2.0, disks[0]), &mut topology, &mut ctx)
            .unwrap();
        assert!(handler.stripes().known_latent[0]);

        handler
            .handle(&Event::new(EventKind::ScrubComplete, 4.0, disks[0]), &mut topology, &mut ctx)
            .unwrap();
        assert_eq!(handler.health(0), StripeHealth::Healthy);
        assert_eq!(handler.totals().scrub_repairs, 1);
        assert!(topology.unit(disks[0]).metadata.defective.is_empty());
        assert!(!handler.timeline.is_empty());
    }

    #[test]
    fn test_latent_recovered_repairs_without_scrub() {
        let (mut handler, mut topology, disks, _) = fixture(1, Config::new("RS_3_2"));
        let mut ctx = ctx();
        handler
            .handle(&Event::new(EventKind::LatentDefect, 1.0, disks[1]), &mut topology, &mut ctx)
            .unwrap();
        handler
            .handle(&Event::new(EventKind::LatentRecovered, 336.0, disks[1]), &mut topology, &mut ctx)
            .unwrap();
        assert!(!handler.stripes().latent[0]);
        assert_eq!(handler.totals().scrub_repairs, 1);
    }

    #[test]
    fn test_bandwidth_release_clamps_drift() {
        let (mut handler, _, _, _) = fixture(1, Config::new("RS_3_2"));
        handler.reserve_bandwidth(10.0);
        handler.release_bandwidth(10.5).unwrap();
        assert_eq!(handler.current_recovery_bandwidth(), 0.0);
        assert_eq!(handler.max_recovery_bandwidth(), 10.0);

        handler.reserve_bandwidth(1.0);
        assert!(matches!(
            handler.release_bandwidth(5.0),
            Err(SimError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_bandwidth_cap_overrun_counted() {
        let recovery = RecoveryConfig {
            bandwidth_cap: 5.0,
            ..RecoveryConfig::default()
        };
        let (mut handler, _, _, _) = fixture(1, Config::new("RS_3_2").with_recovery(recovery));
        handler.reserve_bandwidth(4.0);
        assert_eq!(handler.bandwidth_overruns, 0);
        handler.reserve_bandwidth(4.0);
        assert_eq!(handler.bandwidth_overruns, 1);
    }

    #[test]
    fn test_reconstruction_bandwidth() {
        let (handler, _, _, _) = fixture(1, Config::new("RS_9_6"));
        assert_eq!(handler.reconstruction_bandwidth(0).unwrap(), 0.0);
        // (missing + k - 1) chunks
        assert_eq!(handler.reconstruction_bandwidth(1).unwrap(), 6.0 * 256.0);
        assert_eq!(handler.reconstruction_bandwidth(2).unwrap(), 7.0 * 256.0);
        // beyond repair, full read plus the missing chunks
        assert_eq!(handler.reconstruction_bandwidth(5).unwrap(), 10.0 * 256.0);

        let recovery = RecoveryConfig {
            bandwidth_efficient_scheme: true,
            ..RecoveryConfig::default()
        };
        let (handler, _, _, _) = fixture(1, Config::new("RS_9_6").with_recovery(recovery));
        assert_eq!(handler.reconstruction_bandwidth(1).unwrap(), 3.0 * 256.0);
    }

    #[test]
    fn test_lazy_recovery_repairs_whole_stripe() {
        let recovery = RecoveryConfig {
            lazy_recovery: true,
            recovery_threshold: Some(1),
            max_degraded_slices: 1.0,
            lazy_table: crate::config::LazyRecoveryTable::new(vec![0.0], vec![0.0]),
            ..RecoveryConfig::default()
        };
        let (mut handler, mut topology, disks, _) =
            fixture(1, Config::new("RS_3_1").with_recovery(recovery));
        let mut ctx = ctx();
        for (i, &disk) in disks.iter().take(2).enumerate() {
            let failure = Event::new(EventKind::Failure, 1.0 + i as f64, disk).with_next_recovery(10.0);
            handler.handle(&failure, &mut topology, &mut ctx).unwrap();
        }
        assert_eq!(handler.stripes().durable[0], 1);

        // a single disk recovery rebuilds both missing chunks
        handler
            .handle(&Event::new(EventKind::Recovered, 10.0, disks[1]), &mut topology, &mut ctx)
            .unwrap();
        assert_eq!(handler.stripes().durable[0], 3);
        assert!(topology.unit(disks[0]).metadata.nonexistent.is_empty());
        assert_eq!(handler.health(0), StripeHealth::Healthy);
    }

    #[test]
    fn test_installment_event_on_unit_rejected() {
        let (mut handler, mut topology, disks, _) = fixture(1, Config::new("RS_3_2"));
        let event = Event::new(EventKind::EagerRecoveryInstallment, 1.0, disks[0]);
        assert!(handler.handle(&event, &mut topology, &mut ctx()).is_err());
    }
}
