//! Failure and recovery timeline generation
//!
//! Every unit with a failure generator alternates failure and recovery
//! draws; after each failure its children regenerate their own events over
//! the window since the unit's previous recovery.

use super::topology::Topology;
use super::unit::{UnitId, UnitKind};
use crate::error::SimError;
use crate::simulation::event::{Event, EventKind, FailureCause};
use crate::simulation::queue::EventQueue;
use crate::simulation::SimContext;
use crate::Result;
use rand::Rng;

/// Offset separating events that would otherwise coincide
pub const TIME_EPSILON: f64 = 1e-5;

/// Redraws allowed when a residual failure lands before the window
const MAX_REDRAWS: usize = 1000;

impl Topology {
    /// Generate every event of the tree over `[start, end]`
    pub fn generate_events(
        &mut self,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        if !(start.is_finite() && end.is_finite()) || start < 0.0 || end < start {
            return Err(SimError::config(format!(
                "invalid generation window [{}, {}]",
                start, end
            )));
        }
        for root in self.roots().to_vec() {
            self.generate_unit(root, queue, start, end, true, ctx)?;
        }
        Ok(())
    }

    fn generate_unit(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        reset: bool,
        ctx: &mut SimContext,
    ) -> Result<()> {
        match self.unit(id).kind {
            UnitKind::Disk(_) => self.generate_disk(id, queue, start, end, ctx),
            _ if self.unit(id).failure_generator.is_none() => {
                self.generate_children(id, queue, start, end, ctx)
            }
            UnitKind::Machine(_) => self.generate_machine(id, queue, start, end, reset, ctx),
            UnitKind::DataCenter | UnitKind::Rack(_) => {
                self.generate_plain(id, queue, start, end, reset, ctx)
            }
        }
    }

    fn generate_children(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        for child in self.unit(id).children.clone() {
            self.generate_unit(child, queue, start, end, true, ctx)?;
        }
        Ok(())
    }

    /// Failure/recovery loop shared by datacenters and racks
    fn generate_plain(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        reset: bool,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let ignore = self.unit(id).kind.fast_forward();
        let mut current = start;
        let mut last_recover = start;
        loop {
            let failure = self.draw_failure(id, current, reset, ctx)?;
            if failure > end {
                return self.generate_children(id, queue, last_recover, end, ctx);
            }
            let recovery = self.draw_recovery(id, failure, ctx)?;
            queue.add(
                Event::new(EventKind::Failure, failure, id)
                    .with_next_recovery(recovery)
                    .ignored(ignore),
            );
            self.generate_children(id, queue, last_recover, failure, ctx)?;
            if recovery > end {
                return Ok(());
            }
            queue.add(Event::new(EventKind::Recovered, recovery, id).ignored(ignore));
            current = recovery;
            last_recover = recovery;
        }
    }

    fn generate_machine(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        reset: bool,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let settings = self
            .unit(id)
            .machine_settings()
            .ok_or_else(|| SimError::invariant("machine generation on a non-machine unit"))?;
        let horizon = end - TIME_EPSILON;
        let mut current = start;
        let mut last_recover = start;
        loop {
            let failure = self.draw_failure(id, current, reset, ctx)?;
            if failure > end {
                return self.generate_children(id, queue, last_recover, end, ctx);
            }
            self.generate_children(id, queue, last_recover, failure, ctx)?;

            let mut recovery = self.draw_recovery(id, failure, ctx)?;
            if recovery > horizon && horizon > failure {
                recovery = horizon;
            }

            if settings.fast_forward {
                queue.add(
                    Event::new(EventKind::Failure, failure, id)
                        .with_next_recovery(recovery)
                        .ignored(true),
                );
                queue.add(Event::new(EventKind::Recovered, recovery, id).ignored(true));
            } else {
                let cause = if ctx.rng.gen::<f64>() < ctx.fail_fraction {
                    let disk_failure = failure + TIME_EPSILON;
                    let mut latest = disk_failure;
                    for disk in self.child_disks(id) {
                        let disk_recovery = self.generate_recovery_event(
                            disk,
                            queue,
                            disk_failure,
                            horizon.max(disk_failure),
                            ctx,
                        )?;
                        latest = latest.max(disk_recovery);
                    }
                    recovery = latest + TIME_EPSILON;
                    FailureCause::Permanent
                } else if recovery - failure <= settings.fail_timeout {
                    FailureCause::ShortTransient
                } else {
                    // the bumped recovery must stay before the parent's next failure at `end`
                    let eager_start = failure + settings.fail_timeout;
                    let projected = recovery.min(horizon - TIME_EPSILON);
                    if settings.eager_recovery && projected > eager_start {
                        queue.add(
                            Event::new(EventKind::EagerRecoveryStart, eager_start, id)
                                .with_next_recovery(projected),
                        );
                        recovery = projected + TIME_EPSILON;
                    }
                    FailureCause::LongTransient
                };
                queue.add(
                    Event::new(EventKind::Failure, failure, id)
                        .with_cause(cause)
                        .with_next_recovery(recovery),
                );
                queue.add(Event::new(EventKind::Recovered, recovery, id).with_cause(cause));
            }

            current = recovery;
            last_recover = recovery;
            if current >= horizon {
                return Ok(());
            }
        }
    }

    fn generate_disk(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let scrubbing = self
            .unit(id)
            .disk_settings()
            .map_or(false, |s| s.scrubbing.is_some());
        if self.unit(id).failure_generator.is_none() {
            self.generate_latent_errors(id, queue, start, end, ctx)?;
            if scrubbing {
                self.generate_scrubs(id, queue, start, end, ctx)?;
            }
            return Ok(());
        }
        if scrubbing {
            return self.generate_scrubbing_disk(id, queue, start, end, ctx);
        }

        let mut current = start;
        let mut last_recover = start;
        loop {
            let failure = self.draw_failure(id, current, true, ctx)?;
            if failure > end {
                return self.generate_latent_errors(id, queue, last_recover, end, ctx);
            }
            let recovery = self.draw_recovery(id, failure, ctx)?;
            queue.add(Event::new(EventKind::Failure, failure, id).with_next_recovery(recovery));
            self.generate_latent_errors(id, queue, last_recover, failure, ctx)?;
            queue.add(Event::new(EventKind::Recovered, recovery, id));
            if recovery > end {
                return Ok(());
            }
            current = recovery;
            last_recover = recovery;
        }
    }

    /// Scrubbing disks keep their failure process running across windows:
    /// failures are drawn from the last reconstruction and redrawn until
    /// they land inside the window.
    fn generate_scrubbing_disk(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        if start == 0.0 {
            let unit = self.unit_mut(id);
            if let Some(settings) = unit.disk_settings_mut() {
                settings.last_recovery_time = 0.0;
                if let Some(latent) = settings.latent_generator.as_mut() {
                    latent.reset(0.0);
                }
            }
        }

        loop {
            let base = self.last_recovery_time(id);
            let mut current = base.max(start);
            let mut failure = self.draw_failure(id, base, false, ctx)?;
            let mut redraws = 0;
            while failure < start {
                redraws += 1;
                failure = if redraws < MAX_REDRAWS {
                    self.draw_failure(id, base, false, ctx)?
                } else {
                    self.draw_failure(id, start, true, ctx)?
                };
            }

            if failure > end {
                self.generate_latent_errors(id, queue, current, end, ctx)?;
                return self.generate_scrubs(id, queue, current, end, ctx);
            }

            let recovery = self.disk_recovery_time(id, failure, end, ctx)?;
            queue.add(Event::new(EventKind::Failure, failure, id).with_next_recovery(recovery));
            queue.add(Event::new(EventKind::Recovered, recovery, id));

            self.generate_latent_errors(id, queue, current, failure, ctx)?;
            self.generate_scrubs(id, queue, current, failure, ctx)?;

            // latent defects and scrubs restart with the rebuilt disk
            if let Some(settings) = self.unit_mut(id).disk_settings_mut() {
                if let Some(latent) = settings.latent_generator.as_mut() {
                    latent.reset(recovery);
                }
                if let Some(scrub) = settings
                    .scrubbing
                    .as_mut()
                    .and_then(|s| s.scrub_generator.as_mut())
                {
                    scrub.reset(recovery);
                }
            }

            current = recovery;
            if current >= end {
                return Ok(());
            }
        }
    }

    /// Emit a disk Recovered event for a failure at `failure`, clamped to
    /// `end`, and return its time
    pub fn generate_recovery_event(
        &mut self,
        disk: UnitId,
        queue: &mut EventQueue,
        failure: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<f64> {
        let recovery = self.disk_recovery_time(disk, failure, end, ctx)?;
        queue.add(Event::new(EventKind::Failure, failure, disk).with_next_recovery(recovery));
        queue.add(Event::new(EventKind::Recovered, recovery, disk));
        Ok(recovery)
    }

    fn disk_recovery_time(
        &mut self,
        disk: UnitId,
        failure: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<f64> {
        if !(failure.is_finite() && end.is_finite()) || failure < 0.0 || end < 0.0 {
            return Err(SimError::generator(
                self.full_name(disk),
                format!("invalid recovery window [{}, {}]", failure, end),
            ));
        }
        let recovery = self.draw_recovery(disk, failure, ctx)?.min(end).max(failure);
        if let Some(settings) = self.unit_mut(disk).disk_settings_mut() {
            settings.last_recovery_time = recovery;
        }
        Ok(recovery)
    }

    fn last_recovery_time(&self, disk: UnitId) -> f64 {
        self.unit(disk)
            .disk_settings()
            .map_or(0.0, |s| s.last_recovery_time)
    }

    /// Latent defects in `[start, end]`; scrubbing disks also get the
    /// matching repair at the next scan boundary
    fn generate_latent_errors(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let name = self.full_name(id);
        let Some(settings) = self.unit_mut(id).disk_settings_mut() else {
            return Ok(());
        };
        let scan_period = settings.scrubbing.as_ref().map(|s| s.scan_period);
        let Some(latent) = settings.latent_generator.as_mut() else {
            return Ok(());
        };
        if scan_period.is_none() {
            latent.reset(start);
        }

        let mut current = start;
        loop {
            let t = latent.next_event(current, &mut ctx.rng);
            if t.is_nan() {
                return Err(SimError::generator(name, "NaN latent defect timestamp"));
            }
            if t.is_infinite() || t > end {
                return Ok(());
            }
            if t < current {
                return Err(SimError::generator(name, "latent defect before its window"));
            }
            current = t;
            queue.add(Event::new(EventKind::LatentDefect, t, id));
            if let Some(period) = scan_period {
                let repaired = ((t / period).ceil() * period).min(end);
                queue.add(Event::new(EventKind::LatentRecovered, repaired, id));
            }
        }
    }

    /// Scrub cycles: each completion is followed by the next scan's start
    fn generate_scrubs(
        &mut self,
        id: UnitId,
        queue: &mut EventQueue,
        start: f64,
        end: f64,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let name = self.full_name(id);
        let Some(scrub) = self
            .unit_mut(id)
            .disk_settings_mut()
            .and_then(|s| s.scrubbing.as_mut())
            .and_then(|s| s.scrub_generator.as_mut())
        else {
            return Ok(());
        };

        let mut current = start;
        loop {
            let t = scrub.next_event(current, &mut ctx.rng);
            if t.is_nan() || t < current {
                return Err(SimError::generator(name, format!("invalid scrub time {}", t)));
            }
            if t > end {
                return Ok(());
            }
            queue.add(Event::new(EventKind::ScrubComplete, t, id));
            queue.add(Event::new(EventKind::ScrubStart, t + TIME_EPSILON, id));
            current = t;
            scrub.reset(current);
        }
    }

    fn draw_failure(
        &mut self,
        id: UnitId,
        current: f64,
        reset: bool,
        ctx: &mut SimContext,
    ) -> Result<f64> {
        let name = self.full_name(id);
        let generator = self
            .unit_mut(id)
            .failure_generator
            .as_mut()
            .ok_or_else(|| SimError::generator(name.clone(), "missing failure generator"))?;
        if reset {
            generator.reset(current);
        }
        let t = generator.next_event(current, &mut ctx.rng);
        if t.is_nan() || t < 0.0 {
            return Err(SimError::generator(name, format!("invalid failure time {}", t)));
        }
        Ok(t)
    }

    fn draw_recovery(&mut self, id: UnitId, failure: f64, ctx: &mut SimContext) -> Result<f64> {
        let name = self.full_name(id);
        let generator = self
            .unit_mut(id)
            .recovery_generator
            .as_mut()
            .ok_or_else(|| SimError::generator(name.clone(), "missing recovery generator"))?;
        generator.reset(failure);
        let t = generator.next_event(failure, &mut ctx.rng);
        if !t.is_finite() {
            return Err(SimError::generator(name, format!("non-finite recovery time {}", t)));
        }
        if t <= failure {
            return Err(SimError::generator(
                name,
                format!("recovery at {} does not follow failure at {}", t, failure),
            ));
        }
        Ok(t)
    }
}
