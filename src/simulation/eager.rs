//! Eager recovery
//!
//! Once a machine outage outlasts the fail timeout, the spare reconstruction
//! bandwidth is spent rebuilding its chunks elsewhere. The work is paced in
//! installments of roughly `installment_size` chunks, each scheduled at its
//! projected completion time.

use super::event::Event;
use super::handler::{DurabilityHandler, Installment};
use super::stats::Recovery;
use super::SimContext;
use crate::error::SimError;
use crate::storage::{Topology, UnitId};
use crate::Result;
use rand::Rng;
use tracing::debug;

impl DurabilityHandler {
    /// Threshold for a stripe whose machine failed `elapsed` hours ago.
    ///
    /// With the table's probability at that age the threshold relaxes all
    /// the way to `n - 1`.
    pub(super) fn lazy_threshold(&self, elapsed: f64, ctx: &mut SimContext) -> usize {
        let table = &self.recovery.lazy_table;
        if table.is_empty() {
            return self.recovery_threshold;
        }
        let gap = (self.n - 1).saturating_sub(self.recovery_threshold);
        let p = table.probability_at(elapsed);
        if ctx.rng.gen::<f64>() < p {
            self.recovery_threshold + gap
        } else {
            self.recovery_threshold
        }
    }

    pub(super) fn handle_eager_start(
        &mut self,
        id: UnitId,
        event: &Event,
        topology: &mut Topology,
        ctx: &mut SimContext,
        scheduled: &mut Vec<Event>,
    ) -> Result<()> {
        if !topology.unit(id).kind.is_machine() {
            return Err(SimError::invariant(format!(
                "eager recovery started on non-machine {}",
                topology.full_name(id)
            )));
        }
        let time = event.time;
        self.totals.eager_machine_repairs += 1;
        topology.unit_mut(id).last_failure_time = time;

        let next_recovery = event
            .next_recovery_time
            .ok_or_else(|| SimError::invariant("eager recovery start without a recovery time"))?;
        let duration = next_recovery - time;
        if duration <= 0.0 {
            debug!(time, next_recovery, "eager recovery window already closed");
            return Ok(());
        }

        let spare = self.recovery.bandwidth_cap - self.current_recovery_bandwidth;
        if spare <= 0.0 {
            debug!(time, spare, "no spare bandwidth for eager recovery");
            return Ok(());
        }
        let budget = (spare / self.chunk_size * duration).floor() as usize;
        if budget < 1 {
            return Ok(());
        }
        let rate = budget as f64 * self.chunk_size / duration;
        self.reserve_bandwidth(rate);
        debug!(time, budget, rate, "eager recovery started");

        let installment_size = self.recovery.installment_size.max(1);
        let mut current_size = installment_size.min(budget);
        let mut batch = Installment {
            last_failure_time: time,
            original_failure_time: time,
            ..Installment::default()
        };
        let mut last_scheduled: Option<usize> = None;
        let mut total_added = 0usize;
        let mut added = 0usize;
        let mut current_time = time;

        for disk in topology.child_disks(id) {
            for &stripe in &topology.unit(disk).metadata.slices {
                // the outage is only recognized now; full availability here
                // means a recovery raced the timeout
                if self.stripes.available[stripe] >= self.n {
                    self.anomalous_available_count += 1;
                }
                if self.stripes.lost[stripe] {
                    continue;
                }

                let expected = current_time + current_size as f64 * self.chunk_size / rate;
                let threshold = self.lazy_threshold(expected - time, ctx);
                let (crossed, _) = self.threshold_crossed(stripe, threshold);
                if !crossed {
                    continue;
                }
                let unavailable = if self.recovery.availability_counts_for_recovery {
                    self.n - self.stripes.available[stripe]
                } else {
                    0
                };
                let chunks = (self.k + unavailable).saturating_sub(1);
                batch.stripes.push(stripe);
                total_added += chunks;
                added += chunks;

                if added >= current_size.saturating_sub(self.k) {
                    current_time += added as f64 * self.chunk_size / rate;
                    let finished = std::mem::take(&mut batch);
                    let index = self.schedule_installment(finished, current_time, scheduled);
                    last_scheduled = Some(index);
                    if total_added >= budget.saturating_sub(self.k) {
                        self.installments[index].bandwidth_need = Some(rate);
                        return Ok(());
                    }
                    current_size = installment_size.min(budget.saturating_sub(total_added));
                    batch = Installment {
                        last_failure_time: current_time,
                        original_failure_time: time,
                        ..Installment::default()
                    };
                    added = 0;
                }
            }
        }

        if !batch.stripes.is_empty() {
            current_time += added as f64 * self.chunk_size / rate;
            batch.bandwidth_need = Some(rate);
            self.schedule_installment(batch, current_time, scheduled);
        } else if let Some(index) = last_scheduled {
            self.installments[index].bandwidth_need = Some(rate);
        } else {
            debug!(time, "no stripes eligible for eager recovery");
            self.release_bandwidth(rate)?;
        }
        Ok(())
    }

    fn schedule_installment(
        &mut self,
        installment: Installment,
        time: f64,
        scheduled: &mut Vec<Event>,
    ) -> usize {
        let index = self.installments.len();
        self.installments.push(installment);
        scheduled.push(Event::installment(time, index));
        index
    }

    pub(super) fn handle_installment(
        &mut self,
        index: usize,
        event: &Event,
        topology: &mut Topology,
        ctx: &mut SimContext,
    ) -> Result<()> {
        let time = event.time;
        let installment = self
            .installments
            .get(index)
            .cloned()
            .ok_or_else(|| SimError::invariant(format!("unknown installment {}", index)))?;
        if let Some(need) = installment.bandwidth_need {
            self.release_bandwidth(need)?;
        }

        let mut transfer = 0.0;
        for &stripe in &installment.stripes {
            if self.stripes.lost[stripe] {
                continue;
            }
            let threshold = self.lazy_threshold(time - installment.original_failure_time, ctx);
            let (crossed, _) = self.threshold_crossed(stripe, threshold);
            if !crossed {
                continue;
            }
            self.totals.eager_slice_repairs += 1;
            let durably_degraded = self.stripes.durable[stripe] < self.n || self.stripes.known_latent[stripe];
            let was_unavailable = self.is_unavailable(stripe);

            if self.recovery.lazy_recovery {
                let recovered = self.slice_recovery(stripe, false, topology)?;
                if self.stripes.durable[stripe] != self.n
                    || (self.recovery.availability_counts_for_recovery
                        && self.stripes.available[stripe] != self.n)
                {
                    return Err(SimError::invariant(format!(
                        "stripe {} incomplete after eager repair",
                        stripe
                    )));
                }
                transfer += self.reconstruction_bandwidth(recovered)?;
            } else if self.stripes.available[stripe] < self.n {
                self.stripes.available[stripe] += 1;
                transfer += self.reconstruction_bandwidth(1)?;
            } else {
                continue;
            }

            self.close_if_available(stripe, was_unavailable, time);
            if durably_degraded {
                self.slice_recovered(stripe);
            } else {
                self.slice_recovered_availability(stripe);
            }
        }

        self.sample_durable(time);
        self.sample_available(time);
        self.timeline
            .add(Recovery::new(installment.last_failure_time, time, transfer));
        if let Some(entry) = self.installments.get_mut(index) {
            entry.last_failure_time = time;
        }
        Ok(())
    }
}
