//! Stripe placement
//!
//! Chunks are spread uniformly at random over the disks that still have
//! free slots. The leading chunks of every stripe go to distinct racks when
//! the topology has enough racks; all chunks of a stripe go to distinct disks.

use super::failure::SimRng;
use crate::error::SimError;
use crate::storage::{Topology, UnitId};
use crate::Result;
use rand::Rng;
use tracing::{debug, warn};

/// Attempts allowed per chunk before giving up on a stripe
const MAX_RETRIES: usize = 100;

/// Assign `stripes` stripes of width `n` to disks; returns each stripe's
/// chunk locations in chunk order
pub fn place_stripes(
    topology: &mut Topology,
    stripes: usize,
    n: usize,
    diff_racks: usize,
    rng: &mut SimRng,
) -> Result<Vec<Vec<UnitId>>> {
    let mut pool: Vec<Vec<UnitId>> = topology
        .disks_by_rack()
        .into_iter()
        .map(|disks| {
            disks
                .into_iter()
                .filter(|&d| !topology.unit(d).metadata.is_full())
                .collect::<Vec<_>>()
        })
        .collect();
    let separate_racks = pool.len() >= n;
    if !separate_racks {
        warn!(
            racks = pool.len(),
            width = n,
            "fewer racks than chunks per stripe, only spreading over disks"
        );
    }

    let mut locations = Vec::with_capacity(stripes);
    for stripe in 0..stripes {
        let mut chosen: Vec<UnitId> = Vec::with_capacity(n);
        let mut racks_left: Vec<usize> = (0..pool.len()).collect();

        for chunk in 0..n {
            let spread = separate_racks && chunk < diff_racks;
            let disk = place_chunk(topology, &mut pool, &mut racks_left, &chosen, spread, stripe, rng)?;
            chosen.push(disk);
        }
        locations.push(chosen);
    }
    debug!(stripes, width = n, "stripes placed");
    Ok(locations)
}

fn place_chunk(
    topology: &mut Topology,
    pool: &mut [Vec<UnitId>],
    racks_left: &mut Vec<usize>,
    chosen: &[UnitId],
    spread: bool,
    stripe: usize,
    rng: &mut SimRng,
) -> Result<UnitId> {
    let mut full_disks = 0;
    let mut same_disk = 0;

    for _ in 0..=MAX_RETRIES {
        let candidates: Vec<usize> = if spread {
            racks_left
                .iter()
                .copied()
                .filter(|&r| !pool[r].is_empty())
                .collect()
        } else {
            (0..pool.len()).filter(|&r| !pool[r].is_empty()).collect()
        };
        if candidates.is_empty() {
            return Err(SimError::config(format!(
                "no rack left with free disks for stripe {}",
                stripe
            )));
        }

        let rack = candidates[rng.gen_range(0..candidates.len())];
        let slot = rng.gen_range(0..pool[rack].len());
        let disk = pool[rack][slot];

        if topology.unit(disk).metadata.is_full() {
            full_disks += 1;
            pool[rack].swap_remove(slot);
            if pool[rack].is_empty() {
                warn!(rack = %topology.full_name(rack_of(topology, disk)), "rack is completely full");
            }
            continue;
        }
        if chosen.contains(&disk) {
            same_disk += 1;
            continue;
        }

        topology.unit_mut(disk).metadata.assign(stripe);
        if spread {
            racks_left.retain(|&r| r != rack);
        }
        return Ok(disk);
    }

    Err(SimError::config(format!(
        "unable to place stripe {}: picked a full disk {} times and a duplicate disk {} times",
        stripe, full_disks, same_disk
    )))
}

fn rack_of(topology: &Topology, disk: UnitId) -> UnitId {
    let mut current = disk;
    while let Some(parent) = topology.unit(current).parent {
        if topology.unit(parent).kind.is_rack() {
            return parent;
        }
        current = parent;
    }
    disk
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    fn rng() -> SimRng {
        SimRng::seed_from_u64(3)
    }

    #[test]
    fn test_chunks_on_distinct_disks() {
        let config = Config::new("RS_3_2")
            .with_layout(1, 1, 2, 2)
            .with_chunks_per_disk(10);
        let mut topology = Topology::from_config(&config).unwrap();
        let locations = place_stripes(&mut topology, 10, 3, 3, &mut rng()).unwrap();

        assert_eq!(locations.len(), 10);
        for stripe in &locations {
            let distinct: BTreeSet<_> = stripe.iter().collect();
            assert_eq!(distinct.len(), 3);
        }
        let assigned: usize = topology
            .disks()
            .iter()
            .map(|&d| topology.unit(d).metadata.slice_count())
            .sum();
        assert_eq!(assigned, 30);
    }

    #[test]
    fn test_leading_chunks_on_distinct_racks() {
        let config = Config::new("RS_3_2")
            .with_layout(1, 4, 2, 2)
            .with_chunks_per_disk(20);
        let mut topology = Topology::from_config(&config).unwrap();
        let locations = place_stripes(&mut topology, 25, 3, 3, &mut rng()).unwrap();

        for stripe in &locations {
            let racks: BTreeSet<_> = stripe.iter().map(|&d| rack_of(&topology, d)).collect();
            assert_eq!(racks.len(), 3);
        }
    }

    #[test]
    fn test_capacity_exhausted() {
        let config = Config::new("RS_3_2")
            .with_layout(1, 1, 1, 3)
            .with_chunks_per_disk(2);
        let mut topology = Topology::from_config(&config).unwrap();
        assert!(place_stripes(&mut topology, 2, 3, 3, &mut rng()).is_ok());
        let err = place_stripes(&mut topology, 1, 3, 3, &mut rng()).unwrap_err();
        assert!(matches!(err, SimError::Configuration(_)));
        for disk in topology.disks() {
            assert!(topology.unit(disk).metadata.slice_count() <= 2);
        }
    }
}
