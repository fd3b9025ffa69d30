//! End-to-end runs through the public library API

use erasure_sim::simulation::event::{Event, EventKind, FailureCause};
use erasure_sim::simulation::failure::{GeneratorSpec, SimRng};
use erasure_sim::simulation::handler::{DurabilityHandler, StripeHealth};
use erasure_sim::{create_scheme, Config, HardwareConfig, SimContext, Simulator, Topology};
use rand::SeedableRng;

fn small_config() -> Config {
    Config::new("RS_3_2")
        .with_layout(1, 1, 2, 2)
        .with_stripes(10)
        .with_chunks_per_disk(10)
        .with_seed(7)
}

#[test]
fn disk_outage_is_repaired_without_loss() {
    let config = small_config();
    let mut topology = Topology::from_config(&config).unwrap();
    let mut ctx = SimContext::new(SimRng::seed_from_u64(7), 0.0);
    let scheme = create_scheme(&config.redundancy).unwrap();
    let mut handler = DurabilityHandler::new(scheme, &config).unwrap();
    handler.start(&mut topology, 10, &mut ctx).unwrap();
    assert_eq!(handler.stripes().len(), 10);

    let disk = topology.disks()[0];
    let on_disk = topology.unit(disk).metadata.slices.clone();

    let failure = Event::new(EventKind::Failure, 100.0, disk).with_next_recovery(124.0);
    let follow_ups = handler.handle(&failure, &mut topology, &mut ctx).unwrap();
    assert!(follow_ups.is_empty());
    for &stripe in &on_disk {
        assert_eq!(handler.health(stripe), StripeHealth::DegradedDurable);
    }

    let recovered = Event::new(EventKind::Recovered, 124.0, disk);
    handler.handle(&recovered, &mut topology, &mut ctx).unwrap();
    assert!((0..10).all(|s| handler.health(s) == StripeHealth::Healthy));
    assert_eq!(handler.undurable_count(), 0);

    let report = handler.finish(0, 0).unwrap();
    assert_eq!(report.totals.disk_failures, 1);
    assert_eq!(report.totals.disk_repairs, 1);
    assert_eq!(report.durability(), 100.0);
}

#[test]
fn rack_outage_during_machine_outage_counts_chunks_once() {
    let config = small_config();
    let mut topology = Topology::from_config(&config).unwrap();
    let mut ctx = SimContext::new(SimRng::seed_from_u64(7), 0.0);
    let scheme = create_scheme(&config.redundancy).unwrap();
    let mut handler = DurabilityHandler::new(scheme, &config).unwrap();
    handler.start(&mut topology, 10, &mut ctx).unwrap();

    let rack = topology.racks()[0];
    let machine = topology.machines()[0];
    let behind_machine = |stripe: usize, topology: &Topology| {
        topology
            .child_disks(machine)
            .iter()
            .filter(|&&d| topology.unit(d).metadata.slices.contains(&stripe))
            .count()
    };

    let own = Event::new(EventKind::Failure, 1.0, machine)
        .with_cause(FailureCause::LongTransient)
        .with_next_recovery(3.0);
    handler.handle(&own, &mut topology, &mut ctx).unwrap();
    let rack_failure = Event::new(EventKind::Failure, 2.0, rack).with_next_recovery(4.0);
    handler.handle(&rack_failure, &mut topology, &mut ctx).unwrap();

    // every chunk of every stripe sits in the one rack
    assert!(handler.stripes().available.iter().all(|&a| a == 0));

    let own_recovery = Event::new(EventKind::Recovered, 3.0, machine)
        .with_cause(FailureCause::LongTransient);
    handler.handle(&own_recovery, &mut topology, &mut ctx).unwrap();
    for stripe in 0..10 {
        assert_eq!(
            handler.stripes().available[stripe],
            behind_machine(stripe, &topology)
        );
    }

    let rack_recovery = Event::new(EventKind::Recovered, 4.0, rack);
    handler.handle(&rack_recovery, &mut topology, &mut ctx).unwrap();
    assert!(handler.stripes().available.iter().all(|&a| a == 3));
}

#[test]
fn simultaneous_disk_failures_lose_every_stripe() {
    let hardware = HardwareConfig {
        rack_failure: GeneratorSpec::NoFailure,
        machine_failure: GeneratorSpec::NoFailure,
        disk_failure: GeneratorSpec::Constant { interval: 1000.0 },
        ..HardwareConfig::default()
    };
    let config = small_config()
        .with_total_time(1500.0)
        .with_hardware(hardware);
    let simulator = Simulator::new(config).unwrap();
    let report = simulator.run_iteration(0, 0).unwrap().report;

    assert_eq!(report.totals.disk_failures, 4);
    assert_eq!(report.undurable_count, report.stripes);
    assert_eq!(report.durability(), 0.0);
}

#[tokio::test]
async fn campaign_reports_every_iteration() {
    let config = small_config()
        .with_total_time(24.0 * 365.0)
        .with_iterations(4);
    let simulator = Simulator::new(config).unwrap();
    let summary = simulator.run().await.unwrap();

    assert_eq!(summary.reports.len(), 4);
    assert_eq!(summary.aggregates.len(), 1);
    let aggregate = &summary.aggregates[0];
    let mean_lost = summary
        .reports
        .iter()
        .map(|r| r.undurable_count as f64)
        .sum::<f64>()
        / 4.0;
    assert!((aggregate.average_undurable - mean_lost).abs() < 1e-9);
    assert!(summary.reports.iter().all(|r| r.scheme == "RS"));
}
