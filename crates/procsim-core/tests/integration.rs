//! Integration tests for the procsim kernel.
//!
//! These tests build small models, compile them with the literal evaluator
//! and run whole replications, checking timing, routing, resource handoff
//! and the statistics that come out at the end.

use procsim_core::config::RunConfig;
use procsim_core::id::ResourceId;
use procsim_core::journal::SimEvent;
use procsim_core::model::*;
use procsim_core::replication::Replication;
use procsim_core::test_utils::*;

fn source_at(client_type: &str, first: f64, count: u64, next: i64) -> NodeKind {
    NodeKind::Source(SourceDescription {
        client_type: client_type.into(),
        interarrival: TimeSpec::Constant(0.0),
        batch: 1,
        first_arrival: Some(first),
        limit: Some(count),
        next,
    })
}

fn journaled() -> RunConfig {
    RunConfig {
        journal_capacity: 10_000,
        ..RunConfig::default()
    }
}

// ===========================================================================
// Test 1: Single server queue
// ===========================================================================
//
// Arrivals at 0, 2 and 4 s, 4 s of service each. The second job waits 2 s,
// the third 4 s, and the last one leaves at 12 s.

#[test]
fn single_server_queue_times() {
    let net = build(&single_server(3, 2.0, 4.0));
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.end_time, 12.0);
    assert_eq!(stats.clients_created, 3);
    assert_eq!(stats.clients_disposed, 3);
    assert_eq!(stats.clients_in_system, 0);

    let jobs = stats.client_type("job").unwrap();
    assert_eq!(jobs.disposed, 3);
    assert!((jobs.waiting.mean - 2.0).abs() < 1e-9);
    assert!((jobs.residence.mean - 6.0).abs() < 1e-9);

    let machine = stats.station("Machine").unwrap();
    assert_eq!(machine.arrivals, 3);
    assert_eq!(machine.departures, 3);
    assert_eq!(machine.waiting.max, 4.0);

    let server = stats.resource("server").unwrap();
    assert_eq!(server.seizes, 3);
    assert_eq!(server.in_use.max, 1.0);
}

// ===========================================================================
// Test 2: Seize / release handoff
// ===========================================================================
//
// One unit, two clients at t=0. The first holds the unit for 10 s; the
// second gets it exactly when it is released.

#[test]
fn seize_release_hands_over_at_release_time() {
    let mut m = model("handoff", &["c"]);
    m.resources.push(fixed_resource("unit", 1));
    m.node(1, "Arrivals", source_at("c", 0.0, 2, 2))
        .node(2, "Take", seize("unit", 1, 3))
        .node(3, "Use", delay(10.0, 4))
        .node(4, "Give back", release("Take", 5))
        .node(5, "Exit", dispose());
    let net = build(&m);

    let mut rep = Replication::new(&net, journaled(), 0);
    while rep.step() {}

    let seized: Vec<u64> = rep
        .journal()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ResourceSeized { resource, time, .. } if *resource == ResourceId(0) => Some(*time),
            _ => None,
        })
        .collect();
    assert_eq!(seized, vec![0, 10_000]);

    let stats = rep.statistics();
    assert_eq!(stats.end_time, 20.0);
    let unit = stats.resource("unit").unwrap();
    assert_eq!(unit.seized_units, 2);
    assert_eq!(unit.released_units, 2);
    assert_eq!(stats.station("Take").unwrap().waiting.max, 10.0);
}

// ===========================================================================
// Test 3: Pull barrier admits up to the segment limit
// ===========================================================================

#[test]
fn pull_barrier_limits_segment_occupancy() {
    let mut m = model("pull", &["c"]);
    m.node(1, "Arrivals", source_at("c", 0.0, 3, 2))
        .node(
            2,
            "Gate",
            NodeKind::BarrierPull(BarrierPullDescription {
                checkpoint: None,
                max_clients: 2,
                next: 3,
            }),
        )
        .node(3, "Work", delay(10.0, 4))
        .node(4, "Exit", dispose());
    let net = build(&m);

    let mut rep = Replication::new(&net, journaled(), 0);
    while rep.step() {}

    let work = net.find("Work").unwrap();
    let entered: Vec<u64> = rep
        .journal()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ClientArrived { station, time, .. } if *station == work => Some(*time),
            _ => None,
        })
        .collect();
    assert_eq!(entered, vec![0, 0, 10_000]);

    let stats = rep.statistics();
    assert_eq!(stats.end_time, 20.0);
    assert_eq!(stats.station("Gate").unwrap().waiting.max, 10.0);
}

// ===========================================================================
// Test 4: Tank fills to capacity and stops there
// ===========================================================================

#[test]
fn tank_fill_stops_at_capacity() {
    let mut m = model("fill", &["c"]);
    m.tanks.push(tank("Tank", 100.0, &[5.0]));
    m.node(1, "Arrivals", source_at("c", 0.0, 1, 2))
        .node(
            2,
            "Fill",
            NodeKind::TankFlow(TankFlowDescription {
                source: FlowEndpointDescription::External,
                target: FlowEndpointDescription::Tank {
                    tank: "Tank".into(),
                    valve: 0,
                },
                stop: FlowStopDescription::Time { seconds: 30.0 },
                next: 3,
            }),
        )
        .node(3, "Exit", dispose());
    let net = build(&m);

    let mut rep = Replication::new(&net, RunConfig::default(), 0);
    rep.run_until(20_000);
    let level = &rep.continuous().tanks()[0];
    assert_eq!(level.value_at(20_000), 100.0);
    assert_eq!(level.rate(), 0.0);

    rep.run_until(25_000);
    assert_eq!(rep.continuous().tanks()[0].value_at(25_000), 100.0);

    while rep.step() {}
    let stats = rep.statistics();
    assert_eq!(stats.end_time, 30.0);
    let summary = stats.tank("Tank").unwrap();
    assert_eq!(summary.final_value, 100.0);
    assert_eq!(summary.max, 100.0);
}

// ===========================================================================
// Test 5: Hold opens when a variable changes
// ===========================================================================

#[test]
fn hold_releases_everyone_when_condition_turns_true() {
    let mut m = model("hold", &["c", "key"]);
    m.variables.push(variable("open", 0.0));
    m.node(1, "Arrivals", source_at("c", 0.0, 3, 2))
        .node(2, "Gate", hold("open", 3))
        .node(3, "Exit", dispose())
        .node(4, "Key", source_at("key", 5.0, 1, 5))
        .node(5, "Unlock", assign_variable("open", "1", 3));
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    let gate = stats.station("Gate").unwrap();
    assert_eq!(gate.departures, 3);
    assert_eq!(gate.waiting.mean, 5.0);
    assert_eq!(stats.client_type("c").unwrap().disposed, 3);
    assert_eq!(stats.variables[0].value, 1.0);
}

// ===========================================================================
// Test 6: Signal barrier driven by an assign station
// ===========================================================================

#[test]
fn signal_barrier_opens_on_signal() {
    let mut m = model("signal", &["c", "key"]);
    m.signals.push("go".into());
    m.node(1, "Arrivals", source_at("c", 0.0, 3, 2))
        .node(
            2,
            "Wait",
            NodeKind::SignalBarrier(SignalBarrierDescription {
                signal: "go".into(),
                release_count: None,
                initial_passes: 0,
                next: 3,
            }),
        )
        .node(3, "Exit", dispose())
        .node(4, "Trigger", source_at("key", 7.0, 1, 5))
        .node(
            5,
            "Fire",
            NodeKind::Assign(AssignDescription {
                actions: vec![AssignActionDescription::Signal { signal: "go".into() }],
                next: 3,
            }),
        );
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.signals_fired, vec![1]);
    let wait = stats.station("Wait").unwrap();
    assert_eq!(wait.departures, 3);
    assert_eq!(wait.waiting.mean, 7.0);
}

// ===========================================================================
// Test 7: Sensor fires a signal when a tank crosses its threshold
// ===========================================================================

#[test]
fn sensor_crossing_releases_barrier() {
    let mut m = model("sensor", &["c"]);
    m.signals.push("half".into());
    m.tanks.push(tank("Tank", 100.0, &[5.0]));
    m.node(1, "Filler", source_at("c", 0.0, 1, 2))
        .node(
            2,
            "Fill",
            NodeKind::TankFlow(TankFlowDescription {
                source: FlowEndpointDescription::External,
                target: FlowEndpointDescription::Tank {
                    tank: "Tank".into(),
                    valve: 0,
                },
                stop: FlowStopDescription::Time { seconds: 30.0 },
                next: 3,
            }),
        )
        .node(3, "Exit", dispose())
        .node(4, "Waiter", source_at("c", 0.0, 1, 5))
        .node(
            5,
            "Wait",
            NodeKind::SignalBarrier(SignalBarrierDescription {
                signal: "half".into(),
                release_count: None,
                initial_passes: 0,
                next: 3,
            }),
        )
        .node(
            6,
            "Gauge",
            NodeKind::Sensor(SensorDescription {
                value: ValueRefDescription::Tank("Tank".into()),
                threshold: 50.0,
                direction: CrossingDirection::Up,
                signal: "half".into(),
            }),
        );
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.signals_fired, vec![1]);
    assert_eq!(stats.station("Wait").unwrap().waiting.max, 10.0);
}

// ===========================================================================
// Test 8: Temporary batch rides together and separates again
// ===========================================================================

#[test]
fn temporary_batch_separates_into_members() {
    let mut m = model("batch", &["c"]);
    m.node(1, "Arrivals", source_at("c", 0.0, 4, 2))
        .node(
            2,
            "Group",
            NodeKind::Batch(BatchDescription {
                mode: BatchMode::Temporary,
                min: "2".into(),
                max: "2".into(),
                new_client_type: None,
                transfer_times: TransferMode::Off,
                transfer_numbers: TransferMode::Off,
                next: 3,
            }),
        )
        .node(3, "Ride", delay(3.0, 4))
        .node(4, "Split", NodeKind::Separate { next: 5 })
        .node(5, "Exit", dispose());
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.station("Ride").unwrap().arrivals, 2);
    assert_eq!(stats.station("Exit").unwrap().arrivals, 4);
    assert_eq!(stats.client_type("c").unwrap().disposed, 4);
    assert_eq!(stats.system_residence.mean, 3.0);
    assert_eq!(stats.clients_in_system, 0);
}

// ===========================================================================
// Test 9: Permanent batch merges members
// ===========================================================================

#[test]
fn permanent_batch_merges_members() {
    let mut m = model("merge", &["part", "pack"]);
    m.node(1, "Arrivals", source_at("part", 0.0, 6, 2))
        .node(
            2,
            "Pack",
            NodeKind::Batch(BatchDescription {
                mode: BatchMode::Permanent,
                min: "3".into(),
                max: "3".into(),
                new_client_type: Some("pack".into()),
                transfer_times: TransferMode::Off,
                transfer_numbers: TransferMode::Off,
                next: 3,
            }),
        )
        .node(3, "Exit", dispose());
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.client_type("pack").unwrap().disposed, 2);
    assert_eq!(stats.client_type("part").unwrap().disposed, 0);
    assert_eq!(stats.clients_in_system, 0);
}

// ===========================================================================
// Test 10: Waiting tolerance sends impatient clients down the cancel edge
// ===========================================================================

#[test]
fn impatient_clients_take_cancel_edge() {
    let mut m = model("balk", &["c"]);
    m.resources.push(fixed_resource("server", 1));
    m.node(1, "Arrivals", source_at("c", 0.0, 2, 2))
        .node(
            2,
            "Machine",
            NodeKind::Process(ProcessDescription {
                resources: vec![vec![ResourceUse {
                    resource: "server".into(),
                    units: 1,
                }]],
                process_time: TimeSpec::Constant(100.0).into(),
                cancel_after: Some(TimeSpec::Constant(5.0).into()),
                next: 3,
                cancel_next: Some(4),
                ..ProcessDescription::default()
            }),
        )
        .node(3, "Done", dispose())
        .node(4, "Gave up", dispose());
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.station("Done").unwrap().arrivals, 1);
    let gave_up = stats.station("Gave up").unwrap();
    assert_eq!(gave_up.arrivals, 1);
    assert_eq!(stats.end_time, 100.0);
}

// ===========================================================================
// Test 11: Sequence decide alternates by multiplicity
// ===========================================================================

#[test]
fn sequence_decide_follows_multiplicities() {
    let mut m = model("seq", &["c"]);
    m.node(1, "Arrivals", source_at("c", 0.0, 9, 2))
        .node(
            2,
            "Route",
            NodeKind::Decide(DecideDescription {
                mode: DecideMode::Sequence,
                options: vec![
                    DecideOptionDescription {
                        next: 3,
                        multiplicity: Some(2),
                        ..Default::default()
                    },
                    DecideOptionDescription {
                        next: 4,
                        ..Default::default()
                    },
                ],
                key: None,
                script: None,
            }),
        )
        .node(3, "Left", dispose())
        .node(4, "Right", dispose());
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.station("Left").unwrap().arrivals, 6);
    assert_eq!(stats.station("Right").unwrap().arrivals, 3);
}

// ===========================================================================
// Test 12: Warm-up excludes early clients from dispose statistics
// ===========================================================================

#[test]
fn warm_up_excludes_early_clients() {
    let net = build(&single_server(10, 10.0, 1.0));
    let config = RunConfig {
        warm_up_time: Some(45.0),
        ..RunConfig::default()
    };
    let stats = run_once(&net, config);

    assert_eq!(stats.clients_disposed, 10);
    assert_eq!(stats.client_type("job").unwrap().disposed, 5);
    assert_eq!(stats.station("Machine").unwrap().arrivals, 5);
}

// ===========================================================================
// Test 13: Termination by time, by condition and by dispose flag
// ===========================================================================

#[test]
fn termination_time_cuts_the_run() {
    let net = build(&single_server(1000, 1.0, 0.5));
    let stats = run_once(&net, RunConfig::default().with_termination_time(50.0));
    assert_eq!(stats.end_time, 50.0);
    assert!(stats.shutdown.is_none());
    assert!(stats.clients_created <= 51);
}

#[test]
fn termination_condition_stops_the_run() {
    let mut m = model("cond", &["c"]);
    m.variables.push(variable("done", 0.0));
    m.termination_condition = Some("done".into());
    m.node(1, "Arrivals", source("c", 1.0, None, 2))
        .node(2, "Count", delay(1.0, 3))
        .node(3, "Exit", dispose())
        .node(4, "Stopper", source_at("c", 30.0, 1, 5))
        .node(5, "Set", assign_variable("done", "1", 3));
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert!(stats.terminated_by_condition);
    assert_eq!(stats.end_time, 30.0);
    assert!(stats.shutdown.is_none());
}

#[test]
fn dispose_flag_ends_replication() {
    let mut m = model("stop", &["c"]);
    m.node(1, "Arrivals", source("c", 1.0, None, 2))
        .node(2, "Exit", NodeKind::Dispose { stop_simulation: true });
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.end_time, 0.0);
    assert_eq!(stats.clients_disposed, 1);
}

// ===========================================================================
// Test 14: Duplicate and teleport routing
// ===========================================================================

#[test]
fn duplicate_creates_copies_at_destination() {
    let mut m = model("dup", &["c"]);
    m.node(1, "Arrivals", source_at("c", 0.0, 2, 2))
        .node(
            2,
            "Copy",
            NodeKind::Duplicate(DuplicateDescription {
                destinations: vec!["Jump".into()],
                copies: 3,
            }),
        )
        .node(3, "Jump", NodeKind::Teleport { destination: "Exit".into() })
        .node(4, "Exit", dispose());
    let net = build(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.clients_created, 6);
    assert_eq!(stats.station("Exit").unwrap().arrivals, 6);
    assert_eq!(stats.clients_in_system, 0);
}

// ===========================================================================
// Test 15: Same seed, same results
// ===========================================================================

#[test]
fn replications_are_reproducible() {
    let mut m = single_server(200, 1.0, 0.8);
    if let NodeKind::Source(s) = &mut m.nodes[0].kind {
        s.interarrival = TimeSpec::Distribution(procsim_core::distribution::Distribution::Exponential { mean: 1.0 });
    }
    let net = build(&m);
    let a = run_once(&net, RunConfig::default().with_seed(7));
    let b = run_once(&net, RunConfig::default().with_seed(7));
    let c = run_once(&net, RunConfig::default().with_seed(8));
    assert_eq!(a, b);
    assert_ne!(a.end_time, c.end_time);
}
