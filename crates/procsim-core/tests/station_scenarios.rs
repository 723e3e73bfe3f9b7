//! Station scenarios: pick-up carriers, transport, matching, analog values,
//! cascade limits and priority rules, each run as a whole replication.

use std::collections::BTreeMap;

use procsim_core::config::RunConfig;
use procsim_core::id::TransporterTypeId;
use procsim_core::model::*;
use procsim_core::replication::Replication;
use procsim_core::test_utils::*;

fn source_at(client_type: &str, first: f64, every: f64, count: u64, next: i64) -> NodeKind {
    NodeKind::Source(SourceDescription {
        client_type: client_type.into(),
        interarrival: TimeSpec::Constant(every),
        batch: 1,
        first_arrival: Some(first),
        limit: Some(count),
        next,
    })
}

fn pick_up(queue: &str, next: i64) -> NodeKind {
    NodeKind::PickUp(PickUpDescription {
        queue: queue.into(),
        count: 1,
        next,
    })
}

fn by_type(pairs: &[(&str, &str)]) -> TypedFormulaSpec {
    TypedFormulaSpec {
        default: None,
        by_type: pairs.iter().map(|&(t, f)| (t.to_string(), f.to_string())).collect(),
    }
}

fn constant(formula: &str) -> TypedFormulaSpec {
    TypedFormulaSpec {
        default: Some(formula.into()),
        by_type: BTreeMap::new(),
    }
}

// ===========================================================================
// Test 1: Carrier picks up a job whose batch wait ran out
// ===========================================================================
//
// The machine waits 1 ms for a second job, then cannot lock its server (no
// units at all). The job stays queued and a carrier arriving at 5 s must
// still be able to take it.

#[test]
fn carrier_takes_job_after_failed_batch_wait() {
    let mut m = model("pick-after-batch-wait", &["job", "carrier"]);
    m.resources.push(fixed_resource("server", 0));
    m.node(1, "Jobs", source("job", 1.0, Some(1), 2))
        .node(
            2,
            "Machine",
            NodeKind::Process(ProcessDescription {
                resources: vec![vec![ResourceUse {
                    resource: "server".into(),
                    units: 1,
                }]],
                process_time: TimeSpec::Constant(1.0).into(),
                batch_min: Some(1),
                batch_max: Some(2),
                next: 5,
                ..ProcessDescription::default()
            }),
        )
        .node(3, "Carriers", source_at("carrier", 5.0, 1.0, 1, 4))
        .node(4, "Grab", pick_up("Machine", 5))
        .node(5, "Exit", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.station("Grab").unwrap().departures, 1);
    assert_eq!(stats.station("Machine").unwrap().departures, 1);
    assert_eq!(stats.station("Machine").unwrap().waiting.max, 5.0);
    // The carrier leaves with the job on board and both leave the system.
    assert_eq!(stats.clients_disposed, 1);
    assert_eq!(stats.clients_in_system, 0);
    assert_eq!(stats.end_time, 5.0);
}

// ===========================================================================
// Test 2: Carrier picks up from a hold queue
// ===========================================================================

#[test]
fn carrier_takes_client_out_of_a_closed_hold() {
    let mut m = model("pick-from-hold", &["job", "carrier"]);
    m.variables.push(variable("open", 0.0));
    m.node(1, "Jobs", source("job", 1.0, Some(2), 2))
        .node(2, "Gate", hold("open", 5))
        .node(3, "Carriers", source_at("carrier", 5.0, 1.0, 1, 4))
        .node(4, "Grab", pick_up("Gate", 5))
        .node(5, "Exit", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    let gate = stats.station("Gate").unwrap();
    assert_eq!(gate.arrivals, 2);
    assert_eq!(gate.departures, 1);
    assert_eq!(gate.waiting.max, 5.0);
    assert_eq!(stats.station("Grab").unwrap().departures, 1);
    // The second job is still held.
    assert_eq!(stats.clients_in_system, 1);
}

// ===========================================================================
// Test 3: Transport round trip
// ===========================================================================
//
// One cart with room for two parks at the dock. Load and unload take 1 s,
// the trip 5 s each way. The first crate is delivered at 7 s; the cart
// comes back empty and brings the other two at 7 + 12 = 19 s.

#[test]
fn cart_delivers_and_returns_for_the_rest() {
    let mut m = model("transport", &["crate"]);
    m.transporters.push(TransporterDescription {
        name: "cart".into(),
        capacity: 2,
        homes: vec![("Dock".into(), 1)],
        travel_times: vec![TravelTime {
            from: "Dock".into(),
            to: "Yard".into(),
            seconds: 5.0,
        }],
        default_travel_time: 0.0,
        load_time: 1.0,
        unload_time: 1.0,
    });
    m.node(1, "Arrivals", source("crate", 0.0, Some(3), 2))
        .node(
            2,
            "Dock",
            NodeKind::TransportSource(TransportSourceDescription {
                transporter: "cart".into(),
                destination: Some("Yard".into()),
                destination_by_type: BTreeMap::new(),
                priority: TypedFormulaSpec::default(),
            }),
        )
        .node(3, "Yard", NodeKind::TransportDestination { next: 4 })
        .node(4, "Exit", dispose());
    let net = build(&m);

    let mut rep = Replication::new(&net, RunConfig::default(), 0);
    while rep.step() {}
    let yard = net.find("Yard").unwrap();
    let cart = rep.transporters().vehicle(TransporterTypeId(0), 0).unwrap();
    assert_eq!(cart.location, yard);
    assert!(!cart.busy);

    let stats = rep.statistics();
    assert_eq!(stats.end_time, 19.0);
    assert_eq!(stats.clients_disposed, 3);
    assert_eq!(stats.station("Dock").unwrap().departures, 3);
    assert_eq!(stats.station("Yard").unwrap().arrivals, 3);

    let crates = stats.client_type("crate").unwrap();
    assert_eq!(crates.transfer.min, 7.0);
    assert_eq!(crates.transfer.max, 12.0);
    assert_eq!(crates.waiting.max, 7.0);
    assert_eq!(crates.residence.max, 19.0);
}

// ===========================================================================
// Test 4: Match pairs one client from every incoming edge
// ===========================================================================
//
// Parts arrive at 0, 1, 2 and 3 s, frames at 0 and 2 s. Each frame takes
// the oldest waiting part; two parts are left over.

#[test]
fn match_pairs_parts_with_frames() {
    let mut m = model("assembly", &["part", "frame", "unit"]);
    m.node(1, "Parts", source("part", 1.0, Some(4), 3))
        .node(2, "Frames", source("frame", 2.0, Some(2), 3))
        .node(
            3,
            "Assemble",
            NodeKind::Match(MatchDescription {
                mode: BatchMode::Permanent,
                property: MatchProperty::None,
                new_client_type: Some("unit".into()),
                transfer_times: TransferMode::Max,
                transfer_numbers: TransferMode::Off,
                next: 4,
            }),
        )
        .node(4, "Exit", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.station("Exit").unwrap().arrivals, 2);
    assert_eq!(stats.clients_disposed, 2);
    let units = stats.client_type("unit").unwrap();
    assert_eq!(units.disposed, 2);
    // The second unit carries the 1 s wait of the part from 1 s.
    assert_eq!(units.waiting.max, 1.0);
    assert_eq!(stats.client_type("part").unwrap().disposed, 0);
    assert_eq!(stats.clients_in_system, 2);
    assert!(stats.warnings.is_empty());
}

// ===========================================================================
// Test 5: Analog assign sets rates and values
// ===========================================================================

#[test]
fn analog_assign_sets_rate_then_value() {
    let mut m = model("analog", &["job"]);
    m.analogs.push(AnalogDescription {
        name: "Level".into(),
        initial: 0.0,
        rate: 0.0,
        min: None,
        max: None,
    });
    m.node(1, "Arrivals", source("job", 1.0, Some(1), 2))
        .node(
            2,
            "Ramp",
            NodeKind::AnalogAssign(AnalogAssignDescription {
                analog: "Level".into(),
                mode: AnalogAssignMode::Rate,
                formula: "2".into(),
                next: 3,
            }),
        )
        .node(3, "Soak", delay(10.0, 4))
        .node(
            4,
            "Reset",
            NodeKind::AnalogAssign(AnalogAssignDescription {
                analog: "Level".into(),
                mode: AnalogAssignMode::Value,
                formula: "5".into(),
                next: 5,
            }),
        )
        .node(5, "Exit", dispose());
    let net = build(&m);

    let mut rep = Replication::new(&net, RunConfig::default(), 0);
    rep.run_until(5_000);
    assert_eq!(rep.continuous().analogs()[0].value_at(5_000), 10.0);

    while rep.step() {}
    let level = &rep.continuous().analogs()[0];
    assert_eq!(level.value(), 5.0);
    assert_eq!(level.rate(), 2.0);
    assert_eq!(level.value_at(12_000), 9.0);

    let stats = rep.statistics();
    assert_eq!(stats.end_time, 10.0);
    let summary = &stats.analogs[0];
    assert_eq!(summary.name, "Level");
    assert_eq!(summary.final_value, 5.0);
    assert_eq!(summary.min, 0.0);
    assert_eq!(summary.max, 20.0);
    assert!((summary.mean - 10.0).abs() < 1e-9);
}

// ===========================================================================
// Test 6: Cascade bound defers the rest of the work by 1 ms
// ===========================================================================
//
// Three jobs wait at a gate that opens at 5 s. A hold releases one client
// per re-check, so with one re-check per round the cascade is cut short
// twice: after the unlock and after the key leaves. Each cut-off is logged
// and a retry is queued 1 ms later. Later moves at 5 s re-run the cascade,
// so every job still leaves at 5 s.

fn gate_opened_at_five() -> ModelDescription {
    let mut m = model("cascade", &["job", "key"]);
    m.variables.push(variable("open", 0.0));
    m.node(1, "Jobs", source("job", 0.0, Some(3), 2))
        .node(2, "Gate", hold("open", 5))
        .node(3, "Keys", source_at("key", 5.0, 1.0, 1, 4))
        .node(4, "Unlock", assign_variable("open", "1", 5))
        .node(5, "Exit", dispose());
    m
}

#[test]
fn cascade_bound_retries_one_millisecond_later() {
    let net = build(&gate_opened_at_five());
    let config = RunConfig {
        max_cascade_rounds: 1,
        ..RunConfig::default()
    };
    let stats = run_once(&net, config);

    assert_eq!(stats.clients_disposed, 4);
    assert_eq!(stats.warnings.len(), 2);
    assert!(stats.warnings.iter().all(|w| w.contains("retrying in 1 ms")));
    assert_eq!(stats.client_type("job").unwrap().residence.max, 5.0);
    // The queued retries are the last events.
    assert_eq!(stats.end_time, 5.001);
}

#[test]
fn default_cascade_bound_settles_at_once() {
    let stats = run_once(&build(&gate_opened_at_five()), RunConfig::default());
    assert_eq!(stats.clients_disposed, 4);
    assert_eq!(stats.end_time, 5.0);
    assert!(stats.warnings.is_empty());
}

// ===========================================================================
// Test 7: Priority formulas beat arrival order
// ===========================================================================
//
// Within one station: a regular is served from 0 to 10 s, another regular
// queues at 1 s and a vip at 2 s. The vip goes next.

#[test]
fn process_serves_higher_priority_first() {
    let mut m = model("priority-desk", &["regular", "vip"]);
    m.resources.push(fixed_resource("clerk", 1));
    m.node(1, "Regulars", source("regular", 1.0, Some(2), 3))
        .node(2, "Vips", source_at("vip", 2.0, 1.0, 1, 3))
        .node(
            3,
            "Desk",
            NodeKind::Process(ProcessDescription {
                resources: vec![vec![ResourceUse {
                    resource: "clerk".into(),
                    units: 1,
                }]],
                process_time: TimeSpec::Constant(10.0).into(),
                priority: by_type(&[("regular", "1"), ("vip", "10")]),
                next: 4,
                ..ProcessDescription::default()
            }),
        )
        .node(4, "Exit", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.end_time, 30.0);
    assert_eq!(stats.client_type("vip").unwrap().waiting.max, 8.0);
    assert_eq!(stats.client_type("regular").unwrap().waiting.max, 19.0);
}

// Across stations: two seize stations wait for the same crane. The later
// client at the higher-priority station gets it first.

#[test]
fn released_units_go_to_the_higher_priority_station() {
    let mut m = model("priority-crane", &["a", "b"]);
    m.resources.push(fixed_resource("crane", 1));
    let seize_with = |priority: &str, next: i64| {
        NodeKind::Seize(SeizeDescription {
            resources: vec![ResourceUse {
                resource: "crane".into(),
                units: 1,
            }],
            priority: constant(priority),
            next,
        })
    };
    m.node(1, "SourceA", source("a", 1.0, Some(2), 2))
        .node(2, "SeizeA", seize_with("1", 3))
        .node(3, "WorkA", delay(10.0, 4))
        .node(4, "ReleaseA", release("SeizeA", 9))
        .node(5, "SourceB", source_at("b", 2.0, 1.0, 1, 6))
        .node(6, "SeizeB", seize_with("5", 7))
        .node(7, "WorkB", delay(10.0, 8))
        .node(8, "ReleaseB", release("SeizeB", 9))
        .node(9, "Exit", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.clients_disposed, 3);
    assert_eq!(stats.end_time, 30.0);
    assert_eq!(stats.client_type("b").unwrap().waiting.max, 8.0);
    assert_eq!(stats.client_type("a").unwrap().waiting.max, 19.0);
}

// ===========================================================================
// Test 8: Served clients do not keep their patience deadline alive
// ===========================================================================

#[test]
fn served_client_patience_does_not_extend_the_run() {
    let mut m = model("patience", &["job"]);
    m.resources.push(fixed_resource("server", 1));
    m.node(1, "Arrivals", source("job", 1.0, Some(1), 2))
        .node(
            2,
            "Machine",
            NodeKind::Process(ProcessDescription {
                resources: vec![vec![ResourceUse {
                    resource: "server".into(),
                    units: 1,
                }]],
                process_time: TimeSpec::Constant(2.0).into(),
                cancel_after: Some(TimeSpec::Constant(100.0).into()),
                next: 3,
                cancel_next: Some(4),
                ..ProcessDescription::default()
            }),
        )
        .node(3, "Exit", dispose())
        .node(4, "GaveUp", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.end_time, 2.0);
    assert_eq!(stats.station("Exit").unwrap().arrivals, 1);
    assert_eq!(stats.station("GaveUp").unwrap().arrivals, 0);
}

#[test]
fn patience_still_expires_for_clients_left_waiting() {
    let mut m = model("patience", &["job"]);
    m.resources.push(fixed_resource("server", 1));
    m.node(1, "Arrivals", source("job", 0.0, Some(2), 2))
        .node(
            2,
            "Machine",
            NodeKind::Process(ProcessDescription {
                resources: vec![vec![ResourceUse {
                    resource: "server".into(),
                    units: 1,
                }]],
                process_time: TimeSpec::Constant(10.0).into(),
                cancel_after: Some(TimeSpec::Constant(5.0).into()),
                next: 3,
                cancel_next: Some(4),
                ..ProcessDescription::default()
            }),
        )
        .node(3, "Exit", dispose())
        .node(4, "GaveUp", dispose());
    let stats = run_once(&build(&m), RunConfig::default());

    assert_eq!(stats.end_time, 10.0);
    assert_eq!(stats.station("Exit").unwrap().arrivals, 1);
    assert_eq!(stats.station("GaveUp").unwrap().arrivals, 1);
}
