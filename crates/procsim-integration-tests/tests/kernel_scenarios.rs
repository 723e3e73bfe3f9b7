//! End-to-end kernel scenarios compiled with the real formula language.
//!
//! Each test builds a model, compiles it through `procsim_expr`, runs a
//! replication and checks the externally visible timing and routing.

use procsim_core::compile::compile;
use procsim_core::config::RunConfig;
use procsim_core::journal::SimEvent;
use procsim_core::model::*;
use procsim_core::network::Network;
use procsim_core::replication::Replication;
use procsim_core::test_utils::*;

use procsim_expr::ExprEvaluator;

// ============================================================================
// Shared helpers
// ============================================================================

fn compile_expr(m: &ModelDescription) -> Network {
    match compile(m, &ExprEvaluator::new()) {
        Ok(net) => net,
        Err(errors) => {
            let lines: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            panic!("model `{}` failed to compile:\n{}", m.name, lines.join("\n"));
        }
    }
}

/// `count` clients, all at `first` seconds.
fn burst(client_type: &str, first: f64, count: u64, next: i64) -> NodeKind {
    NodeKind::Source(SourceDescription {
        client_type: client_type.into(),
        interarrival: TimeSpec::Constant(0.0),
        batch: 1,
        first_arrival: Some(first),
        limit: Some(count),
        next,
    })
}

fn delay_formula(formula: &str, next: i64) -> NodeKind {
    NodeKind::Delay(DelayDescription {
        time: TimeSpec::Formula {
            formula: formula.into(),
        }
        .into(),
        bucket: Default::default(),
        next,
    })
}

fn journaled() -> RunConfig {
    RunConfig {
        journal_capacity: 10_000,
        ..RunConfig::default()
    }
}

// ============================================================================
// Test 1: Seize at t=0, release at t=10, second client seizes at t=10
// ============================================================================

#[test]
fn seize_release_handoff() {
    let mut m = model("handoff", &["c"]);
    m.resources.push(fixed_resource("unit", 1));
    m.node(1, "Arrivals", burst("c", 0.0, 2, 2))
        .node(2, "Take", seize("unit", 1, 3))
        .node(3, "Use", delay_formula("5 + 5", 4))
        .node(4, "Give back", release("Take", 5))
        .node(5, "Exit", dispose());
    let net = compile_expr(&m);

    let mut rep = Replication::new(&net, journaled(), 0);
    while rep.step() {}

    let seized: Vec<u64> = rep
        .journal()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ResourceSeized { time, .. } => Some(*time),
            _ => None,
        })
        .collect();
    let released: Vec<u64> = rep
        .journal()
        .iter()
        .filter_map(|e| match e {
            SimEvent::ResourceReleased { time, .. } => Some(*time),
            _ => None,
        })
        .collect();
    assert_eq!(seized, vec![0, 10_000]);
    assert_eq!(released, vec![10_000, 20_000]);

    let stats = rep.statistics();
    assert_eq!(stats.end_time, 20.0);
    assert_eq!(stats.resource("unit").unwrap().in_use.max, 1.0);
}

// ============================================================================
// Test 2: Chance routing follows the weights
// ============================================================================
//
// Weights [1, 1, 2] over 100k clients: expected shares 0.25 / 0.25 / 0.5.

#[test]
fn chance_routing_matches_weights() {
    const CLIENTS: u64 = 100_000;
    let option = |next: i64, rate: &str| DecideOptionDescription {
        next,
        rate: Some(rate.into()),
        ..Default::default()
    };
    let mut m = model("chance", &["c"]);
    m.node(1, "Arrivals", burst("c", 0.0, CLIENTS, 2))
        .node(
            2,
            "Route",
            NodeKind::Decide(DecideDescription {
                mode: DecideMode::Chance,
                options: vec![option(3, "1"), option(4, "0.5 * 2"), option(5, "2")],
                key: None,
                script: None,
            }),
        )
        .node(3, "A", dispose())
        .node(4, "B", dispose())
        .node(5, "C", dispose());
    let net = compile_expr(&m);
    let stats = run_once(&net, RunConfig::default().with_seed(2024));

    assert_eq!(stats.clients_disposed, CLIENTS);
    for (name, expected) in [("A", 0.25), ("B", 0.25), ("C", 0.5)] {
        let share = stats.station(name).unwrap().arrivals as f64 / CLIENTS as f64;
        assert!(
            (share - expected).abs() < 0.01,
            "{name}: share {share}, expected {expected}"
        );
    }
}

// ============================================================================
// Test 3: Pull barrier with capacity 2
// ============================================================================
//
// Three clients at t=0 in front of a 10 s segment: two enter at once, the
// third when the first leaves the segment.

#[test]
fn pull_barrier_admits_two() {
    let mut m = model("pull", &["c"]);
    m.node(1, "Arrivals", burst("c", 0.0, 3, 2))
        .node(
            2,
            "Gate",
            NodeKind::BarrierPull(BarrierPullDescription {
                checkpoint: None,
                max_clients: 2,
                next: 3,
            }),
        )
        .node(3, "Work", delay_formula("10", 4))
        .node(4, "Exit", dispose());
    let net = compile_expr(&m);

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
    assert_eq!(stats.station("Work").unwrap().at_station.max, 2.0);
    assert_eq!(stats.end_time, 20.0);
}

// ============================================================================
// Test 4: Tank filling at 5 units/s reaches 100 at exactly t=20
// ============================================================================

#[test]
fn tank_reaches_capacity_at_twenty_seconds() {
    let mut m = model("tank", &["c"]);
    m.tanks.push(tank("Tank", 100.0, &[5.0]));
    m.node(1, "Arrivals", burst("c", 0.0, 1, 2))
        .node(
            2,
            "Fill",
            NodeKind::TankFlow(TankFlowDescription {
                source: FlowEndpointDescription::External,
                target: FlowEndpointDescription::Tank {
                    tank: "Tank".into(),
                    valve: 0,
                },
                stop: FlowStopDescription::Time { seconds: 40.0 },
                next: 3,
            }),
        )
        .node(3, "Exit", dispose());
    let net = compile_expr(&m);

    let mut rep = Replication::new(&net, RunConfig::default(), 0);
    rep.run_until(19_000);
    assert_eq!(rep.continuous().tanks()[0].value_at(19_000), 95.0);
    rep.run_until(20_000);
    assert_eq!(rep.continuous().tanks()[0].value_at(20_000), 100.0);
    rep.run_until(30_000);
    assert_eq!(rep.continuous().tanks()[0].value_at(30_000), 100.0);

    let stats = rep.run();
    assert_eq!(stats.tank("Tank").unwrap().max, 100.0);
}

// ============================================================================
// Test 5: Condition routing on client attributes
// ============================================================================

#[test]
fn condition_routing_uses_client_number() {
    let mut m = model("parity", &["c"]);
    m.node(1, "Arrivals", source("c", 1.0, Some(10), 2))
        .node(
            2,
            "Route",
            NodeKind::Decide(DecideDescription {
                mode: DecideMode::Condition,
                options: vec![
                    DecideOptionDescription {
                        next: 3,
                        condition: Some("ClientNumber % 2 = 0".into()),
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
        .node(3, "Even", dispose())
        .node(4, "Odd", dispose());
    let net = compile_expr(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.station("Even").unwrap().arrivals, 5);
    assert_eq!(stats.station("Odd").unwrap().arrivals, 5);
    assert!(stats.warnings.is_empty());
}

// ============================================================================
// Test 6: Time-based hold with periodic re-checks
// ============================================================================
//
// Clients arrive every second from t=0 to t=7; the gate opens at t=5.

#[test]
fn hold_on_time_opens_via_timed_checks() {
    let mut m = model("timed", &["c"]);
    m.node(1, "Arrivals", source("c", 1.0, Some(8), 2))
        .node(
            2,
            "Gate",
            NodeKind::Hold(HoldDescription {
                condition: "time >= 5".into(),
                client_based: false,
                priority: None,
                max_wait: None,
                timed_checks: true,
                next: 3,
            }),
        )
        .node(3, "Exit", dispose());
    let net = compile_expr(&m);
    let stats = run_once(&net, RunConfig::default());

    assert_eq!(stats.clients_disposed, 8);
    let gate = stats.station("Gate").unwrap();
    assert_eq!(gate.waiting.max, 5.0);
    assert_eq!(gate.waiting.min, 0.0);
}

// ============================================================================
// Test 7: Formula errors fall back to zero with a warning
// ============================================================================

#[test]
fn calc_error_substitutes_zero_and_warns() {
    let mut m = model("div", &["c"]);
    m.variables.push(variable("zero", 0.0));
    m.node(1, "Arrivals", source("c", 1.0, Some(3), 2))
        .node(2, "Wait", delay_formula("1 / zero", 3))
        .node(3, "Exit", dispose());
    let net = compile_expr(&m);

    let stats = run_once(&net, RunConfig::default());
    assert!(stats.shutdown.is_none());
    assert_eq!(stats.station("Wait").unwrap().residence.max, 0.0);
    assert_eq!(stats.warnings.len(), 3);
    assert!(stats.warnings[0].contains("division by zero"));

    let strict = RunConfig {
        stop_on_calc_error: true,
        ..RunConfig::default()
    };
    let stats = run_once(&net, strict);
    assert!(stats.shutdown.unwrap().contains("division by zero"));
    assert_eq!(stats.clients_disposed, 0);
}
