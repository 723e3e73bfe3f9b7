#![no_main]
use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use procsim_core::compile::compile;
use procsim_core::config::RunConfig;
use procsim_core::model::*;
use procsim_core::replication::Replication;
use procsim_core::test_utils::*;

/// One station appended to the network. Targets are indices into the
/// station list, wrapped around, so edges may point anywhere.
#[derive(Arbitrary, Debug)]
enum FuzzStation {
    Source { every: u8, limit: u8, next: u8 },
    Delay { seconds: u8, next: u8 },
    Process { seconds: u8, next: u8 },
    Seize { units: u8, next: u8 },
    Release { seize: u8, next: u8 },
    Hold { next: u8 },
    Toggle { value: bool, next: u8 },
    Dispose,
}

#[derive(Arbitrary, Debug)]
struct FuzzInput {
    stations: Vec<FuzzStation>,
    servers: u8,
    seed: u64,
}

fuzz_target!(|input: FuzzInput| {
    let count = input.stations.len().min(32);
    if count == 0 {
        return;
    }
    let target = |n: u8| i64::from(n) % count as i64 + 1;

    let mut m = model("fuzz", &["c"]);
    m.resources.push(fixed_resource("unit", u32::from(input.servers)));
    m.variables.push(variable("open", 0.0));
    for (i, station) in input.stations[..count].iter().enumerate() {
        let id = i as i64 + 1;
        let kind = match *station {
            FuzzStation::Source { every, limit, next } => source(
                "c",
                f64::from(every) / 4.0,
                Some(u64::from(limit)),
                target(next),
            ),
            FuzzStation::Delay { seconds, next } => delay(f64::from(seconds), target(next)),
            FuzzStation::Process { seconds, next } => {
                process("unit", f64::from(seconds), target(next))
            }
            FuzzStation::Seize { units, next } => seize("unit", u32::from(units), target(next)),
            FuzzStation::Release { seize, next } => {
                release(&format!("S{}", target(seize)), target(next))
            }
            FuzzStation::Hold { next } => hold("open", target(next)),
            FuzzStation::Toggle { value, next } => {
                assign_variable("open", if value { "1" } else { "0" }, target(next))
            }
            FuzzStation::Dispose => dispose(),
        };
        m.node(id, format!("S{id}"), kind);
    }

    // Compile errors are fine; a compiled network must run without panics.
    let Ok(net) = compile(&m, &LiteralEvaluator) else {
        return;
    };
    let config = RunConfig {
        max_clients_in_system: Some(1_000),
        ..RunConfig::default()
            .with_seed(input.seed)
            .with_termination_time(3_600.0)
    };
    let mut rep = Replication::new(&net, config, 0);
    let mut steps = 0;
    while steps < 100_000 && rep.step() {
        steps += 1;
    }
    let _ = rep.statistics();
});
