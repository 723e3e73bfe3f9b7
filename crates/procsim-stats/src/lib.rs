//! Cross-replication statistics for procsim runs.
//!
//! Every replication of a run yields one [`ReplicationStatistics`]. This
//! crate turns a set of them into point estimates with confidence
//! intervals, and watches a single indicator for convergence while
//! replications are still coming in.
//!
//! # Usage
//!
//! ```ignore
//! let results = run_replications(&net, &config)?;
//! let report = aggregate(&results);
//! println!("{}", report.to_json()?);
//!
//! let mut monitor = ConvergenceMonitor::new(StatsConfig::default());
//! for r in &results {
//!     monitor.push(r.system_residence.mean);
//! }
//! if monitor.is_converged() { /* stop adding replications */ }
//! ```

use procsim_core::stats::ReplicationStatistics;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Two-sided confidence level of the reported intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Confidence {
    P90,
    #[default]
    P95,
    P99,
}

impl Confidence {
    pub fn level(self) -> f64 {
        match self {
            Confidence::P90 => 0.90,
            Confidence::P95 => 0.95,
            Confidence::P99 => 0.99,
        }
    }

    fn z(self) -> f64 {
        match self {
            Confidence::P90 => 1.644_853_6,
            Confidence::P95 => 1.959_964_0,
            Confidence::P99 => 2.575_829_3,
        }
    }
}

/// Configuration for aggregation and convergence checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    pub confidence: Confidence,
    /// Target half-width relative to the absolute mean.
    pub relative_precision: f64,
    /// Replications required before convergence may be declared.
    pub min_replications: u64,
    /// Consecutive replications that must meet the target.
    pub stable_window: usize,
    /// Half-widths kept by a [`ConvergenceMonitor`].
    pub history_capacity: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            confidence: Confidence::P95,
            relative_precision: 0.05,
            min_replications: 5,
            stable_window: 3,
            history_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Student t quantiles
// ---------------------------------------------------------------------------

const T90: [f64; 30] = [
    6.314, 2.920, 2.353, 2.132, 2.015, 1.943, 1.895, 1.860, 1.833, 1.812, 1.796, 1.782, 1.771,
    1.761, 1.753, 1.746, 1.740, 1.734, 1.729, 1.725, 1.721, 1.717, 1.714, 1.711, 1.708, 1.706,
    1.703, 1.701, 1.699, 1.697,
];
const T95: [f64; 30] = [
    12.706, 4.303, 3.182, 2.776, 2.571, 2.447, 2.365, 2.306, 2.262, 2.228, 2.201, 2.179, 2.160,
    2.145, 2.131, 2.120, 2.110, 2.101, 2.093, 2.086, 2.080, 2.074, 2.069, 2.064, 2.060, 2.056,
    2.052, 2.048, 2.045, 2.042,
];
const T99: [f64; 30] = [
    63.657, 9.925, 5.841, 4.604, 4.032, 3.707, 3.499, 3.355, 3.250, 3.169, 3.106, 3.055, 3.012,
    2.977, 2.947, 2.921, 2.898, 2.878, 2.861, 2.845, 2.831, 2.819, 2.807, 2.797, 2.787, 2.779,
    2.771, 2.763, 2.756, 2.750,
];

/// Two-sided Student t quantile for `df` degrees of freedom. Tabulated up
/// to 30, Cornish-Fisher expansion beyond.
pub fn t_quantile(df: u64, confidence: Confidence) -> f64 {
    let table = match confidence {
        Confidence::P90 => &T90,
        Confidence::P95 => &T95,
        Confidence::P99 => &T99,
    };
    if df == 0 {
        return f64::INFINITY;
    }
    if let Some(t) = table.get(df as usize - 1) {
        return *t;
    }
    let z = confidence.z();
    let n = df as f64;
    let z3 = z.powi(3);
    let z5 = z.powi(5);
    z + (z3 + z) / (4.0 * n) + (5.0 * z5 + 16.0 * z3 + 3.0 * z) / (96.0 * n * n)
}

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Mean of one indicator across replications with a confidence interval
/// `mean ± half_width`. With fewer than two samples the half-width is zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Estimate {
    pub mean: f64,
    pub std_dev: f64,
    pub half_width: f64,
    pub n: u64,
}

impl Estimate {
    pub fn from_samples(samples: &[f64], confidence: Confidence) -> Self {
        let mut acc = Welford::default();
        for &x in samples {
            acc.push(x);
        }
        acc.estimate(confidence)
    }

    pub fn lower(&self) -> f64 {
        self.mean - self.half_width
    }

    pub fn upper(&self) -> f64 {
        self.mean + self.half_width
    }

    /// Half-width over the absolute mean; infinite for a zero mean with a
    /// non-zero half-width.
    pub fn relative_half_width(&self) -> f64 {
        if self.half_width == 0.0 {
            0.0
        } else if self.mean == 0.0 {
            f64::INFINITY
        } else {
            self.half_width / self.mean.abs()
        }
    }
}

/// Running mean and variance.
#[derive(Debug, Clone, Copy, Default)]
struct Welford {
    n: u64,
    mean: f64,
    m2: f64,
}

impl Welford {
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    fn estimate(&self, confidence: Confidence) -> Estimate {
        if self.n < 2 {
            return Estimate {
                mean: self.mean,
                std_dev: 0.0,
                half_width: 0.0,
                n: self.n,
            };
        }
        let std_dev = (self.m2 / (self.n - 1) as f64).max(0.0).sqrt();
        Estimate {
            mean: self.mean,
            std_dev,
            half_width: t_quantile(self.n - 1, confidence) * std_dev / (self.n as f64).sqrt(),
            n: self.n,
        }
    }
}

// ---------------------------------------------------------------------------
// RingBuffer -- recent half-widths
// ---------------------------------------------------------------------------

/// A fixed-capacity ring buffer. When full, the oldest entry is
/// overwritten. Iterates oldest-to-newest.
#[derive(Debug, Clone)]
pub struct RingBuffer {
    data: Vec<f64>,
    head: usize,
    len: usize,
}

impl RingBuffer {
    /// Create a new ring buffer with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingBuffer capacity must be > 0");
        Self {
            data: vec![0.0; capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        self.data[self.head] = value;
        self.head = (self.head + 1) % self.capacity();
        if self.len < self.capacity() {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The most recently pushed value, if any.
    pub fn latest(&self) -> Option<f64> {
        if self.len == 0 {
            return None;
        }
        let idx = if self.head == 0 {
            self.capacity() - 1
        } else {
            self.head - 1
        };
        Some(self.data[idx])
    }

    /// Iterate values from oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = f64> + '_ {
        let start = if self.len < self.capacity() { 0 } else { self.head };
        (0..self.len).map(move |i| self.data[(start + i) % self.capacity()])
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.head = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// Convergence monitor
// ---------------------------------------------------------------------------

/// Watches one indicator across replications and reports when its
/// confidence interval has been tight enough for long enough.
#[derive(Debug, Clone)]
pub struct ConvergenceMonitor {
    config: StatsConfig,
    acc: Welford,
    /// Relative half-width after each replication.
    history: RingBuffer,
}

impl ConvergenceMonitor {
    pub fn new(config: StatsConfig) -> Self {
        let history = RingBuffer::new(config.history_capacity.max(1));
        Self {
            config,
            acc: Welford::default(),
            history,
        }
    }

    /// Add one replication's value and return the updated estimate.
    pub fn push(&mut self, value: f64) -> Estimate {
        self.acc.push(value);
        let estimate = self.estimate();
        if estimate.n >= 2 {
            self.history.push(estimate.relative_half_width());
        }
        estimate
    }

    pub fn estimate(&self) -> Estimate {
        self.acc.estimate(self.config.confidence)
    }

    pub fn history(&self) -> &RingBuffer {
        &self.history
    }

    /// At least `min_replications` values, and the last `stable_window`
    /// relative half-widths are all within the target precision.
    pub fn is_converged(&self) -> bool {
        let window = self.config.stable_window.max(1);
        if self.acc.n < self.config.min_replications || self.history.len() < window {
            return false;
        }
        self.history
            .iter()
            .skip(self.history.len() - window)
            .all(|h| h <= self.config.relative_precision)
    }

    pub fn reset(&mut self) {
        self.acc = Welford::default();
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// Aggregate report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationAggregate {
    pub name: String,
    pub model_id: i64,
    pub arrivals: Estimate,
    pub at_station: Estimate,
    pub in_queue: Estimate,
    pub waiting: Estimate,
    pub residence: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientTypeAggregate {
    pub name: String,
    pub disposed: Estimate,
    pub waiting: Estimate,
    pub residence: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAggregate {
    pub name: String,
    pub in_use: Estimate,
    pub utilization: Estimate,
    pub cost: Estimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueAggregate {
    pub name: String,
    pub value: Estimate,
}

/// Estimates for every indicator of a run. Per-replication values are
/// matched by name; each estimate's `n` counts the replications that
/// reported it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub replications: u64,
    pub confidence: Confidence,
    pub end_time: Estimate,
    pub clients_created: Estimate,
    pub clients_disposed: Estimate,
    pub wip: Estimate,
    pub system_residence: Estimate,
    pub stations: Vec<StationAggregate>,
    pub client_types: Vec<ClientTypeAggregate>,
    pub resources: Vec<ResourceAggregate>,
    pub tanks: Vec<ValueAggregate>,
    pub counters: Vec<ValueAggregate>,
    pub variables: Vec<ValueAggregate>,
    /// Replications that ended in an emergency shutdown.
    pub shutdowns: u64,
    pub warnings: u64,
}

impl AggregateReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn station(&self, name: &str) -> Option<&StationAggregate> {
        self.stations.iter().find(|s| s.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceAggregate> {
        self.resources.iter().find(|r| r.name == name)
    }
}

/// Aggregate with the default configuration.
pub fn aggregate(results: &[ReplicationStatistics]) -> AggregateReport {
    aggregate_with(results, &StatsConfig::default())
}

pub fn aggregate_with(results: &[ReplicationStatistics], config: &StatsConfig) -> AggregateReport {
    let c = config.confidence;
    let over = |f: &dyn Fn(&ReplicationStatistics) -> f64| {
        let values: Vec<f64> = results.iter().map(f).collect();
        Estimate::from_samples(&values, c)
    };
    // Items are named consistently across replications of one network, so
    // the first replication fixes the order.
    let names = |f: &dyn Fn(&ReplicationStatistics) -> Vec<String>| {
        results.first().map(f).unwrap_or_default()
    };

    let stations = names(&|r| r.stations.iter().map(|s| s.name.clone()).collect())
        .into_iter()
        .map(|name| {
            let rows: Vec<_> = results.iter().filter_map(|r| r.station(&name)).collect();
            let est = |f: &dyn Fn(&procsim_core::stats::StationSummary) -> f64| {
                let values: Vec<f64> = rows.iter().map(|s| f(*s)).collect();
                Estimate::from_samples(&values, c)
            };
            StationAggregate {
                model_id: rows.first().map_or(0, |s| s.model_id),
                arrivals: est(&|s| s.arrivals as f64),
                at_station: est(&|s| s.at_station.mean),
                in_queue: est(&|s| s.in_queue.mean),
                waiting: est(&|s| s.waiting.mean),
                residence: est(&|s| s.residence.mean),
                name,
            }
        })
        .collect();

    let client_types = names(&|r| r.client_types.iter().map(|t| t.name.clone()).collect())
        .into_iter()
        .map(|name| {
            let rows: Vec<_> = results.iter().filter_map(|r| r.client_type(&name)).collect();
            let est = |f: &dyn Fn(&procsim_core::stats::ClientTypeSummary) -> f64| {
                let values: Vec<f64> = rows.iter().map(|t| f(*t)).collect();
                Estimate::from_samples(&values, c)
            };
            ClientTypeAggregate {
                disposed: est(&|t| t.disposed as f64),
                waiting: est(&|t| t.waiting.mean),
                residence: est(&|t| t.residence.mean),
                name,
            }
        })
        .collect();

    let resources = names(&|r| r.resources.iter().map(|x| x.name.clone()).collect())
        .into_iter()
        .map(|name| {
            let rows: Vec<_> = results.iter().filter_map(|r| r.resource(&name)).collect();
            let est = |f: &dyn Fn(&procsim_core::stats::ResourceSummary) -> f64| {
                let values: Vec<f64> = rows.iter().map(|x| f(*x)).collect();
                Estimate::from_samples(&values, c)
            };
            ResourceAggregate {
                in_use: est(&|x| x.in_use.mean),
                utilization: est(&|x| x.utilization),
                cost: est(&|x| x.cost),
                name,
            }
        })
        .collect();

    let tanks = names(&|r| r.tanks.iter().map(|t| t.name.clone()).collect())
        .into_iter()
        .map(|name| {
            let values: Vec<f64> = results
                .iter()
                .filter_map(|r| r.tank(&name))
                .map(|t| t.mean)
                .collect();
            ValueAggregate {
                value: Estimate::from_samples(&values, c),
                name,
            }
        })
        .collect();

    let counters = named_values(results, c, |r| &r.counters);
    let variables = named_values(results, c, |r| &r.variables);

    let report = AggregateReport {
        replications: results.len() as u64,
        confidence: c,
        end_time: over(&|r| r.end_time),
        clients_created: over(&|r| r.clients_created as f64),
        clients_disposed: over(&|r| r.clients_disposed as f64),
        wip: over(&|r| r.wip.mean),
        system_residence: over(&|r| r.system_residence.mean),
        stations,
        client_types,
        resources,
        tanks,
        counters,
        variables,
        shutdowns: results.iter().filter(|r| r.shutdown.is_some()).count() as u64,
        warnings: results
            .iter()
            .map(|r| r.warnings.len() as u64 + r.warnings_suppressed)
            .sum(),
    };
    debug!(
        replications = report.replications,
        stations = report.stations.len(),
        shutdowns = report.shutdowns,
        "aggregated replications"
    );
    report
}

fn named_values(
    results: &[ReplicationStatistics],
    confidence: Confidence,
    list: impl Fn(&ReplicationStatistics) -> &Vec<procsim_core::stats::CounterSummary>,
) -> Vec<ValueAggregate> {
    let Some(first) = results.first() else {
        return Vec::new();
    };
    list(first)
        .iter()
        .map(|entry| {
            let values: Vec<f64> = results
                .iter()
                .filter_map(|r| list(r).iter().find(|x| x.name == entry.name))
                .map(|x| x.value)
                .collect();
            ValueAggregate {
                name: entry.name.clone(),
                value: Estimate::from_samples(&values, confidence),
            }
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================
