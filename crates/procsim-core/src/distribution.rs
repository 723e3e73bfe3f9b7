//! Probability distributions for times and quantities.
//!
//! Samples are drawn from the replication's [`SimRng`], so every draw is part
//! of the deterministic stream. All parameters are in model units (seconds for
//! times).

use serde::{Deserialize, Serialize};

use crate::rng::SimRng;

/// A parametric distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Distribution {
    /// Always `value`.
    Deterministic { value: f64 },
    /// Exponential with the given mean.
    Exponential { mean: f64 },
    /// Continuous uniform on `[min, max]`.
    Uniform { min: f64, max: f64 },
    /// Normal, truncated at zero.
    Normal { mean: f64, std_dev: f64 },
    /// Log-normal parameterised by the mean and standard deviation of the
    /// resulting values.
    LogNormal { mean: f64, std_dev: f64 },
    /// Erlang with `shape` phases and the given overall mean.
    Erlang { shape: u32, mean: f64 },
    /// Triangular on `[min, max]` with peak at `mode`.
    Triangular { min: f64, mode: f64, max: f64 },
}

impl Distribution {
    /// Check parameters. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        let finite = |v: f64, what: &str| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(format!("{what} must be finite"))
            }
        };
        match *self {
            Distribution::Deterministic { value } => finite(value, "value"),
            Distribution::Exponential { mean } => {
                finite(mean, "mean")?;
                if mean < 0.0 {
                    return Err("mean must not be negative".into());
                }
                Ok(())
            }
            Distribution::Uniform { min, max } => {
                finite(min, "min")?;
                finite(max, "max")?;
                if max < min {
                    return Err("max must not be smaller than min".into());
                }
                Ok(())
            }
            Distribution::Normal { mean, std_dev } | Distribution::LogNormal { mean, std_dev } => {
                finite(mean, "mean")?;
                finite(std_dev, "std_dev")?;
                if std_dev < 0.0 {
                    return Err("std_dev must not be negative".into());
                }
                if matches!(self, Distribution::LogNormal { .. }) && mean <= 0.0 {
                    return Err("log-normal mean must be positive".into());
                }
                Ok(())
            }
            Distribution::Erlang { shape, mean } => {
                finite(mean, "mean")?;
                if shape == 0 {
                    return Err("shape must be at least 1".into());
                }
                if mean < 0.0 {
                    return Err("mean must not be negative".into());
                }
                Ok(())
            }
            Distribution::Triangular { min, mode, max } => {
                finite(min, "min")?;
                finite(mode, "mode")?;
                finite(max, "max")?;
                if !(min <= mode && mode <= max) {
                    return Err("triangular requires min <= mode <= max".into());
                }
                Ok(())
            }
        }
    }

    /// Expected value.
    pub fn mean(&self) -> f64 {
        match *self {
            Distribution::Deterministic { value } => value,
            Distribution::Exponential { mean } => mean,
            Distribution::Uniform { min, max } => (min + max) / 2.0,
            Distribution::Normal { mean, .. } => mean,
            Distribution::LogNormal { mean, .. } => mean,
            Distribution::Erlang { mean, .. } => mean,
            Distribution::Triangular { min, mode, max } => (min + mode + max) / 3.0,
        }
    }

    /// The constant value if this distribution never varies.
    pub fn constant(&self) -> Option<f64> {
        match *self {
            Distribution::Deterministic { value } => Some(value),
            Distribution::Uniform { min, max } if min == max => Some(min),
            _ => None,
        }
    }

    /// Draw one sample.
    pub fn sample(&self, rng: &mut SimRng) -> f64 {
        match *self {
            Distribution::Deterministic { value } => value,
            Distribution::Exponential { mean } => -mean * rng.next_open_f64().ln(),
            Distribution::Uniform { min, max } => min + (max - min) * rng.next_f64(),
            Distribution::Normal { mean, std_dev } => {
                for _ in 0..MAX_NORMAL_DRAWS {
                    let x = mean + std_dev * standard_normal(rng);
                    if x >= 0.0 {
                        return x;
                    }
                }
                0.0
            }
            Distribution::LogNormal { mean, std_dev } => {
                let sigma2 = (1.0 + (std_dev * std_dev) / (mean * mean)).ln();
                let mu = mean.ln() - sigma2 / 2.0;
                (mu + sigma2.sqrt() * standard_normal(rng)).exp()
            }
            Distribution::Erlang { shape, mean } => {
                let phase_mean = mean / shape as f64;
                let mut product = 1.0;
                for _ in 0..shape {
                    product *= rng.next_open_f64();
                }
                -phase_mean * product.ln()
            }
            Distribution::Triangular { min, mode, max } => {
                if max == min {
                    return min;
                }
                let u = rng.next_f64();
                let split = (mode - min) / (max - min);
                if u < split {
                    min + ((max - min) * (mode - min) * u).sqrt()
                } else {
                    max - ((max - min) * (max - mode) * (1.0 - u)).sqrt()
                }
            }
        }
    }
}

/// Negative normal draws are rejected and redrawn this many times before
/// the sample falls back to zero.
const MAX_NORMAL_DRAWS: usize = 100;

/// Box-Muller transform, one value per call.
fn standard_normal(rng: &mut SimRng) -> f64 {
    let u1 = rng.next_open_f64();
    let u2 = rng.next_f64();
    (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_mean(d: &Distribution, n: usize) -> f64 {
        let mut rng = SimRng::new(2024);
        (0..n).map(|_| d.sample(&mut rng)).sum::<f64>() / n as f64
    }

    #[test]
    fn deterministic_is_constant() {
        let d = Distribution::Deterministic { value: 3.5 };
        let mut rng = SimRng::new(1);
        assert_eq!(d.sample(&mut rng), 3.5);
        assert_eq!(d.constant(), Some(3.5));
    }

    #[test]
    fn exponential_mean() {
        let d = Distribution::Exponential { mean: 10.0 };
        let m = sample_mean(&d, 50_000);
        assert!((m - 10.0).abs() < 0.3, "mean {m}");
    }

    #[test]
    fn uniform_bounds_and_mean() {
        let d = Distribution::Uniform { min: 2.0, max: 4.0 };
        let mut rng = SimRng::new(9);
        for _ in 0..1000 {
            let x = d.sample(&mut rng);
            assert!((2.0..=4.0).contains(&x));
        }
        assert!((sample_mean(&d, 20_000) - 3.0).abs() < 0.05);
    }

    #[test]
    fn normal_is_truncated_at_zero() {
        let d = Distribution::Normal { mean: 0.5, std_dev: 2.0 };
        let mut rng = SimRng::new(3);
        for _ in 0..1000 {
            assert!(d.sample(&mut rng) >= 0.0);
        }
    }

    #[test]
    fn normal_redraws_instead_of_clamping() {
        // Without redraws about 40% of these samples would be exactly zero.
        let d = Distribution::Normal { mean: 0.5, std_dev: 2.0 };
        let mut rng = SimRng::new(3);
        let zeros = (0..10_000).filter(|_| d.sample(&mut rng) == 0.0).count();
        assert_eq!(zeros, 0);
    }

    #[test]
    fn normal_far_below_zero_falls_back_to_zero() {
        let d = Distribution::Normal { mean: -1000.0, std_dev: 1.0 };
        let mut rng = SimRng::new(4);
        assert_eq!(d.sample(&mut rng), 0.0);
    }

    #[test]
    fn lognormal_mean() {
        let d = Distribution::LogNormal { mean: 5.0, std_dev: 1.0 };
        assert!((sample_mean(&d, 50_000) - 5.0).abs() < 0.1);
    }

    #[test]
    fn erlang_mean() {
        let d = Distribution::Erlang { shape: 3, mean: 6.0 };
        assert!((sample_mean(&d, 50_000) - 6.0).abs() < 0.15);
    }

    #[test]
    fn triangular_mean() {
        let d = Distribution::Triangular { min: 1.0, mode: 2.0, max: 6.0 };
        assert!((sample_mean(&d, 50_000) - 3.0).abs() < 0.05);
    }

    #[test]
    fn validation_rejects_bad_parameters() {
        assert!(Distribution::Uniform { min: 3.0, max: 1.0 }.validate().is_err());
        assert!(Distribution::Erlang { shape: 0, mean: 1.0 }.validate().is_err());
        assert!(Distribution::Exponential { mean: f64::NAN }.validate().is_err());
        assert!(
            Distribution::Triangular { min: 0.0, mode: 5.0, max: 4.0 }
                .validate()
                .is_err()
        );
        assert!(Distribution::LogNormal { mean: 0.0, std_dev: 1.0 }.validate().is_err());
        assert!(Distribution::Normal { mean: 1.0, std_dev: 0.2 }.validate().is_ok());
    }

    #[test]
    fn serde_uses_type_tag() {
        let json = r#"{"type":"exponential","mean":60.0}"#;
        let d: Distribution = serde_json::from_str(json).unwrap();
        assert_eq!(d, Distribution::Exponential { mean: 60.0 });
    }
}
