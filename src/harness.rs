//! The contract between the runtime and the benchmark programs that drive it.
//!
//! A benchmark owns its input (arrays, replicated parameters, accumulators), runs one trial per call to
//! [run][Benchmark::run] using the chosen [Strategy], and checks its own output in [validate][Benchmark::validate].
use crate::apply::Strategy;
use crate::error::RuntimeError;

use std::time::{Duration, Instant};

pub trait Benchmark {
    fn name(&self) -> &str;

    /// Execute one trial
    fn run(&mut self, strategy: Strategy) -> anyhow::Result<()>;

    /// Check the output of the last trial
    fn validate(&self) -> Result<(), RuntimeError>;

    /// Restore the input before a trial
    fn reset(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Number of elements processed per trial, used to report throughput
    fn work_items(&self) -> usize;
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrialReport {
    pub trial: usize,
    pub elapsed: Duration,
    pub items_per_second: f64,
}

/// Run `trials` rounds of reset, timed run and validate.
///
/// Stops at the first error, a validation failure is returned as is.
#[tracing::instrument(skip_all, fields(benchmark = bench.name(), strategy = %strategy))]
pub fn run_trials<B: Benchmark + ?Sized>(
    bench: &mut B,
    strategy: Strategy,
    trials: usize,
) -> anyhow::Result<Vec<TrialReport>> {
    let mut reports = Vec::with_capacity(trials);
    for trial in 0..trials {
        bench.reset()?;
        let timer = Instant::now();
        bench.run(strategy)?;
        let elapsed = timer.elapsed();
        bench.validate()?;
        let items_per_second = if elapsed.as_secs_f64() > 0.0 {
            bench.work_items() as f64 / elapsed.as_secs_f64()
        } else {
            f64::INFINITY
        };
        tracing::info!(
            "{} {} trial {}: {:.3?} {:.2} MItems/s",
            bench.name(),
            strategy,
            trial,
            elapsed,
            items_per_second / 1e6
        );
        reports.push(TrialReport {
            trial,
            elapsed,
            items_per_second,
        });
    }
    Ok(reports)
}

/// `2^log2_num_elements`, the element count of a benchmark input.
///
/// Fails when the count, or its size in bytes for `elem_size` byte elements, does not fit a `usize`.
pub fn num_elements(log2_num_elements: u32, elem_size: usize) -> anyhow::Result<usize> {
    match 1usize.checked_shl(log2_num_elements) {
        Some(n) if n.checked_mul(elem_size).is_some() => Ok(n),
        _ => anyhow::bail!("log2_num_elements {} is too large", log2_num_elements),
    }
}

/// Compare a computed value with the expected one
pub fn check_value<T: PartialEq + std::fmt::Display>(
    index: usize,
    actual: T,
    expected: T,
) -> Result<(), RuntimeError> {
    if actual == expected {
        Ok(())
    } else {
        Err(RuntimeError::ValidationMismatch {
            index,
            actual: actual.to_string(),
            expected: expected.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_counts() {
        assert_eq!(1024, num_elements(10, 8).unwrap());
        assert_eq!(1usize << 60, num_elements(60, 8).unwrap());
        assert!(num_elements(61, 8).is_err());
        assert!(num_elements(64, 1).is_err());
        assert!(num_elements(200, 1).is_err());
    }

    #[test]
    fn mismatches_are_reported() {
        assert_eq!(Ok(()), check_value(3, 7u64, 7));
        assert_eq!(
            Err(RuntimeError::ValidationMismatch {
                index: 3,
                actual: "6".to_string(),
                expected: "7".to_string()
            }),
            check_value(3, 6u64, 7)
        );
    }
}
