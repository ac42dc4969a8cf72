//! Runs one analysis per target concurrently and gathers the outcomes.

use std::sync::mpsc;
use std::thread;

use log::{error, info, warn};

use crate::census::Census;
use crate::errors::{CensusError, CensusResult};

/// Produces the census of one target.
///
/// Implementations must contain their own failures: an error is a result
/// for that target, never a reason to stop the others.
pub trait Analyzer: Sync {
    fn analyze(&self, target_id: i32) -> CensusResult<Census>;
}

#[derive(Debug)]
pub enum TargetOutcome {
    Completed(Census),
    /// The target answered with nothing.
    NoData,
    Failed(CensusError),
}

/// Outcomes keyed by target, in the order sessions finished.
#[derive(Debug, Default)]
pub struct ResultSet {
    outcomes: Vec<(i32, TargetOutcome)>,
}

impl ResultSet {
    fn record(&mut self, target_id: i32, result: CensusResult<Census>) {
        let outcome = match result {
            Ok(census) if census.rows().is_empty() => {
                warn!("{} returned no data! Try rerunning with --debug", census.title());
                TargetOutcome::NoData
            }
            Ok(census) => TargetOutcome::Completed(census),
            Err(CensusError::NoData) => {
                warn!("Analysis for {target_id} returned no data! Try rerunning with --debug");
                TargetOutcome::NoData
            }
            Err(err) => {
                error!("analysis of target {target_id} failed: {err}");
                TargetOutcome::Failed(err)
            }
        };
        self.outcomes.push((target_id, outcome));
    }

    pub fn outcomes(&self) -> &[(i32, TargetOutcome)] {
        &self.outcomes
    }

    pub fn successes(&self) -> impl Iterator<Item = &Census> {
        self.outcomes.iter().filter_map(|(_, outcome)| match outcome {
            TargetOutcome::Completed(census) => Some(census),
            _ => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (i32, &CensusError)> {
        self.outcomes.iter().filter_map(|(target, outcome)| match outcome {
            TargetOutcome::Failed(err) => Some((*target, err)),
            _ => None,
        })
    }

    /// The successful censuses, or `NoResults` when there are none.
    pub fn into_censuses(self) -> CensusResult<Vec<Census>> {
        let censuses: Vec<Census> = self
            .outcomes
            .into_iter()
            .filter_map(|(_, outcome)| match outcome {
                TargetOutcome::Completed(census) => Some(census),
                _ => None,
            })
            .collect();
        if censuses.is_empty() {
            return Err(CensusError::NoResults);
        }
        Ok(censuses)
    }
}

pub struct Supervisor<A> {
    analyzer: A,
}

impl<A: Analyzer> Supervisor<A> {
    pub fn new(analyzer: A) -> Self {
        Self { analyzer }
    }

    /// Analyze every target on its own worker thread.
    ///
    /// Duplicate ids are analyzed independently.
    pub fn run(&self, targets: &[i32]) -> ResultSet {
        let mut results = ResultSet::default();
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for &target in targets {
                let tx = tx.clone();
                let analyzer = &self.analyzer;
                scope.spawn(move || {
                    let result = analyzer.analyze(target);
                    // The receiver outlives every worker inside the scope.
                    let _ = tx.send((target, result));
                });
            }
            drop(tx);
            for (target, result) in rx {
                results.record(target, result);
            }
        });
        info!(
            "{} of {} targets analyzed",
            results.successes().count(),
            targets.len()
        );
        results
    }
}
