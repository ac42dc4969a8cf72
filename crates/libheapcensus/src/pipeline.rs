//! A whole analysis run: supervise, diff, persist.

use std::path::PathBuf;

use log::{error, info};

use crate::census::Census;
use crate::diff;
use crate::errors::CensusResult;
use crate::snapshot;
use crate::supervisor::{Analyzer, Supervisor};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Prior snapshot to diff against.
    pub snapshot: Option<PathBuf>,
    pub output_file: PathBuf,
}

/// Analyze `targets` and write the results to the output file.
///
/// Fails with `NoResults`, before anything is written, when no target
/// produced a census. A bad prior snapshot only skips the diff.
pub fn run<A: Analyzer>(
    supervisor: &Supervisor<A>,
    targets: &[i32],
    options: &RunOptions,
) -> CensusResult<Vec<Census>> {
    let mut censuses = supervisor.run(targets).into_censuses()?;

    if let Some(path) = &options.snapshot {
        match diff::diff_against_file(&censuses, path) {
            Ok(differences) => censuses.extend(differences),
            Err(err) => error!("skipping snapshot comparison: {err}"),
        }
    }

    info!("writing output to file {}", options.output_file.display());
    snapshot::write_snapshot(&options.output_file, &censuses)?;
    Ok(censuses)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::census::CensusRow;
    use crate::errors::CensusError;

    struct Fixed(Vec<CensusRow>);

    impl Analyzer for Fixed {
        fn analyze(&self, target_id: i32) -> CensusResult<Census> {
            if self.0.is_empty() {
                return Err(CensusError::InvalidPid(target_id));
            }
            Ok(Census::analysis(target_id, self.0.clone()))
        }
    }

    #[test]
    fn total_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let options = RunOptions {
            snapshot: None,
            output_file: dir.path().join("out"),
        };
        let err = run(&Supervisor::new(Fixed(Vec::new())), &[1, 2], &options).unwrap_err();
        assert!(matches!(err, CensusError::NoResults));
        assert!(!options.output_file.exists());
    }

    #[test]
    fn snapshot_diffs_are_appended_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let prior = dir.path().join("prior");
        snapshot::write_snapshot(
            &prior,
            &[Census::analysis(4, vec![CensusRow::basic("dict", 1, 100)])],
        )
        .unwrap();
        let options = RunOptions {
            snapshot: Some(prior),
            output_file: dir.path().join("out"),
        };
        let supervisor = Supervisor::new(Fixed(vec![CensusRow::basic("dict", 3, 300)]));
        let censuses = run(&supervisor, &[4], &options).unwrap();
        assert_eq!(censuses.len(), 2);
        assert_eq!(censuses[1].title(), "Snapshot Differences for 4");
        assert_eq!(censuses[1].rows(), &[CensusRow::basic("dict", 2, 200)]);
        assert_eq!(snapshot::read_snapshot(&options.output_file).unwrap(), censuses);
    }

    #[test]
    fn unreadable_snapshot_keeps_results() {
        let dir = tempfile::tempdir().unwrap();
        let prior = dir.path().join("prior");
        fs::write(&prior, "definitely not a snapshot").unwrap();
        let options = RunOptions {
            snapshot: Some(prior),
            output_file: dir.path().join("out"),
        };
        let supervisor = Supervisor::new(Fixed(vec![CensusRow::basic("dict", 3, 300)]));
        let censuses = run(&supervisor, &[4], &options).unwrap();
        assert_eq!(censuses.len(), 1);
        assert!(options.output_file.exists());
    }
}
