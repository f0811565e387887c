use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    merge_all, HistoryError, HistoryStore, HistorySynchronizer, Identifier, Snapshot, SyncOutcome,
};

pub const DEFAULT_SOURCE: i64 = 1;
pub const MERGED_INPUT_LABEL: &str = "merged";

/// What the driver does when the store fails for one identifier.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorPolicy {
    /// Stop the run with the store error.
    #[default]
    Halt,
    /// Record the failure and continue with the next identifier.
    SkipIdentifier,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Provenance tag written on every row inserted by this run.
    pub source: i64,
    pub on_store_error: StoreErrorPolicy,
    /// Merge all inputs into one snapshot before synchronizing.
    pub merge_inputs: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE,
            on_store_error: StoreErrorPolicy::Halt,
            merge_inputs: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncProgress<'a> {
    pub input: &'a str,
    pub processed: usize,
    pub total: usize,
    pub identifier: &'a Identifier,
    /// `None` when a store failure was skipped.
    pub outcome: Option<SyncOutcome>,
}

impl SyncProgress<'_> {
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 * 100.0 / self.total as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub enum BatchEvent<'a> {
    InputStarted { input: &'a str, total: usize },
    IdentifierSynced(SyncProgress<'a>),
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct IdentifierFailure {
    pub identifier: Identifier,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct InputReport {
    pub input: String,
    pub total: usize,
    pub processed: usize,
    pub inserted_identifiers: usize,
    pub inserted_rows: usize,
    pub skipped_identifiers: usize,
    pub failed: Vec<IdentifierFailure>,
}

impl InputReport {
    fn new(input: &str, total: usize) -> Self {
        Self {
            input: input.to_string(),
            total,
            processed: 0,
            inserted_identifiers: 0,
            inserted_rows: 0,
            skipped_identifiers: 0,
            failed: Vec::new(),
        }
    }

    fn record(&mut self, outcome: Option<SyncOutcome>) {
        self.processed += 1;
        match outcome {
            Some(SyncOutcome::Inserted { count }) => {
                self.inserted_identifiers += 1;
                self.inserted_rows += count;
            }
            Some(SyncOutcome::Skipped { .. }) => self.skipped_identifiers += 1,
            None => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct BatchReport {
    pub source: i64,
    pub inputs: Vec<InputReport>,
}

impl BatchReport {
    #[must_use]
    pub fn inserted_rows(&self) -> usize {
        self.inputs.iter().map(|input| input.inserted_rows).sum()
    }

    #[must_use]
    pub fn inserted_identifiers(&self) -> usize {
        self.inputs.iter().map(|input| input.inserted_identifiers).sum()
    }

    #[must_use]
    pub fn skipped_identifiers(&self) -> usize {
        self.inputs.iter().map(|input| input.skipped_identifiers).sum()
    }

    #[must_use]
    pub fn failed_identifiers(&self) -> usize {
        self.inputs.iter().map(|input| input.failed.len()).sum()
    }
}

/// Synchronizes snapshots into a store one identifier at a time.
///
/// The store is committed after every identifier, so a re-run after a crash only repeats the
/// identifier that was in flight.
pub struct BatchDriver<'s, S: HistoryStore + ?Sized> {
    store: &'s mut S,
    synchronizer: HistorySynchronizer,
    config: BatchConfig,
}

impl<'s, S: HistoryStore + ?Sized> BatchDriver<'s, S> {
    pub fn new(store: &'s mut S, config: BatchConfig) -> Self {
        Self { store, synchronizer: HistorySynchronizer::new(config.source), config }
    }

    /// Synchronize every identifier of one snapshot.
    ///
    /// # Errors
    /// Returns the first malformed identifier or record error, and the first store error unless
    /// the policy is [`StoreErrorPolicy::SkipIdentifier`]. Identifiers handled before the failure
    /// stay committed.
    pub fn run_snapshot(
        &mut self,
        input: &str,
        snapshot: &Snapshot,
        progress: &mut dyn FnMut(BatchEvent<'_>),
    ) -> Result<InputReport, HistoryError> {
        let total = snapshot.len();
        let mut report = InputReport::new(input, total);
        tracing::info!(input, total, source = self.config.source, "synchronizing snapshot");
        progress(BatchEvent::InputStarted { input, total });

        for (uuid, candidates) in snapshot.iter() {
            let identifier = Identifier::parse(uuid)?;
            let synchronizer = self.synchronizer;
            let result = synchronizer
                .sync(&identifier, candidates, &mut *self.store)
                .and_then(|outcome| {
                    self.store.commit()?;
                    Ok(outcome)
                });

            let outcome = match result {
                Ok(outcome) => Some(outcome),
                Err(err)
                    if !err.aborts_input()
                        && self.config.on_store_error == StoreErrorPolicy::SkipIdentifier =>
                {
                    tracing::warn!(input, %identifier, error = %err, "skipping identifier after store failure");
                    report.failed.push(IdentifierFailure { identifier, error: err.to_string() });
                    None
                }
                Err(err) => return Err(err),
            };

            report.record(outcome);
            progress(BatchEvent::IdentifierSynced(SyncProgress {
                input,
                processed: report.processed,
                total,
                identifier: &identifier,
                outcome,
            }));
        }

        tracing::info!(
            input,
            inserted = report.inserted_identifiers,
            skipped = report.skipped_identifiers,
            failed = report.failed.len(),
            "snapshot synchronized"
        );
        Ok(report)
    }

    /// Load and synchronize each input in order, or all of them merged when configured so.
    ///
    /// # Errors
    /// Returns the first load error or any error [`BatchDriver::run_snapshot`] returns.
    pub fn run_paths(
        &mut self,
        paths: &[PathBuf],
        progress: &mut dyn FnMut(BatchEvent<'_>),
    ) -> Result<BatchReport, HistoryError> {
        let mut inputs = Vec::with_capacity(paths.len());

        if self.config.merge_inputs {
            let snapshots = paths
                .iter()
                .map(|path| Snapshot::load(path))
                .collect::<Result<Vec<_>, _>>()?;
            let merged = merge_all(snapshots);
            inputs.push(self.run_snapshot(MERGED_INPUT_LABEL, &merged, progress)?);
        } else {
            for path in paths {
                let snapshot = Snapshot::load(path)?;
                let label = path.display().to_string();
                inputs.push(self.run_snapshot(&label, &snapshot, progress)?);
            }
        }

        Ok(BatchReport { source: self.config.source, inputs })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;

    use super::*;
    use crate::store::testing::MemoryHistoryStore;
    use crate::Record;

    const ID_1: &str = "00000000-0000-0000-0000-000000000001";
    const ID_2: &str = "00000000-0000-0000-0000-000000000002";
    const ID_3: &str = "00000000-0000-0000-0000-000000000003";

    fn fixture_id(text: &str) -> Identifier {
        match Identifier::parse(text) {
            Ok(id) => id,
            Err(err) => panic!("invalid fixture identifier {text}: {err}"),
        }
    }

    fn snapshot_from(value: &serde_json::Value) -> Snapshot {
        match Snapshot::from_reader(value.to_string().as_bytes()) {
            Ok(snapshot) => snapshot,
            Err(err) => panic!("fixture snapshot should load: {err}"),
        }
    }

    fn unique_temp_file(prefix: &str, body: &serde_json::Value) -> PathBuf {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
            .as_nanos();
        let path = std::env::temp_dir()
            .join(format!("{prefix}-{}-{now}.json", std::process::id()));
        fs::write(&path, body.to_string())
            .unwrap_or_else(|err| panic!("failed to write {}: {err}", path.display()));
        path
    }

    #[test]
    fn config_defaults_and_rejects_unknown_fields() {
        let parsed: Result<BatchConfig, _> = serde_json::from_str(r#"{"source": 9}"#);
        assert_eq!(
            parsed.map_err(|err| err.to_string()),
            Ok(BatchConfig { source: 9, ..BatchConfig::default() })
        );

        let policy: Result<BatchConfig, _> =
            serde_json::from_str(r#"{"on_store_error": "skip_identifier"}"#);
        assert!(matches!(
            policy,
            Ok(BatchConfig { on_store_error: StoreErrorPolicy::SkipIdentifier, source: 1, .. })
        ));

        let unknown: Result<BatchConfig, _> = serde_json::from_str(r#"{"sources": 2}"#);
        assert!(unknown.is_err());
    }

    #[test]
    fn commits_after_every_identifier_and_reports_progress() {
        let mut store = MemoryHistoryStore::default();
        store.seed(fixture_id(ID_2), vec![Record::from_store_row("old".to_string(), None, Some(1))]);
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "a"}, {"name": "b", "changedToAt": 10}]},
            {"uuid": ID_2, "names": [{"name": "c"}]},
        ]));

        let mut events = Vec::new();
        let report = {
            let mut driver = BatchDriver::new(&mut store, BatchConfig::default());
            driver.run_snapshot("fixture", &snapshot, &mut |event| match event {
                BatchEvent::InputStarted { total, .. } => events.push(format!("start {total}")),
                BatchEvent::IdentifierSynced(progress) => events.push(format!(
                    "{:.2}% {} {}",
                    progress.percent(),
                    progress.identifier,
                    progress.outcome.map_or(0, SyncOutcome::rows)
                )),
            })
        };

        let report = match report {
            Ok(report) => report,
            Err(err) => panic!("batch should succeed: {err}"),
        };
        assert_eq!(report.processed, 2);
        assert_eq!(report.inserted_identifiers, 1);
        assert_eq!(report.inserted_rows, 2);
        assert_eq!(report.skipped_identifiers, 1);
        assert_eq!(
            events,
            [
                "start 2".to_string(),
                format!("50.00% {ID_1} 2"),
                format!("100.00% {ID_2} 1"),
            ]
        );
        // one commit inside the insert path plus one checkpoint per identifier
        assert_eq!(store.commits, 3);
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 2);
    }

    #[test]
    fn malformed_identifier_aborts_input_after_earlier_commits() {
        let mut store = MemoryHistoryStore::default();
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "first"}]},
            {"uuid": "not-a-uuid", "names": [{"name": "bad"}]},
            {"uuid": ID_3, "names": [{"name": "never"}]},
        ]));

        let result = BatchDriver::new(&mut store, BatchConfig::default()).run_snapshot(
            "fixture",
            &snapshot,
            &mut |_| {},
        );

        assert!(matches!(result, Err(HistoryError::MalformedIdentifier { .. })));
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 1);
        assert_eq!(store.committed_rows(&fixture_id(ID_3)), 0);
    }

    #[test]
    fn store_failure_halts_by_default() {
        let mut store = MemoryHistoryStore::default();
        store.fail_inserts_for.insert(fixture_id(ID_1));
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "a"}]},
            {"uuid": ID_2, "names": [{"name": "b"}]},
        ]));

        let result = BatchDriver::new(&mut store, BatchConfig::default()).run_snapshot(
            "fixture",
            &snapshot,
            &mut |_| {},
        );

        assert!(matches!(result, Err(HistoryError::Store(_))));
        assert_eq!(store.committed_rows(&fixture_id(ID_2)), 0);
    }

    #[test]
    fn skip_policy_continues_past_store_failures_only() {
        let mut store = MemoryHistoryStore::default();
        store.fail_reads_for.insert(fixture_id(ID_1));
        let config =
            BatchConfig { on_store_error: StoreErrorPolicy::SkipIdentifier, ..BatchConfig::default() };
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "a"}]},
            {"uuid": ID_2, "names": [{"name": "b"}]},
            {"uuid": ID_3, "names": [{"changedToAt": 1}]},
        ]));

        let mut skipped = Vec::new();
        let result = BatchDriver::new(&mut store, config).run_snapshot(
            "fixture",
            &snapshot,
            &mut |event| {
                if let BatchEvent::IdentifierSynced(progress) = event {
                    if progress.outcome.is_none() {
                        skipped.push(progress.identifier.to_string());
                    }
                }
            },
        );

        assert!(matches!(result, Err(HistoryError::MissingField { field: "name" })));
        assert_eq!(skipped, [ID_1.to_string()]);
        assert_eq!(store.committed_rows(&fixture_id(ID_2)), 1);
    }

    #[test]
    fn skip_policy_isolates_rejected_commit() {
        let mut store = MemoryHistoryStore::default();
        store.fail_commits_for.insert(fixture_id(ID_2));
        let config =
            BatchConfig { on_store_error: StoreErrorPolicy::SkipIdentifier, ..BatchConfig::default() };
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "a"}]},
            {"uuid": ID_2, "names": [{"name": "b"}]},
            {"uuid": ID_3, "names": [{"name": "c"}, {"name": "d"}]},
        ]));

        let report = match BatchDriver::new(&mut store, config).run_snapshot(
            "fixture",
            &snapshot,
            &mut |_| {},
        ) {
            Ok(report) => report,
            Err(err) => panic!("rejected commit should be skipped: {err}"),
        };

        let failed = report.failed.iter().map(|failure| failure.identifier).collect::<Vec<_>>();
        assert_eq!(failed, [fixture_id(ID_2)]);
        assert_eq!(report.inserted_identifiers, 2);
        assert_eq!(report.inserted_rows, 3);
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 1);
        assert_eq!(store.committed_rows(&fixture_id(ID_2)), 0);
        assert_eq!(store.committed_rows(&fixture_id(ID_3)), 2);
        assert_eq!(store.pending_rows(), 0);
    }

    #[test]
    fn rejected_commit_halts_by_default() {
        let mut store = MemoryHistoryStore::default();
        store.fail_commits_for.insert(fixture_id(ID_1));
        let snapshot = snapshot_from(&json!([
            {"uuid": ID_1, "names": [{"name": "a"}]},
            {"uuid": ID_2, "names": [{"name": "b"}]},
        ]));

        let result = BatchDriver::new(&mut store, BatchConfig::default()).run_snapshot(
            "fixture",
            &snapshot,
            &mut |_| {},
        );

        assert!(matches!(result, Err(HistoryError::Store(_))));
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 0);
        assert_eq!(store.committed_rows(&fixture_id(ID_2)), 0);
    }

    #[test]
    fn run_paths_syncs_each_input_independently() {
        let first = unique_temp_file(
            "nh-batch-first",
            &json!([{"uuid": ID_1, "names": [{"name": "a"}]}]),
        );
        let second = unique_temp_file(
            "nh-batch-second",
            &json!([{"uuid": ID_1, "names": [{"name": "a"}, {"name": "b"}]}]),
        );
        let mut store = MemoryHistoryStore::default();

        let report = BatchDriver::new(&mut store, BatchConfig { source: 4, ..BatchConfig::default() })
            .run_paths(&[first.clone(), second.clone()], &mut |_| {});
        let _ = fs::remove_file(&first);
        let _ = fs::remove_file(&second);

        let report = match report {
            Ok(report) => report,
            Err(err) => panic!("batch should succeed: {err}"),
        };
        assert_eq!(report.source, 4);
        assert_eq!(report.inputs.len(), 2);
        assert_eq!(report.inputs[0].inserted_rows, 1);
        assert_eq!(report.inputs[1].skipped_identifiers, 1);
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 1);
    }

    #[test]
    fn run_paths_merges_inputs_when_configured() {
        let first = unique_temp_file(
            "nh-batch-merge-first",
            &json!([{"uuid": ID_1, "names": [{"name": "a"}]}, {"uuid": ID_2, "names": []}]),
        );
        let second = unique_temp_file(
            "nh-batch-merge-second",
            &json!([{"uuid": ID_1, "names": [{"name": "a"}, {"name": "b"}]}]),
        );
        let mut store = MemoryHistoryStore::default();
        let config = BatchConfig { merge_inputs: true, ..BatchConfig::default() };

        let report = BatchDriver::new(&mut store, config)
            .run_paths(&[first.clone(), second.clone()], &mut |_| {});
        let _ = fs::remove_file(&first);
        let _ = fs::remove_file(&second);

        let report = match report {
            Ok(report) => report,
            Err(err) => panic!("batch should succeed: {err}"),
        };
        assert_eq!(report.inputs.len(), 1);
        assert_eq!(report.inputs[0].input, MERGED_INPUT_LABEL);
        assert_eq!(report.inputs[0].total, 2);
        assert_eq!(report.inserted_rows(), 2);
        assert_eq!(store.committed_rows(&fixture_id(ID_1)), 2);
    }

    #[test]
    fn run_paths_stops_on_unreadable_input() {
        let missing = std::env::temp_dir().join("nh-batch-does-not-exist.json");
        let mut store = MemoryHistoryStore::default();

        let result =
            BatchDriver::new(&mut store, BatchConfig::default()).run_paths(&[missing], &mut |_| {});

        assert!(matches!(result, Err(HistoryError::Load(_))));
    }
}
