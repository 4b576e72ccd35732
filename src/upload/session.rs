//! Upload session: everything one upload needs, owned in one place.
//!
//! The session holds the schema, mapping, defaults, coercion policy, parsed
//! table, the dispatch state of the latest run and the ledger of rows created
//! so far. Runs take `&mut self`, so only one can be in flight at a time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AppError;
use crate::model::{CoercionPolicy, DefaultValues, FieldMapping, FieldSpec, Table};
use crate::strapi::records::RecordSink;
use crate::upload::dispatcher::{
    BatchDispatcher, DispatchConfig, DispatchOutcome, DispatchState, FailedRow, ProgressEvent,
};
use crate::validation::{RowValidator, ValidationResult};

/// Owned state of one file being uploaded into one content type.
pub struct UploadSession<S: RecordSink> {
    sink: Arc<S>,
    content_type: String,
    fields: Vec<FieldSpec>,
    mapping: FieldMapping,
    defaults: DefaultValues,
    policy: CoercionPolicy,
    table: Table,
    config: DispatchConfig,
    state: DispatchState,
    /// Rows created by any run of this session.
    created: BTreeSet<usize>,
    /// Latest failure of every row not created yet, across runs.
    failed: BTreeMap<usize, FailedRow>,
    pause: CancellationToken,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl<S: RecordSink + 'static> UploadSession<S> {
    /// Starts a session with every field unmapped and defaults seeded by type.
    pub fn new(
        sink: Arc<S>,
        content_type: impl Into<String>,
        fields: Vec<FieldSpec>,
        table: Table,
        config: DispatchConfig,
    ) -> Self {
        let mapping = FieldMapping::for_fields(&fields);
        let defaults = DefaultValues::seeded(&fields);
        Self {
            sink,
            content_type: content_type.into(),
            fields,
            mapping,
            defaults,
            policy: CoercionPolicy::default(),
            table,
            config,
            state: DispatchState::default(),
            created: BTreeSet::new(),
            failed: BTreeMap::new(),
            pause: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Maps `field` to `column` (`""` or `"none"` unmaps it).
    pub fn assign(&mut self, field: &str, column: &str) -> Result<(), AppError> {
        self.mapping.assign(field, column)
    }

    /// Overrides the default for `field`.
    pub fn set_default(&mut self, field: &str, value: impl Into<String>) -> Result<(), AppError> {
        if !self.fields.iter().any(|f| f.name == field) {
            return Err(AppError::UnknownField(field.to_string()));
        }
        self.defaults.set(field, value);
        Ok(())
    }

    pub fn set_policy(&mut self, policy: CoercionPolicy) {
        self.policy = policy;
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// State of the latest run.
    pub fn state(&self) -> &DispatchState {
        &self.state
    }

    pub fn created_rows(&self) -> &BTreeSet<usize> {
        &self.created
    }

    /// Rows that failed in any run and were not created since, by row index.
    pub fn failed_rows(&self) -> Vec<FailedRow> {
        self.failed.values().cloned().collect()
    }

    /// Token that pauses the next (or current) run at a group boundary.
    ///
    /// A paused token is replaced when the following run starts, so fetch a
    /// new handle for every run.
    pub fn pause_handle(&self) -> CancellationToken {
        self.pause.clone()
    }

    fn validator(&self) -> RowValidator {
        RowValidator::new(
            &self.table.headers,
            &self.mapping,
            &self.fields,
            self.defaults.clone(),
            self.policy,
        )
    }

    /// Validates every row without sending anything.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MissingRequiredMappings` when a required field has
    /// no column.
    pub fn dry_run(&self) -> Result<Vec<ValidationResult>, AppError> {
        let validator = self.validator();
        let missing = validator.missing_required_mappings();
        if !missing.is_empty() {
            return Err(AppError::MissingRequiredMappings(missing.to_vec()));
        }
        Ok(self
            .table
            .rows
            .iter()
            .enumerate()
            .map(|(index, row)| validator.validate(index, row))
            .collect())
    }

    /// Dispatches rows from `start_row` on, skipping rows already created.
    pub async fn upload(&mut self, start_row: usize) -> Result<DispatchOutcome, AppError> {
        if self.pause.is_cancelled() {
            self.pause = CancellationToken::new();
        }

        let mut dispatcher = BatchDispatcher::new(
            self.sink.clone(),
            self.content_type.clone(),
            self.validator(),
            self.config,
        );
        if let Some(tx) = &self.progress {
            dispatcher = dispatcher.with_progress(tx.clone());
        }

        let outcome = dispatcher
            .run(
                &self.table.rows,
                start_row,
                &mut self.state,
                &self.created,
                &self.pause,
            )
            .await?;

        for row_index in &outcome.created_rows {
            self.failed.remove(row_index);
        }
        self.created.extend(outcome.created_rows.iter().copied());
        for failure in &self.state.failed_rows {
            self.failed.insert(failure.row_index, failure.clone());
        }
        Ok(outcome)
    }

    /// Continues a paused run from the first unprocessed group.
    pub async fn resume(&mut self) -> Result<DispatchOutcome, AppError> {
        let next_row = self.state.next_row;
        info!("[SESSION] Resuming {} from row {}", self.content_type, next_row);
        self.upload(next_row).await
    }

    /// Re-runs from the lowest row that failed in any earlier run and was
    /// never created. `None` when there is nothing to retry.
    pub async fn retry_failed(&mut self) -> Result<Option<DispatchOutcome>, AppError> {
        let Some(&first_failed) = self.failed.keys().next() else {
            return Ok(None);
        };
        info!(
            "[SESSION] Retrying {} failed rows from row {}",
            self.failed.len(),
            first_failed
        );
        self.upload(first_failed).await.map(Some)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use serde_json::{json, Map, Value};
    use tokio::sync::Mutex;

    use crate::model::FieldType;
    use crate::strapi::records::{RemoteCreateError, RemoteRecord};
    use crate::upload::dispatcher::DispatchStatus;

    /// Fails each title listed in `flaky` on its first attempt only.
    #[derive(Default)]
    struct FlakySink {
        call_count: AtomicU64,
        flaky: Mutex<Vec<String>>,
        records: Mutex<Vec<Map<String, Value>>>,
        /// Cancelled on the next call, pausing the run after that group.
        pause_on_call: Mutex<Option<CancellationToken>>,
    }

    impl FlakySink {
        fn new(flaky: &[&str]) -> Self {
            Self {
                flaky: Mutex::new(flaky.iter().map(|t| t.to_string()).collect()),
                ..Self::default()
            }
        }
    }

    impl RecordSink for FlakySink {
        fn create<'a>(
            &'a self,
            _content_type: &'a str,
            record: &'a Map<String, Value>,
        ) -> Pin<Box<dyn Future<Output = Result<RemoteRecord, RemoteCreateError>> + Send + 'a>>
        {
            Box::pin(async move {
                self.call_count.fetch_add(1, Ordering::SeqCst);
                if let Some(token) = self.pause_on_call.lock().await.take() {
                    token.cancel();
                }
                let title = record["title"].as_str().unwrap_or_default().to_string();

                let mut flaky = self.flaky.lock().await;
                if let Some(pos) = flaky.iter().position(|t| *t == title) {
                    flaky.remove(pos);
                    return Err(RemoteCreateError {
                        http_status: Some(500),
                        message: "Internal Server Error".into(),
                        field_errors: vec![],
                    });
                }
                drop(flaky);

                self.records.lock().await.push(record.clone());
                Ok(RemoteRecord {
                    id: Some(title),
                    data: Value::Null,
                })
            })
        }
    }

    fn table(count: usize) -> Table {
        Table {
            headers: vec!["Name".into(), "Count".into(), "Live".into()],
            rows: (0..count)
                .map(|i| vec![format!("row-{}", i), i.to_string(), "yes".into()])
                .collect(),
        }
    }

    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("title", FieldType::String, true),
            FieldSpec::new("count", FieldType::Number, false),
            FieldSpec::new("live", FieldType::Boolean, false),
        ]
    }

    fn build_session(sink: &Arc<FlakySink>, rows: usize, batch_size: usize) -> UploadSession<FlakySink> {
        let mut session = UploadSession::new(
            sink.clone(),
            "api::article.article",
            fields(),
            table(rows),
            DispatchConfig {
                batch_size,
                delay: Duration::ZERO,
                request_timeout: Duration::from_secs(30),
            },
        );
        session.assign("title", "Name").unwrap();
        session.assign("count", "Count").unwrap();
        session.assign("live", "Live").unwrap();
        session
    }

    #[tokio::test]
    async fn upload_sends_coerced_records() {
        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 2, 5);

        let outcome = session.upload(0).await.unwrap();

        assert_eq!(outcome.status, DispatchStatus::Completed);
        let records = sink.records.lock().await;
        assert_eq!(records.len(), 2);
        let first = records.iter().find(|r| r["title"] == "row-1").unwrap();
        assert_eq!(Value::Object(first.clone()), json!({"title": "row-1", "count": 1, "live": true}));
    }

    #[tokio::test]
    async fn retry_failed_only_resends_failures() {
        let sink = Arc::new(FlakySink::new(&["row-2", "row-5"]));
        let mut session = build_session(&sink, 8, 3);

        let first = session.upload(0).await.unwrap();
        assert_eq!(first.status, DispatchStatus::CompletedWithErrors);
        assert_eq!(session.created_rows().len(), 6);
        assert_eq!(sink.call_count.load(Ordering::SeqCst), 8);

        let retry = session.retry_failed().await.unwrap().unwrap();

        assert_eq!(retry.status, DispatchStatus::Completed);
        assert_eq!(retry.created_rows, vec![2, 5]);
        assert_eq!(sink.call_count.load(Ordering::SeqCst), 10);
        assert_eq!(session.created_rows().len(), 8);
        assert!(session.retry_failed().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pause_then_resume_finishes_remaining_rows() {
        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 6, 2);

        session.pause_handle().cancel();
        // A token cancelled before the run is replaced, so this run completes.
        let full = session.upload(0).await.unwrap();
        assert_eq!(full.status, DispatchStatus::Completed);

        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 6, 2);
        let handle = session.pause_handle();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        session.progress = Some(tx);

        let pauser = tokio::spawn(async move {
            if rx.recv().await.is_some() {
                handle.cancel();
            }
        });
        let paused = session.upload(0).await.unwrap();
        pauser.await.unwrap();

        assert_eq!(paused.status, DispatchStatus::PausedMidRun);
        assert!(session.state().paused);
        let resume_from = session.state().next_row;
        assert!(resume_from >= 2 && resume_from < 6);

        let resumed = session.resume().await.unwrap();

        assert_eq!(resumed.status, DispatchStatus::Completed);
        assert_eq!(session.created_rows().len(), 6);
        assert_eq!(sink.call_count.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn failure_before_pause_survives_resume() {
        let sink = Arc::new(FlakySink::new(&["row-0"]));
        let mut session = build_session(&sink, 4, 2);
        *sink.pause_on_call.lock().await = Some(session.pause_handle());

        let paused = session.upload(0).await.unwrap();
        assert_eq!(paused.status, DispatchStatus::PausedMidRun);
        assert_eq!(session.state().next_row, 2);

        let resumed = session.resume().await.unwrap();
        assert_eq!(resumed.status, DispatchStatus::Completed);
        assert!(session.state().failed_rows.is_empty());
        let pending: Vec<usize> = session.failed_rows().iter().map(|f| f.row_index).collect();
        assert_eq!(pending, vec![0]);

        let retry = session.retry_failed().await.unwrap().expect("row 0 is still pending");

        assert_eq!(retry.created_rows, vec![0]);
        assert_eq!(session.created_rows().len(), 4);
        assert!(session.failed_rows().is_empty());
        assert_eq!(sink.call_count.load(Ordering::SeqCst), 5);
        assert!(session.retry_failed().await.unwrap().is_none());
    }

    #[test]
    fn dry_run_reports_missing_mapping() {
        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 3, 1);
        session.assign("title", "none").unwrap();

        let err = session.dry_run().unwrap_err();

        assert!(matches!(err, AppError::MissingRequiredMappings(ref f) if f == &["title"]));
    }

    #[test]
    fn dry_run_validates_every_row() {
        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 3, 1);
        session.table.rows[1][0] = String::new();

        let results = session.dry_run().unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_valid());
        assert!(!results[1].is_valid());
        assert_eq!(sink.call_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_default_rejects_unknown_field() {
        let sink = Arc::new(FlakySink::default());
        let mut session = build_session(&sink, 1, 1);

        assert!(session.set_default("count", "7").is_ok());
        assert!(matches!(
            session.set_default("nope", "1"),
            Err(AppError::UnknownField(_))
        ));
    }
}
