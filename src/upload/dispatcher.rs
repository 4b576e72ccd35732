//! Batch dispatch of validated rows to a record sink.
//!
//! Rows are validated up front, then sent in consecutive groups of at most
//! `batch_size`. Every row of a group is submitted concurrently and the whole
//! group settles before state is updated. Groups are paced by a fixed delay
//! and a pause request takes effect at the next group boundary.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::model::Row;
use crate::strapi::records::{RecordSink, RemoteCreateError};
use crate::validation::{RowValidator, ValidationResult};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_BATCH_SIZE: usize = 1;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Pacing and sizing of a dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub batch_size: usize,
    /// Pause between groups; not applied after the last group or after a
    /// group with nothing to send.
    pub delay: Duration,
    /// Upper bound for a single create call.
    pub request_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            delay: DEFAULT_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// A row the sink rejected (or that timed out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRow {
    pub row_index: usize,
    pub error: RemoteCreateError,
}

/// Cumulative counters of one run. Reset at the start of every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchState {
    pub run_id: Uuid,
    pub start_row: usize,
    /// First row of the next group to process; the resume point after a pause.
    pub next_row: usize,
    /// Starts at `start_row` and grows by each group's success count.
    pub processed_count: usize,
    /// Rows actually submitted to the sink.
    pub attempted_count: usize,
    /// Share of the row window traversed, 0..=100.
    pub progress_percent: u8,
    /// Ordered by row index.
    pub failed_rows: Vec<FailedRow>,
    pub paused: bool,
}

impl DispatchState {
    pub fn new(start_row: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            start_row,
            next_row: start_row,
            processed_count: start_row,
            attempted_count: 0,
            progress_percent: 0,
            failed_rows: Vec::new(),
            paused: false,
        }
    }
}

impl Default for DispatchState {
    fn default() -> Self {
        Self::new(0)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Completed,
    CompletedWithErrors,
    /// Every row in the window failed validation; nothing was sent.
    AllInvalid,
    PausedMidRun,
    /// A submission task panicked. Every other row of its group settled and
    /// is recorded; later groups were not started.
    Fatal { message: String },
}

/// Result of one dispatch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub status: DispatchStatus,
    /// Rows dropped before dispatch because they failed validation.
    pub validation_errors: Vec<ValidationResult>,
    /// Rows created successfully during this run, ascending.
    pub created_rows: Vec<usize>,
    pub processed_count: usize,
    pub failed_count: usize,
    pub next_row: usize,
}

impl DispatchOutcome {
    /// User-facing one-line description of the outcome.
    pub fn summary(&self) -> String {
        match &self.status {
            DispatchStatus::Completed => format!(
                "Successfully uploaded {} entries to Strapi",
                self.processed_count
            ),
            DispatchStatus::CompletedWithErrors => format!(
                "Upload completed with {} errors. {} entries were successfully uploaded.",
                self.failed_count, self.processed_count
            ),
            DispatchStatus::AllInvalid => {
                "All rows have validation errors. Please fix the data and try again.".to_string()
            }
            DispatchStatus::PausedMidRun => format!(
                "Upload paused. Resume from row {} to continue.",
                self.next_row
            ),
            DispatchStatus::Fatal { message } => format!("Upload stopped: {}", message),
        }
    }
}

/// Published after every settled group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub run_id: Uuid,
    pub next_row: usize,
    pub total_rows: usize,
    pub processed_count: usize,
    pub attempted_count: usize,
    pub failed_count: usize,
    pub progress_percent: u8,
}

/// Outcome of a single submission task.
struct Submission {
    row_index: usize,
    result: Result<(), RemoteCreateError>,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchDispatcher
// ─────────────────────────────────────────────────────────────────────────────

/// Sends validated rows to a sink in paced, concurrent groups.
pub struct BatchDispatcher<S: RecordSink> {
    sink: Arc<S>,
    content_type: Arc<str>,
    validator: RowValidator,
    config: DispatchConfig,
    progress: Option<UnboundedSender<ProgressEvent>>,
}

impl<S: RecordSink + 'static> BatchDispatcher<S> {
    pub fn new(
        sink: Arc<S>,
        content_type: impl Into<String>,
        validator: RowValidator,
        config: DispatchConfig,
    ) -> Self {
        Self {
            sink,
            content_type: Arc::from(content_type.into()),
            validator,
            config,
            progress: None,
        }
    }

    /// Publishes a `ProgressEvent` to `tx` after each group.
    pub fn with_progress(mut self, tx: UnboundedSender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    fn emit_progress(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Runs one dispatch over `rows[start_row..]`.
    ///
    /// Rows in `already_created` are skipped so that resuming or retrying
    /// never creates a record twice. `state` is reset first and then updated
    /// after each settled group.
    ///
    /// # Errors
    ///
    /// Returns an error only for setup problems, before any request is made:
    /// - `AppError::NoRows` - `rows` is empty
    /// - `AppError::InvalidStartRow` - `start_row > rows.len()`
    /// - `AppError::MissingRequiredMappings` - a required field has no column
    /// - `AppError::Config` - `batch_size` is zero
    pub async fn run(
        &self,
        rows: &[Row],
        start_row: usize,
        state: &mut DispatchState,
        already_created: &BTreeSet<usize>,
        pause: &CancellationToken,
    ) -> Result<DispatchOutcome, AppError> {
        if rows.is_empty() {
            return Err(AppError::NoRows);
        }
        if start_row > rows.len() {
            return Err(AppError::InvalidStartRow {
                start_row,
                row_count: rows.len(),
            });
        }
        let missing = self.validator.missing_required_mappings();
        if !missing.is_empty() {
            return Err(AppError::MissingRequiredMappings(missing.to_vec()));
        }
        if self.config.batch_size == 0 {
            return Err(AppError::Config("batch_size must be at least 1".to_string()));
        }

        *state = DispatchState::new(start_row);
        let total = rows.len() - start_row;
        let run_label = state.run_id.to_string();
        let short_id = &run_label[..8];

        if total == 0 {
            state.progress_percent = 100;
            return Ok(self.outcome(DispatchStatus::Completed, state, Vec::new(), Vec::new()));
        }

        // Step 1: validate the whole window
        let results: Vec<ValidationResult> = rows[start_row..]
            .iter()
            .enumerate()
            .map(|(offset, row)| self.validator.validate(start_row + offset, row))
            .collect();
        let (valid, validation_errors): (Vec<_>, Vec<_>) =
            results.into_iter().partition(ValidationResult::is_valid);

        if valid.is_empty() {
            warn!(
                "[DISPATCH] Run {}: all {} rows failed validation",
                short_id, total
            );
            return Ok(self.outcome(DispatchStatus::AllInvalid, state, validation_errors, Vec::new()));
        }

        info!(
            "[DISPATCH] Run {}: {} rows from row {} ({} invalid, batch size {})",
            short_id,
            total,
            start_row,
            validation_errors.len(),
            self.config.batch_size
        );

        let mut records: Vec<Option<Map<String, Value>>> = vec![None; total];
        for result in valid {
            if !already_created.contains(&result.row_index) {
                records[result.row_index - start_row] = Some(result.record);
            }
        }

        let mut created_rows = Vec::new();
        let mut group_start = start_row;

        // Step 2: dispatch groups in row order
        while group_start < rows.len() {
            let group_end = (group_start + self.config.batch_size).min(rows.len());

            if pause.is_cancelled() {
                state.paused = true;
                state.next_row = group_start;
                info!(
                    "[DISPATCH] Run {}: paused before row {}",
                    short_id, group_start
                );
                return Ok(self.outcome(
                    DispatchStatus::PausedMidRun,
                    state,
                    validation_errors,
                    created_rows,
                ));
            }

            let mut join_set: JoinSet<Submission> = JoinSet::new();
            for row_index in group_start..group_end {
                if let Some(record) = records[row_index - start_row].take() {
                    self.spawn_submission(&mut join_set, row_index, record);
                }
            }
            let submitted = join_set.len();

            // Every sibling settles even if one task panics.
            let mut submissions: Vec<Submission> = Vec::with_capacity(submitted);
            let mut join_failure: Option<String> = None;
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(submission) => submissions.push(submission),
                    Err(e) => {
                        warn!("[DISPATCH] Run {}: task join error: {}", short_id, e);
                        join_failure.get_or_insert_with(|| format!("Submission task failed: {}", e));
                    }
                }
            }
            submissions.sort_by_key(|s| s.row_index);

            // Step 3: apply the settled group
            let settled = submissions.len();
            let mut successes = 0;
            for submission in submissions {
                match submission.result {
                    Ok(()) => {
                        successes += 1;
                        created_rows.push(submission.row_index);
                    }
                    Err(error) => {
                        info!(
                            "[DISPATCH] Row {} failed: {}",
                            submission.row_index, error
                        );
                        state.failed_rows.push(FailedRow {
                            row_index: submission.row_index,
                            error,
                        });
                    }
                }
            }

            if let Some(message) = join_failure {
                state.processed_count += successes;
                state.attempted_count += settled;
                return Ok(self.outcome(
                    DispatchStatus::Fatal { message },
                    state,
                    validation_errors,
                    created_rows,
                ));
            }

            state.processed_count += successes;
            state.attempted_count += submitted;
            state.next_row = group_end;
            state.progress_percent = percent(group_end - start_row, total);

            self.emit_progress(ProgressEvent {
                run_id: state.run_id,
                next_row: state.next_row,
                total_rows: rows.len(),
                processed_count: state.processed_count,
                attempted_count: state.attempted_count,
                failed_count: state.failed_rows.len(),
                progress_percent: state.progress_percent,
            });

            group_start = group_end;

            // Step 4: pace, unless nothing was sent
            if submitted > 0 && group_start < rows.len() && !self.config.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay) => {}
                    _ = pause.cancelled() => {}
                }
            }
        }

        let status = if state.failed_rows.is_empty() {
            DispatchStatus::Completed
        } else {
            DispatchStatus::CompletedWithErrors
        };
        info!(
            "[DISPATCH] Run {}: {} created, {} failed",
            short_id,
            created_rows.len(),
            state.failed_rows.len()
        );

        Ok(self.outcome(status, state, validation_errors, created_rows))
    }

    fn spawn_submission(
        &self,
        join_set: &mut JoinSet<Submission>,
        row_index: usize,
        record: Map<String, Value>,
    ) {
        let sink = self.sink.clone();
        let content_type = self.content_type.clone();
        let timeout = self.config.request_timeout;

        join_set.spawn(async move {
            let result =
                match tokio::time::timeout(timeout, sink.create(&content_type, &record)).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(RemoteCreateError::timed_out(timeout.as_secs())),
                };
            Submission { row_index, result }
        });
    }

    fn outcome(
        &self,
        status: DispatchStatus,
        state: &DispatchState,
        validation_errors: Vec<ValidationResult>,
        created_rows: Vec<usize>,
    ) -> DispatchOutcome {
        DispatchOutcome {
            status,
            validation_errors,
            created_rows,
            processed_count: state.processed_count,
            failed_count: state.failed_rows.len(),
            next_row: state.next_row,
        }
    }
}

/// `round(100 * covered / total)`, with an empty window counting as done.
fn percent(covered: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((covered as f64 * 100.0 / total as f64).round() as u64).min(100) as u8
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
