//! Command line surface: argument definitions and command handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{parse_pair, FileConfig, Overrides, Settings};
use crate::error::AppError;
use crate::report::write_failure_report;
use crate::strapi::{ContentType, SchemaSource, StrapiClient, StrapiRecordSink};
use crate::tabular::read_table;
use crate::upload::{DispatchOutcome, DispatchStatus, ProgressEvent, UploadSession};
use crate::validation::ValidationResult;

/// Row errors printed before the rest are summarized.
const MAX_PRINTED_ROW_ERRORS: usize = 20;

/// Added to the per-row timeout for the HTTP client, so a slow create is
/// reported as timed out by the dispatcher rather than as a failed connection.
const HTTP_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "strapi-stampede", author, version, about, long_about = None)]
pub struct Cli {
    /// TOML config file (defaults to ./stampede.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Strapi base URL, e.g. https://cms.example.com
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// API token
    #[arg(long, env = "STRAPI_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Collection endpoint known to exist, e.g. /api/articles
    #[arg(long, global = true)]
    pub known_endpoint: Option<String>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Test the connection and list content types
    Types,
    /// Show the writable fields of a content type
    Fields {
        /// Content type uid or collection name
        #[arg(long)]
        content_type: String,
    },
    /// Upload rows of a CSV file as new entries
    Upload(UploadArgs),
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Content type uid or collection name
    #[arg(long)]
    pub content_type: String,

    /// CSV file to upload
    #[arg(long)]
    pub file: PathBuf,

    /// Map a field to a column: --map title=Name
    #[arg(long = "map", value_parser = parse_pair)]
    pub mappings: Vec<(String, String)>,

    /// Default for empty cells: --default views=0
    #[arg(long = "default", value_parser = parse_pair)]
    pub defaults: Vec<(String, String)>,

    /// Single-character separator (`tab` or `\t` for tabs)
    #[arg(long)]
    pub separator: Option<String>,

    /// The first line is data, not headers
    #[arg(long)]
    pub no_headers: bool,

    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Pause between batches in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// First row (0-based, after headers) to upload
    #[arg(long, default_value_t = 0)]
    pub start_row: usize,

    /// Leave empty cells out of the record
    #[arg(long)]
    pub skip_empty: bool,

    /// Send empty cells as empty strings instead of null
    #[arg(long)]
    pub keep_empty: bool,

    /// Do not turn empty numbers into 0
    #[arg(long)]
    pub no_empty_numbers_zero: bool,

    /// Retry failed rows up to N times
    #[arg(long, default_value_t = 0)]
    pub retry_failed: u32,

    /// Write failed and invalid rows to this CSV file
    #[arg(long)]
    pub failures_out: Option<PathBuf>,

    /// Validate rows without creating anything
    #[arg(long)]
    pub dry_run: bool,
}

/// How a command finished, for the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Some rows were not uploaded (invalid, failed, or paused).
    Incomplete,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut overrides = Overrides {
            url: self.url.clone(),
            token: self.token.clone(),
            known_endpoint: self.known_endpoint.clone(),
            verbose: self.verbose,
            ..Overrides::default()
        };
        if let Command::Upload(args) = &self.command {
            overrides.batch_size = args.batch_size;
            overrides.delay_ms = args.delay_ms;
            overrides.request_timeout_secs = args.timeout_secs;
            overrides.separator = args.separator.clone();
            overrides.no_headers = args.no_headers;
            overrides.skip_empty = args.skip_empty;
            overrides.keep_empty = args.keep_empty;
            overrides.no_empty_numbers_zero = args.no_empty_numbers_zero;
            overrides.mapping = args.mappings.clone();
            overrides.defaults = args.defaults.clone();
        }
        overrides
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Runs the parsed command.
pub async fn run(cli: Cli) -> Result<RunStatus, AppError> {
    let file = FileConfig::discover(cli.config.as_deref())?;
    let settings = Settings::resolve(file, cli.overrides())?;

    match &cli.command {
        Command::Types => list_types(&settings).await,
        Command::Fields { content_type } => show_fields(&settings, content_type).await,
        Command::Upload(args) => upload(&settings, args).await,
    }
}

async fn connect(settings: &Settings) -> Result<(StrapiClient, SchemaSource), AppError> {
    let connection = settings.connection()?;
    let timeout = http_timeout(settings.dispatch.request_timeout);
    let client =
        StrapiClient::with_timeout(connection, timeout)?.with_logging_mode(settings.logging_mode);
    let schema = SchemaSource::new(client.clone());
    schema.test_connection().await?;
    info!("[CLI] Connected to {}", client.connection().base_url);
    Ok((client, schema))
}

fn http_timeout(request_timeout: Duration) -> Duration {
    request_timeout + HTTP_TIMEOUT_MARGIN
}

async fn list_types(settings: &Settings) -> Result<RunStatus, AppError> {
    let (_, schema) = connect(settings).await?;
    let types = schema.discover().await?;

    for content_type in &types {
        println!(
            "{}\t{}\t{} fields",
            content_type.uid,
            content_type.display_name,
            content_type.fields().len()
        );
    }
    Ok(RunStatus::Success)
}

async fn show_fields(settings: &Settings, uid: &str) -> Result<RunStatus, AppError> {
    let (_, schema) = connect(settings).await?;
    let content_type = schema.find(uid).await?;
    print_fields(&content_type);
    Ok(RunStatus::Success)
}

fn print_fields(content_type: &ContentType) {
    println!("{} ({})", content_type.display_name, content_type.uid);
    for field in content_type.fields() {
        let marker = if field.required { " (required)" } else { "" };
        println!("  {}\t{}{}", field.name, field.field_type, marker);
    }
}

async fn upload(settings: &Settings, args: &UploadArgs) -> Result<RunStatus, AppError> {
    let table = read_table(&args.file, settings.separator, settings.has_headers).await?;
    info!(
        "[CLI] Read {} rows with columns: {}",
        table.rows.len(),
        table.headers.join(", ")
    );

    let (client, schema) = connect(settings).await?;
    let content_type = schema.find(&args.content_type).await?;

    let sink = Arc::new(StrapiRecordSink::new(client));
    let mut session = UploadSession::new(
        sink,
        content_type.uid.clone(),
        content_type.fields(),
        table,
        settings.dispatch,
    );
    for (field, column) in &settings.mapping {
        session.assign(field, column)?;
    }
    for (field, value) in &settings.defaults {
        session.set_default(field, value.clone())?;
    }
    session.set_policy(settings.policy);

    if args.dry_run {
        return dry_run(&session, args);
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let mut session = session.with_progress(tx);
    let progress_printer = tokio::spawn(print_progress(rx));

    let interrupt = pause_on_ctrl_c(session.pause_handle());
    let first = session.upload(args.start_row).await;
    interrupt.abort();
    let mut last = first?;
    report_outcome(&last);
    let validation_errors = last.validation_errors.clone();

    for attempt in 1..=args.retry_failed {
        let halted = matches!(
            last.status,
            DispatchStatus::PausedMidRun | DispatchStatus::Fatal { .. }
        );
        if halted || session.failed_rows().is_empty() {
            break;
        }
        info!("[CLI] Retry attempt {} of {}", attempt, args.retry_failed);
        let interrupt = pause_on_ctrl_c(session.pause_handle());
        let retried = session.retry_failed().await;
        interrupt.abort();
        match retried? {
            Some(outcome) => {
                report_outcome(&outcome);
                last = outcome;
            }
            None => break,
        }
    }

    if let Some(path) = &args.failures_out {
        let (written, count) = write_failure_report(
            path,
            session.table(),
            &session.failed_rows(),
            &validation_errors,
        )?;
        println!("Wrote {} rows to {}", count, written.display());
    }

    drop(session);
    let _ = progress_printer.await;

    if last.status == DispatchStatus::Completed && validation_errors.is_empty() {
        Ok(RunStatus::Success)
    } else {
        Ok(RunStatus::Incomplete)
    }
}

fn dry_run(
    session: &UploadSession<StrapiRecordSink>,
    args: &UploadArgs,
) -> Result<RunStatus, AppError> {
    let results = session.dry_run()?;
    let total = results.len();
    let invalid: Vec<ValidationResult> = results.into_iter().filter(|r| !r.is_valid()).collect();

    print_row_errors(&invalid);
    println!("{} of {} rows are valid", total - invalid.len(), total);

    if let Some(path) = &args.failures_out {
        let (written, count) = write_failure_report(path, session.table(), &[], &invalid)?;
        println!("Wrote {} rows to {}", count, written.display());
    }

    Ok(if invalid.is_empty() {
        RunStatus::Success
    } else {
        RunStatus::Incomplete
    })
}

/// Cancels `pause` on Ctrl-C. Abort the handle once the run is over.
fn pause_on_ctrl_c(pause: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("[CLI] Interrupted, pausing after the current batch");
            pause.cancel();
        }
    })
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            "[CLI] {}% ({}/{} rows, {} failed)",
            event.progress_percent, event.next_row, event.total_rows, event.failed_count
        );
    }
}

fn report_outcome(outcome: &DispatchOutcome) {
    print_row_errors(&outcome.validation_errors);
    println!("{}", outcome.summary());
    if outcome.status == DispatchStatus::PausedMidRun {
        println!("Continue with --start-row {}", outcome.next_row);
    }
}

fn print_row_errors(results: &[ValidationResult]) {
    for result in results.iter().take(MAX_PRINTED_ROW_ERRORS) {
        eprintln!("Row {}: {}", result.row_index, result.errors.join("; "));
    }
    if results.len() > MAX_PRINTED_ROW_ERRORS {
        eprintln!(
            "... and {} more invalid rows",
            results.len() - MAX_PRINTED_ROW_ERRORS
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("strapi-stampede").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    async fn mock_articles(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/articles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 1, "documentId": "a1", "title": "First", "views": 3}],
                "meta": {}
            })))
            .mount(server)
            .await;
    }

    #[test]
    fn upload_flags_parse() {
        let cli = parse(&[
            "--url",
            "cms.example.com",
            "upload",
            "--content-type",
            "articles",
            "--file",
            "rows.csv",
            "--map",
            "title=Name",
            "--map",
            "views=Count",
            "--default",
            "views=1",
            "--batch-size",
            "4",
            "--start-row",
            "2",
            "--retry-failed",
            "3",
            "--dry-run",
        ]);

        let Command::Upload(args) = &cli.command else {
            panic!("expected upload command");
        };
        assert_eq!(args.mappings.len(), 2);
        assert_eq!(args.mappings[0], ("title".to_string(), "Name".to_string()));
        assert_eq!(args.start_row, 2);
        assert_eq!(args.retry_failed, 3);
        assert!(args.dry_run);

        let overrides = cli.overrides();
        assert_eq!(overrides.batch_size, Some(4));
        assert_eq!(overrides.defaults, vec![("views".to_string(), "1".to_string())]);
    }

    #[test]
    fn http_client_outlasts_row_timeout() {
        let row_timeout = Duration::from_secs(30);
        assert!(http_timeout(row_timeout) > row_timeout);

        assert!(parse(&["-v", "types"]).overrides().verbose);
        assert!(!parse(&["types"]).overrides().verbose);
    }

    #[test]
    fn bad_mapping_is_rejected() {
        let result = Cli::try_parse_from([
            "strapi-stampede",
            "upload",
            "--content-type",
            "articles",
            "--file",
            "rows.csv",
            "--map",
            "title",
        ]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn upload_end_to_end_writes_failure_report() {
        crate::logging::init_test();
        let server = MockServer::start().await;
        mock_articles(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/articles"))
            .and(body_partial_json(json!({"data": {"title": "Broken"}})))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"status": 400, "message": "Invalid title"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/articles"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "data": {"id": 2, "documentId": "b2"}
            })))
            .expect(2)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("rows.csv");
        fs::write(&csv, "Name,Count\nHello,1\nBroken,2\nWorld,\n").unwrap();
        let failures = dir.path().join("failures.csv");
        let config = dir.path().join("empty.toml");
        fs::write(&config, "").unwrap();

        let cli = parse(&[
            "--config",
            config.to_str().unwrap(),
            "--url",
            &server.uri(),
            "--token",
            "t0ken",
            "--known-endpoint",
            "/api/articles",
            "upload",
            "--content-type",
            "articles",
            "--file",
            csv.to_str().unwrap(),
            "--map",
            "title=Name",
            "--map",
            "views=Count",
            "--batch-size",
            "2",
            "--delay-ms",
            "0",
            "--failures-out",
            failures.to_str().unwrap(),
        ]);

        let status = run(cli).await.unwrap();

        assert_eq!(status, RunStatus::Incomplete);
        let report = fs::read_to_string(&failures).unwrap();
        let lines: Vec<&str> = report.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "row_index,stage,error,Name,Count");
        assert_eq!(lines[1], "1,upload,HTTP error 400: Invalid title,Broken,2");
    }

    #[tokio::test]
    async fn dry_run_sends_nothing() {
        let server = MockServer::start().await;
        mock_articles(&server).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("rows.csv");
        fs::write(&csv, "Name;Count\nHello;abc\n").unwrap();
        let config = dir.path().join("empty.toml");
        fs::write(&config, "").unwrap();

        let cli = parse(&[
            "--config",
            config.to_str().unwrap(),
            "--url",
            &server.uri(),
            "--known-endpoint",
            "/api/articles",
            "upload",
            "--content-type",
            "api::articles.articles",
            "--file",
            csv.to_str().unwrap(),
            "--separator",
            ";",
            "--map",
            "title=Name",
            "--dry-run",
        ]);

        assert_eq!(run(cli).await.unwrap(), RunStatus::Success);
    }

    #[tokio::test]
    async fn unknown_mapping_field_fails_before_upload() {
        let server = MockServer::start().await;
        mock_articles(&server).await;

        let dir = TempDir::new().unwrap();
        let csv = dir.path().join("rows.csv");
        fs::write(&csv, "Name\nHello\n").unwrap();
        let config = dir.path().join("empty.toml");
        fs::write(&config, "").unwrap();

        let cli = parse(&[
            "--config",
            config.to_str().unwrap(),
            "--url",
            &server.uri(),
            "--known-endpoint",
            "/api/articles",
            "upload",
            "--content-type",
            "articles",
            "--file",
            csv.to_str().unwrap(),
            "--map",
            "headline=Name",
        ]);

        assert!(matches!(run(cli).await, Err(AppError::UnknownField(_))));
    }
}
