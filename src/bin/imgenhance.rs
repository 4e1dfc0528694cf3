//! CLI binary for imgenhance.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EnhanceConfig`, runs one job and prints the result reference.

use anyhow::{Context, Result};
use clap::Parser;
use imgenhance::{
    download_result, resolve_source, save_comparison, EnhanceConfig, EnhanceSession, JobId,
    PredictionReply, PredictionResult, SharedObserver, StateObserver, UiState,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner whose prefix follows the job's phase.
struct CliObserver {
    bar: ProgressBar,
    start: Instant,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Waiting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start: Instant::now(),
        })
    }
}

impl StateObserver for CliObserver {
    fn on_transition(&self, _job: JobId, _from: &UiState, to: &UiState) {
        match to {
            UiState::Idle => self.bar.set_prefix("Idle"),
            UiState::Normalizing => {
                self.bar.set_prefix("Normalizing");
                self.bar.set_message("resizing and re-encoding…");
            }
            UiState::Submitting => {
                self.bar.set_prefix("Submitting");
                self.bar.set_message("uploading to the enhancement service…");
            }
            UiState::AwaitingResult { prediction_id } => {
                self.bar.set_prefix("Processing");
                self.bar.set_message(format!("prediction {prediction_id}"));
            }
            UiState::Ready(_) => {
                self.bar.finish_and_clear();
                eprintln!(
                    "{} {}  {}",
                    green("✔"),
                    bold("Enhanced"),
                    dim(&format!("{:.1}s", self.start.elapsed().as_secs_f64()))
                );
            }
            UiState::Failed(err) => {
                self.bar.finish_and_clear();
                eprintln!("{} {}  {}", red("✗"), bold("Failed"), err);
            }
        }
    }

    fn on_stale(&self, job: JobId, current: JobId) {
        self.bar
            .println(dim(&format!("  discarded late report from {job} (now {current})")));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Enhance a local photo, print the result URL
  imgenhance photo.png

  # Enhance and save the result next to you
  imgenhance photo.png -o enhanced.jpg

  # Enhance an image from a URL and write a before/after page
  imgenhance https://example.com/cat.jpg --compare compare.html

  # Look up a running prediction
  imgenhance --status 7x3kq2

  # List jobs known to the service
  imgenhance --list --json

ENVIRONMENT VARIABLES:
  IMGENHANCE_ENDPOINT         Submission endpoint (POST, multipart `image`)
  IMGENHANCE_STATUS_ENDPOINT  Status base URL (GET {base}/{id}); defaults to the endpoint
  RUST_LOG                    Override the log filter (e.g. imgenhance=debug)
"#;

/// Enhance images with a remote super-resolution service.
#[derive(Parser, Debug)]
#[command(
    name = "imgenhance",
    version,
    about = "Enhance images with a remote super-resolution service",
    long_about = "Normalize an image (long edge ≤ 800 px, JPEG, ≤ 512 000 bytes), submit it to a \
super-resolution endpoint and print the enhanced image reference. Pending jobs are polled \
until they finish.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image path or HTTP/HTTPS URL.
    #[arg(required_unless_present_any = ["status", "list"])]
    input: Option<String>,

    /// Submission endpoint.
    #[arg(long, env = "IMGENHANCE_ENDPOINT", default_value = "http://localhost:3000/api/predictions")]
    endpoint: String,

    /// Status base URL; defaults to the endpoint.
    #[arg(long, env = "IMGENHANCE_STATUS_ENDPOINT")]
    status_endpoint: Option<String>,

    /// Byte budget for the normalized image.
    #[arg(long, env = "IMGENHANCE_MAX_BYTES", default_value_t = 512_000)]
    max_bytes: usize,

    /// Cap on the long edge in pixels.
    #[arg(long, env = "IMGENHANCE_MAX_DIMENSION", default_value_t = 800)]
    max_dimension: u32,

    /// JPEG quality for the re-encode (1–100).
    #[arg(long, env = "IMGENHANCE_QUALITY", default_value_t = 70,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Do not poll pending jobs; report them as failures instead.
    #[arg(long)]
    no_poll: bool,

    /// Delay between status polls in milliseconds.
    #[arg(long, env = "IMGENHANCE_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Give up after this many status polls.
    #[arg(long, env = "IMGENHANCE_MAX_POLLS")]
    max_polls: Option<u32>,

    /// Client timeout for submit/status calls in seconds (default: none).
    #[arg(long, env = "IMGENHANCE_TIMEOUT")]
    timeout: Option<u64>,

    /// Timeout for URL inputs and result downloads in seconds.
    #[arg(long, env = "IMGENHANCE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Save the enhanced image to this file or directory.
    #[arg(short = 'o', long)]
    download: Option<PathBuf>,

    /// Write a before/after HTML page to this file.
    #[arg(long)]
    compare: Option<PathBuf>,

    /// Look up a prediction by id instead of submitting.
    #[arg(long, conflicts_with = "list")]
    status: Option<String>,

    /// List jobs known to the status endpoint.
    #[arg(long)]
    list: bool,

    /// Output JSON instead of plain text.
    #[arg(long, env = "IMGENHANCE_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "IMGENHANCE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMGENHANCE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMGENHANCE_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO logs; verbose mode always gets everything.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Diagnostics ──────────────────────────────────────────────────────
    if let Some(ref id) = cli.status {
        let session = EnhanceSession::new(build_config(&cli, None)?)?;
        let reply = session
            .prediction_status(id)
            .await
            .context("Status lookup failed")?;
        print_reply(&reply, cli.json)?;
        return Ok(());
    }

    if cli.list {
        let session = EnhanceSession::new(build_config(&cli, None)?)?;
        let listing = session.predictions().await.context("Job listing failed")?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&listing)?);
        } else {
            println!("{} job(s)", listing.count);
            for entry in &listing.entries {
                let id = entry.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                let status = entry.get("status").and_then(|v| v.as_str()).unwrap_or("?");
                println!("  {id:<24} {status}");
            }
        }
        return Ok(());
    }

    // ── Enhance ──────────────────────────────────────────────────────────
    let input = cli
        .input
        .as_deref()
        .context("An input image path or URL is required")?;

    let observer: Option<SharedObserver> = if show_progress {
        Some(CliObserver::new() as Arc<dyn StateObserver>)
    } else {
        None
    };
    let config = build_config(&cli, observer)?;
    let session = EnhanceSession::new(config.clone())?;

    let source = resolve_source(input, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load '{input}'"))?;
    let snapshot = session.enhance(source).await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    }

    let result = match snapshot.state {
        UiState::Ready(result) => result,
        UiState::Failed(err) => anyhow::bail!("Enhancement failed: {err}"),
        other => anyhow::bail!("Job ended unexpectedly while {}", other.phase()),
    };

    if !cli.json {
        print_result(&result)?;
    }

    if let Some(ref dest) = cli.download {
        let path = download_result(&result, Some(dest), &config)
            .await
            .context("Download failed")?;
        if !cli.quiet {
            eprintln!("{} saved  {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    if let Some(ref path) = cli.compare {
        let source = session
            .source()
            .context("The original image is no longer available")?;
        save_comparison(&source, &result, path)
            .await
            .context("Failed to write comparison page")?;
        if !cli.quiet {
            eprintln!("{} compare  {}", green("✔"), bold(&path.display().to_string()));
        }
    }

    Ok(())
}

fn build_config(cli: &Cli, observer: Option<SharedObserver>) -> Result<EnhanceConfig> {
    let mut builder = EnhanceConfig::builder()
        .endpoint(&cli.endpoint)
        .max_bytes(cli.max_bytes)
        .max_dimension(cli.max_dimension)
        .jpeg_quality(cli.quality)
        .poll_pending(!cli.no_poll)
        .poll_interval_ms(cli.poll_interval_ms)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref url) = cli.status_endpoint {
        builder = builder.status_endpoint(url);
    }
    if let Some(n) = cli.max_polls {
        builder = builder.max_polls(n);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}

fn print_result(result: &PredictionResult) -> Result<()> {
    match result {
        PredictionResult::Url(url) => println!("{url}"),
        PredictionResult::Structured(value) => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
    }
    Ok(())
}

fn print_reply(reply: &PredictionReply, json: bool) -> Result<()> {
    match reply {
        PredictionReply::Ready(result) if json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        PredictionReply::Ready(result) => print_result(result)?,
        PredictionReply::Pending { id, status } if json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({ "id": id, "status": status }))?
        ),
        PredictionReply::Pending { id, status } => println!("{id}  {status}"),
    }
    Ok(())
}
