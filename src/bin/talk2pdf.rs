//! CLI binary for talk2pdf.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! drives the batch runner, and owns every interactive prompt (retry loops,
//! scratch-deletion confirmations) so the library stays prompt-free.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use talk2pdf::{
    ArtifactStore, BatchReport, BatchRunner, InputJob, InputType, PipelineConfig, StandardPlanner,
    StateStore,
};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a YouTube lecture to PDF notes
  talk2pdf https://www.youtube.com/watch?v=dQw4w9WgXcQ

  # Convert a local recording
  talk2pdf lecture.mp4

  # Convert a folder of transcripts and recordings (.txt/.md/.mp3/.mp4)
  talk2pdf ./lectures/

  # Re-run everything, ignoring cached step outputs
  talk2pdf --force-reprocess lecture.mp4

  # Interactive menu
  talk2pdf

RESUME:
  Every step's output is cached in the state database. When a run fails —
  say the image search step hit its quota — fix the cause and run the same
  input again (or answer the retry prompt): the pipeline restarts at the
  failed step using the cached outputs of everything before it.

ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY   Chat-completions key (notes + LaTeX generation)
  ASSEMBLYAI_API_KEY   Transcription key
  GOOGLE_API_KEY       Image search key
  GOOGLE_CSE_ID        Custom search engine id
  TALK2PDF_MODEL       Override the generation model

  Variables are also read from a .env file in the working directory.

EXTERNAL TOOLS:
  ffmpeg      audio extraction from local video
  yt-dlp      audio download from URLs
  latexmk     PDF compilation (with pdflatex)
"#;

/// Convert spoken-word videos and transcripts into illustrated PDF lecture notes.
#[derive(Parser, Debug)]
#[command(
    name = "talk2pdf",
    version,
    about = "Convert spoken-word videos and transcripts into illustrated PDF lecture notes",
    long_about = "Convert lecture recordings (YouTube URLs, local .mp4/.mp3 files) and raw \
transcripts (.txt/.md) into polished PDF lecture notes with illustrations. Each pipeline \
step is cached per input, and failed runs resume from the failed step.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// YouTube URL, a media/transcript file, or a folder of them.
    /// Omit to use the interactive menu.
    input: Option<String>,

    /// State database path.
    #[arg(long, env = "TALK2PDF_DB", default_value = "data/outputs/tasks.db")]
    db_path: PathBuf,

    /// Scratch directory for intermediate artifacts.
    #[arg(long, env = "TALK2PDF_TEMP_DIR", default_value = "data/temp")]
    temp_dir: PathBuf,

    /// Directory for run outputs and the error log.
    #[arg(long, env = "TALK2PDF_OUTPUT_DIR", default_value = "data/outputs")]
    output_dir: PathBuf,

    /// Directory for final PDFs.
    #[arg(long, env = "TALK2PDF_PDF_DIR", default_value = "data/pdfs")]
    pdf_dir: PathBuf,

    /// Generation model id.
    #[arg(long, env = "TALK2PDF_MODEL")]
    model: Option<String>,

    /// Re-run every step even when a cached output exists.
    #[arg(long, env = "TALK2PDF_FORCE")]
    force_reprocess: bool,

    /// Keep running later steps after one fails (diagnostic runs).
    #[arg(long)]
    continue_on_error: bool,

    /// Keep scratch files without asking.
    #[arg(long, conflicts_with = "clean_temp")]
    keep_temp: bool,

    /// Delete scratch files after each run without asking.
    #[arg(long)]
    clean_temp: bool,

    /// Disable the batch progress bar.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TALK2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and prompts.
    #[arg(short, long)]
    quiet: bool,
}

/// What to do with scratch files after a run.
#[derive(Clone, Copy, PartialEq)]
enum CleanupMode {
    Ask,
    Keep,
    Clean,
}

#[tokio::main]
async fn main() -> Result<()> {
    // API keys commonly live in a .env next to the data directory.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let mut builder = PipelineConfig::builder()
        .db_path(&cli.db_path)
        .temp_dir(&cli.temp_dir)
        .output_dir(&cli.output_dir)
        .pdf_dir(&cli.pdf_dir)
        .force_reprocess(cli.force_reprocess)
        .continue_on_error(cli.continue_on_error);
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    let config = builder.build().context("Invalid configuration")?;

    let state = StateStore::open(&config.db_path).context("Failed to open state database")?;

    let cleanup = if cli.keep_temp {
        CleanupMode::Keep
    } else if cli.clean_temp {
        CleanupMode::Clean
    } else {
        CleanupMode::Ask
    };

    match cli.input.clone() {
        Some(input) => run_input(&input, &config, &state, cleanup, &cli).await,
        None => interactive_menu(&config, &state, cleanup, &cli).await,
    }
}

/// Dispatch a positional input: URL, single file, or folder.
async fn run_input(
    input: &str,
    config: &PipelineConfig,
    state: &StateStore,
    cleanup: CleanupMode,
    cli: &Cli,
) -> Result<()> {
    if input.starts_with("http://") || input.starts_with("https://") {
        let jobs = vec![InputJob::new(input, InputType::YoutubeUrl)];
        return run_jobs(&jobs, config, state, cleanup, cli).await;
    }

    let path = Path::new(input);
    if path.is_dir() {
        let jobs = collect_folder_jobs(path)?;
        return run_jobs(&jobs, config, state, cleanup, cli).await;
    }
    if path.is_file() {
        let job = InputJob::from_path(path)
            .with_context(|| format!("Unsupported file type: {input} (expected .txt/.md/.mp3/.mp4)"))?;
        return run_jobs(&[job], config, state, cleanup, cli).await;
    }

    anyhow::bail!("Input '{input}' is neither a URL nor an existing file or folder")
}

/// The original three-entry menu: URL, folder, exit.
async fn interactive_menu(
    config: &PipelineConfig,
    state: &StateStore,
    cleanup: CleanupMode,
    cli: &Cli,
) -> Result<()> {
    loop {
        println!("\nWhat do you want to do?");
        println!("  1. Convert a YouTube URL to PDF");
        println!("  2. Convert a folder of files (.txt/.md/.mp3/.mp4) to PDFs");
        println!("  3. Exit");
        match prompt("Enter choice (1-3): ")?.as_str() {
            "1" => {
                let url = prompt("Enter YouTube URL: ")?;
                if url.is_empty() {
                    continue;
                }
                let jobs = vec![InputJob::new(url, InputType::YoutubeUrl)];
                run_jobs(&jobs, config, state, cleanup, cli).await?;
            }
            "2" => {
                let folder = prompt("Enter folder path: ")?;
                let path = PathBuf::from(folder);
                if !path.is_dir() {
                    eprintln!("{}", red(&format!("Folder {} does not exist", path.display())));
                    continue;
                }
                match collect_folder_jobs(&path) {
                    Ok(jobs) => run_jobs(&jobs, config, state, cleanup, cli).await?,
                    Err(e) => eprintln!("{}", red(&e.to_string())),
                }
            }
            "3" => {
                println!("Exiting. Goodbye!");
                return Ok(());
            }
            other => eprintln!("Invalid choice '{other}'. Please enter 1, 2, or 3."),
        }
    }
}

/// Supported files in a folder, sorted for a deterministic processing order.
fn collect_folder_jobs(folder: &Path) -> Result<Vec<InputJob>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("Cannot read folder {}", folder.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();
    paths.sort();

    let jobs: Vec<InputJob> = paths
        .iter()
        .filter_map(|p| InputJob::from_path(p))
        .collect();
    if jobs.is_empty() {
        anyhow::bail!(
            "No supported files (.txt/.md/.mp3/.mp4) found in {}",
            folder.display()
        );
    }
    Ok(jobs)
}

/// Run a batch, print its summary, offer retries, then clean up scratch.
async fn run_jobs(
    jobs: &[InputJob],
    config: &PipelineConfig,
    state: &StateStore,
    cleanup: CleanupMode,
    cli: &Cli,
) -> Result<()> {
    let runner = BatchRunner::new(config, StandardPlanner);
    let artifacts = ArtifactStore::new(config).context("Failed to prepare data directories")?;

    let bar = if !cli.quiet && !cli.no_progress && jobs.len() > 1 {
        let bar = ProgressBar::new(jobs.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>2}/{len} inputs  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    // Sequential by design; the bar only tracks whole inputs.
    let mut report = BatchReport::default();
    for job in jobs {
        let round = runner.process(state, std::slice::from_ref(job)).await;
        if let Some(ref bar) = bar {
            for s in &round.succeeded {
                bar.println(format!("  {} {}", green("✓"), s.input));
            }
            for f in &round.failures {
                bar.println(format!("  {} {}  ({})", red("✗"), f.input, f.failed_step));
            }
            bar.inc(1);
        }
        report.succeeded.extend(round.succeeded);
        report.failures.extend(round.failures);
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    print_summary(&report);

    // Bounded only by the user's patience: retry until everything succeeds
    // or they decline.
    while !report.failures.is_empty() {
        if !confirm("Retry failed files? [y/N]: ")? {
            break;
        }
        let retry = runner.resume(state, &report.failures).await;
        print_summary(&retry);
        report.succeeded.extend(retry.succeeded);
        report.failures = retry.failures;
    }

    // Per-id scratch cleanup, then whatever is left.
    for s in &report.succeeded {
        prompt_cleanup(&artifacts, s.id, &s.input, cleanup)?;
    }
    for f in &report.failures {
        if f.id > 0 {
            prompt_cleanup(&artifacts, f.id, &f.input, cleanup)?;
        }
    }
    if jobs.len() > 1 {
        prompt_batch_cleanup(&artifacts, cleanup)?;
    }

    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!("\n=== Processing Summary ===");
    for s in &report.succeeded {
        println!(
            "{} {} {} {}",
            green("SUCCESS:"),
            s.input,
            dim("->"),
            bold(&s.pdf.display().to_string())
        );
        if s.image_rate_limited {
            println!(
                "{}",
                cyan(
                    "  WARNING: image search hit its rate limit (429); the PDF contains \
                     placeholders instead of some images. Try again later or use another key."
                )
            );
        }
        if s.images_total > 0 && s.images_present < s.images_total {
            println!(
                "{}",
                cyan(&format!(
                    "  WARNING: only {}/{} images were included; the rest could not be found.",
                    s.images_present, s.images_total
                ))
            );
        }
    }
    for f in &report.failures {
        println!(
            "{} {} {} {} ({})",
            red("FAILED: "),
            f.input,
            dim("at"),
            bold(f.failed_step.as_str()),
            f.error.lines().next().unwrap_or("")
        );
    }
}

/// Ask whether to keep one input's scratch files; default is to delete.
fn prompt_cleanup(
    artifacts: &ArtifactStore,
    id: i64,
    input: &str,
    mode: CleanupMode,
) -> Result<()> {
    let delete = match mode {
        CleanupMode::Keep => false,
        CleanupMode::Clean => true,
        CleanupMode::Ask => !confirm(&format!(
            "Keep temp files for {input} ({}/{id:03}_*)? [y/N]: ",
            artifacts.temp_dir().display()
        ))?,
    };
    if delete {
        artifacts
            .clear_scratch(id)
            .with_context(|| format!("Failed to clear scratch for id {id:03}"))?;
    }
    Ok(())
}

/// Offer to wipe the whole scratch root, listing what would go.
fn prompt_batch_cleanup(artifacts: &ArtifactStore, mode: CleanupMode) -> Result<()> {
    if mode == CleanupMode::Keep {
        return Ok(());
    }
    let entries = artifacts.scratch_entries()?;
    if entries.is_empty() {
        println!("No temp files to delete in {}.", artifacts.temp_dir().display());
        return Ok(());
    }

    if mode == CleanupMode::Ask {
        println!("The following temp files and directories will be deleted if you confirm:");
        for entry in &entries {
            let label = if entry.is_dir() { "DIR: " } else { "FILE:" };
            println!("  {label} {}", entry.display());
        }
        if !confirm(&format!(
            "Clear all temp files in {}? [y/N]: ",
            artifacts.temp_dir().display()
        ))? {
            return Ok(());
        }
    }
    artifacts.clear_all().context("Failed to clear scratch root")?;
    Ok(())
}

// ── Prompt helpers ───────────────────────────────────────────────────────────

fn prompt(message: &str) -> Result<String> {
    print!("{message}");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn confirm(message: &str) -> Result<bool> {
    Ok(prompt(message)?.eq_ignore_ascii_case("y"))
}
