//! narrate - Turn a directory of chapter text files into audio through an HTTP TTS service

mod chapters;
mod config;
mod coordinator;
mod error;
mod job;
mod report;
mod text;
mod tts;

use anyhow::{Context, Result};
use chapters::ChapterRange;
use clap::{Parser, Subcommand};
use config::NarrateConfig;
use coordinator::{JobScheduler, SchedulerOptions};
use error::NarrateError;
use indicatif::{ProgressBar, ProgressStyle};
use job::{JobPlan, JobStatus};
use report::{RunReport, format_bytes};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use text::{ChapterUnit, LineMode};
use tts::{HttpTtsBackend, RequestStyle, TtsBackend, VoiceOptions};

#[derive(Parser, Debug)]
#[command(name = "narrate")]
#[command(about = "Turn a directory of chapter text files into audio through an HTTP TTS service", long_about = None)]
#[command(version)]
struct Args {
    /// Directory containing chapter text files
    source_dir: Option<PathBuf>,

    /// Output directory (default: <SOURCE_DIR>/audio)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TTS service base URL (e.g., "http://127.0.0.1:5000")
    #[arg(long)]
    url: Option<String>,

    /// Voice identifier
    #[arg(long)]
    voice: Option<String>,

    /// Speaking rate (e.g., "+10%")
    #[arg(long, allow_hyphen_values = true)]
    rate: Option<String>,

    /// Pitch (e.g., "-2Hz")
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<String>,

    /// Request style for the TTS endpoint
    #[arg(long, value_enum)]
    style: Option<RequestStyle>,

    /// Maximum concurrent requests
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Split chapters into segments of at most this many characters (0 = whole chapters)
    #[arg(long)]
    segment_length: Option<usize>,

    /// Minimum valid output size in bytes
    #[arg(long)]
    min_size: Option<u64>,

    /// Delay between request dispatches in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Per-request timeout in seconds (0 = no timeout)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Audio file extension
    #[arg(long)]
    ext: Option<String>,

    /// Extension of the chapter text files
    #[arg(long, default_value = "txt")]
    input_ext: String,

    /// Join lines with spaces instead of newlines
    #[arg(long, default_value_t = false)]
    collapse: bool,

    /// Chapter range to process (e.g., "1-10" or "5")
    #[arg(long)]
    chapters: Option<String>,

    /// Keep valid audio from an earlier run instead of requesting it again
    #[arg(long, default_value_t = false)]
    skip_existing: bool,

    /// Write a JSON run report to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set the default TTS service URL
    SetUrl {
        /// Base URL (without /tts)
        url: String,
    },
    /// Set the default voice
    SetVoice {
        /// Voice identifier
        voice: String,
    },
    /// Set the default number of concurrent requests
    SetJobs {
        /// Value (at least 1)
        jobs: usize,
    },
}

/// Run settings after merging CLI flags over the config file.
#[derive(Debug)]
struct Settings {
    url: String,
    style: RequestStyle,
    voice: VoiceOptions,
    max_jobs: usize,
    segment_length: usize,
    min_size: Option<u64>,
    delay: Duration,
    timeout: Option<Duration>,
    audio_ext: String,
}

impl Settings {
    fn merge(args: &Args, config: NarrateConfig) -> Self {
        let timeout_secs = args.timeout_secs.unwrap_or(config.timeout_secs);
        Self {
            url: args.url.clone().unwrap_or(config.tts_url),
            style: args.style.unwrap_or(config.request_style),
            voice: VoiceOptions::new()
                .with_voice(args.voice.clone().unwrap_or(config.voice))
                .with_rate(args.rate.clone().unwrap_or(config.rate))
                .with_pitch(args.pitch.clone().unwrap_or(config.pitch)),
            max_jobs: args.jobs.unwrap_or(config.max_jobs).max(1),
            segment_length: args.segment_length.unwrap_or(config.segment_length),
            min_size: args.min_size.or(config.min_size),
            delay: Duration::from_millis(args.delay_ms.unwrap_or(config.delay_ms)),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            audio_ext: args
                .ext
                .clone()
                .unwrap_or(config.audio_ext)
                .trim_start_matches('.')
                .to_string(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    // Handle subcommands
    if let Some(Commands::Config { action }) = &args.command {
        return handle_config_command(action);
    }

    let source_dir = args
        .source_dir
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Source directory is required. Run 'narrate --help' for usage."))?;

    // Load configuration
    let config = NarrateConfig::load().context("Failed to load configuration")?;
    let settings = Settings::merge(&args, config);
    let output_dir = args.output.clone().unwrap_or_else(|| source_dir.join("audio"));

    log::debug!("Source: {}", source_dir.display());
    log::debug!("Output: {}", output_dir.display());
    log::debug!("Settings: {:?}", settings);

    let started_at = chrono::Utc::now();

    // Discover chapters
    let mut chapter_files = match chapters::list_chapters(&source_dir, &args.input_ext) {
        Ok(files) => files,
        Err(e @ NarrateError::EmptyDirectory { .. }) => {
            eprintln!("{}; nothing to do", e);
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(ref range) = args.chapters {
        let range = ChapterRange::parse(range)?;
        chapter_files.retain(|c| range.contains(c));
        if chapter_files.is_empty() {
            eprintln!("No chapters in range {}-{}; nothing to do", range.start, range.end);
            return Ok(());
        }
    }

    eprintln!("Chapters: {}", chapter_files.len());

    // Load and normalize text
    let mode = if args.collapse {
        LineMode::Collapse
    } else {
        LineMode::Preserve
    };
    let units: Vec<ChapterUnit> = chapter_files
        .into_iter()
        .map(|file| ChapterUnit::load(file, mode))
        .collect();

    for unit in units.iter().filter(|u| u.is_empty()) {
        log::warn!(
            "{}; skipping",
            NarrateError::EmptyContent {
                chapter: unit.name().to_string()
            }
        );
    }

    job::prepare_output_dir(&output_dir)?;

    let plan = JobPlan {
        output_dir: output_dir.clone(),
        extension: settings.audio_ext.clone(),
        segment_length: settings.segment_length,
        min_bytes: settings.min_size,
        voice: settings.voice.clone(),
    };
    let jobs = job::plan_jobs(&units, &plan)?;

    // Unreadable chapters fail on their own; the rest still run.
    let mut results = job::unreadable_results(&units, &plan);
    if jobs.is_empty() {
        eprintln!("No speakable text in any chapter");
    } else {
        results.extend(run_jobs(jobs, &settings, args.skip_existing).await?);
    }

    // Report summary
    let report = RunReport::from_results(started_at, &units, &results);
    eprintln!();
    for line in report.summary() {
        eprintln!("{}", line);
    }

    if let Some(ref path) = args.report {
        report.write_json(path)?;
        eprintln!("Report: {}", path.display());
    }

    if report.nothing_succeeded() {
        anyhow::bail!("No audio was produced ({} jobs failed)", report.failed.len());
    }

    Ok(())
}

/// Send every job to the TTS service and wait for all of them.
async fn run_jobs(
    jobs: Vec<job::NarrationJob>,
    settings: &Settings,
    skip_existing: bool,
) -> Result<Vec<job::JobResult>> {
    let backend = HttpTtsBackend::new(&settings.url, settings.style, settings.timeout)
        .context("Failed to create TTS client")?;
    eprintln!("TTS endpoint: {}", backend.endpoint());
    eprintln!(
        "Processing {} jobs ({} at a time)...",
        jobs.len(),
        settings.max_jobs
    );

    let backend: Arc<dyn TtsBackend> = Arc::new(backend);
    let scheduler = JobScheduler::new(
        backend,
        SchedulerOptions {
            max_in_flight: settings.max_jobs,
            delay: settings.delay,
            skip_existing,
        },
    );

    // Create progress bar
    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));

    let results = scheduler
        .run_to_completion(jobs, |progress, result| {
            pb.set_position(progress.completed as u64);
            pb.set_message(format!(
                "{} in flight, {} failed",
                progress.in_flight, progress.failed
            ));
            match &result.status {
                JobStatus::Succeeded { bytes } => {
                    pb.println(format!("  done {} ({})", result.job_id, format_bytes(*bytes)))
                }
                JobStatus::Reused { bytes } => {
                    pb.println(format!("  kept {} ({})", result.job_id, format_bytes(*bytes)))
                }
                JobStatus::Failed(e) => pb.println(format!("  FAILED {}: {}", result.job_id, e)),
            }
        })
        .await?;

    pb.finish_and_clear();
    log::debug!("Peak concurrency: {}", scheduler.peak_in_flight());

    Ok(results)
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = NarrateConfig::load()?;
            println!("Configuration file: {}", NarrateConfig::config_path().display());
            println!();
            println!("tts_url = \"{}\"", config.tts_url);
            println!(
                "request_style = \"{}\"",
                match config.request_style {
                    RequestStyle::Json => "json",
                    RequestStyle::Query => "query",
                }
            );
            println!("voice = \"{}\"", config.voice);
            println!("rate = \"{}\"", config.rate);
            println!("pitch = \"{}\"", config.pitch);
            println!("max_jobs = {}", config.max_jobs);
            println!("segment_length = {}", config.segment_length);
            if let Some(min_size) = config.min_size {
                println!("min_size = {}", min_size);
            } else {
                println!("min_size = (default per mode)");
            }
            println!("delay_ms = {}", config.delay_ms);
            println!("timeout_secs = {}", config.timeout_secs);
            println!("audio_ext = \"{}\"", config.audio_ext);
        }
        ConfigAction::SetUrl { url } => {
            let mut config = NarrateConfig::load()?;
            config.tts_url = url.trim_end_matches('/').to_string();
            config.save()?;
            println!("Default TTS URL set to: {}", config.tts_url);
        }
        ConfigAction::SetVoice { voice } => {
            let mut config = NarrateConfig::load()?;
            config.voice = voice.clone();
            config.save()?;
            println!("Default voice set to: {}", voice);
        }
        ConfigAction::SetJobs { jobs } => {
            let mut config = NarrateConfig::load()?;
            config.max_jobs = (*jobs).max(1);
            config.save()?;
            println!("Default concurrency set to: {}", config.max_jobs);
        }
    }
    Ok(())
}
