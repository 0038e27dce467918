// crates/cli/src/main.rs
//! `article-audio`: submit, list, watch and delete article audio jobs.
//!
//! Every invocation builds one `JobTracker` for the given article and
//! disposes it before exiting, including on Ctrl-C and on errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::{self, error::RecvError};

use article_audio_client::HttpJobStatusClient;
use article_audio_core::{
    ArticleId, AudioJob, ClientConfig, JobError, JobId, JobStatus, TrackerConfig, VoiceOptions,
};
use article_audio_observability::{init_tracing, LogConfig, LogFormat};
use article_audio_tracker::{JobTracker, ResourceHandle, TempFileFactory, TrackerEvent};

#[derive(Debug, Parser)]
#[command(
    name = "article-audio",
    version,
    about = "Generate and track text-to-speech audio for articles"
)]
struct Cli {
    /// Backend base URL [default: $ARTICLE_AUDIO_API_URL or http://localhost:8080]
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Bearer token [default: $ARTICLE_AUDIO_API_TOKEN]
    #[arg(long, global = true)]
    token: Option<String>,

    /// Log output: pretty or json
    #[arg(long, global = true, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Request audio generation for an article
    Submit {
        #[arg(long)]
        article: String,
        #[command(flatten)]
        voice: VoiceArgs,
        /// Follow the job until it finishes
        #[arg(long)]
        wait: bool,
        /// Save the finished audio to this path (implies --wait)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the audio jobs of an article
    List {
        #[arg(long)]
        article: String,
    },
    /// Follow one job until it finishes, optionally saving the audio
    Watch {
        #[arg(long)]
        article: String,
        #[arg(long)]
        job: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Delete an audio job
    Delete {
        #[arg(long)]
        article: String,
        #[arg(long)]
        job: String,
    },
}

impl Command {
    fn article(&self) -> &str {
        match self {
            Command::Submit { article, .. }
            | Command::List { article }
            | Command::Watch { article, .. }
            | Command::Delete { article, .. } => article,
        }
    }
}

#[derive(Debug, Args)]
struct VoiceArgs {
    /// Voice name; omit everything to use the server default configuration
    #[arg(long)]
    voice: Option<String>,
    /// Speaking rate, 0.25 to 4.0
    #[arg(long)]
    speed: Option<f32>,
    /// Pitch shift in semitones, -12 to 12
    #[arg(long, allow_hyphen_values = true)]
    pitch: Option<f32>,
    /// Stored voice configuration to use
    #[arg(long)]
    config_id: Option<String>,
}

impl From<VoiceArgs> for VoiceOptions {
    fn from(args: VoiceArgs) -> Self {
        Self {
            voice: args.voice,
            speed: args.speed,
            pitch: args.pitch,
            config_id: args.config_id,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&LogConfig {
        level: cli.log_level.clone(),
        format: cli.log_format,
    });

    let mut client_config = ClientConfig::from_env();
    if let Some(url) = &cli.api_url {
        client_config.base_url = url.clone();
    }
    if let Some(token) = &cli.token {
        client_config.api_token = Some(token.clone());
    }
    let client = HttpJobStatusClient::new(&client_config).context("failed to configure API client")?;
    let factory = TempFileFactory::new().context("failed to create audio scratch directory")?;

    let tracker = JobTracker::new(
        ArticleId::new(cli.command.article()),
        Arc::new(client),
        Arc::new(factory),
        TrackerConfig::from_env(),
    );

    let result = tokio::select! {
        result = run(&tracker, cli.command) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("interrupted")),
    };
    tracker.dispose();
    result
}

async fn run(tracker: &JobTracker, command: Command) -> Result<()> {
    match command {
        Command::Submit { voice, wait, out, .. } => {
            let options = VoiceOptions::from(voice);
            let mut events = tracker.subscribe();
            let job_id = tracker.submit(&options).await.map_err(explain)?;
            println!("{job_id}");
            if wait || out.is_some() {
                let handle = follow(tracker, &mut events, &job_id).await?;
                deliver(&handle, out.as_deref())?;
            }
        }
        Command::List { .. } => {
            let jobs = tracker.refresh_list().await.map_err(explain)?;
            if jobs.is_empty() {
                println!("no audio jobs for article {}", tracker.article_id());
            }
            for job in &jobs {
                println!("{}", format_job(job));
            }
        }
        Command::Watch { job, out, .. } => {
            let job_id = JobId::new(job);
            tracker.refresh_list().await.map_err(explain)?;
            let mut events = tracker.subscribe();
            let handle = match tracker.select(&job_id).await.map_err(explain)? {
                Some(handle) => handle,
                None => follow(tracker, &mut events, &job_id).await?,
            };
            deliver(&handle, out.as_deref())?;
        }
        Command::Delete { job, .. } => {
            let job_id = JobId::new(job);
            tracker.refresh_list().await.map_err(explain)?;
            tracker.delete(&job_id).await.map_err(explain)?;
            println!("deleted {job_id}");
        }
    }
    Ok(())
}

/// Show progress until the job's audio is ready or the job cannot finish.
async fn follow(
    tracker: &JobTracker,
    events: &mut broadcast::Receiver<TrackerEvent>,
    job_id: &JobId,
) -> Result<ResourceHandle> {
    let bar = progress_bar(job_id)?;
    let outcome = loop {
        if let Some(handle) = tracker.handle(job_id) {
            break Ok(handle);
        }
        match tracker.job(job_id) {
            Some(job) if job.status == JobStatus::Failed => {
                let message = job.error_message.unwrap_or_default();
                break Err(anyhow!("audio job {job_id} failed: {message}"));
            }
            Some(_) => {}
            None => break Err(anyhow!("audio job {job_id} is no longer tracked")),
        }

        match events.recv().await {
            Ok(TrackerEvent::JobUpdated { job_id: id, status, progress }) if id == *job_id => {
                bar.set_message(status.to_string());
                if let Some(progress) = progress {
                    bar.set_position(u64::from(progress));
                }
            }
            Ok(TrackerEvent::PollTimedOut { job_id: id, elapsed_secs }) if id == *job_id => {
                break Err(anyhow!(
                    "no final status after {elapsed_secs}s; the job may still be running. \
                     Check again with: article-audio watch --article {} --job {id}",
                    tracker.article_id()
                ));
            }
            Ok(TrackerEvent::ResolutionFailed { job_id: id, message }) if id == *job_id => {
                break Err(anyhow!("audio job {id} finished but its audio could not be fetched: {message}"));
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "event receiver lagged");
            }
            Err(RecvError::Closed) => break Err(anyhow!("tracker shut down")),
        }
    };
    bar.finish_and_clear();
    outcome
}

fn progress_bar(job_id: &JobId) -> Result<ProgressBar> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner} {prefix} [{bar:30}] {pos:>3}% {msg}")?
            .progress_chars("=> "),
    );
    bar.set_prefix(job_id.to_string());
    bar.set_message(JobStatus::Pending.to_string());
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn deliver(handle: &ResourceHandle, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            std::fs::copy(handle.path(), path)
                .with_context(|| format!("failed to write audio to {}", path.display()))?;
            println!("saved {} bytes of {} to {}", handle.len(), handle.content_type(), path.display());
        }
        None => println!(
            "audio ready ({} bytes, {}); pass --out to save it",
            handle.len(),
            handle.content_type()
        ),
    }
    Ok(())
}

/// Attach a hint to the errors a user can act on.
fn explain(error: JobError) -> anyhow::Error {
    let hint = match &error {
        JobError::Config(_) => Some("pass --voice or --config-id, or configure a default voice"),
        JobError::Permission(_) => Some("check --token or ARTICLE_AUDIO_API_TOKEN"),
        JobError::UnknownJob(_) => Some("run `article-audio list` to see the article's jobs"),
        JobError::Transport(_) => Some("check --api-url or ARTICLE_AUDIO_API_URL"),
        _ => None,
    };
    match hint {
        Some(hint) => anyhow!("{error} ({hint})"),
        None => anyhow!(error),
    }
}

fn format_job(job: &AudioJob) -> String {
    let progress = job
        .progress
        .map(|p| format!("{p}%"))
        .unwrap_or_else(|| "-".into());
    let created = job
        .created_at
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".into());
    let mut line = format!(
        "{:<16} {:<10} {:>5}  {:<16}  {}",
        job.id.as_str(),
        job.status.as_str(),
        progress,
        created,
        job.file_name.as_deref().unwrap_or("-")
    );
    if let Some(message) = &job.error_message {
        line.push_str("  ");
        line.push_str(message);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_submit() {
        let cli = Cli::try_parse_from([
            "article-audio",
            "--log-format",
            "json",
            "submit",
            "--article",
            "42",
            "--voice",
            "alloy",
            "--pitch",
            "-3",
            "--out",
            "a.mp3",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.command.article(), "42");
        match cli.command {
            Command::Submit { voice, wait, out, .. } => {
                let options = VoiceOptions::from(voice);
                assert_eq!(options.voice.as_deref(), Some("alloy"));
                assert_eq!(options.pitch, Some(-3.0));
                assert_eq!(options.speed, None);
                assert!(!wait);
                assert_eq!(out, Some(PathBuf::from("a.mp3")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_watch_requires_job() {
        assert!(Cli::try_parse_from(["article-audio", "watch", "--article", "1"]).is_err());
        let cli =
            Cli::try_parse_from(["article-audio", "watch", "--article", "1", "--job", "j"]).unwrap();
        assert!(matches!(cli.command, Command::Watch { ref job, .. } if job == "j"));
    }

    #[test]
    fn test_rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["article-audio", "--log-format", "xml", "list", "--article", "1"]).is_err());
    }

    #[test]
    fn test_format_job() {
        let job = AudioJob {
            id: JobId::from("j1"),
            article_id: ArticleId::from("a1"),
            status: JobStatus::Failed,
            progress: None,
            error_message: Some("voice unavailable".into()),
            created_at: article_audio_core::parse_timestamp("2024-05-01 10:30:00"),
            file_name: None,
        };
        let line = format_job(&job);
        assert!(line.starts_with("j1 "));
        assert!(line.contains("FAILED"));
        assert!(line.contains("2024-05-01 10:30"));
        assert!(line.ends_with("voice unavailable"));
    }

    #[test]
    fn test_explain_adds_hints() {
        let err = explain(JobError::Config("no default".into()));
        assert!(err.to_string().contains("--config-id"));
        let err = explain(JobError::NotFound("audio job j".into()));
        assert_eq!(err.to_string(), "Not found: audio job j");
    }
}
