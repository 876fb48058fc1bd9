//! hfxfer: resilient file transfer for Hugging Face Hub repositories.
//!
//! hfxfer uploads local files (a single path or a glob pattern) to model,
//! dataset and space repositories, and downloads single files back. Large
//! files are streamed rather than buffered, transient failures are retried
//! with exponential backoff, and multi-file uploads are split into batches the
//! hub accepts.
//!
//! # Modules
//!
//! - [`pattern`]: Glob pattern resolution into size-annotated file sets
//! - [`transfer`]: Retry, streaming, batching and the [`TransferClient`] façade
//! - [`hub`]: The remote hub capability (HTTP transport, tokens, error mapping)
//! - [`error`]: Error types for hfxfer operations

pub mod error;
pub mod hub;
pub mod pattern;
pub mod transfer;

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

pub use error::HfxferError;
pub use hub::{HubRpc, RepoRef, RepoType};
pub use pattern::{PatternResolution, ResolvedFile};
pub use transfer::TransferClient;

use hub::{HfTokenStore, HttpHub, DEFAULT_ENDPOINT};
use transfer::{BatchOptions, DownloadOptions, MultiUploadOptions, RetryConfig, UploadOptions};

/// The hfxfer CLI application.
#[derive(Parser)]
#[command(name = "hfxfer")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings shared by every subcommand.
#[derive(clap::Args)]
struct GlobalArgs {
    /// Hub base URL.
    #[arg(long, global = true, env = "HF_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Access token. Falls back to the token stored by `hfxfer login`.
    #[arg(long, global = true, env = "HF_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Retries after the first attempt of each remote call.
    #[arg(long, global = true, default_value_t = 3)]
    max_retries: u32,

    /// First retry delay in milliseconds; doubles on each retry.
    #[arg(long, global = true, default_value_t = 1000)]
    retry_base_ms: u64,

    /// Upper bound on the retry delay in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    retry_max_ms: u64,

    /// Per-request timeout in seconds.
    #[arg(long, global = true, default_value_t = 300)]
    timeout_secs: u64,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a file, or every file matching a glob pattern.
    Upload(UploadArgs),
    /// Download a single file from a repository.
    Download(DownloadArgs),
    /// Check that a repository exists and is accessible.
    Check(RepoArgs),
    /// Validate and store an access token.
    Login(LoginArgs),
}

/// Repository selection shared by subcommands.
#[derive(clap::Args)]
struct RepoArgs {
    /// Repository as 'owner/name' or a hub URL.
    repo_id: String,

    /// Repository type.
    #[arg(long, value_enum, default_value_t = RepoType::Model)]
    repo_type: RepoType,

    /// Branch or revision.
    #[arg(long)]
    revision: Option<String>,
}

/// Arguments for the upload subcommand.
#[derive(clap::Args)]
struct UploadArgs {
    #[command(flatten)]
    repo: RepoArgs,

    /// Local file or glob pattern (quote it to stop the shell expanding it).
    pattern: String,

    /// Commit message.
    #[arg(short, long)]
    message: Option<String>,

    /// Destination path in the repo (single-file uploads only).
    #[arg(long)]
    path_in_repo: Option<String>,

    /// Files per commit (at most 1000).
    #[arg(long, default_value_t = transfer::MAX_BATCH_SIZE)]
    batch_size: usize,

    /// Batches uploaded concurrently.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Pause between groups of concurrent batches, in milliseconds.
    #[arg(long, default_value_t = 0)]
    batch_delay_ms: u64,

    /// Refuse patterns matching more files than this.
    #[arg(long, default_value_t = pattern::DEFAULT_MAX_FILES)]
    max_files: usize,
}

/// Arguments for the download subcommand.
#[derive(clap::Args)]
struct DownloadArgs {
    #[command(flatten)]
    repo: RepoArgs,

    /// Path of the file inside the repository.
    path: String,

    /// Directory to write into (default: current directory).
    #[arg(long)]
    local_dir: Option<PathBuf>,
}

/// Arguments for the login subcommand.
#[derive(clap::Args)]
struct LoginArgs {
    /// Token to store (default: --token / HF_TOKEN).
    new_token: Option<String>,
}

/// Run the hfxfer CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), HfxferError> {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match cli.command {
        Some(Commands::Upload(args)) => run_upload(&cli.global, args),
        Some(Commands::Download(args)) => run_download(&cli.global, args),
        Some(Commands::Check(args)) => run_check(&cli.global, args),
        Some(Commands::Login(args)) => run_login(&cli.global, args),
        None => {
            println!("hfxfer {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Resilient file transfer for Hugging Face Hub repositories.");
            println!();
            println!("Run 'hfxfer --help' for usage information.");
            Ok(())
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("hfxfer={level}")));
    // A subscriber may already be installed when embedded.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_client(
    global: &GlobalArgs,
    batch: BatchOptions,
) -> Result<TransferClient<HttpHub>, HfxferError> {
    let retry = RetryConfig::new(
        global.max_retries,
        Duration::from_millis(global.retry_base_ms),
        Duration::from_millis(global.retry_max_ms),
    )?;
    let hub = HttpHub::new(&global.endpoint, Duration::from_secs(global.timeout_secs))?;
    let endpoint = hub.endpoint().to_string();

    Ok(TransferClient::new(hub, HfTokenStore::from_env())
        .with_endpoint(endpoint)
        .with_retry_config(retry)
        .with_batch_options(batch))
}

/// Execute the upload subcommand.
///
/// A pattern resolving to exactly one file is uploaded as a single-file
/// commit; anything larger goes through the batch orchestrator.
fn run_upload(global: &GlobalArgs, args: UploadArgs) -> Result<(), HfxferError> {
    if !pattern::is_valid_pattern(&args.pattern) {
        return Err(HfxferError::validation(format!(
            "refusing unsafe or empty pattern '{}'",
            args.pattern
        )));
    }
    // Fail on a malformed repo before touching the filesystem.
    hub::parse_repo_input(
        &args.repo.repo_id,
        args.repo.repo_type,
        args.repo.revision.as_deref(),
        &global.endpoint,
    )?;

    let cwd = std::env::current_dir()?;
    let resolution = pattern::resolve(&args.pattern, &cwd, args.max_files)?;
    if resolution.is_empty() {
        return Err(HfxferError::FileNotFound {
            path: args.pattern.clone(),
            message: "no files matched".to_string(),
        });
    }
    if args.path_in_repo.is_some() && resolution.total_files > 1 {
        return Err(HfxferError::validation(format!(
            "--path-in-repo needs exactly one file, pattern matched {}",
            resolution.total_files
        )));
    }

    let client = build_client(
        global,
        BatchOptions {
            batch_size: args.batch_size,
            concurrency: args.concurrency,
            window_delay: Duration::from_millis(args.batch_delay_ms),
        },
    )?;

    if resolution.total_files == 1 {
        let file = &resolution.files[0];
        let receipt = client.upload_file(&UploadOptions {
            repo_id: args.repo.repo_id,
            repo_type: args.repo.repo_type,
            revision: args.repo.revision,
            file_path: file.path.clone(),
            path_in_repo: args.path_in_repo,
            token: global.token.clone(),
            message: args.message,
        })?;

        println!("Uploaded {} ({} bytes)", receipt.path_in_repo, receipt.size);
        println!("  url:    {}", receipt.file_url);
        println!("  commit: {}", receipt.commit_sha);
        return Ok(());
    }

    println!(
        "Uploading {} files ({} bytes)",
        resolution.total_files, resolution.total_size
    );
    let report = client.upload_files(&MultiUploadOptions {
        repo_id: args.repo.repo_id,
        repo_type: args.repo.repo_type,
        revision: args.repo.revision,
        files: resolution.files,
        token: global.token.clone(),
        message: args.message,
    })?;

    println!(
        "Uploaded {}/{} files",
        report.files_uploaded, report.total_files
    );
    if let Some(commit) = &report.commit_sha {
        println!("  commit: {}", commit);
    }
    if !report.failed_files.is_empty() {
        eprintln!("{} file(s) failed:", report.failed_files.len());
        for path in &report.failed_files {
            eprintln!("  {}", path.display());
        }
    }

    if report.success() {
        Ok(())
    } else {
        Err(report.last_error.unwrap_or_else(|| HfxferError::FileNotFound {
            path: args.pattern,
            message: "none of the matched files could be read".to_string(),
        }))
    }
}

/// Execute the download subcommand.
fn run_download(global: &GlobalArgs, args: DownloadArgs) -> Result<(), HfxferError> {
    let client = build_client(global, BatchOptions::default())?;
    let receipt = client.download_file(&DownloadOptions {
        repo_id: args.repo.repo_id,
        repo_type: args.repo.repo_type,
        revision: args.repo.revision,
        file_path: args.path,
        token: global.token.clone(),
        local_dir: args.local_dir,
    })?;

    println!(
        "Downloaded {} ({} bytes)",
        receipt.local_path.display(),
        receipt.file_size
    );
    Ok(())
}

/// Execute the check subcommand.
fn run_check(global: &GlobalArgs, args: RepoArgs) -> Result<(), HfxferError> {
    let repo = hub::parse_repo_input(
        &args.repo_id,
        args.repo_type,
        args.revision.as_deref(),
        &global.endpoint,
    )?;
    let client = build_client(global, BatchOptions::default())?;
    client.check_repository(&repo, global.token.as_deref())?;
    println!("{} ({}) is accessible", repo, repo.repo_type);
    Ok(())
}

/// Execute the login subcommand.
fn run_login(global: &GlobalArgs, args: LoginArgs) -> Result<(), HfxferError> {
    let token = args
        .new_token
        .or_else(|| global.token.clone())
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| HfxferError::validation("no token given (pass one or set HF_TOKEN)"))?;

    let client = build_client(global, BatchOptions::default())?;
    let name = client.whoami(token.trim())?;
    HfTokenStore::from_env().set_token(&token)?;
    println!("Logged in as {name}");
    Ok(())
}
