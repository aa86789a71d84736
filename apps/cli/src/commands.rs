//! Command handlers.
//!
//! Results go to stdout, logs to stderr. Expected non-success conditions
//! (unknown item, job not ready, job expired) exit with status 2.

use std::cell::Cell;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use coldvault_backup::{
    BackupService, DownloadOutcome, DownloadRequest, JobState, RemoveOutcome, RequestOutcome,
    UploadOutcome, UploadRequest,
};
use coldvault_glacier::GlacierConnector;
use coldvault_inventory::{InventoryStore, JsonFileStore};
use coldvault_transfer::{
    Direction, SpeedCalculator, TransferProgress, chunk_size_from_mb, format_bytes,
};
use tracing::info;

use crate::cli::{Cli, Command, DownloadArgs, UploadArgs};
use crate::config::Settings;

type Service = BackupService<GlacierConnector, JsonFileStore>;

/// Exit status for an expected condition that is not a success.
const UNFINISHED: u8 = 2;

pub fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = Settings::load(&cli.global)?;

    if let Command::Config = cli.command {
        println!("{settings}");
        return Ok(ExitCode::SUCCESS);
    }

    let progress = Rc::new(ProgressLog::default());
    let mut service = open_service(&settings, Rc::clone(&progress))?;

    match cli.command {
        Command::Upload(args) => upload(&mut service, &settings, &progress, args),
        Command::RequestDownload { name, urgent } => {
            require_credentials(&settings)?;
            request_download(&mut service, &name, urgent)
        }
        Command::Download(args) => {
            require_credentials(&settings)?;
            download(&mut service, &progress, args)
        }
        Command::JobStatus => {
            require_credentials(&settings)?;
            job_status(&mut service)
        }
        Command::List => Ok(list(&service)),
        Command::Remove { name } => {
            require_credentials(&settings)?;
            remove(&mut service, &name)
        }
        Command::ForgetJob { name } => forget_job(&mut service, &name),
        Command::Config => Ok(ExitCode::SUCCESS),
    }
}

fn open_service(settings: &Settings, progress: Rc<ProgressLog>) -> anyhow::Result<Service> {
    let store = InventoryStore::open(JsonFileStore::new(&settings.inventory))
        .with_context(|| format!("opening inventory {}", settings.inventory.display()))?;
    let mut connector = GlacierConnector::new(settings.credentials.clone());
    if let Some(endpoint) = &settings.endpoint {
        connector = connector.with_endpoint(endpoint);
    }
    Ok(BackupService::new(connector, store, settings.backup_options()?)
        .with_progress(move |p| progress.record(p)))
}

fn require_credentials(settings: &Settings) -> anyhow::Result<()> {
    if settings.credentials.is_none() {
        bail!(
            "no AWS credentials: pass --access-key and --secret-key, set them in {} or export AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            settings.config_path.display()
        );
    }
    Ok(())
}

fn upload(
    service: &mut Service,
    settings: &Settings,
    progress: &ProgressLog,
    args: UploadArgs,
) -> anyhow::Result<ExitCode> {
    let Some(vault) = args.vault.or_else(|| settings.vault.clone()) else {
        bail!("no vault: pass --vault or set vault in {}", settings.config_path.display());
    };
    let Some(region) = args.region.or_else(|| settings.region.clone()) else {
        bail!("no region: pass --region, set region in {} or export AWS_REGION", settings.config_path.display());
    };
    let chunk_size = args.chunk_size.map(chunk_size_from_mb).transpose()?;
    require_credentials(settings)?;

    progress.start();
    let outcome = service.upload(UploadRequest {
        file: args.file,
        name: args.name,
        vault,
        region,
        chunk_size,
    })?;
    match outcome {
        UploadOutcome::Uploaded(item) => {
            println!("uploaded {} ({})", item.name, format_bytes(item.size as f64));
            println!("archive id: {}", item.archive_id);
        }
        UploadOutcome::AlreadyUploaded(item) => {
            println!(
                "{} already uploaded as {} on {}",
                item.name,
                item.archive_id,
                timestamp(&item.upload_date)
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn request_download(service: &mut Service, name: &str, urgent: bool) -> anyhow::Result<ExitCode> {
    match service.request_download(name, urgent)? {
        RequestOutcome::Requested(job) => {
            println!("retrieval job requested for {name}: {}", job.job_id);
            Ok(ExitCode::SUCCESS)
        }
        RequestOutcome::AlreadyRequested(job) => {
            println!(
                "retrieval job for {name} already requested on {}: {}",
                timestamp(&job.creation),
                job.job_id
            );
            Ok(ExitCode::SUCCESS)
        }
        RequestOutcome::ItemNotFound => {
            println!("no item named {name}");
            Ok(ExitCode::from(UNFINISHED))
        }
        RequestOutcome::ArchiveMissing(item) => {
            println!(
                "archive {} for {name} no longer exists on the service; remove the item",
                item.archive_id
            );
            Ok(ExitCode::from(UNFINISHED))
        }
    }
}

fn download(
    service: &mut Service,
    progress: &ProgressLog,
    args: DownloadArgs,
) -> anyhow::Result<ExitCode> {
    let chunk_size = args.chunk_size.map(chunk_size_from_mb).transpose()?;
    let target = args.target.clone();

    progress.start();
    let outcome = service.download(DownloadRequest {
        name: args.name.clone(),
        target: args.target,
        chunk_size,
        keep_job: args.keep_job,
    })?;
    let name = args.name;
    match outcome {
        DownloadOutcome::Downloaded {
            bytes,
            verified,
            job_removed,
            ..
        } => {
            let check = if verified { "verified" } else { "not verified" };
            println!(
                "downloaded {name} to {} ({}, {check})",
                target.display(),
                format_bytes(bytes as f64)
            );
            if !job_removed {
                println!("job kept; run forget-job --name {name} when done");
            }
            Ok(ExitCode::SUCCESS)
        }
        DownloadOutcome::NotReady(job) => {
            let checked = job.last_status_check.unwrap_or(job.creation);
            println!(
                "job for {name} is not ready yet (requested {}, checked {})",
                timestamp(&job.creation),
                timestamp(&checked)
            );
            Ok(ExitCode::from(UNFINISHED))
        }
        DownloadOutcome::Expired(_) => {
            println!("job for {name} has expired and was removed; request the download again");
            Ok(ExitCode::from(UNFINISHED))
        }
        DownloadOutcome::NoJob => {
            println!("no retrieval job for {name}; run request-download first");
            Ok(ExitCode::from(UNFINISHED))
        }
    }
}

fn job_status(service: &mut Service) -> anyhow::Result<ExitCode> {
    let reports = service.job_status()?;
    if reports.is_empty() {
        println!("no retrieval jobs");
        return Ok(ExitCode::SUCCESS);
    }
    println!("{:<32} {:<8} {:<17} {:<17}", "NAME", "STATE", "REQUESTED", "CHECKED");
    for report in &reports {
        let checked = report
            .job
            .last_status_check
            .as_ref()
            .map(timestamp)
            .unwrap_or_else(|| "-".into());
        println!(
            "{:<32} {:<8} {:<17} {:<17}",
            report.job.name,
            report.state.as_str(),
            timestamp(&report.job.creation),
            checked
        );
    }
    let expired = reports
        .iter()
        .filter(|r| r.state == JobState::Expired)
        .count();
    if expired > 0 {
        println!("{expired} expired job(s) removed");
    }
    Ok(ExitCode::SUCCESS)
}

fn list(service: &Service) -> ExitCode {
    let items = service.list();
    if items.is_empty() {
        println!("no items");
        return ExitCode::SUCCESS;
    }
    println!(
        "{:<32} {:>10} {:<17} {:<16} {:<12}",
        "NAME", "SIZE", "UPLOADED", "VAULT", "REGION"
    );
    for item in items {
        println!(
            "{:<32} {:>10} {:<17} {:<16} {:<12}",
            item.name,
            format_bytes(item.size as f64),
            timestamp(&item.upload_date),
            item.vault,
            item.region
        );
    }
    ExitCode::SUCCESS
}

fn remove(service: &mut Service, name: &str) -> anyhow::Result<ExitCode> {
    match service.remove(name)? {
        RemoveOutcome::Removed {
            item,
            remote_missing,
        } => {
            if remote_missing {
                println!("removed {name} (archive {} was already gone)", item.archive_id);
            } else {
                println!("removed {name} and deleted archive {}", item.archive_id);
            }
            Ok(ExitCode::SUCCESS)
        }
        RemoveOutcome::ItemNotFound => {
            println!("no item named {name}");
            Ok(ExitCode::from(UNFINISHED))
        }
    }
}

fn forget_job(service: &mut Service, name: &str) -> anyhow::Result<ExitCode> {
    match service.forget_job(name)? {
        Some(job) => {
            println!("forgot job {} for {name}", job.job_id);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("no retrieval job for {name}");
            Ok(ExitCode::from(UNFINISHED))
        }
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

/// Logs transfer progress with a throughput estimate.
#[derive(Default)]
struct ProgressLog {
    speed: SpeedCalculator,
    last_bytes: Cell<u64>,
}

impl ProgressLog {
    /// Marks the start of a transfer.
    fn start(&self) {
        self.speed.reset();
        self.speed.add_sample(0);
        self.last_bytes.set(0);
    }

    fn record(&self, p: TransferProgress) {
        let delta = p.bytes.saturating_sub(self.last_bytes.get());
        self.last_bytes.set(p.bytes);
        self.speed.add_sample(delta);

        let speed = self.speed.bytes_per_second();
        let eta = self
            .speed
            .eta(p.total_bytes.saturating_sub(p.bytes))
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "-".into());
        let direction = match p.direction {
            Direction::Upload => "upload",
            Direction::Download => "download",
        };
        info!(
            direction,
            step = p.done,
            steps = p.total,
            percent = %format!("{:.1}", p.percentage()),
            speed = %format!("{}/s", format_bytes(speed)),
            %eta,
            "transfer progress"
        );
    }
}
