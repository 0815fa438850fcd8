// Copyright 2024 TAKKT Industrial & Packaging GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

mod batch;
mod config;
mod consts;
mod plan;
mod progress;
mod result;
mod scan;
mod size;
mod source;
mod transfer;
mod uploader;

use crate::{
    batch::{
        BatchRequest,
        BatchTransferOrchestrator,
        FileTransferOutcome,
    },
    config::ConnectionArgs,
    consts::DEFAULT_PART_SIZE,
    plan::PartRange,
    progress::ProgressAccumulator,
    result::{
        bail,
        AnyhowResultExt,
        Error,
        Result,
        StdResultExt,
    },
    size::format_size,
    transfer::{
        S3TransferClient,
        StorageClass,
    },
    uploader::ObjectUploader,
};
use anyhow::Context;
use clap::{
    ArgGroup,
    Args,
    Parser,
};
use serde::Serialize;
use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::Arc,
    time::Duration,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    info,
    warn,
};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(version)]
enum Cli {
    /// Upload the files of a local directory to an S3 bucket.
    Upload(Upload),
    /// Show how a file of the given size would be split into parts, without uploading anything.
    Plan(Plan),
}

#[derive(Debug, Args)]
struct Upload {
    /// Directory containing the files to upload.
    #[arg(long)]
    source_directory: PathBuf,
    /// Glob mask of the files to upload. Can be given multiple times. Uploads every file if
    /// omitted.
    ///
    /// A mask without a `/` is matched against the file name, e.g. `*.zip`. A mask containing a
    /// `/` is matched against the path relative to the source directory, e.g. `data/**/*.bin`.
    #[arg(long = "include", value_name = "MASK")]
    includes: Vec<String>,
    /// Glob mask of the files to skip. Can be given multiple times and wins over `--include`.
    #[arg(long = "exclude", value_name = "MASK")]
    excludes: Vec<String>,
    /// Also upload the files in subdirectories.
    #[arg(long)]
    recursive: bool,
    /// The name of the S3 bucket to upload the files to.
    #[arg(long)]
    s3_bucket: String,
    /// Prefix prepended to the relative path of every file to form its S3 key.
    #[arg(long, default_value = "")]
    key_prefix: String,
    /// Store the objects with the reduced redundancy storage class.
    #[arg(long)]
    reduced_redundancy: bool,
    /// Make the objects publicly readable.
    #[arg(long)]
    public: bool,
    /// Encrypt the objects at rest with AES-256.
    #[arg(long)]
    encrypt: bool,
    /// Keep uploading the remaining files if one of them fails.
    ///
    /// Without this flag the first failed file stops the upload.
    #[arg(long)]
    resume_on_error: bool,
    /// Number of parts of a single file uploaded at the same time.
    #[arg(long, default_value_t = 1)]
    part_concurrency: usize,
    /// Number of files uploaded at the same time.
    #[arg(long, default_value_t = 1)]
    file_concurrency: usize,
    /// Seconds between two progress messages. `0` disables them.
    #[arg(long, default_value_t = 5)]
    progress_interval: u64,
    /// Path to write a JSON report of every attempted file to.
    ///
    /// The report is also written if the upload stops because a file failed.
    #[arg(long)]
    report_file: Option<PathBuf>,
    #[command(flatten)]
    connection: ConnectionArgs,
}

impl Upload {
    async fn run(self) -> Result<()> {
        debug!(
            "Running upload command for {} to s3://{}",
            self.source_directory.display(),
            self.s3_bucket,
        );

        // Everything that can be wrong with the settings is reported before the first request.
        let settings = self.connection.load().await?;
        let request = BatchRequest {
            source_directory: self.source_directory,
            includes: self.includes,
            excludes: self.excludes,
            recursive: self.recursive,
            bucket: self.s3_bucket,
            key_prefix: self.key_prefix,
            storage_class: if self.reduced_redundancy {
                StorageClass::ReducedRedundancy
            } else {
                StorageClass::Standard
            },
            public_read: self.public,
            encrypted: self.encrypt,
            resume_on_error: self.resume_on_error,
            file_concurrency: self.file_concurrency,
        };

        let client = S3TransferClient::connect(&settings).await;
        let cancellation = CancellationToken::new();
        spawn_interrupt_handler(cancellation.clone());

        let progress = Arc::new(ProgressAccumulator::default());
        let reporter = CancellationToken::new();
        let progress_logger =
            spawn_progress_logger(Arc::clone(&progress), self.progress_interval, reporter.clone());

        let uploader = ObjectUploader::new(
            &client,
            settings.part_size,
            self.part_concurrency,
            cancellation,
        );
        let result = BatchTransferOrchestrator::new(uploader, progress)
            .run(&request)
            .await;

        reporter.cancel();
        if result.as_ref().is_err_and(Error::is_cancelled) {
            warn!("Upload was cancelled, multipart uploads in progress have been aborted");
        }
        if let Some(progress_logger) = progress_logger {
            if let Err(err) = progress_logger.await {
                warn!("Progress logger stopped unexpectedly: {}", err);
            }
        }

        if let Some(report_file) = &self.report_file {
            let outcomes = match &result {
                Ok(outcomes) => outcomes.as_slice(),
                Err(Error::Batch { outcomes, .. }) => outcomes.as_slice(),
                Err(_) => &[],
            };
            write_report(report_file, outcomes).await?;
        }

        let outcomes = result?;
        let failed = outcomes.iter().filter(|outcome| !outcome.success).count();
        if failed > 0 {
            return Err(anyhow::anyhow!(
                "{} of {} file(s) failed to upload",
                failed,
                outcomes.len(),
            ))
            .into_transfer();
        }
        Ok(())
    }
}

/// Cancels `cancellation` on the first Ctrl-C.
fn spawn_interrupt_handler(cancellation: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received interrupt, cancelling the upload...");
                cancellation.cancel();
            }
            Err(err) => warn!("Failed to listen for interrupts: {}", err),
        }
    });
}

/// Logs the progress every `interval_seconds` until `stop` is cancelled.
fn spawn_progress_logger(
    progress: Arc<ProgressAccumulator>,
    interval_seconds: u64,
    stop: CancellationToken,
) -> Option<JoinHandle<()>> {
    if interval_seconds == 0 {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
        // The first tick completes immediately, before anything was transferred.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => info!("{}", progress.snapshot()),
            }
        }
    }))
}

async fn write_report(file: impl AsRef<Path>, outcomes: &[FileTransferOutcome]) -> Result<()> {
    let file = file.as_ref().to_owned();
    debug!("Writing report of {} file(s) to {}", outcomes.len(), file.display());

    // serde_json does not support asynchronous writers, so we make sure to spawn the task such
    // that it doesn't block the executor.
    tokio::task::block_in_place(|| {
        serde_json::to_writer_pretty(
            std::fs::File::create(&file)
                .with_context(|| format!("Failed to create report file {}", file.display()))
                .into_transfer()?,
            outcomes,
        )
        .context("Failed to serialize report file")
        .into_transfer()
    })
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("source").required(true).args(["size", "file"])))]
struct Plan {
    /// Size of the object in bytes.
    #[arg(long)]
    size: Option<u64>,
    /// File whose size is used.
    #[arg(long)]
    file: Option<PathBuf>,
    /// Size of the parts in bytes.
    #[arg(long, default_value_t = DEFAULT_PART_SIZE)]
    part_size: u64,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
struct PlanReport {
    size: u64,
    part_size: u64,
    multipart: bool,
    parts: Vec<PartRange>,
}

impl Plan {
    async fn run(&self) -> Result<()> {
        let report = self.report().await?;
        info!(
            "{} would be uploaded in {}",
            format_size(report.size),
            if report.multipart {
                format!("{} parts", report.parts.len())
            } else {
                "a single request".to_string()
            },
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .context("Failed to serialize plan")
                .into_configuration()?
        );
        Ok(())
    }

    async fn report(&self) -> Result<PlanReport> {
        let size = match (self.size, &self.file) {
            (Some(size), _) => size,
            (None, Some(file)) => {
                tokio::fs::metadata(file)
                    .await
                    .into_configuration()?
                    .len()
            }
            (None, None) => bail!("Either a size or a file has to be given"),
        };
        let parts = plan::plan(size, self.part_size)?;
        Ok(PlanReport {
            size,
            part_size: self.part_size,
            multipart: parts.is_some(),
            parts: parts.unwrap_or_default(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let command = Cli::parse();
    match command {
        Cli::Upload(cmd) => cmd.run().await,
        Cli::Plan(cmd) => cmd.run().await,
    }
}
