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

use crate::{
    progress::ProgressAccumulator,
    result::{
        AnyhowResultExt,
        Error,
        Result,
    },
    scan::{
        enumerate,
        FileEntry,
        Masks,
    },
    size::format_size,
    source::FileSource,
    transfer::{
        StorageClass,
        TransferTarget,
    },
    uploader::ObjectUploader,
};
use anyhow::Context;
use futures::StreamExt;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};
use tracing::{
    debug,
    error,
    info,
    warn,
};

/// What to upload, and where to.
#[derive(Clone, Debug)]
pub(crate) struct BatchRequest {
    pub(crate) source_directory: PathBuf,
    pub(crate) includes: Vec<String>,
    pub(crate) excludes: Vec<String>,
    pub(crate) recursive: bool,
    pub(crate) bucket: String,
    pub(crate) key_prefix: String,
    pub(crate) storage_class: StorageClass,
    pub(crate) public_read: bool,
    pub(crate) encrypted: bool,
    /// Keep uploading the remaining files after one failed.
    pub(crate) resume_on_error: bool,
    pub(crate) file_concurrency: usize,
}

/// Result of uploading one file.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub(crate) struct FileTransferOutcome {
    pub(crate) local_path: PathBuf,
    pub(crate) remote_key: String,
    pub(crate) size: u64,
    pub(crate) success: bool,
    pub(crate) error: Option<String>,
}

/// Builds the key of a file from the key prefix and its `/`-separated relative path.
pub(crate) fn remote_key(key_prefix: &str, relative_path: &str) -> String {
    let prefix = key_prefix.trim_matches('/');
    let relative_path = relative_path.trim_matches('/');
    if prefix.is_empty() {
        relative_path.to_string()
    } else {
        format!("{}/{}", prefix, relative_path)
    }
}

/// Uploads every matching file of a directory tree, feeding one shared progress accumulator.
pub(crate) struct BatchTransferOrchestrator<'a> {
    uploader: ObjectUploader<'a>,
    progress: Arc<ProgressAccumulator>,
}

impl<'a> BatchTransferOrchestrator<'a> {
    pub(crate) fn new(uploader: ObjectUploader<'a>, progress: Arc<ProgressAccumulator>) -> Self {
        Self { uploader, progress }
    }

    /// Uploads the files matched by `request`.
    ///
    /// Returns one outcome per attempted file. If `resume_on_error` is not set, the first failed
    /// file stops the batch: no further files are started and [`Error::Batch`] is returned with
    /// the outcomes gathered so far.
    #[tracing::instrument(skip_all)]
    pub(crate) async fn run(&self, request: &BatchRequest) -> Result<Vec<FileTransferOutcome>> {
        let masks = Masks::new(&request.includes, &request.excludes)?;

        let exists = tokio::fs::try_exists(&request.source_directory)
            .await
            .with_context(|| {
                format!(
                    "Failed to access source directory {}",
                    request.source_directory.display()
                )
            })
            .into_configuration()?;
        if !exists {
            warn!(
                "Source directory {} does not exist; nothing to upload.",
                request.source_directory.display(),
            );
            return Ok(vec![]);
        }

        let files = tokio::task::spawn_blocking({
            let source_directory = request.source_directory.clone();
            let recursive = request.recursive;
            move || enumerate(&source_directory, &masks, recursive)
        })
        .await
        .context("Failed to await enumeration of source files")
        .into_configuration()??;

        if files.is_empty() {
            warn!(
                "No files match the specified masks in {}; nothing to upload.",
                request.source_directory.display(),
            );
            return Ok(vec![]);
        }
        debug!("Mask matched {} file(s).", files.len());

        let total_size = files.iter().map(|file| file.size).sum::<u64>();
        self.progress.reset(total_size);
        info!(
            "Uploading {} file(s) ({}) to s3://{}/{}",
            files.len(),
            format_size(total_size),
            request.bucket,
            request.key_prefix.trim_matches('/'),
        );

        let halted = AtomicBool::new(false);
        let mut attempts = futures::stream::iter(files)
            .map(|file| {
                let halted = &halted;
                async move {
                    if halted.load(Ordering::SeqCst) {
                        debug!("Skipping {} after an earlier failure", file.path.display());
                        return None;
                    }
                    Some(self.transfer(request, file).await)
                }
            })
            .buffer_unordered(request.file_concurrency.max(1));

        let mut outcomes = Vec::new();
        let mut first_failure = None;
        while let Some(attempt) = attempts.next().await {
            let Some((outcome, result)) = attempt else {
                continue;
            };
            if let Err(err) = result {
                // Cancellation stops the batch even when resuming on errors.
                if request.resume_on_error && !err.is_cancelled() {
                    warn!(
                        "Upload of {} failed, continuing with the remaining files: {}",
                        outcome.local_path.display(),
                        err,
                    );
                } else {
                    error!(
                        "Upload of {} failed: {}",
                        outcome.local_path.display(),
                        err,
                    );
                    halted.store(true, Ordering::SeqCst);
                    if first_failure.is_none() {
                        first_failure = Some((outcome.local_path.clone(), err));
                    }
                }
            }
            outcomes.push(outcome);
        }

        match first_failure {
            Some((local_path, source)) => Err(Error::Batch {
                local_path,
                source: Box::new(source),
                outcomes,
            }),
            None => {
                let failed = outcomes.iter().filter(|outcome| !outcome.success).count();
                info!(
                    "Uploaded {} of {} file(s)",
                    outcomes.len() - failed,
                    outcomes.len(),
                );
                Ok(outcomes)
            }
        }
    }

    async fn transfer(
        &self,
        request: &BatchRequest,
        file: FileEntry,
    ) -> (FileTransferOutcome, Result<()>) {
        let target = TransferTarget {
            bucket: request.bucket.clone(),
            key: remote_key(&request.key_prefix, &file.relative_path),
            storage_class: request.storage_class,
            public_read: request.public_read,
            encrypted: request.encrypted,
        };
        info!(
            "Transferring {} to {} ({})...",
            file.path.display(),
            target.uri(),
            format_size(file.size),
        );

        let progress = |bytes: u64| self.progress.add(bytes);
        let result = match FileSource::open(&file.path).await {
            Ok(source) => self
                .uploader
                .upload(&source, &target, &progress)
                .await
                .map(|uploaded| debug!("Upload of {} complete: {:?}", target.key, uploaded)),
            Err(err) => Err(err),
        };

        let outcome = FileTransferOutcome {
            local_path: file.path,
            remote_key: target.key,
            size: file.size,
            success: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        (outcome, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::memory::{
        Call,
        MemoryStore,
    };
    use std::fs;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn create_test_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::write(root.join("a.bin"), vec![1u8; 25]).unwrap();
        fs::write(root.join("b.bin"), vec![2u8; 5]).unwrap();
        fs::create_dir_all(root.join("nested")).unwrap();
        fs::write(root.join("nested").join("c.bin"), vec![3u8; 40]).unwrap();
        dir
    }

    fn request(source_directory: PathBuf, resume_on_error: bool) -> BatchRequest {
        BatchRequest {
            source_directory,
            includes: vec![],
            excludes: vec![],
            recursive: true,
            bucket: "bucket".to_string(),
            key_prefix: "/releases/1.0/".to_string(),
            storage_class: StorageClass::Standard,
            public_read: false,
            encrypted: false,
            resume_on_error,
            file_concurrency: 1,
        }
    }

    async fn run(
        store: &MemoryStore,
        request: &BatchRequest,
    ) -> (Result<Vec<FileTransferOutcome>>, Arc<ProgressAccumulator>) {
        let progress = Arc::new(ProgressAccumulator::default());
        let uploader = ObjectUploader::new(store, 10, 2, CancellationToken::new());
        let orchestrator = BatchTransferOrchestrator::new(uploader, Arc::clone(&progress));
        (orchestrator.run(request).await, progress)
    }

    fn successes(outcomes: &[FileTransferOutcome]) -> Vec<(&str, bool)> {
        outcomes
            .iter()
            .map(|outcome| (outcome.remote_key.as_str(), outcome.success))
            .collect()
    }

    #[test]
    fn remote_keys() {
        assert_eq!(remote_key("", "a/b.txt"), "a/b.txt");
        assert_eq!(remote_key("/", "a/b.txt"), "a/b.txt");
        assert_eq!(remote_key("prefix", "b.txt"), "prefix/b.txt");
        assert_eq!(remote_key("/deep/prefix/", "a/b.txt"), "deep/prefix/a/b.txt");
    }

    #[tokio::test]
    async fn uploads_every_file() {
        let dir = create_test_tree();
        let store = MemoryStore::default();

        let (result, progress) = run(&store, &request(dir.path().to_owned(), false)).await;

        let outcomes = result.unwrap();
        assert_eq!(
            successes(&outcomes),
            vec![
                ("releases/1.0/a.bin", true),
                ("releases/1.0/b.bin", true),
                ("releases/1.0/nested/c.bin", true),
            ],
        );
        assert_eq!(
            store.object("releases/1.0/nested/c.bin").unwrap().1,
            vec![3u8; 40]
        );
        // 25 and 40 bytes are split into parts of 10 bytes, 5 bytes are not.
        assert_eq!(store.count(|call| matches!(call, Call::Initiate { .. })), 2);
        assert_eq!(store.count(|call| matches!(call, Call::Put { .. })), 1);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.total, 70);
        assert_eq!(snapshot.percent, 100);
    }

    #[tokio::test]
    async fn resume_on_error_attempts_every_file() {
        let dir = create_test_tree();
        let store = MemoryStore {
            failing_keys: vec!["releases/1.0/b.bin".to_string()],
            ..Default::default()
        };

        let (result, progress) = run(&store, &request(dir.path().to_owned(), true)).await;

        let outcomes = result.unwrap();
        assert_eq!(
            successes(&outcomes),
            vec![
                ("releases/1.0/a.bin", true),
                ("releases/1.0/b.bin", false),
                ("releases/1.0/nested/c.bin", true),
            ],
        );
        assert!(outcomes[1]
            .error
            .as_deref()
            .unwrap()
            .contains("Simulated failure"));
        assert_eq!(progress.snapshot().transferred, 65);
    }

    #[tokio::test]
    async fn strict_mode_stops_after_first_failure() {
        let dir = create_test_tree();
        let store = MemoryStore {
            failing_keys: vec!["releases/1.0/b.bin".to_string()],
            ..Default::default()
        };

        let (result, _) = run(&store, &request(dir.path().to_owned(), false)).await;

        let Err(Error::Batch {
            local_path,
            source,
            outcomes,
        }) = result
        else {
            panic!("expected the batch to halt");
        };
        assert_eq!(local_path, dir.path().join("b.bin"));
        assert!(matches!(*source, Error::Transfer(_)));
        assert_eq!(
            successes(&outcomes),
            vec![("releases/1.0/a.bin", true), ("releases/1.0/b.bin", false)],
        );
        assert!(store.object("releases/1.0/nested/c.bin").is_none());
        assert_eq!(
            store.count(|call| matches!(call, Call::Initiate { key } if key.ends_with("c.bin"))),
            0,
        );
    }

    #[tokio::test]
    async fn failed_multipart_file_leaves_no_open_upload() {
        let dir = create_test_tree();
        let store = MemoryStore {
            failing_part: Some(3),
            ..Default::default()
        };

        let (result, _) = run(&store, &request(dir.path().to_owned(), true)).await;

        let outcomes = result.unwrap();
        // Only c.bin has a third part.
        assert_eq!(
            successes(&outcomes),
            vec![
                ("releases/1.0/a.bin", true),
                ("releases/1.0/b.bin", true),
                ("releases/1.0/nested/c.bin", false),
            ],
        );
        assert_eq!(store.count(|call| matches!(call, Call::Abort { .. })), 1);
        assert_eq!(store.open_sessions(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_resuming_batch() {
        let dir = create_test_tree();
        let store = MemoryStore::default();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let uploader = ObjectUploader::new(&store, 10, 1, cancellation);
        let orchestrator =
            BatchTransferOrchestrator::new(uploader, Arc::new(ProgressAccumulator::default()));

        let err = orchestrator
            .run(&request(dir.path().to_owned(), true))
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        let Error::Batch { outcomes, .. } = err else {
            panic!("expected the batch to halt");
        };
        assert_eq!(successes(&outcomes), vec![("releases/1.0/a.bin", false)]);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_files_are_all_uploaded() {
        let dir = create_test_tree();
        let store = MemoryStore::default();
        let request = BatchRequest {
            file_concurrency: 3,
            ..request(dir.path().to_owned(), false)
        };

        let (result, progress) = run(&store, &request).await;

        let mut keys = result
            .unwrap()
            .into_iter()
            .map(|outcome| outcome.remote_key)
            .collect::<Vec<_>>();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "releases/1.0/a.bin",
                "releases/1.0/b.bin",
                "releases/1.0/nested/c.bin",
            ],
        );
        assert_eq!(progress.snapshot().percent, 100);
    }

    #[tokio::test]
    async fn masks_and_recursion_are_applied() {
        let dir = create_test_tree();
        let store = MemoryStore::default();
        let request = BatchRequest {
            recursive: false,
            excludes: vec!["b.*".to_string()],
            key_prefix: String::new(),
            ..request(dir.path().to_owned(), false)
        };

        let (result, _) = run(&store, &request).await;

        assert_eq!(successes(&result.unwrap()), vec![("a.bin", true)]);
    }

    #[tokio::test]
    async fn no_matches_is_a_no_op() {
        let dir = create_test_tree();
        let store = MemoryStore::default();
        let request = BatchRequest {
            includes: vec!["*.txt".to_string()],
            ..request(dir.path().to_owned(), false)
        };

        let (result, _) = run(&store, &request).await;

        assert!(result.unwrap().is_empty());
        assert!(store.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn inaccessible_source_directory_is_a_configuration_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        let store = MemoryStore::default();

        let (result, _) = run(&store, &request(locked.join("source"), false)).await;

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        // Permissions are not enforced for root, the directory then simply does not exist.
        if let Err(err) = result {
            assert!(matches!(err, Error::Configuration(_)));
        }
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_source_directory_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::default();

        let (result, _) = run(&store, &request(dir.path().join("missing"), false)).await;

        assert!(result.unwrap().is_empty());
        assert!(store.calls().is_empty());
    }
}
