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
    consts::MAXIMUM_OBJECT_SIZE,
    plan::{
        plan,
        PartRange,
    },
    result::{
        bail,
        AnyhowResultExt,
        Error,
        Result,
    },
    size::format_size,
    source::ByteSource,
    transfer::{
        PartTag,
        TransferClient,
        TransferTarget,
    },
};
use futures::{
    StreamExt,
    TryStreamExt,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
};

/// Receives the number of bytes that were just stored remotely.
pub(crate) type ProgressFn<'a> = &'a (dyn Fn(u64) + Send + Sync);

/// How an object ended up in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Uploaded {
    Single { e_tag: Option<String> },
    Multipart { parts: usize, e_tag: Option<String> },
}

/// Server-side state of one in-progress multipart upload.
#[derive(Debug)]
struct UploadSession<'a> {
    target: &'a TransferTarget,
    upload_id: String,
    source_size: u64,
    part_size: u64,
    parts: Vec<PartTag>,
}

/// Uploads single objects, splitting them into parts when they are large enough.
#[derive(Clone)]
pub(crate) struct ObjectUploader<'a> {
    client: &'a dyn TransferClient,
    part_size: u64,
    part_concurrency: usize,
    cancellation: CancellationToken,
}

impl<'a> ObjectUploader<'a> {
    pub(crate) fn new(
        client: &'a dyn TransferClient,
        part_size: u64,
        part_concurrency: usize,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            client,
            part_size,
            part_concurrency: part_concurrency.max(1),
            cancellation,
        }
    }

    /// Uploads all of `source` to `target`.
    ///
    /// If a multipart upload was started and anything goes wrong afterwards, including
    /// cancellation, the multipart upload is aborted before the error is returned. Nothing is
    /// retried.
    #[tracing::instrument(skip_all, fields(key = %target.key))]
    pub(crate) async fn upload(
        &self,
        source: &dyn ByteSource,
        target: &TransferTarget,
        progress: ProgressFn<'_>,
    ) -> Result<Uploaded> {
        let source_size = source.size();
        if source_size > MAXIMUM_OBJECT_SIZE {
            bail!("The source exceeds the maximum object size of S3 and thus can't be uploaded");
        }

        let Some(parts) = plan(source_size, self.part_size)? else {
            return self.upload_single(source, target, progress).await;
        };
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Not raced against cancellation: the store might create the upload even if we stopped
        // waiting for its ID, and we could then never abort it.
        let upload_id = self.client.initiate_multipart(target).await?;
        info!(
            "Created multipart upload with ID {} for: {}",
            upload_id,
            target.uri(),
        );

        let mut session = UploadSession {
            target,
            upload_id,
            source_size,
            part_size: self.part_size,
            parts: Vec::with_capacity(parts.len()),
        };
        match self.drive(&mut session, source, &parts, progress).await {
            Ok(e_tag) => Ok(Uploaded::Multipart {
                parts: session.parts.len(),
                e_tag,
            }),
            Err(err) => {
                error!(
                    "Failure during upload, aborting multipart upload {}: {}",
                    session.upload_id, err,
                );
                if let Err(abort_err) = self
                    .client
                    .abort_multipart(&session.upload_id, target)
                    .await
                {
                    error!(
                        "Failed to abort multipart upload {}, its parts may still be stored: {}",
                        session.upload_id, abort_err,
                    );
                }
                Err(err)
            }
        }
    }

    async fn upload_single(
        &self,
        source: &dyn ByteSource,
        target: &TransferTarget,
        progress: ProgressFn<'_>,
    ) -> Result<Uploaded> {
        let size = source.size();
        debug!(
            "Size of {} is below two parts of {} bytes, uploading in a single request",
            format_size(size),
            self.part_size,
        );
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let body = source.open_range(0, size).await?;
        let e_tag = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(Error::Cancelled),
            result = self.client.put_object(target, body) => result?,
        };
        progress(size);
        info!("Finished upload of {} ({})", target.uri(), format_size(size));

        Ok(Uploaded::Single { e_tag })
    }

    /// Uploads every part and completes the upload. Any error returned leaves the upload open.
    async fn drive(
        &self,
        session: &mut UploadSession<'_>,
        source: &dyn ByteSource,
        parts: &[PartRange],
        progress: ProgressFn<'_>,
    ) -> Result<Option<String>> {
        debug!(
            "Source size: {} bytes. Part size: {} bytes. Number of parts to upload: {}.",
            session.source_size,
            session.part_size,
            parts.len(),
        );

        let upload_id = session.upload_id.as_str();
        let target = session.target;
        let mut completed = futures::stream::iter(parts)
            .map(|part| self.upload_part(source, upload_id, target, part, parts.len(), progress))
            .buffer_unordered(self.part_concurrency)
            .try_collect::<Vec<_>>()
            .await?;

        // Parts may finish in any order, but have to be listed in order.
        completed.sort_by_key(|part| part.index);
        session.parts = completed;

        let listed = session.parts.iter().map(|part| part.index);
        if !listed.eq(parts.iter().map(|part| part.index)) {
            return Err(anyhow::anyhow!(
                "In theory all parts were uploaded, but the store acknowledged a different set of parts than planned"
            ))
            .into_transfer();
        }

        let e_tag = self
            .client
            .complete_multipart(&session.upload_id, session.target, &session.parts)
            .await?;
        info!(
            "Successfully uploaded {}. ETag: {}",
            session.target.uri(),
            e_tag.as_deref().unwrap_or("<unknown>"),
        );
        Ok(e_tag)
    }

    async fn upload_part(
        &self,
        source: &dyn ByteSource,
        upload_id: &str,
        target: &TransferTarget,
        part: &PartRange,
        number_of_parts: usize,
        progress: ProgressFn<'_>,
    ) -> Result<PartTag> {
        if self.cancellation.is_cancelled() {
            return Err(Error::Cancelled);
        }
        info!(
            "Starting upload of part {} of {} (bytes {} to {})...",
            part.index,
            number_of_parts,
            part.offset,
            part.end(),
        );

        let body = source.open_range(part.offset, part.length).await?;
        let tag = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(Error::Cancelled),
            result = self.client.upload_part(upload_id, target, part, body) => result?,
        };
        progress(part.length);

        info!(
            "Finished upload of part {} of {} ({} bytes)",
            part.index, number_of_parts, part.length,
        );
        Ok(tag)
    }
}
