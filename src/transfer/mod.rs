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

//! The operations the uploader needs from a remote object store.

mod body;
#[cfg(test)]
pub(crate) mod memory;
mod s3;

pub(crate) use s3::S3TransferClient;

use crate::{
    plan::PartRange,
    result::Result,
};
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Durability tier an object is stored with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum StorageClass {
    #[default]
    Standard,
    ReducedRedundancy,
}

/// Where an object is uploaded to, and the attributes it is stored with.
///
/// The attributes are fixed when the upload starts, they can not vary between parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TransferTarget {
    pub(crate) bucket: String,
    pub(crate) key: String,
    pub(crate) storage_class: StorageClass,
    pub(crate) public_read: bool,
    pub(crate) encrypted: bool,
}

impl TransferTarget {
    pub(crate) fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// The bytes of one request, with their exact length.
pub(crate) struct Body {
    pub(crate) reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    pub(crate) length: u64,
}

/// Checksums the store computed for an uploaded part. They have to be repeated when the upload is
/// completed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PartChecksums {
    pub(crate) crc32: Option<String>,
    pub(crate) crc32_c: Option<String>,
    pub(crate) sha1: Option<String>,
    pub(crate) sha256: Option<String>,
}

/// A part the store has accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PartTag {
    pub(crate) index: u32,
    pub(crate) e_tag: String,
    pub(crate) checksums: PartChecksums,
}

#[async_trait]
pub(crate) trait TransferClient: Send + Sync {
    /// Uploads a whole object in one request. Returns the entity tag if the store reported one.
    async fn put_object(&self, target: &TransferTarget, body: Body) -> Result<Option<String>>;

    /// Starts a multipart upload, returning its upload ID.
    async fn initiate_multipart(&self, target: &TransferTarget) -> Result<String>;

    async fn upload_part(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        part: &PartRange,
        body: Body,
    ) -> Result<PartTag>;

    /// Assembles the object from `parts`, which must be ordered by index. Returns the entity tag
    /// of the assembled object if the store reported one.
    async fn complete_multipart(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        parts: &[PartTag],
    ) -> Result<Option<String>>;

    /// Discards the upload and the storage of every part uploaded so far.
    async fn abort_multipart(&self, upload_id: &str, target: &TransferTarget) -> Result<()>;
}
