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

use super::{
    Body,
    PartChecksums,
    PartTag,
    StorageClass,
    TransferClient,
    TransferTarget,
};
use crate::{
    config::ConnectionSettings,
    plan::PartRange,
    result::{
        AnyhowResultExt,
        Result,
    },
};
use anyhow::Context;
use async_trait::async_trait;
use aws_config::{
    BehaviorVersion,
    Region,
};
use aws_sdk_s3::{
    config::Credentials,
    types::{
        CompletedMultipartUpload,
        CompletedPart,
        ObjectCannedAcl,
        ServerSideEncryption,
    },
};
use tracing::debug;

/// [`TransferClient`] backed by the AWS SDK.
#[derive(Clone, Debug)]
pub(crate) struct S3TransferClient {
    s3: aws_sdk_s3::Client,
}

impl S3TransferClient {
    /// Builds a client from static credentials.
    ///
    /// Region and endpoint fall back to the SDK's default provider chain when they are not
    /// configured.
    pub(crate) async fn connect(settings: &ConnectionSettings) -> Self {
        let credentials = Credentials::new(
            &settings.credentials.access_key_id,
            &settings.credentials.secret_access_key,
            None,
            None,
            "conveyor",
        );
        let mut loader =
            aws_config::defaults(BehaviorVersion::v2024_03_28()).credentials_provider(credentials);
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint_url) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(settings.force_path_style)
            .build();
        Self {
            s3: aws_sdk_s3::Client::from_conf(s3_config),
        }
    }
}

fn storage_class(target: &TransferTarget) -> aws_sdk_s3::types::StorageClass {
    match target.storage_class {
        StorageClass::Standard => aws_sdk_s3::types::StorageClass::Standard,
        StorageClass::ReducedRedundancy => aws_sdk_s3::types::StorageClass::ReducedRedundancy,
    }
}

fn canned_acl(target: &TransferTarget) -> Option<ObjectCannedAcl> {
    target.public_read.then_some(ObjectCannedAcl::PublicRead)
}

fn server_side_encryption(target: &TransferTarget) -> Option<ServerSideEncryption> {
    target.encrypted.then_some(ServerSideEncryption::Aes256)
}

#[async_trait]
impl TransferClient for S3TransferClient {
    async fn put_object(&self, target: &TransferTarget, body: Body) -> Result<Option<String>> {
        debug!("Putting {} bytes to {}", body.length, target.uri());
        let put_object = self
            .s3
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .storage_class(storage_class(target))
            .set_acl(canned_acl(target))
            .set_server_side_encryption(server_side_encryption(target))
            .content_length(body.length as i64)
            .body(body.into_byte_stream())
            .send()
            .await
            .with_context(|| format!("Failed to put {}", target.uri()))
            .into_transfer()?;
        Ok(put_object.e_tag)
    }

    async fn initiate_multipart(&self, target: &TransferTarget) -> Result<String> {
        let multipart_upload = self
            .s3
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .storage_class(storage_class(target))
            .set_acl(canned_acl(target))
            .set_server_side_encryption(server_side_encryption(target))
            .send()
            .await
            .with_context(|| format!("Failed to create multipart upload for {}", target.uri()))
            .into_transfer()?;
        multipart_upload
            .upload_id
            .context("Creating multipart upload probably failed, because no upload ID was returned")
            .into_transfer()
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        part: &PartRange,
        body: Body,
    ) -> Result<PartTag> {
        let uploaded_part = self
            .s3
            .upload_part()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .part_number(part.index as i32)
            .content_length(body.length as i64)
            .body(body.into_byte_stream())
            .send()
            .await
            .with_context(|| format!("Failed to upload part {}", part.index))
            .into_transfer()?;

        let e_tag = uploaded_part
            .e_tag
            .with_context(|| format!("No ETag was returned for part {}", part.index))
            .into_transfer()?;
        Ok(PartTag {
            index: part.index,
            e_tag,
            checksums: PartChecksums {
                crc32: uploaded_part.checksum_crc32,
                crc32_c: uploaded_part.checksum_crc32_c,
                sha1: uploaded_part.checksum_sha1,
                sha256: uploaded_part.checksum_sha256,
            },
        })
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        parts: &[PartTag],
    ) -> Result<Option<String>> {
        let completed_parts = parts
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .set_checksum_crc32(part.checksums.crc32.clone())
                    .set_checksum_crc32_c(part.checksums.crc32_c.clone())
                    .set_checksum_sha1(part.checksums.sha1.clone())
                    .set_checksum_sha256(part.checksums.sha256.clone())
                    .e_tag(&part.e_tag)
                    .part_number(part.index as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        let completed_multipart_upload = self
            .s3
            .complete_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await
            .with_context(|| format!("Failed to complete multipart upload {}", upload_id))
            .into_transfer()?;
        Ok(completed_multipart_upload.e_tag)
    }

    async fn abort_multipart(&self, upload_id: &str, target: &TransferTarget) -> Result<()> {
        self.s3
            .abort_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.key)
            .upload_id(upload_id)
            .send()
            .await
            .with_context(|| format!("Failed to abort multipart upload {}", upload_id))
            .into_transfer()?;
        Ok(())
    }
}
