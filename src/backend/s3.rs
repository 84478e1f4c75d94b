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

use super::StorageBackend;
use crate::{
    consts::DEFAULT_ACL,
    plan::PartitionRange,
    result::BackendError,
    types::{
        CopiedPart,
        FinalizeResponse,
        Location,
        Manifest,
        ObjectOptions,
        RemainingPart,
        UploadId,
    },
};
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    error::{
        DisplayErrorContext,
        ProvideErrorMetadata,
        SdkError,
    },
    primitives::DateTime,
    types::{
        CompletedMultipartUpload,
        CompletedPart,
        ObjectCannedAcl,
        ServerSideEncryption,
    },
};
use std::fmt::Debug;
use tracing::{
    debug,
    info,
};

/// Extends results of SDK calls with a conversion into [`BackendError`].
trait SdkResultExt<T> {
    /// Converts the error into a [`BackendError`] that keeps the service's error code and
    /// message, which the plain `Display` of an [`SdkError`] drops.
    fn into_backend_error(self, message: &'static str) -> Result<T, BackendError>;
}

impl<T, E, R> SdkResultExt<T> for Result<T, SdkError<E, R>>
where
    E: std::error::Error + 'static,
    R: Debug,
{
    fn into_backend_error(self, message: &'static str) -> Result<T, BackendError> {
        self.map_err(|err| anyhow::anyhow!("{}: {}", message, DisplayErrorContext(&err)))
    }
}

/// [`StorageBackend`] on top of the AWS SDK's S3 client.
pub(crate) struct S3Backend {
    client: aws_sdk_s3::Client,
}

impl S3Backend {
    pub(crate) fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Retrieves the content length of `object`.
    #[tracing::instrument(skip_all, fields(object = %object))]
    pub(crate) async fn content_length(&self, object: &Location) -> anyhow::Result<i64> {
        let head_object = self
            .client
            .head_object()
            .bucket(&object.bucket)
            .key(&object.key)
            .send()
            .await
            .into_backend_error("Failed to retrieve the source object's metadata")?;
        head_object
            .content_length
            .context("The source object's metadata did not include its size")
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    #[tracing::instrument(skip_all)]
    async fn initiate(
        &self,
        destination: &Location,
        options: &ObjectOptions,
    ) -> Result<UploadId, BackendError> {
        let multipart_upload = self
            .client
            .create_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .acl(ObjectCannedAcl::from(
                options.acl.as_deref().unwrap_or(DEFAULT_ACL),
            ))
            .set_expires(options.expires.map(DateTime::from))
            .set_content_type(options.content_type.clone())
            .set_content_disposition(options.content_disposition.clone())
            .set_content_encoding(options.content_encoding.clone())
            .set_content_language(options.content_language.clone())
            .set_cache_control(options.cache_control.clone())
            .set_server_side_encryption(
                options
                    .server_side_encryption
                    .as_deref()
                    .map(ServerSideEncryption::from),
            )
            .set_metadata(options.metadata.clone())
            .send()
            .await
            .into_backend_error("Failed to create multipart upload")?;
        let upload_id = multipart_upload
            .upload_id
            .context("Creating multipart upload probably failed, because no upload ID was returned")?;
        Ok(UploadId::new(upload_id))
    }

    #[tracing::instrument(skip_all, fields(part_number = part.part_number))]
    async fn copy_range(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        source: &Location,
        part: &PartitionRange,
    ) -> Result<CopiedPart, BackendError> {
        let copied_part = self
            .client
            .upload_part_copy()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .part_number(part.part_number)
            .copy_source(source.copy_source())
            .copy_source_range(part.http_range())
            .send()
            .await
            .into_backend_error("Failed to copy part")?;
        let e_tag = copied_part
            .copy_part_result
            .and_then(|result| result.e_tag)
            .context("Copying the part returned no ETag")?;
        Ok(CopiedPart {
            part_number: part.part_number,
            e_tag,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn complete(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        manifest: &Manifest,
    ) -> Result<FinalizeResponse, BackendError> {
        let parts = manifest
            .parts()
            .iter()
            .map(|part| {
                CompletedPart::builder()
                    .e_tag(&part.e_tag)
                    .part_number(part.part_number)
                    .build()
            })
            .collect();
        let completed_multipart_upload = self
            .client
            .complete_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .into_backend_error("Failed to complete multipart upload")?;
        Ok(FinalizeResponse {
            location: completed_multipart_upload.location,
            bucket: completed_multipart_upload.bucket,
            key: completed_multipart_upload.key,
            e_tag: completed_multipart_upload.e_tag,
            version_id: completed_multipart_upload.version_id,
        })
    }

    #[tracing::instrument(skip_all)]
    async fn abort(
        &self,
        destination: &Location,
        upload_id: &UploadId,
    ) -> Result<(), BackendError> {
        self.client
            .abort_multipart_upload()
            .bucket(&destination.bucket)
            .key(&destination.key)
            .upload_id(upload_id.as_str())
            .send()
            .await
            .into_backend_error("Failed to abort multipart upload")?;
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn list_remaining_parts(
        &self,
        destination: &Location,
        upload_id: &UploadId,
    ) -> Result<Vec<RemainingPart>, BackendError> {
        let mut remaining_parts = vec![];
        let mut part_number_marker = None;
        loop {
            let result = self
                .client
                .list_parts()
                .bucket(&destination.bucket)
                .key(&destination.key)
                .upload_id(upload_id.as_str())
                .set_part_number_marker(part_number_marker.take())
                .send()
                .await;
            let list_parts = match result {
                Ok(list_parts) => list_parts,
                // S3 forgets an upload once the abort has released all of its parts.
                Err(err)
                    if err.as_service_error().and_then(|err| err.code())
                        == Some("NoSuchUpload") =>
                {
                    debug!("The multipart upload no longer exists, no parts remain");
                    break;
                }
                Err(err) => {
                    return Err(err).into_backend_error("Failed to list parts");
                }
            };

            remaining_parts.extend(list_parts.parts().iter().map(|part| RemainingPart {
                part_number: part.part_number(),
                e_tag: part.e_tag().map(ToOwned::to_owned),
                size: part.size().and_then(|size| u64::try_from(size).ok()),
            }));

            if list_parts.is_truncated() != Some(true) {
                break;
            }
            part_number_marker = list_parts.next_part_number_marker;
            if part_number_marker.is_none() {
                break;
            }
        }
        info!(
            "Listed {} parts remaining for upload {}",
            remaining_parts.len(),
            upload_id,
        );
        Ok(remaining_parts)
    }
}
