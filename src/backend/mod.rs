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

#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod s3;

use crate::{
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
use async_trait::async_trait;

/// The storage operations a multipart copy is built from.
///
/// Retries, timeouts and authentication are the implementation's business.
#[async_trait]
pub(crate) trait StorageBackend: Send + Sync + 'static {
    /// Opens a multipart copy into `destination`.
    async fn initiate(
        &self,
        destination: &Location,
        options: &ObjectOptions,
    ) -> Result<UploadId, BackendError>;

    /// Copies `part` of `source` into the multipart copy as part `part.part_number`.
    async fn copy_range(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        source: &Location,
        part: &PartitionRange,
    ) -> Result<CopiedPart, BackendError>;

    async fn complete(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        manifest: &Manifest,
    ) -> Result<FinalizeResponse, BackendError>;

    async fn abort(&self, destination: &Location, upload_id: &UploadId)
        -> Result<(), BackendError>;

    /// Lists the parts that are still associated with the multipart copy.
    async fn list_remaining_parts(
        &self,
        destination: &Location,
        upload_id: &UploadId,
    ) -> Result<Vec<RemainingPart>, BackendError>;
}
