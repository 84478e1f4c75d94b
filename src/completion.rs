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
    backend::StorageBackend,
    result::{
        BackendError,
        CleanupError,
    },
    types::{
        FinalizeResponse,
        Location,
        Manifest,
        UploadId,
    },
};
use std::sync::Arc;
use tracing::{
    debug,
    error,
    info,
};

/// Takes the one terminal action of a multipart copy: completing it, or aborting it.
pub(crate) struct CompletionController<B> {
    backend: Arc<B>,
}

impl<B: StorageBackend> CompletionController<B> {
    pub(crate) fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Completes the multipart copy from the copied parts.
    ///
    /// The manifest must hold exactly the parts `1..=N`, otherwise the backend is not asked to
    /// complete anything and an error is returned.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id))]
    pub(crate) async fn finalize(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        manifest: &Manifest,
    ) -> Result<FinalizeResponse, BackendError> {
        if manifest.is_empty() || !manifest.is_dense() {
            error!("Refusing to complete multipart copy with an incomplete manifest");
            anyhow::bail!(
                "The manifest of {} parts does not form a gapless sequence starting at part 1",
                manifest.len()
            );
        }
        debug!(
            "Completing multipart copy with parts: {}",
            serde_json::to_string(manifest).unwrap_or_else(|err| err.to_string()),
        );

        match self
            .backend
            .complete(destination, upload_id, manifest)
            .await
        {
            Ok(response) => {
                info!(
                    "Multipart copy completed successfully. ETag: {}",
                    response.e_tag.as_deref().unwrap_or("<unknown>"),
                );
                Ok(response)
            }
            Err(err) => {
                error!("Multipart copy failed to complete: {:#}", err);
                Err(err)
            }
        }
    }

    /// Aborts the multipart copy and verifies that no parts are left behind.
    ///
    /// The verification is skipped if the abort request itself fails.
    #[tracing::instrument(skip_all, fields(upload_id = %upload_id))]
    pub(crate) async fn abort(
        &self,
        destination: &Location,
        upload_id: &UploadId,
    ) -> Result<(), CleanupError> {
        if let Err(err) = self.backend.abort(destination, upload_id).await {
            error!("Abort of multipart copy failed: {:#}", err);
            return Err(CleanupError::Abort(err));
        }

        let remaining_parts = self
            .backend
            .list_remaining_parts(destination, upload_id)
            .await
            .map_err(|err| {
                error!(
                    "Abort of multipart copy passed, but listing the remaining parts failed: {:#}",
                    err,
                );
                CleanupError::ListParts(err)
            })?;
        if !remaining_parts.is_empty() {
            error!(
                "Abort of multipart copy passed, but copy parts were not removed: {}",
                serde_json::to_string(&remaining_parts).unwrap_or_else(|err| err.to_string()),
            );
            return Err(CleanupError::PartsRemaining(remaining_parts));
        }

        info!("Multipart copy aborted successfully, no parts remain");
        Ok(())
    }
}
