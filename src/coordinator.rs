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
    plan::PartitionRange,
    result::PartCopyError,
    types::{
        CopiedPart,
        Location,
        Manifest,
        UploadId,
    },
};
use futures::stream::{
    FuturesUnordered,
    StreamExt,
};
use std::{
    collections::BTreeMap,
    num::NonZeroUsize,
    sync::Arc,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    warn,
    Instrument,
};

/// Copies all parts of a multipart copy concurrently.
///
/// Every part is copied by its own task. The first failure is returned as soon as it is
/// observed, but the tasks of the other parts are detached rather than cancelled: parts that are
/// already being copied run to completion, and their outcome is only logged.
///
/// With `max_concurrent_parts` set, at most that many copies are in flight at once. Parts still
/// waiting for their turn when a copy fails are skipped, and never reported as failures.
pub(crate) struct PartCopyCoordinator<B> {
    backend: Arc<B>,
    max_concurrent_parts: Option<NonZeroUsize>,
}

impl<B: StorageBackend> PartCopyCoordinator<B> {
    pub(crate) fn new(backend: Arc<B>, max_concurrent_parts: Option<NonZeroUsize>) -> Self {
        Self {
            backend,
            max_concurrent_parts,
        }
    }

    #[tracing::instrument(skip_all, fields(upload_id = %upload_id, number_of_parts = ranges.len()))]
    pub(crate) async fn copy_parts(
        &self,
        ranges: &[PartitionRange],
        source: &Location,
        destination: &Location,
        upload_id: &UploadId,
    ) -> Result<Manifest, PartCopyError> {
        let limiter = self
            .max_concurrent_parts
            .map(|limit| Arc::new(Semaphore::new(limit.get())));
        let skip_waiting = CancellationToken::new();

        let mut in_flight: FuturesUnordered<_> = ranges
            .iter()
            .map(|range| {
                let part_number = range.part_number;
                let task = tokio::spawn(
                    copy_part(
                        self.backend.clone(),
                        PartCopy {
                            source: source.clone(),
                            destination: destination.clone(),
                            upload_id: upload_id.clone(),
                            part: *range,
                            number_of_parts: ranges.len(),
                        },
                        limiter.clone(),
                        skip_waiting.clone(),
                    )
                    .in_current_span(),
                );
                // Dropping the `JoinHandle` detaches the task, it doesn't cancel it.
                async move { (part_number, task.await) }
            })
            .collect();

        let mut copied_parts = BTreeMap::new();
        while let Some((part_number, joined)) = in_flight.next().await {
            let outcome = joined.unwrap_or_else(|err| {
                Err(PartCopyError {
                    part_number,
                    source: anyhow::Error::new(err).context("The copy task did not finish"),
                })
            });
            match outcome {
                Ok(Some(copied_part)) => {
                    copied_parts.insert(copied_part.part_number, copied_part);
                }
                // Skipped after another part failed; that failure is still on its way.
                Ok(None) => {}
                Err(err) => {
                    skip_waiting.cancel();
                    if !in_flight.is_empty() {
                        warn!(
                            "Not waiting for the {} remaining parts, their outcome will only be logged",
                            in_flight.len(),
                        );
                    }
                    return Err(err);
                }
            }
        }

        info!("Copied all {} parts successfully", copied_parts.len());
        Ok(copied_parts.into_values().collect())
    }
}

/// Everything a single part copy task owns.
struct PartCopy {
    source: Location,
    destination: Location,
    upload_id: UploadId,
    part: PartitionRange,
    number_of_parts: usize,
}

async fn copy_part<B: StorageBackend>(
    backend: Arc<B>,
    copy: PartCopy,
    limiter: Option<Arc<Semaphore>>,
    skip_waiting: CancellationToken,
) -> Result<Option<CopiedPart>, PartCopyError> {
    let PartCopy {
        source,
        destination,
        upload_id,
        part,
        number_of_parts,
    } = copy;

    let _permit = match limiter {
        Some(limiter) => tokio::select! {
            biased;
            _ = skip_waiting.cancelled() => {
                warn!(
                    "Skipping copy of part {} of {}, because another part failed",
                    part.part_number, number_of_parts,
                );
                return Ok(None);
            }
            permit = limiter.acquire_owned() => Some(permit.map_err(|err| PartCopyError {
                part_number: part.part_number,
                source: err.into(),
            })?),
        },
        None => None,
    };

    debug!(
        "Starting copy of part {} of {} ({} bytes)...",
        part.part_number,
        number_of_parts,
        part.len(),
    );
    match backend
        .copy_range(&destination, &upload_id, &source, &part)
        .await
    {
        Ok(copied_part) => {
            info!(
                "Finished copy of part {} of {} ({} bytes), ETag: {}",
                part.part_number,
                number_of_parts,
                part.len(),
                copied_part.e_tag,
            );
            Ok(Some(copied_part))
        }
        Err(err) => {
            error!(
                "Failed to copy part {} of {} ({}): {:#}",
                part.part_number,
                number_of_parts,
                part.http_range(),
                err,
            );
            // Cancel while still holding the permit, so no waiting part starts in between.
            skip_waiting.cancel();
            Err(PartCopyError {
                part_number: part.part_number,
                source: err,
            })
        }
    }
}
