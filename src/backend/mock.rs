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
use std::{
    collections::{
        HashMap,
        HashSet,
    },
    sync::Mutex,
    time::Duration,
};

pub(crate) const UPLOAD_ID: &str = "1a2b3c4d";

/// A backend call, as recorded by [`MockBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Initiate,
    CopyStarted { part_number: i32, range: String },
    CopyFinished { part_number: i32 },
    Complete { manifest: Manifest },
    Abort,
    ListRemainingParts,
}

/// In-memory test double for [`StorageBackend`] with scripted failures.
#[derive(Default)]
pub(crate) struct MockBackend {
    fail_initiate: bool,
    failing_parts: HashSet<i32>,
    part_delays: HashMap<i32, Duration>,
    fail_complete: bool,
    fail_abort: bool,
    fail_list_parts: bool,
    remaining_parts: Vec<RemainingPart>,
    calls: Mutex<Vec<Call>>,
}

impl MockBackend {
    pub(crate) fn failing_initiate(mut self) -> Self {
        self.fail_initiate = true;
        self
    }

    pub(crate) fn failing_part(mut self, part_number: i32) -> Self {
        self.failing_parts.insert(part_number);
        self
    }

    /// Delays the outcome of copying `part_number`, whether it succeeds or fails.
    pub(crate) fn delaying_part(mut self, part_number: i32, delay: Duration) -> Self {
        self.part_delays.insert(part_number, delay);
        self
    }

    pub(crate) fn failing_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    pub(crate) fn failing_abort(mut self) -> Self {
        self.fail_abort = true;
        self
    }

    pub(crate) fn failing_list_parts(mut self) -> Self {
        self.fail_list_parts = true;
        self
    }

    pub(crate) fn with_remaining_parts(mut self, remaining_parts: Vec<RemainingPart>) -> Self {
        self.remaining_parts = remaining_parts;
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub(crate) fn e_tag(part_number: i32) -> String {
    format!("\"etag-{part_number}\"")
}

#[async_trait]
impl StorageBackend for MockBackend {
    async fn initiate(
        &self,
        _destination: &Location,
        _options: &ObjectOptions,
    ) -> Result<UploadId, BackendError> {
        self.record(Call::Initiate);
        if self.fail_initiate {
            anyhow::bail!("AccessDenied");
        }
        Ok(UploadId::new(UPLOAD_ID))
    }

    async fn copy_range(
        &self,
        _destination: &Location,
        _upload_id: &UploadId,
        _source: &Location,
        part: &PartitionRange,
    ) -> Result<CopiedPart, BackendError> {
        self.record(Call::CopyStarted {
            part_number: part.part_number,
            range: part.http_range(),
        });
        if let Some(delay) = self.part_delays.get(&part.part_number) {
            tokio::time::sleep(*delay).await;
        }
        self.record(Call::CopyFinished {
            part_number: part.part_number,
        });
        if self.failing_parts.contains(&part.part_number) {
            anyhow::bail!("InternalError while copying part {}", part.part_number);
        }
        Ok(CopiedPart {
            part_number: part.part_number,
            e_tag: e_tag(part.part_number),
        })
    }

    async fn complete(
        &self,
        destination: &Location,
        upload_id: &UploadId,
        manifest: &Manifest,
    ) -> Result<FinalizeResponse, BackendError> {
        self.record(Call::Complete {
            manifest: manifest.clone(),
        });
        if self.fail_complete {
            anyhow::bail!("InvalidPart");
        }
        Ok(FinalizeResponse {
            location: Some(format!("{destination}")),
            bucket: Some(destination.bucket.clone()),
            key: Some(destination.key.clone()),
            e_tag: Some(format!("\"{}-{}\"", upload_id, manifest.len())),
            version_id: None,
        })
    }

    async fn abort(
        &self,
        _destination: &Location,
        _upload_id: &UploadId,
    ) -> Result<(), BackendError> {
        self.record(Call::Abort);
        if self.fail_abort {
            anyhow::bail!("ServiceUnavailable");
        }
        Ok(())
    }

    async fn list_remaining_parts(
        &self,
        _destination: &Location,
        _upload_id: &UploadId,
    ) -> Result<Vec<RemainingPart>, BackendError> {
        self.record(Call::ListRemainingParts);
        if self.fail_list_parts {
            anyhow::bail!("ServiceUnavailable");
        }
        Ok(self.remaining_parts.clone())
    }
}
