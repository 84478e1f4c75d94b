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
    consts::MINIMUM_PART_NUMBER,
    plan::PartSize,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    fmt::{
        Display,
        Formatter,
    },
    time::SystemTime,
};

/// A bucket/key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Location {
    pub(crate) bucket: String,
    pub(crate) key: String,
}

impl Location {
    pub(crate) fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// The URL-encoded `bucket/key` string used to address this object as a copy source.
    pub(crate) fn copy_source(&self) -> String {
        urlencoding::encode(&format!("{}/{}", self.bucket, self.key)).into_owned()
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

/// Properties of the object created by the multipart copy.
///
/// Everything left as `None` is not sent to the backend, except the ACL which falls back to
/// [`crate::consts::DEFAULT_ACL`].
#[derive(Debug, Clone, Default)]
pub(crate) struct ObjectOptions {
    pub(crate) acl: Option<String>,
    pub(crate) expires: Option<SystemTime>,
    pub(crate) content_type: Option<String>,
    pub(crate) content_disposition: Option<String>,
    pub(crate) content_encoding: Option<String>,
    pub(crate) content_language: Option<String>,
    pub(crate) cache_control: Option<String>,
    pub(crate) server_side_encryption: Option<String>,
    pub(crate) metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub(crate) struct TransferRequest {
    pub(crate) source: Location,
    pub(crate) destination: Location,
    pub(crate) object_size: u64,
    pub(crate) part_size: Option<PartSize>,
    pub(crate) options: ObjectOptions,
}

/// Identifies one multipart copy on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct UploadId(String);

impl UploadId {
    pub(crate) fn new(upload_id: impl Into<String>) -> Self {
        Self(upload_id.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UploadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A part that has been copied into the multipart copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct CopiedPart {
    pub(crate) part_number: i32,
    pub(crate) e_tag: String,
}

/// Copied parts, ordered by part number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub(crate) struct Manifest(Vec<CopiedPart>);

impl Manifest {
    pub(crate) fn parts(&self) -> &[CopiedPart] {
        &self.0
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the part numbers form the sequence `1..=len` without gaps or duplicates.
    pub(crate) fn is_dense(&self) -> bool {
        self.0
            .iter()
            .zip(MINIMUM_PART_NUMBER..)
            .all(|(part, expected)| part.part_number == expected)
    }
}

impl FromIterator<CopiedPart> for Manifest {
    fn from_iter<T: IntoIterator<Item = CopiedPart>>(iter: T) -> Self {
        let mut parts: Vec<CopiedPart> = iter.into_iter().collect();
        parts.sort_by_key(|part| part.part_number);
        Self(parts)
    }
}

/// A part still associated with a multipart copy after it was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct RemainingPart {
    pub(crate) part_number: Option<i32>,
    pub(crate) e_tag: Option<String>,
    pub(crate) size: Option<u64>,
}

/// What the backend reports once the multipart copy has been completed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub(crate) struct FinalizeResponse {
    pub(crate) location: Option<String>,
    pub(crate) bucket: Option<String>,
    pub(crate) key: Option<String>,
    pub(crate) e_tag: Option<String>,
    pub(crate) version_id: Option<String>,
}
