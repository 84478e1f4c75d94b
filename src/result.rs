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

use crate::types::{
    RemainingPart,
    UploadId,
};
use thiserror::Error;

/// Returns early with an [`Error::InvalidArgument`] built from a format string.
macro_rules! bail {
    ($($tt:tt)*) => {
        return Err($crate::result::Error::InvalidArgument(anyhow::anyhow!($($tt)*)))
    };
}
pub(crate) use bail;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

/// Any failure reported by the storage backend.
///
/// The core never inspects these, it only decides which step of the transfer failed.
pub(crate) type BackendError = anyhow::Error;

/// Terminal outcome of a failed transfer.
///
/// Only `Ok` from [`crate::transfer::TransferOrchestrator::transfer`] means nothing was left
/// behind. [`Error::Abort`] and [`Error::AbortVerification`] both mean the multipart copy may
/// still hold parts on the backend and needs manual remediation.
#[derive(Debug, Error)]
pub(crate) enum Error {
    /// The request was rejected before anything was sent to the backend.
    #[error("Invalid argument: {0}")]
    InvalidArgument(anyhow::Error),
    /// The multipart copy could not be opened. Nothing to clean up.
    #[error("Failed to initiate multipart copy")]
    Initiation(#[source] BackendError),
    /// The copy failed, and the abort that followed was accepted and verified.
    #[error("Multipart copy {upload_id} was aborted")]
    AbortedTransfer {
        upload_id: UploadId,
        #[source]
        cause: AbortCause,
    },
    /// The copy failed, and aborting it failed as well.
    #[error("Failed to abort multipart copy {upload_id} after: {cause}")]
    Abort {
        upload_id: UploadId,
        cause: AbortCause,
        #[source]
        error: CleanupError,
    },
    /// The copy failed, the abort was accepted, but parts are still associated with the upload.
    #[error(
        "Multipart copy {upload_id} was aborted, but {} parts were not removed",
        .remaining_parts.len()
    )]
    AbortVerification {
        upload_id: UploadId,
        #[source]
        cause: AbortCause,
        remaining_parts: Vec<RemainingPart>,
    },
}

impl Error {
    /// The upload ID of a multipart copy that could not be cleaned up, if any.
    pub(crate) fn unremediated_upload_id(&self) -> Option<&UploadId> {
        match self {
            Error::Abort { upload_id, .. } | Error::AbortVerification { upload_id, .. } => {
                Some(upload_id)
            }
            _ => None,
        }
    }
}

/// A single part that could not be copied.
#[derive(Debug, Error)]
#[error("Failed to copy part {part_number}")]
pub(crate) struct PartCopyError {
    pub(crate) part_number: i32,
    #[source]
    pub(crate) source: BackendError,
}

/// The failure that made the orchestrator abort the multipart copy.
#[derive(Debug, Error)]
pub(crate) enum AbortCause {
    #[error(transparent)]
    PartCopy(#[from] PartCopyError),
    #[error("Failed to complete multipart copy")]
    Finalize(#[source] BackendError),
}

/// Why aborting a multipart copy did not leave the backend clean.
#[derive(Debug, Error)]
pub(crate) enum CleanupError {
    #[error("The abort request failed")]
    Abort(#[source] BackendError),
    #[error("Listing the parts remaining after the abort failed")]
    ListParts(#[source] BackendError),
    #[error("The abort request passed, but {} parts were not removed", .0.len())]
    PartsRemaining(Vec<RemainingPart>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_chain_names_the_cause_once() {
        let err = Error::AbortedTransfer {
            upload_id: UploadId::new("1a2b3c4d"),
            cause: AbortCause::PartCopy(PartCopyError {
                part_number: 3,
                source: anyhow::anyhow!("InternalError"),
            }),
        };

        let chain = format!("{:#}", anyhow::Error::new(err));

        assert_eq!(
            chain,
            "Multipart copy 1a2b3c4d was aborted: Failed to copy part 3: InternalError"
        );
    }
}
