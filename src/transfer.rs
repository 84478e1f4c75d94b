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
    completion::CompletionController,
    coordinator::PartCopyCoordinator,
    plan::{
        plan,
        validate,
    },
    result::{
        AbortCause,
        CleanupError,
        Error,
        Result,
    },
    types::{
        FinalizeResponse,
        TransferRequest,
    },
};
use std::{
    fmt::{
        Display,
        Formatter,
    },
    num::NonZeroUsize,
    sync::Arc,
};
use tracing::{
    debug,
    error,
    info,
};

/// Lifecycle of a single transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferState {
    Idle,
    Initiating,
    Partitioning,
    CopyingParts,
    Finalizing,
    Aborting,
    Completed,
    Aborted,
    AbortFailed,
    Failed,
}

impl TransferState {
    pub(crate) fn can_advance_to(self, next: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Idle, Initiating)
                | (Initiating, Partitioning)
                | (Initiating, Failed)
                | (Partitioning, CopyingParts)
                | (CopyingParts, Finalizing)
                | (CopyingParts, Aborting)
                | (Finalizing, Completed)
                | (Finalizing, Aborting)
                | (Aborting, Aborted)
                | (Aborting, AbortFailed)
        )
    }

    pub(crate) fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed
                | TransferState::Aborted
                | TransferState::AbortFailed
                | TransferState::Failed
        )
    }

    fn advance(&mut self, next: TransferState) {
        debug_assert!(
            self.can_advance_to(next),
            "invalid transfer state transition {self} -> {next}"
        );
        if next.is_terminal() {
            info!("Transfer finished: {} -> {}", self, next);
        } else {
            info!("Transfer state: {} -> {}", self, next);
        }
        *self = next;
    }
}

impl Display for TransferState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferState::Idle => "idle",
            TransferState::Initiating => "initiating",
            TransferState::Partitioning => "partitioning",
            TransferState::CopyingParts => "copying parts",
            TransferState::Finalizing => "finalizing",
            TransferState::Aborting => "aborting",
            TransferState::Completed => "completed",
            TransferState::Aborted => "aborted",
            TransferState::AbortFailed => "abort failed",
            TransferState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Copies an object through a multipart copy, and either completes or aborts it.
pub(crate) struct TransferOrchestrator<B> {
    backend: Arc<B>,
    coordinator: PartCopyCoordinator<B>,
    completion: CompletionController<B>,
}

impl<B: StorageBackend> TransferOrchestrator<B> {
    pub(crate) fn new(backend: Arc<B>, max_concurrent_parts: Option<NonZeroUsize>) -> Self {
        Self {
            coordinator: PartCopyCoordinator::new(backend.clone(), max_concurrent_parts),
            completion: CompletionController::new(backend.clone()),
            backend,
        }
    }

    /// Runs one transfer to its terminal state.
    ///
    /// `context` is only attached to the emitted events. Once the multipart copy has been
    /// initiated, exactly one of complete or abort is requested; a failed abort is not retried.
    #[tracing::instrument(
        skip_all,
        fields(
            context = %context,
            source = %request.source,
            destination = %request.destination,
        )
    )]
    pub(crate) async fn transfer(
        &self,
        request: &TransferRequest,
        context: &str,
    ) -> Result<FinalizeResponse> {
        let mut state = TransferState::Idle;
        let part_size = request.part_size.unwrap_or_default();
        debug!(
            "Object size: {} bytes. Part size: {} bytes.",
            request.object_size,
            part_size.get(),
        );
        validate(request.object_size, part_size)?;

        state.advance(TransferState::Initiating);
        let upload_id = match self
            .backend
            .initiate(&request.destination, &request.options)
            .await
        {
            Ok(upload_id) => upload_id,
            Err(err) => {
                error!("Multipart copy failed to initiate: {:#}", err);
                state.advance(TransferState::Failed);
                return Err(Error::Initiation(err));
            }
        };
        info!(
            "Multipart copy initiated successfully with upload ID {} for: {}",
            upload_id, request.destination,
        );

        state.advance(TransferState::Partitioning);
        let ranges = plan(request.object_size, part_size);
        info!(
            "Copying the object in {} parts of {} bytes each",
            ranges.len(),
            part_size.get(),
        );

        state.advance(TransferState::CopyingParts);
        let cause = match self
            .coordinator
            .copy_parts(&ranges, &request.source, &request.destination, &upload_id)
            .await
        {
            Ok(manifest) => {
                state.advance(TransferState::Finalizing);
                match self
                    .completion
                    .finalize(&request.destination, &upload_id, &manifest)
                    .await
                {
                    Ok(response) => {
                        state.advance(TransferState::Completed);
                        return Ok(response);
                    }
                    Err(err) => AbortCause::Finalize(err),
                }
            }
            Err(err) => AbortCause::PartCopy(err),
        };

        error!("Aborting multipart copy {}: {}", upload_id, cause);
        state.advance(TransferState::Aborting);
        match self.completion.abort(&request.destination, &upload_id).await {
            Ok(()) => {
                state.advance(TransferState::Aborted);
                Err(Error::AbortedTransfer { upload_id, cause })
            }
            Err(CleanupError::PartsRemaining(remaining_parts)) => {
                state.advance(TransferState::AbortFailed);
                Err(Error::AbortVerification {
                    upload_id,
                    cause,
                    remaining_parts,
                })
            }
            Err(error) => {
                state.advance(TransferState::AbortFailed);
                Err(Error::Abort {
                    upload_id,
                    cause,
                    error,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::mock::{
            e_tag,
            Call,
            MockBackend,
            UPLOAD_ID,
        },
        plan::PartSize,
        types::{
            CopiedPart,
            Location,
            Manifest,
            ObjectOptions,
            RemainingPart,
            UploadId,
        },
    };
    use std::time::Duration;

    fn request(object_size: u64) -> TransferRequest {
        TransferRequest {
            source: Location::new("source_bucket", "object_key"),
            destination: Location::new("destination_bucket", "copied_object_name"),
            object_size,
            part_size: None,
            options: ObjectOptions::default(),
        }
    }

    fn manifest(part_numbers: &[i32]) -> Manifest {
        part_numbers
            .iter()
            .map(|&part_number| CopiedPart {
                part_number,
                e_tag: e_tag(part_number),
            })
            .collect()
    }

    async fn run(backend: &Arc<MockBackend>, request: &TransferRequest) -> Result<FinalizeResponse> {
        TransferOrchestrator::new(backend.clone(), None)
            .transfer(request, "request_context")
            .await
    }

    fn is_terminal_action(call: &Call) -> bool {
        matches!(call, Call::Complete { .. } | Call::Abort)
    }

    #[tokio::test]
    async fn two_parts_are_copied_and_completed() {
        let backend = Arc::new(MockBackend::default());

        let response = run(&backend, &request(100_000_000)).await.unwrap();

        assert_eq!(response.key.as_deref(), Some("copied_object_name"));
        assert_eq!(backend.calls().first(), Some(&Call::Initiate));
        assert_eq!(
            backend.count(|call| matches!(call, Call::CopyStarted { .. })),
            2
        );
        assert_eq!(
            backend.calls().last(),
            Some(&Call::Complete {
                manifest: manifest(&[1, 2]),
            })
        );
        assert_eq!(backend.count(|call| matches!(call, Call::Abort)), 0);
    }

    #[tokio::test]
    async fn small_object_is_copied_as_single_part() {
        let backend = Arc::new(MockBackend::default());

        run(&backend, &request(25_000_000)).await.unwrap();

        assert!(backend.calls().contains(&Call::CopyStarted {
            part_number: 1,
            range: "bytes=0-24999999".to_owned(),
        }));
        assert_eq!(
            backend.calls().last(),
            Some(&Call::Complete {
                manifest: manifest(&[1]),
            })
        );
    }

    #[tokio::test]
    async fn custom_part_size_is_used() {
        let backend = Arc::new(MockBackend::default());
        let mut request = request(30_000_000);
        request.part_size = Some(PartSize::try_from(10_000_000).unwrap());

        run(&backend, &request).await.unwrap();

        assert_eq!(
            backend.calls().last(),
            Some(&Call::Complete {
                manifest: manifest(&[1, 2, 3]),
            })
        );
    }

    #[tokio::test]
    async fn part_copy_failure_aborts_transfer() {
        let backend = Arc::new(
            MockBackend::default()
                .failing_part(1)
                .delaying_part(2, Duration::from_millis(20)),
        );

        let err = run(&backend, &request(100_000_000)).await.unwrap_err();

        match err {
            Error::AbortedTransfer {
                upload_id,
                cause: AbortCause::PartCopy(cause),
            } => {
                assert_eq!(upload_id, UploadId::new(UPLOAD_ID));
                assert_eq!(cause.part_number, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.count(|call| matches!(call, Call::Complete { .. })), 0);
        assert_eq!(backend.count(|call| matches!(call, Call::Abort)), 1);
        assert_eq!(
            backend.count(|call| matches!(call, Call::ListRemainingParts)),
            1
        );
    }

    #[tokio::test]
    async fn finalize_failure_with_remaining_parts_fails_verification() {
        let remaining = vec![
            RemainingPart {
                part_number: Some(1),
                e_tag: Some(e_tag(1)),
                size: Some(50_000_000),
            },
            RemainingPart {
                part_number: Some(2),
                e_tag: Some(e_tag(2)),
                size: Some(50_000_000),
            },
        ];
        let backend = Arc::new(
            MockBackend::default()
                .failing_complete()
                .with_remaining_parts(remaining.clone()),
        );

        let err = run(&backend, &request(100_000_000)).await.unwrap_err();

        assert_eq!(
            err.unremediated_upload_id(),
            Some(&UploadId::new(UPLOAD_ID))
        );
        match err {
            Error::AbortVerification {
                cause: AbortCause::Finalize(_),
                remaining_parts,
                ..
            } => assert_eq!(remaining_parts, remaining),
            other => panic!("unexpected error: {other:?}"),
        }
        let terminal_actions: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(is_terminal_action)
            .collect();
        assert_eq!(
            terminal_actions,
            vec![
                Call::Complete {
                    manifest: manifest(&[1, 2]),
                },
                Call::Abort,
            ]
        );
    }

    #[tokio::test]
    async fn initiation_failure_is_terminal() {
        let backend = Arc::new(MockBackend::default().failing_initiate());

        let err = run(&backend, &request(100_000_000)).await.unwrap_err();

        assert!(matches!(err, Error::Initiation(_)));
        assert_eq!(backend.calls(), vec![Call::Initiate]);
    }

    #[tokio::test]
    async fn failed_abort_keeps_original_cause() {
        let backend = Arc::new(MockBackend::default().failing_part(2).failing_abort());

        let err = run(&backend, &request(100_000_000)).await.unwrap_err();

        match &err {
            Error::Abort {
                cause: AbortCause::PartCopy(cause),
                error: CleanupError::Abort(_),
                ..
            } => assert_eq!(cause.part_number, 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.unremediated_upload_id().is_some());
        assert_eq!(
            backend.count(|call| matches!(call, Call::ListRemainingParts)),
            0
        );
    }

    #[tokio::test]
    async fn failed_listing_after_abort_is_unremediated() {
        let backend = Arc::new(MockBackend::default().failing_part(1).failing_list_parts());

        let err = run(&backend, &request(100_000_000)).await.unwrap_err();

        match &err {
            Error::Abort {
                cause: AbortCause::PartCopy(cause),
                error: CleanupError::ListParts(_),
                ..
            } => assert_eq!(cause.part_number, 1),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.unremediated_upload_id(), Some(&UploadId::new(UPLOAD_ID)));
        assert_eq!(backend.count(|call| matches!(call, Call::Abort)), 1);
        assert_eq!(backend.count(|call| matches!(call, Call::Complete { .. })), 0);
    }

    #[tokio::test]
    async fn empty_object_is_rejected_before_initiation() {
        let backend = Arc::new(MockBackend::default());

        let err = run(&backend, &request(0)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn state_transitions() {
        use TransferState::*;

        assert!(Idle.can_advance_to(Initiating));
        assert!(Initiating.can_advance_to(Failed));
        assert!(Finalizing.can_advance_to(Aborting));
        assert!(!Initiating.can_advance_to(Aborting));
        assert!(!Completed.can_advance_to(Aborting));
        assert!(!Aborting.can_advance_to(Completed));

        let all = [
            Idle,
            Initiating,
            Partitioning,
            CopyingParts,
            Finalizing,
            Aborting,
            Completed,
            Aborted,
            AbortFailed,
            Failed,
        ];
        for state in all.into_iter().filter(|state| state.is_terminal()) {
            assert!(all.iter().all(|&next| !state.can_advance_to(next)));
        }
    }
}
