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

mod backend;
mod completion;
mod consts;
mod coordinator;
mod plan;
mod result;
mod transfer;
mod types;

use crate::{
    backend::s3::S3Backend,
    completion::CompletionController,
    plan::{
        object_size_from_content_length,
        PartSize,
    },
    transfer::TransferOrchestrator,
    types::{
        Location,
        ObjectOptions,
        TransferRequest,
        UploadId,
    },
};
use aws_config::{
    BehaviorVersion,
    SdkConfig,
};
use aws_sdk_s3::primitives::{
    DateTime,
    DateTimeFormat,
};
use clap::{
    Args,
    Parser,
};
use std::{
    num::NonZeroUsize,
    sync::Arc,
    time::SystemTime,
};
use tracing::{
    debug,
    error,
    info,
};
use tracing_subscriber::prelude::*;

#[derive(Debug, Parser)]
#[command(version)]
enum Cli {
    /// Copy an object through a multipart copy.
    ///
    /// The object is split into parts which are all copied concurrently. Once every part has
    /// been copied, the multipart copy is completed. If any part fails, or completing fails, the
    /// multipart copy is aborted and the command verifies that no parts were left behind.
    ///
    /// You need the following AWS permissions:
    ///
    /// * `s3:GetObject` on the source object
    /// * `s3:PutObject`, `s3:AbortMultipartUpload` and `s3:ListMultipartUploadParts` on the
    ///   destination object
    ///
    /// Credentials, region and endpoint are discovered like in most AWS SDKs, e.g. through
    /// `AWS_PROFILE` or `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`.
    Copy(CopyObject),
    /// Abort a multipart copy that was left behind.
    ///
    /// Aborts the multipart upload and verifies that no parts remain afterwards.
    Abort(AbortUpload),
}

#[derive(Debug, Args)]
struct CopyObject {
    /// The name of the S3 bucket to copy the object from.
    #[arg(long)]
    source_bucket: String,
    /// The S3 key of the object to copy.
    #[arg(long)]
    source_key: String,
    /// The name of the S3 bucket to copy the object to.
    #[arg(long)]
    destination_bucket: String,
    /// The S3 key to copy the object to.
    #[arg(long)]
    destination_key: String,
    /// Size of the source object in bytes.
    ///
    /// Retrieved from the source object's metadata if not given.
    #[arg(long)]
    object_size: Option<u64>,
    /// Explicit part-size, in bytes, to use.
    ///
    /// The default is 50 MB.
    #[arg(long)]
    part_size: Option<u64>,
    /// Maximum number of parts to copy at the same time.
    ///
    /// All parts are copied at once if not given.
    #[arg(long)]
    max_concurrent_parts: Option<NonZeroUsize>,
    /// Canned ACL of the copied object.
    #[arg(long, default_value = consts::DEFAULT_ACL)]
    acl: String,
    /// When the copied object can no longer be cached, as an RFC 3339 timestamp.
    #[arg(long, value_parser = parse_timestamp)]
    expires: Option<SystemTime>,
    #[arg(long)]
    content_type: Option<String>,
    #[arg(long)]
    content_disposition: Option<String>,
    #[arg(long)]
    content_encoding: Option<String>,
    #[arg(long)]
    content_language: Option<String>,
    #[arg(long)]
    cache_control: Option<String>,
    /// Server-side encryption of the copied object, e.g. `AES256` or `aws:kms`.
    #[arg(long)]
    server_side_encryption: Option<String>,
    /// User-defined metadata of the copied object, as `KEY=VALUE`. Can be repeated.
    #[arg(long = "metadata", value_parser = parse_key_value)]
    metadata: Vec<(String, String)>,
    /// Correlation token attached to every log event of this copy.
    #[arg(long, default_value = "mpcopy")]
    context: String,
}

impl CopyObject {
    async fn run(self) -> anyhow::Result<()> {
        debug!("Running copy command: {:?}", self);

        let config = get_aws_config().await;
        let backend = Arc::new(S3Backend::new(aws_sdk_s3::Client::new(&config)));

        let source = Location::new(self.source_bucket, self.source_key);
        let destination = Location::new(self.destination_bucket, self.destination_key);
        let object_size = match self.object_size {
            Some(object_size) => object_size,
            None => {
                debug!("Retrieving the size of {}", source);
                object_size_from_content_length(backend.content_length(&source).await?)?
            }
        };
        let part_size = self.part_size.map(PartSize::try_from).transpose()?;

        let request = TransferRequest {
            source,
            destination,
            object_size,
            part_size,
            options: ObjectOptions {
                acl: Some(self.acl),
                expires: self.expires,
                content_type: self.content_type,
                content_disposition: self.content_disposition,
                content_encoding: self.content_encoding,
                content_language: self.content_language,
                cache_control: self.cache_control,
                server_side_encryption: self.server_side_encryption,
                metadata: (!self.metadata.is_empty())
                    .then(|| self.metadata.into_iter().collect()),
            },
        };

        let orchestrator = TransferOrchestrator::new(backend, self.max_concurrent_parts);
        match orchestrator.transfer(&request, &self.context).await {
            Ok(response) => {
                serde_json::to_writer_pretty(std::io::stdout().lock(), &response)?;
                println!();
                Ok(())
            }
            Err(err) => {
                if let Some(upload_id) = err.unremediated_upload_id() {
                    error!("The multipart copy could not be cleaned up and may still hold parts.");
                    error!("To abort it again, run the following command:");
                    error!(
                        "mpcopy abort --bucket '{}' --key '{}' --upload-id '{}'",
                        request.destination.bucket, request.destination.key, upload_id,
                    );
                }
                Err(err.into())
            }
        }
    }
}

#[derive(Debug, Args)]
struct AbortUpload {
    /// The name of the S3 bucket the multipart copy writes to.
    #[arg(long)]
    bucket: String,
    /// The S3 key the multipart copy writes to.
    #[arg(long)]
    key: String,
    /// The upload ID of the multipart copy.
    #[arg(long)]
    upload_id: String,
}

impl AbortUpload {
    async fn run(self) -> anyhow::Result<()> {
        debug!("Running abort command: {:?}", self);

        let config = get_aws_config().await;
        let backend = Arc::new(S3Backend::new(aws_sdk_s3::Client::new(&config)));

        let destination = Location::new(self.bucket, self.key);
        let upload_id = UploadId::new(self.upload_id);
        CompletionController::new(backend)
            .abort(&destination, &upload_id)
            .await?;
        info!("Aborted multipart copy {} for: {}", upload_id, destination);
        Ok(())
    }
}

fn parse_timestamp(value: &str) -> Result<SystemTime, String> {
    let date_time =
        DateTime::from_str(value, DateTimeFormat::DateTime).map_err(|err| err.to_string())?;
    SystemTime::try_from(date_time).map_err(|err| err.to_string())
}

fn parse_key_value(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{value}'"))
}

pub(crate) async fn get_aws_config() -> SdkConfig {
    aws_config::load_defaults(BehaviorVersion::v2024_03_28()).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .with_file(true)
                .with_line_number(true)
                .with_target(false),
        )
        .with(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let command = Cli::parse();
    match command {
        Cli::Copy(cmd) => cmd.run().await,
        Cli::Abort(cmd) => cmd.run().await,
    }
}
