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
    consts::{
        DEFAULT_PART_SIZE,
        MAXIMUM_PART_SIZE,
        MINIMUM_PART_SIZE,
    },
    result::{
        bail,
        AnyhowResultExt,
        Result,
    },
};
use anyhow::Context;
use clap::Args;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    debug,
    warn,
};

/// Connection settings as they can be stored in a profile file.
///
/// ```json
/// {
///   "access_key_id": "AKIA...",
///   "secret_access_key": "...",
///   "region": "eu-central-1",
///   "part_size": 104857600
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Profile {
    pub(crate) access_key_id: Option<String>,
    pub(crate) secret_access_key: Option<String>,
    pub(crate) region: Option<String>,
    pub(crate) endpoint_url: Option<String>,
    pub(crate) force_path_style: Option<bool>,
    pub(crate) part_size: Option<u64>,
}

impl Profile {
    pub(crate) async fn from_file(file: impl AsRef<Path>) -> Result<Self> {
        let file = file.as_ref().to_owned();

        // serde_json does not support asynchronous readers, so we make sure to spawn the task away
        // from the main thread.
        tokio::task::spawn_blocking(move || {
            serde_json::from_reader::<_, Profile>(std::io::BufReader::new(
                std::fs::File::open(&file)
                    .with_context(|| format!("Failed to open profile file {}", file.display()))
                    .into_configuration()?,
            ))
            .with_context(|| format!("Failed to deserialize profile file {}", file.display()))
            .into_configuration()
        })
        .await
        .context("Failed to await synchronous read of profile file")
        .into_configuration()?
    }
}

/// Connection options of the command line. Anything not given here is looked up in the profile
/// file.
#[derive(Clone, Debug, Default, Args)]
pub(crate) struct ConnectionArgs {
    /// JSON file with connection settings.
    ///
    /// Supported keys are `access_key_id`, `secret_access_key`, `region`, `endpoint_url`,
    /// `force_path_style` and `part_size`. Values given on the command line or through the
    /// environment take precedence.
    #[arg(long)]
    pub(crate) profile_file: Option<PathBuf>,
    /// Access key ID used to sign requests.
    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub(crate) access_key_id: Option<String>,
    /// Secret access key used to sign requests.
    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub(crate) secret_access_key: Option<String>,
    /// Region of the bucket, e.g. `eu-central-1`.
    #[arg(long, env = "AWS_REGION")]
    pub(crate) region: Option<String>,
    /// Endpoint of an S3-compatible store to use instead of AWS.
    #[arg(long, env = "AWS_ENDPOINT_URL_S3")]
    pub(crate) endpoint_url: Option<String>,
    /// Address buckets by path instead of by virtual host. Required by some S3-compatible stores.
    #[arg(long)]
    pub(crate) force_path_style: bool,
    /// Size, in bytes, of the parts of a multipart upload.
    ///
    /// Files smaller than twice this size are uploaded in a single request. The default is 5 MiB.
    #[arg(long)]
    pub(crate) part_size: Option<u64>,
}

#[derive(Clone)]
pub(crate) struct Credentials {
    pub(crate) access_key_id: String,
    pub(crate) secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .finish()
    }
}

/// Fully resolved settings for talking to the store.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionSettings {
    pub(crate) credentials: Credentials,
    pub(crate) region: Option<String>,
    pub(crate) endpoint_url: Option<String>,
    pub(crate) force_path_style: bool,
    pub(crate) part_size: u64,
}

impl ConnectionArgs {
    /// Reads the profile file, if any, and resolves the settings.
    pub(crate) async fn load(&self) -> Result<ConnectionSettings> {
        let profile = match &self.profile_file {
            Some(profile_file) => {
                debug!("Reading profile file: {}", profile_file.display());
                Profile::from_file(profile_file).await?
            }
            None => Profile::default(),
        };
        self.resolve(profile)
    }

    /// Merges the command line with `profile`, the command line taking precedence.
    pub(crate) fn resolve(&self, profile: Profile) -> Result<ConnectionSettings> {
        let non_empty = |value: Option<String>| value.filter(|value| !value.trim().is_empty());

        let access_key_id = non_empty(self.access_key_id.clone().or(profile.access_key_id));
        let secret_access_key =
            non_empty(self.secret_access_key.clone().or(profile.secret_access_key));
        let (Some(access_key_id), Some(secret_access_key)) = (access_key_id, secret_access_key)
        else {
            bail!("The access key ID and secret access key have not been specified");
        };

        let part_size = self
            .part_size
            .or(profile.part_size)
            .unwrap_or(DEFAULT_PART_SIZE);
        if part_size == 0 {
            bail!("The part size must be greater than zero");
        }
        if part_size < MINIMUM_PART_SIZE {
            warn!(
                "The part size of {} bytes is below the S3 minimum of {} bytes, the store may reject the upload",
                part_size, MINIMUM_PART_SIZE,
            );
        } else if part_size > MAXIMUM_PART_SIZE {
            warn!(
                "The part size of {} bytes is above the S3 maximum of {} bytes, the store may reject the upload",
                part_size, MAXIMUM_PART_SIZE,
            );
        }

        Ok(ConnectionSettings {
            credentials: Credentials {
                access_key_id,
                secret_access_key,
            },
            region: non_empty(self.region.clone().or(profile.region)),
            endpoint_url: non_empty(self.endpoint_url.clone().or(profile.endpoint_url)),
            force_path_style: self.force_path_style || profile.force_path_style.unwrap_or(false),
            part_size,
        })
    }
}
