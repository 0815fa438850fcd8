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

use crate::batch::FileTransferOutcome;
use std::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    path::PathBuf,
};

/// Returns early with a [`Error::Configuration`] built from a format string.
macro_rules! bail {
    ($($tt:tt)*) => {
        return Err(anyhow::anyhow!($($tt)*)).into_configuration()
    };
}
pub(crate) use bail;

pub(crate) type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) enum Error {
    /// Invalid or missing settings. Raised before any network call is made.
    Configuration(anyhow::Error),
    /// A call against the remote store, or a read of the local source, failed. Fatal to the
    /// current object.
    Transfer(anyhow::Error),
    /// The caller cancelled the transfer.
    Cancelled,
    /// A file failed while the batch was not allowed to resume on errors. Carries the outcomes
    /// of every file that was attempted, the failed one included.
    Batch {
        local_path: PathBuf,
        source: Box<Error>,
        outcomes: Vec<FileTransferOutcome>,
    },
}

impl Error {
    pub(crate) fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Batch { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Configuration(err) => write!(f, "Configuration error: {:#}", err),
            Error::Transfer(err) => write!(f, "Transfer error: {:#}", err),
            Error::Cancelled => write!(f, "Transfer cancelled"),
            Error::Batch {
                local_path, source, ..
            } => write!(
                f,
                "Batch halted after failing to upload {}: {}",
                local_path.display(),
                source,
            ),
        }
    }
}

// `main` returns this type, so the debug representation is what ends up on the terminal.
impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

pub(crate) trait StdResultExt<T, E> {
    fn into_configuration(self) -> Result<T, Error>;

    fn into_transfer(self) -> Result<T, Error>;
}

impl<T, E> StdResultExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn into_configuration(self) -> Result<T, Error> {
        self.map_err(|err| Error::Configuration(anyhow::Error::new(err)))
    }

    fn into_transfer(self) -> Result<T, Error> {
        self.map_err(|err| Error::Transfer(anyhow::Error::new(err)))
    }
}

pub(crate) trait AnyhowResultExt<T> {
    fn into_configuration(self) -> Result<T, Error>;

    fn into_transfer(self) -> Result<T, Error>;
}

impl<T> AnyhowResultExt<T> for std::result::Result<T, anyhow::Error> {
    fn into_configuration(self) -> Result<T, Error> {
        self.map_err(Error::Configuration)
    }

    fn into_transfer(self) -> Result<T, Error> {
        self.map_err(Error::Transfer)
    }
}
