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
    result::{
        AnyhowResultExt,
        Result,
    },
    transfer::Body,
};
use anyhow::Context;
use async_trait::async_trait;
use std::path::{
    Path,
    PathBuf,
};
use tokio::io::{
    AsyncReadExt,
    AsyncSeekExt,
};
use tracing::debug;

/// Bytes of known length that can be read starting at any offset.
///
/// Every call to [`open_range`](Self::open_range) returns an independent reader, so ranges can be
/// read concurrently without sharing a cursor.
#[async_trait]
pub(crate) trait ByteSource: Send + Sync {
    fn size(&self) -> u64;

    async fn open_range(&self, offset: u64, length: u64) -> Result<Body>;
}

/// A local file, opened anew for every range.
#[derive(Clone, Debug)]
pub(crate) struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub(crate) async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to read metadata of {}", path.display()))
            .into_transfer()?
            .len();
        Ok(Self { path, size })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn open_range(&self, offset: u64, length: u64) -> Result<Body> {
        debug!("Opening file for reading: {}", self.path.display());
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("Failed to open {}", self.path.display()))
            .into_transfer()?;
        debug!("Seeking to the start of the range: {}", offset);
        file.seek(tokio::io::SeekFrom::Start(offset))
            .await
            .with_context(|| format!("Failed to seek in {}", self.path.display()))
            .into_transfer()?;

        Ok(Body {
            reader: Box::new(file.take(length)),
            length,
        })
    }
}

#[cfg(test)]
pub(crate) use memory::MemorySource;

#[cfg(test)]
mod memory {
    use super::*;
    use std::io::Cursor;

    /// Source backed by a byte vector.
    #[derive(Clone, Debug)]
    pub(crate) struct MemorySource(pub(crate) Vec<u8>);

    #[async_trait]
    impl ByteSource for MemorySource {
        fn size(&self) -> u64 {
            self.0.len() as u64
        }

        async fn open_range(&self, offset: u64, length: u64) -> Result<Body> {
            let range = offset as usize..(offset + length) as usize;
            Ok(Body {
                reader: Box::new(Cursor::new(self.0[range].to_vec())),
                length,
            })
        }
    }
}
