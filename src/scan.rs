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

//! Enumeration of the local files a batch uploads.

use crate::result::{
    AnyhowResultExt,
    Result,
    StdResultExt,
};
use anyhow::Context;
use globset::{
    Glob,
    GlobSet,
    GlobSetBuilder,
};
use std::path::{
    Path,
    PathBuf,
};
use walkdir::WalkDir;

/// A file below the scanned root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FileEntry {
    pub(crate) path: PathBuf,
    /// Path relative to the scanned root, separated by `/` on every platform.
    pub(crate) relative_path: String,
    pub(crate) size: u64,
}

/// Include and exclude glob masks.
///
/// A mask without a `/` is matched against the file name, so `*.log` matches log files at any
/// depth. A mask containing a `/` is matched against the whole relative path. Without include
/// masks every file is included.
#[derive(Clone, Debug)]
pub(crate) struct Masks {
    includes: Option<Mask>,
    excludes: Option<Mask>,
}

#[derive(Clone, Debug)]
struct Mask {
    names: GlobSet,
    paths: GlobSet,
}

impl Mask {
    fn new(patterns: &[String]) -> Result<Option<Self>> {
        if patterns.is_empty() {
            return Ok(None);
        }
        let mut names = GlobSetBuilder::new();
        let mut paths = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .with_context(|| format!("Invalid mask: {}", pattern))
                .into_configuration()?;
            if pattern.contains('/') {
                paths.add(glob);
            } else {
                names.add(glob);
            }
        }
        Ok(Some(Self {
            names: names.build().into_configuration()?,
            paths: paths.build().into_configuration()?,
        }))
    }

    fn is_match(&self, relative_path: &str) -> bool {
        let name = relative_path.rsplit('/').next().unwrap_or(relative_path);
        self.names.is_match(name) || self.paths.is_match(relative_path)
    }
}

impl Masks {
    pub(crate) fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self {
            includes: Mask::new(includes)?,
            excludes: Mask::new(excludes)?,
        })
    }

    pub(crate) fn is_match(&self, relative_path: &str) -> bool {
        let included = self
            .includes
            .as_ref()
            .map_or(true, |includes| includes.is_match(relative_path));
        let excluded = self
            .excludes
            .as_ref()
            .is_some_and(|excludes| excludes.is_match(relative_path));
        included && !excluded
    }
}

/// Lists the files below `root` that match `masks`, in lexicographic order.
///
/// Only direct children of `root` are considered unless `recursive` is set. Symbolic links are
/// followed.
pub(crate) fn enumerate(root: &Path, masks: &Masks, recursive: bool) -> Result<Vec<FileEntry>> {
    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker {
        let entry = entry
            .with_context(|| format!("Failed to enumerate files in {}", root.display()))
            .into_configuration()?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative_path = entry
            .path()
            .strip_prefix(root)
            .context("Enumerated file is not below the source directory")
            .into_configuration()?
            .components()
            .map(|component| component.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if !masks.is_match(&relative_path) {
            continue;
        }

        let size = entry
            .metadata()
            .with_context(|| format!("Failed to read metadata of {}", entry.path().display()))
            .into_configuration()?
            .len();
        files.push(FileEntry {
            path: entry.into_path(),
            relative_path,
            size,
        });
    }

    Ok(files)
}
