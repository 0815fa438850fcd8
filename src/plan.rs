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
    consts::MAXIMUM_PART_NUMBER,
    result::{
        bail,
        AnyhowResultExt,
        Result,
    },
};
use serde::Serialize;

/// A contiguous byte range of the source, uploaded as one part.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub(crate) struct PartRange {
    /// 1-based part number.
    pub(crate) index: u32,
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

impl PartRange {
    pub(crate) fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Splits an object of `total_size` bytes into parts of `part_size` bytes.
///
/// Returns `None` if the object is smaller than two parts, in which case it should be uploaded in
/// a single request. Otherwise every part is exactly `part_size` bytes long, except for the last
/// one, which additionally takes the remainder of the division. No part is therefore ever smaller
/// than `part_size`, and the last part is at most `2 * part_size - 1` bytes long.
///
/// Plans of more than [`MAXIMUM_PART_NUMBER`] parts are rejected before any part is built.
pub(crate) fn plan(total_size: u64, part_size: u64) -> Result<Option<Vec<PartRange>>> {
    if part_size == 0 {
        bail!("The part size must be greater than zero");
    }
    if total_size / 2 < part_size {
        return Ok(None);
    }

    let whole_parts = total_size / part_size;
    let remainder = total_size % part_size;
    if whole_parts > MAXIMUM_PART_NUMBER {
        bail!(
            "Uploading {} bytes in parts of {} bytes needs {} parts, but S3 allows at most {}",
            total_size,
            part_size,
            whole_parts,
            MAXIMUM_PART_NUMBER,
        );
    }

    let mut parts = (1..=whole_parts as u32)
        .map(|index| PartRange {
            index,
            offset: u64::from(index - 1) * part_size,
            length: part_size,
        })
        .collect::<Vec<_>>();
    if let Some(last) = parts.last_mut() {
        last.length += remainder;
    }

    Ok(Some(parts))
}
