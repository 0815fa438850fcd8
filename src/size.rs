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

use crate::consts::{
    GiB,
    KiB,
    MiB,
};

/// Renders a byte count for log lines and progress reports.
///
/// Below 1 KiB the raw count is shown, below 10 MiB whole kilobytes, below 10 GiB megabytes with
/// one decimal, and gigabytes with two decimals above that.
pub(crate) fn format_size(size: u64) -> String {
    if size < KiB {
        return format!("{} b", size);
    }

    let s = size as f64;
    if size < 10 * MiB {
        format!("{} KB", (s / KiB as f64).round() as u64)
    } else if size < 10 * GiB {
        format!("{:.1} MB", s / MiB as f64)
    } else {
        format!("{:.2} GB", s / GiB as f64)
    }
}
