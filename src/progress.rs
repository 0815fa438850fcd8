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

use crate::size::format_size;
use std::{
    fmt::{
        Display,
        Formatter,
    },
    sync::atomic::{
        AtomicU64,
        Ordering,
    },
};

/// Counts transferred bytes against a known total.
///
/// [`add`](Self::add) may be called concurrently from any number of part uploads while
/// [`snapshot`](Self::snapshot) is polled. [`reset`](Self::reset) must only be called while no
/// upload is feeding the accumulator.
#[derive(Debug, Default)]
pub(crate) struct ProgressAccumulator {
    total: AtomicU64,
    transferred: AtomicU64,
}

/// Point-in-time view of a [`ProgressAccumulator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Progress {
    pub(crate) percent: u8,
    pub(crate) transferred: u64,
    pub(crate) total: u64,
}

impl ProgressAccumulator {
    pub(crate) fn reset(&self, total: u64) {
        self.transferred.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Records `delta` freshly transferred bytes. The transferred count never exceeds the total.
    pub(crate) fn add(&self, delta: u64) {
        let total = self.total.load(Ordering::SeqCst);
        // The closure always returns `Some`, so the update cannot fail.
        let _ = self
            .transferred
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |transferred| {
                Some(transferred.saturating_add(delta).min(total))
            });
    }

    pub(crate) fn snapshot(&self) -> Progress {
        let total = self.total.load(Ordering::SeqCst);
        let transferred = self.transferred.load(Ordering::SeqCst).min(total);
        let percent = if total == 0 || transferred >= total {
            100
        } else {
            (transferred as u128 * 100 / total as u128) as u8
        };
        Progress {
            percent,
            transferred,
            total,
        }
    }
}

impl Progress {
    pub(crate) fn remaining(&self) -> u64 {
        self.total - self.transferred
    }

    /// Humanized remaining byte count, e.g. `"12.5 MB"`.
    pub(crate) fn remaining_display(&self) -> String {
        format_size(self.remaining())
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}% complete, {} remaining",
            self.percent,
            self.remaining_display(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn empty_total_is_complete() {
        let progress = ProgressAccumulator::default();
        progress.reset(0);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.percent, 100);
        assert_eq!(snapshot.remaining_display(), "0 b");
    }

    #[test]
    fn percent_is_floored() {
        let progress = ProgressAccumulator::default();
        progress.reset(3);
        progress.add(1);
        assert_eq!(progress.snapshot().percent, 33);
        progress.add(1);
        assert_eq!(progress.snapshot().percent, 66);
        progress.add(1);
        assert_eq!(progress.snapshot().percent, 100);
    }

    #[test]
    fn transferred_is_clamped_to_total() {
        let progress = ProgressAccumulator::default();
        progress.reset(10);
        progress.add(7);
        progress.add(7);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.transferred, 10);
        assert_eq!(snapshot.remaining(), 0);
        assert_eq!(snapshot.percent, 100);
    }

    #[test]
    fn reset_starts_over() {
        let progress = ProgressAccumulator::default();
        progress.reset(10);
        progress.add(10);
        progress.reset(2048);
        let snapshot = progress.snapshot();
        assert_eq!(snapshot.percent, 0);
        assert_eq!(snapshot.to_string(), "0% complete, 2 KB remaining");
    }

    #[test]
    fn concurrent_adds_reach_completion_monotonically() {
        let progress = Arc::new(ProgressAccumulator::default());
        progress.reset(8 * 1000 * 64);

        let observer = {
            let progress = Arc::clone(&progress);
            std::thread::spawn(move || {
                let mut last = 0;
                loop {
                    let percent = progress.snapshot().percent;
                    assert!(percent >= last);
                    last = percent;
                    if percent == 100 {
                        break;
                    }
                }
            })
        };

        let writers = (0..8)
            .map(|_| {
                let progress = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        progress.add(64);
                    }
                })
            })
            .collect::<Vec<_>>();
        for writer in writers {
            writer.join().unwrap();
        }
        observer.join().unwrap();

        assert_eq!(progress.snapshot().percent, 100);
        assert_eq!(progress.snapshot().remaining(), 0);
    }
}
