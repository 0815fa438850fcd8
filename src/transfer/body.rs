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

use super::Body;
use aws_sdk_s3::primitives::ByteStream;
use futures::TryStreamExt;
use tokio_util::io::ReaderStream;

impl Body {
    /// Turns the body into a streaming [`ByteStream`] without buffering it in memory.
    ///
    /// The AWS `SdkBody` type supports dynamic bodies only through the `http_body` crate, which
    /// requires the data-stream to be split into [`http_body::Frame`]s.
    pub(super) fn into_byte_stream(self) -> ByteStream {
        let frames = ReaderStream::new(self.reader).map_ok(http_body::Frame::data);
        ByteStream::from_body_1_x(http_body_util::StreamBody::new(frames))
    }
}
