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

//! In-memory store used by the tests. Records every call and can be told to fail.

use super::{
    Body,
    PartChecksums,
    PartTag,
    TransferClient,
    TransferTarget,
};
use crate::{
    plan::PartRange,
    result::{
        bail,
        AnyhowResultExt,
        Error,
        Result,
        StdResultExt,
    },
};
use async_trait::async_trait;
use std::{
    collections::{
        BTreeMap,
        HashMap,
    },
    sync::Mutex,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Put { key: String, length: u64 },
    Initiate { key: String },
    UploadPart {
        key: String,
        index: u32,
        offset: u64,
        length: u64,
    },
    Complete { key: String, indices: Vec<u32> },
    Abort { key: String },
}

#[derive(Debug)]
struct Session {
    target: TransferTarget,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    calls: Vec<Call>,
    objects: HashMap<String, (TransferTarget, Vec<u8>)>,
    sessions: HashMap<String, Session>,
    next_upload_id: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    pub(crate) state: Mutex<State>,
    /// Every call against a key in this list fails.
    pub(crate) failing_keys: Vec<String>,
    /// Uploading the part with this index fails.
    pub(crate) failing_part: Option<u32>,
    pub(crate) failing_completion: bool,
    pub(crate) failing_abort: bool,
    /// Cancels the token after the part with the given index has been stored.
    pub(crate) cancel_after_part: Option<(u32, CancellationToken)>,
}

impl MemoryStore {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn object(&self, key: &str) -> Option<(TransferTarget, Vec<u8>)> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    pub(crate) fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| matches(call)).count()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if self.failing_keys.iter().any(|failing| failing == key) {
            return Err(Error::Transfer(anyhow::anyhow!(
                "Simulated failure for {}",
                key
            )));
        }
        Ok(())
    }
}

async fn read_body(mut body: Body) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    body.reader
        .read_to_end(&mut data)
        .await
        .into_transfer()?;
    if data.len() as u64 != body.length {
        bail!(
            "Body announced {} bytes, but {} were read",
            body.length,
            data.len(),
        );
    }
    Ok(data)
}

#[async_trait]
impl TransferClient for MemoryStore {
    async fn put_object(&self, target: &TransferTarget, body: Body) -> Result<Option<String>> {
        self.record(Call::Put {
            key: target.key.clone(),
            length: body.length,
        });
        self.check_key(&target.key)?;
        let data = read_body(body).await?;
        let e_tag = format!("\"{}\"", data.len());
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(target.key.clone(), (target.clone(), data));
        Ok(Some(e_tag))
    }

    async fn initiate_multipart(&self, target: &TransferTarget) -> Result<String> {
        self.record(Call::Initiate {
            key: target.key.clone(),
        });
        self.check_key(&target.key)?;
        let mut state = self.state.lock().unwrap();
        state.next_upload_id += 1;
        let upload_id = format!("upload-{}", state.next_upload_id);
        state.sessions.insert(
            upload_id.clone(),
            Session {
                target: target.clone(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        part: &PartRange,
        body: Body,
    ) -> Result<PartTag> {
        self.record(Call::UploadPart {
            key: target.key.clone(),
            index: part.index,
            offset: part.offset,
            length: part.length,
        });
        self.check_key(&target.key)?;
        if self.failing_part == Some(part.index) {
            return Err(Error::Transfer(anyhow::anyhow!(
                "Simulated failure for part {}",
                part.index
            )));
        }
        let data = read_body(body).await?;
        {
            let mut state = self.state.lock().unwrap();
            let Some(session) = state.sessions.get_mut(upload_id) else {
                bail!("Unknown upload ID {}", upload_id);
            };
            session.parts.insert(part.index, data);
        }
        if let Some((index, token)) = &self.cancel_after_part {
            if *index == part.index {
                token.cancel();
            }
        }
        Ok(PartTag {
            index: part.index,
            e_tag: format!("\"{}-{}\"", upload_id, part.index),
            checksums: PartChecksums::default(),
        })
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        target: &TransferTarget,
        parts: &[PartTag],
    ) -> Result<Option<String>> {
        self.record(Call::Complete {
            key: target.key.clone(),
            indices: parts.iter().map(|part| part.index).collect(),
        });
        self.check_key(&target.key)?;
        if self.failing_completion {
            return Err(Error::Transfer(anyhow::anyhow!(
                "Simulated completion failure"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let Some(session) = state.sessions.remove(upload_id) else {
            bail!("Unknown upload ID {}", upload_id);
        };
        if parts.len() != session.parts.len() {
            bail!(
                "Completion listed {} parts, but {} were uploaded",
                parts.len(),
                session.parts.len(),
            );
        }
        let mut data = Vec::new();
        for (tag, (index, bytes)) in parts.iter().zip(session.parts) {
            if tag.index != index || tag.e_tag != format!("\"{}-{}\"", upload_id, index) {
                bail!("Part {} was listed out of order or with a wrong ETag", tag.index);
            }
            data.extend(bytes);
        }
        let e_tag = format!("\"{}-{}\"", data.len(), parts.len());
        state
            .objects
            .insert(target.key.clone(), (session.target, data));
        Ok(Some(e_tag))
    }

    async fn abort_multipart(&self, upload_id: &str, target: &TransferTarget) -> Result<()> {
        self.record(Call::Abort {
            key: target.key.clone(),
        });
        if self.failing_abort {
            return Err(Error::Transfer(anyhow::anyhow!("Simulated abort failure")));
        }
        self.state.lock().unwrap().sessions.remove(upload_id);
        Ok(())
    }
}
