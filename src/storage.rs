//! Durable acceptor state.
//!
//! An acceptor that forgets a promise after a restart can let two different
//! values be chosen for one slot, so every [`AcceptorStore::store`] must be
//! durable before it returns.

use derive_new::new;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::proposal::{ProposalId, ProposalValue, Slot};

/// One acceptor's persistent record for a slot.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, new)]
pub struct AcceptorRecord {
    pub promised_id: ProposalId,
    pub accepted: Option<ProposalValue>,
}

impl AcceptorRecord {
    pub fn accepted_id(&self) -> Option<&ProposalId> {
        self.accepted.as_ref().map(|value| value.proposal_id())
    }
}

pub trait AcceptorStore: Send + Sync {
    fn load(&self, slot: Slot) -> Result<Option<AcceptorRecord>>;

    /// Must be durable before returning.
    fn store(&self, slot: Slot, record: &AcceptorRecord) -> Result<()>;
}

impl<S: AcceptorStore + ?Sized> AcceptorStore for Arc<S> {
    fn load(&self, slot: Slot) -> Result<Option<AcceptorRecord>> {
        (**self).load(slot)
    }

    fn store(&self, slot: Slot, record: &AcceptorRecord) -> Result<()> {
        (**self).store(slot, record)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryAcceptorStore {
    records: Mutex<HashMap<Slot, AcceptorRecord>>,
}

impl InMemoryAcceptorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AcceptorStore for InMemoryAcceptorStore {
    fn load(&self, slot: Slot) -> Result<Option<AcceptorRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| Error::Durability("in-memory store poisoned".into()))?;
        Ok(records.get(&slot).cloned())
    }

    fn store(&self, slot: Slot, record: &AcceptorRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| Error::Durability("in-memory store poisoned".into()))?;
        records.insert(slot, record.clone());
        Ok(())
    }
}

/// One JSON file per slot, replaced atomically on every write.
#[derive(Debug)]
pub struct FileAcceptorStore {
    dir: PathBuf,
}

impl FileAcceptorStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(durability)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, slot: Slot) -> PathBuf {
        self.dir.join(format!("{:020}.json", slot.sequence()))
    }
}

impl AcceptorStore for FileAcceptorStore {
    fn load(&self, slot: Slot) -> Result<Option<AcceptorRecord>> {
        let bytes = match fs::read(self.path(slot)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(durability(err)),
        };
        let record = serde_json::from_slice(&bytes)
            .map_err(|err| Error::Durability(format!("corrupt record for {slot}: {err}")))?;
        Ok(Some(record))
    }

    fn store(&self, slot: Slot, record: &AcceptorRecord) -> Result<()> {
        let path = self.path(slot);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(record).map_err(|err| Error::Durability(err.to_string()))?;

        let mut file = File::create(&tmp).map_err(durability)?;
        file.write_all(&bytes).map_err(durability)?;
        file.sync_all().map_err(durability)?;
        fs::rename(&tmp, &path).map_err(durability)?;
        // rename is only durable once the directory entry is synced
        File::open(&self.dir)
            .and_then(|dir| dir.sync_all())
            .map_err(durability)?;

        debug!(%slot, path = %path.display(), "persisted acceptor record");
        Ok(())
    }
}

fn durability(err: std::io::Error) -> Error {
    Error::Durability(err.to_string())
}
