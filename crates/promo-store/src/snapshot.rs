use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use promo_types::{Claim, Group, Promotion, User};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// Serialized form of the whole store, written as one JSON document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub next_promotion_id: u64,
    pub users: Vec<User>,
    pub promotions: Vec<Promotion>,
    pub claims: Vec<Claim>,
    pub groups: Vec<Group>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
}

impl Snapshot {
    pub const VERSION: u32 = 1;

    /// Read a snapshot. Returns `Ok(None)` when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Option<Self>> {
        let bytes = match fs::read(path.as_ref()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot: Self = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if snapshot.version > Self::VERSION {
            return Err(StoreError::Serialization(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    /// Write atomically: encode into a temp file beside `path`, then rename
    /// over it. A crash mid-write leaves the previous file intact.
    pub fn save(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;

        debug!(
            path = %path.display(),
            users = self.users.len(),
            promotions = self.promotions.len(),
            "snapshot written"
        );
        Ok(())
    }
}
