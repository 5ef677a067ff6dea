//! File-backed persistence for the voting stores.
//!
//! Each store is a single JSON document that is always rewritten in full:
//! serialize, write to a sibling temporary file, fsync, then rename over the
//! original. A crash mid-write therefore leaves either the old or the new
//! document, never a torn one.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rocket::serde::json::serde_json;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StorageError;

pub const VOTERS_FILE: &str = "voters.json";
pub const USED_TOKENS_FILE: &str = "used_tokens.json";
pub const VOTES_FILE: &str = "votes.json";

/// A JSON document holding one store's full state.
///
/// A store without a path lives purely in memory and every operation on it
/// is a no-op.
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: Option<PathBuf>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonFile<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A store backed by `name` inside `dir`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self {
            path: Some(dir.join(name)),
            _marker: PhantomData,
        }
    }

    /// A store that is never written anywhere.
    pub fn memory() -> Self {
        Self {
            path: None,
            _marker: PhantomData,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the stored document, or `None` if nothing has been written yet.
    pub fn load(&self) -> Result<Option<T>, StorageError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Atomically replace the stored document.
    pub fn save(&self, value: &T) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(value)?;
        atomic_write(path, &bytes)?;
        trace!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::new(ErrorKind::Other, "store path has no parent"))?;
    fs::create_dir_all(dir)?;

    let tmp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    // Make the rename itself durable.
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}
