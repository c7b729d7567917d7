//! Snapshot Module
//!
//! Snapshot storage behind sink/source capabilities, with optional
//! transparent stream encryption layered on top of any backing store.
//!
//! Sink writes and source reads take `&mut [u8]` deliberately: the cipher
//! layer transforms the caller's buffer in place, so callers must not
//! expect the original contents after a write.

mod cipher;
mod encrypted;
mod file;

pub use cipher::{StreamDecrypter, StreamEncrypter, IV_LEN};
pub use encrypted::EncryptedSnapshotStore;
pub use file::FileSnapshotStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::WolfRaftConfig;
use crate::error::Result;

/// Metadata describing one stored snapshot. Never encrypted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Store-assigned snapshot identifier
    pub id: String,
    /// Raft log index the snapshot covers
    pub index: u64,
    /// Raft term at the snapshot point
    pub term: u64,
    /// Stored payload size in bytes
    pub size: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Write side of one snapshot.
pub trait SnapshotSink: Send {
    /// The snapshot ID this sink writes to.
    fn id(&self) -> &str;

    /// Append bytes to the snapshot. The buffer may be transformed in
    /// place by encrypting layers. Returns the number of bytes consumed,
    /// which is always the full buffer on success.
    fn write(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Commit the snapshot.
    fn close(&mut self) -> Result<()>;

    /// Abort and discard the snapshot.
    fn cancel(&mut self) -> Result<()>;
}

/// Read side of one snapshot.
pub trait SnapshotSource: Send {
    /// Fill `buf` with the next bytes of the stream; returns 0 at the end.
    /// The buffer is transformed in place by decrypting layers.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Snapshot storage capability consumed by the consensus engine.
pub trait SnapshotStore: Send + Sync {
    /// Start a new snapshot at the given index and term.
    fn create(&self, index: u64, term: u64) -> Result<Box<dyn SnapshotSink>>;

    /// Retained snapshot metadata, newest first.
    fn list(&self) -> Result<Vec<SnapshotMeta>>;

    /// Open a stored snapshot for reading.
    fn open(&self, id: &str) -> Result<(SnapshotMeta, Box<dyn SnapshotSource>)>;
}

/// Open the configured snapshot store: file-backed under
/// `<data_dir>/snapshots`, wrapped with stream encryption when an
/// encryption token is configured.
pub fn open_store(config: &WolfRaftConfig) -> Result<Arc<dyn SnapshotStore>> {
    let dir = config.node.data_dir.join("snapshots");
    let store = FileSnapshotStore::new(dir, config.snapshot.retain_count)?;
    match &config.snapshot.encryption_token {
        Some(token) => Ok(Arc::new(EncryptedSnapshotStore::new(store, token.clone())?)),
        None => Ok(Arc::new(store)),
    }
}

/// Drain a source to a byte vector. Test and tooling helper.
pub fn read_to_end(source: &mut dyn SnapshotSource) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = source.read(&mut buf)?;
        if n == 0 {
            return Ok(out);
        }
        out.extend_from_slice(&buf[..n]);
    }
}
