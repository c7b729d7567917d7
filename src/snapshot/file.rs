//! File Snapshot Store
//!
//! Snapshots live one-per-directory under the store root: payload in
//! `state.bin`, metadata as a `meta.json` sidecar. Sinks write into a
//! `.tmp` directory that is renamed into place on commit, and old
//! snapshots beyond the retain count are reaped after each commit.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{SnapshotMeta, SnapshotSink, SnapshotSource, SnapshotStore};
use crate::error::{Error, Result};

const META_FILE: &str = "meta.json";
const STATE_FILE: &str = "state.bin";
const TMP_SUFFIX: &str = ".tmp";

/// Disk-backed snapshot store with a retained-snapshot count.
pub struct FileSnapshotStore {
    dir: PathBuf,
    retain: usize,
}

impl FileSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> Result<Self> {
        if retain == 0 {
            return Err(Error::Config(
                "snapshot retain count must be at least 1".into(),
            ));
        }
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, retain })
    }
}

fn read_meta(dir: &Path, id: &str) -> Result<SnapshotMeta> {
    let file = File::open(dir.join(id).join(META_FILE))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

/// All committed snapshots, newest first.
fn all_metas(dir: &Path) -> Result<Vec<SnapshotMeta>> {
    let mut metas = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(TMP_SUFFIX) || !entry.file_type()?.is_dir() {
            continue;
        }
        match read_meta(dir, &name) {
            Ok(meta) => metas.push(meta),
            Err(e) => warn!("Ignoring unreadable snapshot '{}': {}", name, e),
        }
    }
    metas.sort_by(|a, b| (b.term, b.index, b.created_at).cmp(&(a.term, a.index, a.created_at)));
    Ok(metas)
}

/// Remove committed snapshots beyond the retain count.
fn reap(dir: &Path, retain: usize) {
    let metas = match all_metas(dir) {
        Ok(metas) => metas,
        Err(e) => {
            warn!("Snapshot reap skipped, listing failed: {}", e);
            return;
        }
    };
    for meta in metas.iter().skip(retain) {
        debug!("Reaping snapshot {}", meta.id);
        if let Err(e) = fs::remove_dir_all(dir.join(&meta.id)) {
            warn!("Failed to reap snapshot '{}': {}", meta.id, e);
        }
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn create(&self, index: u64, term: u64) -> Result<Box<dyn SnapshotSink>> {
        let id = format!("{}-{}-{}", term, index, Uuid::new_v4().simple());
        let tmp_dir = self.dir.join(format!("{}{}", id, TMP_SUFFIX));
        fs::create_dir_all(&tmp_dir)?;
        let file = File::create(tmp_dir.join(STATE_FILE))?;

        debug!("Creating snapshot {}", id);
        Ok(Box::new(FileSink {
            store_dir: self.dir.clone(),
            retain: self.retain,
            meta: SnapshotMeta {
                id,
                index,
                term,
                size: 0,
                created_at: Utc::now(),
            },
            tmp_dir,
            writer: Some(BufWriter::new(file)),
            done: false,
        }))
    }

    fn list(&self) -> Result<Vec<SnapshotMeta>> {
        let mut metas = all_metas(&self.dir)?;
        metas.truncate(self.retain);
        Ok(metas)
    }

    fn open(&self, id: &str) -> Result<(SnapshotMeta, Box<dyn SnapshotSource>)> {
        if id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(Error::SnapshotNotFound(id.to_string()));
        }
        let meta =
            read_meta(&self.dir, id).map_err(|_| Error::SnapshotNotFound(id.to_string()))?;
        let file = File::open(self.dir.join(id).join(STATE_FILE))
            .map_err(|_| Error::SnapshotNotFound(id.to_string()))?;
        Ok((meta, Box::new(FileSource { reader: BufReader::new(file) })))
    }
}

struct FileSink {
    store_dir: PathBuf,
    retain: usize,
    meta: SnapshotMeta,
    tmp_dir: PathBuf,
    writer: Option<BufWriter<File>>,
    done: bool,
}

impl SnapshotSink for FileSink {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn write(&mut self, buf: &mut [u8]) -> Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Snapshot("write on a finished sink".into()))?;
        writer.write_all(buf)?;
        self.meta.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        serde_json::to_writer_pretty(
            File::create(self.tmp_dir.join(META_FILE))?,
            &self.meta,
        )?;
        fs::rename(&self.tmp_dir, self.store_dir.join(&self.meta.id))?;
        self.done = true;

        debug!("Committed snapshot {} ({} bytes)", self.meta.id, self.meta.size);
        reap(&self.store_dir, self.retain);
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.writer.take();
        self.done = true;
        if self.tmp_dir.exists() {
            fs::remove_dir_all(&self.tmp_dir)?;
        }
        debug!("Cancelled snapshot {}", self.meta.id);
        Ok(())
    }
}

struct FileSource {
    reader: BufReader<File>,
}

impl SnapshotSource for FileSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.reader.read(buf)?)
    }
}
