//! Save/load between a map and its on-disk binary image.
//!
//! File layout (after optional gzip wrapping of the whole stream):
//! ```text
//!   [magic: 4 bytes][version: u32 LE]
//!   [total_size: i64 LE][limit: i64 LE][entry_count: u64 LE]
//!   entry_count × [key][value][size: i64 LE]
//! ```
//! Entries appear in the structure's iteration order, so loading rebuilds
//! an observably identical map. Loaders sniff the two-byte gzip signature
//! before header parsing, so compressed and plain files are read through
//! the same entry point.
//!
//! Saves serialize under the read lock, then compress and write with the
//! lock released; the file is written to a sibling temp path and renamed
//! into place. Loads read and decode the whole image first and only then
//! swap it in under the write lock, so a failed load leaves the previous
//! contents untouched.

use std::fs;
use std::hash::Hash;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::codec::{self, Codec};
use crate::error::{StoreError, StoreResult};
use crate::map::OrderedMap;
use crate::sync_map::{Entry, SyncMap};

/// Leading bytes of a gzip stream, used to auto-detect compressed files.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Options for [`OrderedMap::save`] and [`SyncMap::save`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SaveOptions {
    /// Gzip-compress the serialized image.
    pub compress: bool,
    /// Gzip level 1-9; 0 selects the library default. Ignored unless
    /// `compress` is set.
    pub compress_level: u32,
}

// ── Snapshot body encode/decode ──────────────────────────────────────────

struct Snapshot<K, V> {
    total_size: i64,
    limit: i64,
    entries: Vec<(K, V, i64)>,
}

fn encode_snapshot<'a, K, V, I>(
    total_size: i64,
    limit: i64,
    count: u64,
    entries: I,
) -> StoreResult<Vec<u8>>
where
    K: Codec + 'a,
    V: Codec + 'a,
    I: Iterator<Item = (&'a K, &'a V, i64)>,
{
    let mut out = Vec::with_capacity(codec::HEADER_SIZE + 24);
    codec::write_header(&mut out);
    total_size.encode(&mut out)?;
    limit.encode(&mut out)?;
    count.encode(&mut out)?;
    for (key, value, size) in entries {
        key.encode(&mut out)?;
        value.encode(&mut out)?;
        size.encode(&mut out)?;
    }
    Ok(out)
}

fn decode_snapshot<K: Codec, V: Codec>(data: &[u8]) -> StoreResult<Snapshot<K, V>> {
    let mut buf = data;
    codec::read_header(&mut buf)?;
    let total_size = i64::decode(&mut buf)?;
    let limit = i64::decode(&mut buf)?;
    let count = u64::decode(&mut buf)?;
    // cap the pre-allocation so a corrupt count cannot over-allocate
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        let key = K::decode(&mut buf)?;
        let value = V::decode(&mut buf)?;
        let size = i64::decode(&mut buf)?;
        entries.push((key, value, size));
    }
    Ok(Snapshot {
        total_size,
        limit,
        entries,
    })
}

// ── File helpers ─────────────────────────────────────────────────────────

fn compress(bytes: &[u8], level: u32) -> io::Result<Vec<u8>> {
    let level = if level == 0 {
        Compression::default()
    } else {
        Compression::new(level.min(9))
    };
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2 + 64), level);
    encoder.write_all(bytes)?;
    encoder.finish()
}

fn read_file_auto(path: &Path) -> StoreResult<Vec<u8>> {
    let data = fs::read(path)?;
    if data.len() >= 2 && data[..2] == GZIP_MAGIC {
        let mut out = Vec::with_capacity(data.len().saturating_mul(2));
        GzDecoder::new(data.as_slice()).read_to_end(&mut out)?;
        return Ok(out);
    }
    Ok(data)
}

/// Write to a sibling temp file, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

// ── Background task handle ───────────────────────────────────────────────

struct TaskShared {
    done: AtomicBool,
    progress: AtomicI64,
    error: Mutex<Option<StoreError>>,
}

/// Handle to a background save or load.
///
/// Progress is coarse: 0 at start and 100 at completion, with no
/// intermediate granularity guaranteed. The error slot is populated only
/// after completion; [`wait`](PersistTask::wait) joins the worker and
/// drains it.
pub struct PersistTask {
    shared: Arc<TaskShared>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PersistTask {
    fn spawn<F>(name: &str, job: F) -> Self
    where
        F: FnOnce() -> StoreResult<()> + Send + 'static,
    {
        let shared = Arc::new(TaskShared {
            done: AtomicBool::new(false),
            progress: AtomicI64::new(0),
            error: Mutex::new(None),
        });
        let worker = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                if let Err(e) = job() {
                    tracing::warn!("background persistence task failed: {}", e);
                    *worker.error.lock() = Some(e);
                }
                worker.progress.store(100, Ordering::SeqCst);
                worker.done.store(true, Ordering::SeqCst);
            });
        match spawned {
            Ok(handle) => Self {
                shared,
                handle: Some(handle),
            },
            Err(e) => {
                // spawn failure surfaces through the error slot
                *shared.error.lock() = Some(StoreError::Io(e));
                shared.progress.store(100, Ordering::SeqCst);
                shared.done.store(true, Ordering::SeqCst);
                Self {
                    shared,
                    handle: None,
                }
            }
        }
    }

    /// Whether the operation has finished (successfully or not).
    pub fn is_done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }

    /// Coarse completion percentage: 0 until the operation finishes, 100
    /// after.
    pub fn progress(&self) -> i64 {
        self.shared.progress.load(Ordering::SeqCst)
    }

    /// Blocks until the operation completes and returns its outcome.
    pub fn wait(mut self) -> StoreResult<()> {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "persistence worker panicked",
                )));
            }
        }
        match self.shared.error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

// ── OrderedMap persistence ───────────────────────────────────────────────

impl<K, V> OrderedMap<K, V>
where
    K: Eq + Hash + Clone + Codec,
    V: Codec,
{
    /// Serializes the current snapshot to `path`, creating parent
    /// directories as needed.
    pub fn save(&self, path: impl AsRef<Path>, opts: SaveOptions) -> StoreResult<()> {
        let path = path.as_ref();
        let (mut payload, count) = {
            let core = self.core.read();
            let count = core.list.len();
            let payload = encode_snapshot(
                core.total_size,
                core.limit,
                count as u64,
                core.list.entries(),
            )?;
            (payload, count)
        };
        if opts.compress {
            payload = compress(&payload, opts.compress_level)?;
        }
        write_atomic(path, &payload)?;
        tracing::info!(
            "saved {} entries ({} bytes{}) to {}",
            count,
            payload.len(),
            if opts.compress { ", gzip" } else { "" },
            path.display(),
        );
        Ok(())
    }

    /// Replaces this map's contents with the image stored at `path`,
    /// restoring iteration order, per-entry sizes, the running total, and
    /// the limit. On error the previous contents are left untouched.
    pub fn load(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let data = read_file_auto(path)?;
        let snapshot = decode_snapshot::<K, V>(&data)?;
        let count = snapshot.entries.len();
        let mut guard = self.core.write();
        let core = &mut *guard;
        core.index.clear();
        core.list.clear();
        core.total_size = snapshot.total_size;
        core.limit = snapshot.limit;
        for (key, value, size) in snapshot.entries {
            let id = core.list.push_back_sized(key.clone(), value, size);
            if let Some(old) = core.index.insert(key, id) {
                // duplicate key in the file: keep the later occurrence
                if let Some(node) = core.list.remove_node(old) {
                    core.total_size -= node.size;
                }
            }
        }
        tracing::info!("loaded {} entries from {}", count, path.display());
        Ok(())
    }

    /// [`save`](Self::save) on a named background thread.
    pub fn save_async(self: &Arc<Self>, path: impl Into<PathBuf>, opts: SaveOptions) -> PersistTask
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let map = Arc::clone(self);
        let path = path.into();
        PersistTask::spawn("stashmap-save", move || map.save(&path, opts))
    }

    /// [`load`](Self::load) on a named background thread.
    pub fn load_async(self: &Arc<Self>, path: impl Into<PathBuf>) -> PersistTask
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let map = Arc::clone(self);
        let path = path.into();
        PersistTask::spawn("stashmap-load", move || map.load(&path))
    }
}

// ── SyncMap persistence ──────────────────────────────────────────────────

impl<K, V> SyncMap<K, V>
where
    K: Eq + Hash + Codec,
    V: Codec,
{
    /// Serializes the current snapshot to `path`. Entry order in the file
    /// is this map's arbitrary iteration order at save time.
    pub fn save(&self, path: impl AsRef<Path>, opts: SaveOptions) -> StoreResult<()> {
        let path = path.as_ref();
        let (mut payload, count) = {
            let core = self.core.read();
            let count = core.items.len();
            let payload = encode_snapshot(
                core.total_size,
                core.limit,
                count as u64,
                core.items.iter().map(|(k, e)| (k, &e.value, e.size)),
            )?;
            (payload, count)
        };
        if opts.compress {
            payload = compress(&payload, opts.compress_level)?;
        }
        write_atomic(path, &payload)?;
        tracing::info!(
            "saved {} entries ({} bytes{}) to {}",
            count,
            payload.len(),
            if opts.compress { ", gzip" } else { "" },
            path.display(),
        );
        Ok(())
    }

    /// Replaces this map's contents with the image stored at `path`. On
    /// error the previous contents are left untouched.
    pub fn load(&self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = path.as_ref();
        let data = read_file_auto(path)?;
        let snapshot = decode_snapshot::<K, V>(&data)?;
        let count = snapshot.entries.len();
        let mut guard = self.core.write();
        let core = &mut *guard;
        core.items.clear();
        core.total_size = snapshot.total_size;
        core.limit = snapshot.limit;
        for (key, value, size) in snapshot.entries {
            core.items.insert(key, Entry { value, size });
        }
        tracing::info!("loaded {} entries from {}", count, path.display());
        Ok(())
    }

    /// [`save`](Self::save) on a named background thread.
    pub fn save_async(self: &Arc<Self>, path: impl Into<PathBuf>, opts: SaveOptions) -> PersistTask
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let map = Arc::clone(self);
        let path = path.into();
        PersistTask::spawn("stashmap-save", move || map.save(&path, opts))
    }

    /// [`load`](Self::load) on a named background thread.
    pub fn load_async(self: &Arc<Self>, path: impl Into<PathBuf>) -> PersistTask
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        let map = Arc::clone(self);
        let path = path.into();
        PersistTask::spawn("stashmap-load", move || map.load(&path))
    }
}
