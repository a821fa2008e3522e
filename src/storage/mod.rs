//! Embedded transactional key-value store.
//!
//! The whole tree lives in memory and is written to a single JSON document
//! on every commit. Readers work on immutable snapshots and never block.
//! Writers are serialized by one async mutex: at most one [`WriteTx`] is open
//! at any time, and its changes become visible to readers only when
//! [`WriteTx::commit`] has made them durable.

mod bucket;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::StoreError;

pub use bucket::{BucketMut, BucketRef};
use bucket::Bucket;

#[derive(Clone)]
pub struct Db {
    inner: Arc<Shared>,
}

struct Shared {
    path: Option<PathBuf>,
    committed: RwLock<Arc<Bucket>>,
    writer: Arc<Mutex<()>>,
}

impl Db {
    /// Opens the store at `path`, loading the last committed state if the
    /// file exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let root = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Bucket::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), "opened store");
        Ok(Self::with_root(Some(path), root))
    }

    /// A store that is never written to disk.
    pub fn in_memory() -> Self {
        Self::with_root(None, Bucket::default())
    }

    fn with_root(path: Option<PathBuf>, root: Bucket) -> Self {
        Self {
            inner: Arc::new(Shared {
                path,
                committed: RwLock::new(Arc::new(root)),
                writer: Arc::new(Mutex::new(())),
            }),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    fn snapshot(&self) -> Arc<Bucket> {
        self.inner
            .committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Starts a read-only transaction over the last committed state.
    pub fn read(&self) -> ReadTx {
        ReadTx {
            root: self.snapshot(),
        }
    }

    /// Starts a read-write transaction, waiting for any open writer to
    /// finish first.
    pub async fn begin_write(&self) -> WriteTx {
        let guard = self.inner.writer.clone().lock_owned().await;
        WriteTx {
            db: self.clone(),
            root: self.snapshot(),
            _guard: guard,
        }
    }
}

pub struct ReadTx {
    root: Arc<Bucket>,
}

impl ReadTx {
    pub fn root(&self) -> BucketRef<'_> {
        BucketRef::new(&self.root)
    }

    pub fn bucket(&self, name: &str) -> Option<BucketRef<'_>> {
        self.root().bucket(name)
    }
}

/// An open write transaction. Dropping it without calling [`commit`]
/// discards every change.
///
/// [`commit`]: WriteTx::commit
pub struct WriteTx {
    db: Db,
    root: Arc<Bucket>,
    _guard: OwnedMutexGuard<()>,
}

impl WriteTx {
    pub fn root(&self) -> BucketRef<'_> {
        BucketRef::new(&self.root)
    }

    pub fn root_mut(&mut self) -> BucketMut<'_> {
        BucketMut::new(Arc::make_mut(&mut self.root))
    }

    pub fn bucket(&self, name: &str) -> Option<BucketRef<'_>> {
        self.root().bucket(name)
    }

    pub fn bucket_mut(&mut self, name: &str) -> Result<BucketMut<'_>, StoreError> {
        self.root_mut().into_bucket_mut(name)
    }

    pub fn create_bucket_if_not_exists(&mut self, name: &str) -> Result<BucketMut<'_>, StoreError> {
        self.root_mut().into_created_bucket(name)
    }

    /// Makes the transaction durable, then publishes it to new readers.
    /// On error nothing is published and the previous state stays current.
    pub async fn commit(self) -> Result<(), StoreError> {
        let WriteTx { db, root, _guard } = self;
        if let Some(path) = db.path() {
            persist(path, &root).await?;
        }
        *db.inner
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = root;
        Ok(())
    }

    pub fn rollback(self) {}
}

async fn persist(path: &Path, root: &Bucket) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(root)?;
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
