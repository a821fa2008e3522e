use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// One ordered namespace. Child buckets are shared between snapshots and
/// cloned on first write, so a write transaction only copies the path it
/// touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct Bucket {
    entries: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Node {
    Value(#[serde(with = "hex::serde")] Vec<u8>),
    Bucket(Arc<Bucket>),
}

impl Bucket {
    fn get(&self, key: &str) -> Option<&[u8]> {
        match self.entries.get(key) {
            Some(Node::Value(v)) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn bucket(&self, name: &str) -> Option<&Bucket> {
        match self.entries.get(name) {
            Some(Node::Bucket(b)) => Some(&**b),
            _ => None,
        }
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if let Some(Node::Bucket(_)) = self.entries.get(key) {
            return Err(StoreError::IncompatibleValue(key.to_string()));
        }
        self.entries.insert(key.to_string(), Node::Value(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        match self.entries.get(key) {
            Some(Node::Bucket(_)) => Err(StoreError::IncompatibleValue(key.to_string())),
            Some(Node::Value(_)) => {
                self.entries.remove(key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn bucket_mut(&mut self, name: &str) -> Result<&mut Bucket, StoreError> {
        match self.entries.get_mut(name) {
            Some(Node::Bucket(b)) => Ok(Arc::make_mut(b)),
            Some(Node::Value(_)) => Err(StoreError::IncompatibleValue(name.to_string())),
            None => Err(StoreError::BucketNotFound(name.to_string())),
        }
    }

    fn create_bucket_if_not_exists(&mut self, name: &str) -> Result<&mut Bucket, StoreError> {
        let node = self
            .entries
            .entry(name.to_string())
            .or_insert_with(|| Node::Bucket(Arc::default()));
        match node {
            Node::Bucket(b) => Ok(Arc::make_mut(b)),
            Node::Value(_) => Err(StoreError::IncompatibleValue(name.to_string())),
        }
    }

    fn delete_bucket(&mut self, name: &str) -> Result<bool, StoreError> {
        match self.entries.get(name) {
            Some(Node::Value(_)) => Err(StoreError::IncompatibleValue(name.to_string())),
            Some(Node::Bucket(_)) => {
                self.entries.remove(name);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Read-only view of one bucket and its descendants.
#[derive(Debug, Clone, Copy)]
pub struct BucketRef<'a> {
    inner: &'a Bucket,
}

impl<'a> BucketRef<'a> {
    pub(crate) fn new(inner: &'a Bucket) -> Self {
        Self { inner }
    }

    pub fn get(&self, key: &str) -> Option<&'a [u8]> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.get(key).is_some()
    }

    pub fn bucket(&self, name: &str) -> Option<BucketRef<'a>> {
        self.inner.bucket(name).map(BucketRef::new)
    }

    /// Every entry name in key order, values and buckets alike.
    pub fn keys(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.inner.entries.keys().map(String::as_str)
    }

    /// Key/value pairs in key order. Nested buckets are skipped.
    pub fn values(&self) -> impl Iterator<Item = (&'a str, &'a [u8])> + 'a {
        self.inner.entries.iter().filter_map(|(k, n)| match n {
            Node::Value(v) => Some((k.as_str(), v.as_slice())),
            Node::Bucket(_) => None,
        })
    }

    /// Names of nested buckets in key order.
    pub fn buckets(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.inner.entries.iter().filter_map(|(k, n)| match n {
            Node::Bucket(_) => Some(k.as_str()),
            Node::Value(_) => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}

/// Writable handle to one bucket inside a write transaction.
///
/// A handle can only reach downward: there is no way back to the parent, so
/// code holding a handle to a component's namespace cannot touch any other
/// namespace in the store.
#[derive(Debug)]
pub struct BucketMut<'a> {
    inner: &'a mut Bucket,
}

impl<'a> BucketMut<'a> {
    pub(crate) fn new(inner: &'a mut Bucket) -> Self {
        Self { inner }
    }

    pub fn reader(&self) -> BucketRef<'_> {
        BucketRef::new(self.inner)
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.inner.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.get(key).is_some()
    }

    pub fn put(&mut self, key: &str, value: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        self.inner.put(key, value.into())
    }

    /// Removes a value, returning whether it was present.
    pub fn delete(&mut self, key: &str) -> Result<bool, StoreError> {
        self.inner.delete(key)
    }

    pub fn bucket(&self, name: &str) -> Option<BucketRef<'_>> {
        self.inner.bucket(name).map(BucketRef::new)
    }

    pub fn bucket_mut(&mut self, name: &str) -> Result<BucketMut<'_>, StoreError> {
        self.inner.bucket_mut(name).map(BucketMut::new)
    }

    pub fn create_bucket_if_not_exists(&mut self, name: &str) -> Result<BucketMut<'_>, StoreError> {
        self.inner.create_bucket_if_not_exists(name).map(BucketMut::new)
    }

    pub fn delete_bucket(&mut self, name: &str) -> Result<bool, StoreError> {
        self.inner.delete_bucket(name)
    }

    /// Like [`bucket_mut`](Self::bucket_mut), but keeps the full lifetime
    /// of this handle.
    pub fn into_bucket_mut(self, name: &str) -> Result<BucketMut<'a>, StoreError> {
        self.inner.bucket_mut(name).map(BucketMut::new)
    }

    pub fn into_created_bucket(self, name: &str) -> Result<BucketMut<'a>, StoreError> {
        self.inner.create_bucket_if_not_exists(name).map(BucketMut::new)
    }
}
