/// Local content-addressed store.
///
/// This is the gateway's side of every transfer: `to_store` jobs end with a
/// `put` here, `from_store` jobs begin with a `get`. Content identifiers are
/// the hex BLAKE3 hash of the bytes, so a CID is immutable and `put` is
/// idempotent. Objects live in sharded directories to keep any single
/// directory small.
///
/// How content is chunked or replicated beyond this surface is not the
/// gateway's concern.
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};

/// Minimal content-addressed storage surface used by the orchestrator.
pub trait ContentStore: Send + Sync {
    /// Store bytes, returning their CID. Idempotent.
    fn put(&self, data: &[u8]) -> Result<String>;

    /// Retrieve bytes by CID.
    fn get(&self, cid: &str) -> Result<Vec<u8>>;

    /// Check for presence without reading.
    fn contains(&self, cid: &str) -> bool;
}

/// Compute the CID for a blob of data.
pub fn cid_for(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

/// Filesystem-backed content store with two-character directory sharding.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, cid: &str) -> Option<PathBuf> {
        // CIDs are 64 lowercase hex characters; anything else cannot exist here.
        if cid.len() != 64 || !cid.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let (shard, rest) = cid.split_at(2);
        Some(self.root.join("objects").join(shard).join(rest))
    }
}

impl ContentStore for FsStore {
    fn put(&self, data: &[u8]) -> Result<String> {
        let cid = cid_for(data);
        let (shard, rest) = cid.split_at(2);
        let parent = self.root.join("objects").join(shard);
        let path = parent.join(rest);

        if path.exists() {
            return Ok(cid);
        }

        fs::create_dir_all(&parent)?;

        // Write-then-rename so readers never observe a partial object.
        let tmp = parent.join(format!(".tmp-{cid}"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;

        Ok(cid)
    }

    fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let path = self
            .object_path(cid)
            .ok_or_else(|| GatewayError::ContentNotFound(cid.to_string()))?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(GatewayError::ContentNotFound(cid.to_string()))
            }
            Err(e) => Err(GatewayError::Io(e)),
        }
    }

    fn contains(&self, cid: &str) -> bool {
        self.object_path(cid).is_some_and(|p| p.exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (FsStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::open(dir.path().join("cas")).unwrap();
        (store, dir)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (store, _dir) = store();
        let cid = store.put(b"hello gateway").unwrap();
        assert_eq!(store.get(&cid).unwrap(), b"hello gateway");
        assert!(store.contains(&cid));
    }

    #[test]
    fn test_put_is_idempotent() {
        let (store, _dir) = store();
        let a = store.put(b"same bytes").unwrap();
        let b = store.put(b"same bytes").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cid_is_content_derived() {
        let (store, _dir) = store();
        let a = store.put(b"one").unwrap();
        let b = store.put(b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(a, cid_for(b"one"));
    }

    #[test]
    fn test_missing_cid_is_not_found() {
        let (store, _dir) = store();
        let missing = cid_for(b"never stored");
        assert!(!store.contains(&missing));
        assert!(matches!(
            store.get(&missing),
            Err(GatewayError::ContentNotFound(_))
        ));
    }

    #[test]
    fn test_malformed_cid_is_not_found() {
        let (store, _dir) = store();
        assert!(!store.contains("../../etc/passwd"));
        assert!(matches!(
            store.get("not-a-cid"),
            Err(GatewayError::ContentNotFound(_))
        ));
    }
}
