// Filesystem-backed `DurableStore`.
//
// Layout: `<root>/<namespace>/<escaped key>`, one file per key. Writes go
// to a dot-prefixed temp file in the same directory, which is fsynced and
// renamed over the target; the directory is then fsynced so the rename
// itself survives power loss. A crash mid-write leaves the previous value
// intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use strum::IntoEnumIterator;
use tokio::fs;
use tracing::{debug, warn};

use super::{DurableStore, Namespace};
use crate::error::CoreError;

/// One directory per namespace under a root directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        for ns in Namespace::iter() {
            let dir = root.join(ns.as_ref());
            fs::create_dir_all(&dir)
                .await
                .map_err(|e| CoreError::storage(&format!("create {}", dir.display()), e))?;
        }
        debug!(root = %root.display(), "file store opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, ns: Namespace) -> PathBuf {
        self.root.join(ns.as_ref())
    }

    fn path(&self, ns: Namespace, key: &str) -> PathBuf {
        self.dir(ns).join(escape_key(key))
    }
}

impl DurableStore for FileStore {
    fn get<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
    ) -> BoxFuture<'a, Result<Option<Vec<u8>>, CoreError>> {
        async move {
            match fs::read(self.path(ns, key)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(CoreError::storage(&format!("read {ns}/{key}"), e)),
            }
        }
        .boxed()
    }

    fn set<'a>(
        &'a self,
        ns: Namespace,
        key: &'a str,
        value: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), CoreError>> {
        async move {
            let dir = self.dir(ns);
            let target = self.path(ns, key);
            let tmp = dir.join(format!(".{}.{}.tmp", escape_key(key), uuid::Uuid::new_v4()));

            let written = {
                let tmp = tmp.clone();
                tokio::task::spawn_blocking(move || write_durably(&dir, &tmp, &target, &value))
                    .await
                    .map_err(|e| CoreError::storage(&format!("write {ns}/{key}"), e))?
            };
            if let Err(e) = written {
                if let Err(cleanup) = fs::remove_file(&tmp).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp.display(), error = %cleanup, "failed to remove temp file");
                    }
                }
                return Err(CoreError::storage(&format!("write {ns}/{key}"), e));
            }
            Ok(())
        }
        .boxed()
    }

    fn delete<'a>(&'a self, ns: Namespace, key: &'a str) -> BoxFuture<'a, Result<bool, CoreError>> {
        async move {
            match fs::remove_file(self.path(ns, key)).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(CoreError::storage(&format!("delete {ns}/{key}"), e)),
            }
        }
        .boxed()
    }

    fn keys(&self, ns: Namespace) -> BoxFuture<'_, Result<Vec<String>, CoreError>> {
        async move {
            let mut entries = fs::read_dir(self.dir(ns))
                .await
                .map_err(|e| CoreError::storage(&format!("list {ns}"), e))?;

            let mut keys = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CoreError::storage(&format!("list {ns}"), e))?
            {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                // Dot-prefixed names are in-progress temp files.
                if name.starts_with('.') {
                    continue;
                }
                if let Some(key) = unescape_key(name) {
                    keys.push(key);
                }
            }
            Ok(keys)
        }
        .boxed()
    }

    fn usage_bytes(&self) -> BoxFuture<'_, Result<u64, CoreError>> {
        async move {
            let mut total = 0_u64;
            for ns in Namespace::iter() {
                let mut entries = match fs::read_dir(self.dir(ns)).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(CoreError::storage(&format!("scan {ns}"), e)),
                };
                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| CoreError::storage(&format!("scan {ns}"), e))?
                {
                    if let Ok(meta) = entry.metadata().await {
                        total = total.saturating_add(meta.len());
                    }
                }
            }
            Ok(total)
        }
        .boxed()
    }
}

/// Write `value` to `tmp`, flush it to disk, rename it over `target` and
/// flush the directory entry.
fn write_durably(dir: &Path, tmp: &Path, target: &Path, value: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(tmp)?;
    file.write_all(value)?;
    file.sync_all()?;
    drop(file);

    std::fs::rename(tmp, target)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

// Directory handles cannot be fsynced here; NTFS journals the rename.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

// ── Key escaping ─────────────────────────────────────────────────────

/// Map an arbitrary key to a safe file name: ASCII alphanumerics, `-`
/// and `_` pass through, every other byte becomes `%XX`.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

/// Inverse of [`escape_key`]. Returns `None` for names it did not produce.
fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn escape_round_trips_awkward_keys() {
        for key in ["u1/missions", "../etc/passwd", "plain-key_1", "ünïcode key", ".hidden"] {
            let escaped = escape_key(key);
            assert!(!escaped.contains('/'));
            assert!(!escaped.starts_with('.'));
            assert_eq!(unescape_key(&escaped).as_deref(), Some(key));
        }
    }

    #[tokio::test]
    async fn overwrite_leaves_no_temp_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store
            .set(Namespace::MutationQueue, "a/b", b"first".to_vec())
            .await
            .unwrap();
        store
            .set(Namespace::MutationQueue, "a/b", b"second".to_vec())
            .await
            .unwrap();

        assert_eq!(
            store.get(Namespace::MutationQueue, "a/b").await.unwrap().as_deref(),
            Some(&b"second"[..])
        );
        let names: Vec<_> = std::fs::read_dir(dir.path().join(Namespace::MutationQueue.as_ref()))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(!names[0].to_string_lossy().starts_with('.'));
    }

    #[tokio::test]
    async fn failed_write_reports_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        std::fs::remove_dir_all(dir.path().join(Namespace::EntityCache.as_ref())).unwrap();

        let err = store
            .set(Namespace::EntityCache, "k", b"v".to_vec())
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn unescape_rejects_truncated_sequences() {
        assert_eq!(unescape_key("abc%2"), None);
        assert_eq!(unescape_key("abc%ZZ"), None);
    }
}
