//! Content-addressed blob storage for uploaded statements.
//!
//! Files land under a date-sharded layout (`YYYY/MM/DD/<filename>`) rooted at
//! the configured upload directory. Content is identified by SHA-256,
//! enabling duplicate detection across uploads regardless of filename.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::models::Statement;

/// Options for [`BlobStore::put`].
#[derive(Debug, Clone, Copy)]
pub struct PutOptions {
    /// Scan existing shards for a blob with the same hash before writing.
    pub check_duplicate: bool,
    /// Name the stored file after its hash instead of the upload filename.
    pub use_hash_name: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            check_duplicate: true,
            use_hash_name: false,
        }
    }
}

/// Result of persisting (or deduplicating) a blob.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub path: PathBuf,
    pub hash: String,
    pub size: u64,
    /// True when an existing blob with the same content was reused.
    pub duplicate: bool,
}

/// Date-sharded, hash-deduplicated file store.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base_path: PathBuf,
}

impl BlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Persist content under today's date shard.
    ///
    /// With `check_duplicate`, a prior blob with the same hash is returned
    /// as-is and nothing new is written. Filename collisions inside a shard
    /// get a `_1`, `_2`, ... suffix before the extension.
    pub fn put(&self, content: &[u8], filename: &str, opts: PutOptions) -> std::io::Result<StoredBlob> {
        let hash = Statement::compute_hash(content);
        let size = content.len() as u64;

        if opts.check_duplicate {
            if let Some(existing) = self.find_by_hash(&hash) {
                info!(
                    "Duplicate file detected: {} (hash: {}...)",
                    filename,
                    &hash[..8]
                );
                return Ok(StoredBlob {
                    path: existing,
                    hash,
                    size,
                    duplicate: true,
                });
            }
        }

        let name = if opts.use_hash_name {
            let ext = Path::new(filename)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("bin");
            format!("{}.{}", hash, ext)
        } else if filename.is_empty() {
            format!("{}.bin", hash)
        } else {
            filename.to_string()
        };

        let shard = self.date_shard_dir();
        std::fs::create_dir_all(&shard)?;
        let path = resolve_collision(&shard.join(&name));

        std::fs::write(&path, content)?;
        info!("File saved: {} ({} bytes)", path.display(), size);

        Ok(StoredBlob {
            path,
            hash,
            size,
            duplicate: false,
        })
    }

    /// Locate a blob by content hash.
    ///
    /// Walks the date shards, short-circuiting on filenames that embed the
    /// hash (hash-named blobs) before falling back to hashing candidates.
    pub fn find_by_hash(&self, hash: &str) -> Option<PathBuf> {
        for file in self.walk_shards() {
            if file
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(hash))
            {
                return Some(file);
            }
            match std::fs::read(&file) {
                Ok(content) => {
                    if Statement::compute_hash(&content) == hash {
                        return Some(file);
                    }
                }
                Err(e) => debug!("Skipping unreadable blob {}: {}", file.display(), e),
            }
        }
        None
    }

    /// Delete a blob by path. Returns false when the file was already gone.
    pub fn delete(&self, path: &Path) -> std::io::Result<bool> {
        if path.exists() {
            std::fs::remove_file(path)?;
            info!("File deleted: {}", path.display());
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Size of a stored blob in bytes, or 0 when missing.
    pub fn size(&self, path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }

    /// URL path for serving a blob, relative to the store root.
    pub fn url(&self, path: &Path) -> String {
        match path.strip_prefix(&self.base_path) {
            Ok(relative) => format!("/uploads/{}", relative.display()),
            Err(_) => path.display().to_string(),
        }
    }

    fn date_shard_dir(&self) -> PathBuf {
        let now = Utc::now();
        self.base_path
            .join(now.format("%Y").to_string())
            .join(now.format("%m").to_string())
            .join(now.format("%d").to_string())
    }

    /// All regular files in `YYYY/MM/DD` shards, depth-first.
    fn walk_shards(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        let mut stack = vec![(self.base_path.clone(), 0usize)];
        while let Some((dir, depth)) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() && depth < 3 {
                    stack.push((path, depth + 1));
                } else if path.is_file() && depth == 3 {
                    files.push(path);
                }
            }
        }
        files
    }
}

/// Append `_1`, `_2`, ... before the extension until the path is free.
fn resolve_collision(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("file")
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut counter = 1;
    loop {
        let candidate = match ext {
            Some(ext) => parent.join(format!("{}_{}.{}", stem, counter, ext)),
            None => parent.join(format!("{}_{}", stem, counter)),
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_creates_date_shard() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let blob = store
            .put(b"statement bytes", "acct.pdf", PutOptions::default())
            .unwrap();

        assert!(!blob.duplicate);
        assert!(blob.path.exists());
        assert_eq!(blob.size, 15);
        // Path is base/YYYY/MM/DD/acct.pdf
        let relative = blob.path.strip_prefix(dir.path()).unwrap();
        assert_eq!(relative.components().count(), 4);
        assert_eq!(relative.file_name().unwrap(), "acct.pdf");
    }

    #[test]
    fn test_duplicate_detection_skips_write() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let first = store
            .put(b"same content", "a.pdf", PutOptions::default())
            .unwrap();
        let second = store
            .put(b"same content", "b.pdf", PutOptions::default())
            .unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.path, second.path);
        assert_eq!(first.hash, second.hash);
        // Exactly one blob on disk.
        assert_eq!(store.walk_shards().len(), 1);
    }

    #[test]
    fn test_filename_collision_gets_suffix() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let opts = PutOptions {
            check_duplicate: false,
            use_hash_name: false,
        };
        let first = store.put(b"content one", "report.pdf", opts).unwrap();
        let second = store.put(b"content two", "report.pdf", opts).unwrap();

        assert_eq!(first.path.file_name().unwrap(), "report.pdf");
        assert_eq!(second.path.file_name().unwrap(), "report_1.pdf");
        assert!(first.path.exists() && second.path.exists());
    }

    #[test]
    fn test_hash_name() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let blob = store
            .put(
                b"hashed",
                "orig.pdf",
                PutOptions {
                    check_duplicate: false,
                    use_hash_name: true,
                },
            )
            .unwrap();

        let name = blob.path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("{}.pdf", blob.hash));
        // Hash-named blobs are found by the filename short-circuit.
        assert_eq!(store.find_by_hash(&blob.hash), Some(blob.path.clone()));
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();

        let blob = store
            .put(b"to delete", "x.pdf", PutOptions::default())
            .unwrap();
        assert!(store.delete(&blob.path).unwrap());
        assert!(!store.delete(&blob.path).unwrap());
        assert!(!blob.path.exists());
    }

    #[test]
    fn test_size() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let blob = store.put(b"12345", "s.pdf", PutOptions::default()).unwrap();
        assert_eq!(store.size(&blob.path), 5);
        assert_eq!(store.size(Path::new("/nonexistent/blob.pdf")), 0);
    }

    #[test]
    fn test_url_relative_to_base() {
        let dir = tempdir().unwrap();
        let store = BlobStore::new(dir.path()).unwrap();
        let blob = store.put(b"abc", "u.pdf", PutOptions::default()).unwrap();
        let url = store.url(&blob.path);
        assert!(url.starts_with("/uploads/"));
        assert!(url.ends_with("u.pdf"));
    }
}
