//! Content digest of an output tree.

use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// SHA-256 hex digest of an output tree.
///
/// Hashes every regular file as `path \0 len \0 bytes`, in sorted
/// `/`-separated relative path order, so two trees with the same files and
/// contents hash equal regardless of where they live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TreeDigest(String);

impl TreeDigest {
    pub fn compute(root: &Path) -> std::io::Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            files.push((rel, entry.into_path()));
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        for (rel, path) in files {
            let bytes = std::fs::read(&path)?;
            hasher.update(rel.as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update([0u8]);
            hasher.update(&bytes);
        }
        Ok(TreeDigest(hex::encode(hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for TreeDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (rel, content) in files {
            let path = dir.path().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        dir
    }

    #[test]
    fn test_same_content_same_digest() {
        let a = tree(&[("x/a.h", "A"), ("DIAGNOSTICS", "")]);
        let b = tree(&[("DIAGNOSTICS", ""), ("x/a.h", "A")]);
        let da = TreeDigest::compute(a.path()).unwrap();
        assert_eq!(da, TreeDigest::compute(b.path()).unwrap());
        assert_eq!(da.as_str().len(), 64);
        assert_eq!(da.short().len(), 12);
    }

    #[test]
    fn test_content_and_path_changes_alter_digest() {
        let base = TreeDigest::compute(tree(&[("a", "1")]).path()).unwrap();
        assert_ne!(base, TreeDigest::compute(tree(&[("a", "2")]).path()).unwrap());
        assert_ne!(base, TreeDigest::compute(tree(&[("b", "1")]).path()).unwrap());
    }

    #[test]
    fn test_empty_directories_do_not_count() {
        let a = tree(&[("a", "1")]);
        fs::create_dir_all(a.path().join("empty/dir")).unwrap();
        let b = tree(&[("a", "1")]);
        assert_eq!(
            TreeDigest::compute(a.path()).unwrap(),
            TreeDigest::compute(b.path()).unwrap()
        );
    }
}
