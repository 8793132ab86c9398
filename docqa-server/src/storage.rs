//! Persisting uploaded files to the documents directory.

use std::io;
use std::path::{Path, PathBuf};

use docqa_rag::{RagError, Result};

/// Reduce a client-supplied filename to its final path component.
///
/// # Errors
///
/// Returns [`RagError::InvalidInput`] if nothing usable remains.
pub fn sanitize_filename(raw: &str) -> Result<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(RagError::InvalidInput(format!("invalid upload filename {raw:?}")));
    }
    Ok(name.to_string())
}

/// Write `bytes` to `dir/name`, creating `dir` if needed.
///
/// The file is written under a temporary name and renamed into place, so a
/// partially received upload never shadows an earlier complete one.
pub async fn store_upload(dir: &Path, name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let target = dir.join(name);
    let partial = dir.join(format!(".{name}.{}.part", uuid::Uuid::new_v4()));
    if let Err(e) = tokio::fs::write(&partial, bytes).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    tokio::fs::rename(&partial, &target).await?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_final_component() {
        assert_eq!(sanitize_filename("guide.pdf").unwrap(), "guide.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename(r"C:\Users\me\notes.txt").unwrap(), "notes.txt");
        assert_eq!(sanitize_filename(" api reference.md ").unwrap(), "api reference.md");
    }

    #[test]
    fn rejects_empty_and_dot_names() {
        for raw in ["", "   ", ".", "..", "docs/", "docs/.."] {
            assert!(
                matches!(sanitize_filename(raw), Err(RagError::InvalidInput(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn stores_into_a_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let docs = dir.path().join("docs");

        let path = store_upload(&docs, "a.txt", b"first").await.unwrap();
        assert_eq!(path, docs.join("a.txt"));
        store_upload(&docs, "a.txt", b"second").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        let names: Vec<_> = std::fs::read_dir(&docs).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.txt")]);
    }
}
