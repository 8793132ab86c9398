//! Text extraction from uploaded files.

use std::path::{Path, PathBuf};

use docqa_rag::{Document, RagError, Result};
use tracing::{debug, warn};

/// Extract the text of the stored upload at `path` into a [`Document`] named `name`.
///
/// PDFs are read with `pdf-extract` and their pages concatenated; `.txt` and
/// `.md` files must be UTF-8. Extraction runs on the blocking pool.
///
/// # Errors
///
/// Returns [`RagError::DataError`] naming the document if the extension is
/// unsupported or the file cannot be read or decoded.
pub async fn extract_document(path: PathBuf, name: String) -> Result<Document> {
    let task_name = name.clone();
    let task_path = path.clone();
    let text = tokio::task::spawn_blocking(move || extract_text(&task_path, &task_name))
        .await
        .map_err(|e| RagError::data(&name, format!("extraction task failed: {e}")))??;

    debug!(document.id = %name, chars = text.chars().count(), "extracted text");
    Ok(Document::new(name, text).with_source_uri(path.display().to_string()))
}

fn extract_text(path: &Path, name: &str) -> Result<String> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "pdf" => {
            let text = pdf_extract::extract_text(path).map_err(|e| {
                warn!(document.id = %name, error = %e, "PDF extraction failed");
                RagError::data(name, format!("failed to extract PDF text: {e}"))
            })?;
            // Pages arrive separated by form feeds.
            Ok(text.replace('\x0c', ""))
        }
        "txt" | "md" | "markdown" => {
            let bytes = std::fs::read(path)
                .map_err(|e| RagError::data(name, format!("failed to read file: {e}")))?;
            String::from_utf8(bytes)
                .map_err(|e| RagError::data(name, format!("file is not valid UTF-8: {e}")))
        }
        "" => Err(RagError::data(name, "file has no extension; expected .pdf, .txt or .md")),
        other => Err(RagError::data(
            name,
            format!("unsupported file type `.{other}`; expected .pdf, .txt or .md"),
        )),
    }
}
