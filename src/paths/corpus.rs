//! Load a directory of markdown files as a corpus of [`Document`]s.
use std::path::{Component, Path};
use walkdir::WalkDir;

use super::path::{slugify_path, DOCUMENT_EXTENSIONS};
use crate::{config::get_content, properties::Document, TrellisError};

/// Corpus-relative, `/`-separated form of `path` under `root`.
pub fn relative_slug_source(root: &Path, path: &Path) -> Result<String, TrellisError> {
    let relative = path.strip_prefix(root)?;
    Ok(relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/"))
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Every markdown file below `root`, in file-name order. Ids are assigned from 1 in that order; the
/// slug is the slugified relative path and the title is the file stem.
pub fn load_documents<P: AsRef<Path>>(root: P) -> Result<Vec<Document>, TrellisError> {
    let root = root.as_ref();
    let mut documents = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || !is_document(entry.path()) {
            continue;
        }
        let source = relative_slug_source(root, entry.path())?;
        let title = entry
            .path()
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let content = get_content(entry.path())?;
        let id = documents.len() as i64 + 1;
        documents.push(Document::new(id, &title, &content).with_slug(&slugify_path(&source)));
    }
    tracing::debug!("[load_documents] {} documents under {:?}", documents.len(), root);
    Ok(documents)
}
