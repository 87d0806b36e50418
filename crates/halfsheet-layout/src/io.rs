//! Document I/O: reading page geometry with lopdf

use crate::types::*;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::Path;

/// Inheritable page attributes are looked up at most this many levels up
const MAX_PAGE_TREE_DEPTH: usize = 32;

/// Load a PDF document
pub async fn load_pdf(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref().to_owned();
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(LayoutError::NotFound(path));
        }
        Err(e) => return Err(e.into()),
    };
    let doc = tokio::task::spawn_blocking(move || Document::load_mem(&bytes))
        .await?
        .map_err(|e| LayoutError::InvalidFormat(e.to_string()))?;
    Ok(doc)
}

/// Read the size of one page (0-based index) in points
pub async fn read_page_size(path: impl AsRef<Path>, page_index: usize) -> Result<SourcePage> {
    let doc = load_pdf(path).await?;
    page_size(&doc, page_index)
}

/// Blocking variant of [`load_pdf`] for collaborator threads
pub fn load_pdf_blocking(path: impl AsRef<Path>) -> Result<Document> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(LayoutError::NotFound(path.to_owned()));
    }
    Document::load(path).map_err(|e| LayoutError::InvalidFormat(e.to_string()))
}

/// Blocking variant of [`read_page_size`] for collaborator threads
pub fn read_page_size_blocking(path: impl AsRef<Path>, page_index: usize) -> Result<SourcePage> {
    let doc = load_pdf_blocking(path)?;
    page_size(&doc, page_index)
}

/// Size of one page plus the page count, from a single load
pub fn read_document_info_blocking(
    path: impl AsRef<Path>,
    page_index: usize,
) -> Result<DocumentInfo> {
    let doc = load_pdf_blocking(path)?;
    Ok(DocumentInfo {
        page: page_size(&doc, page_index)?,
        page_count: page_count(&doc),
    })
}

/// Number of pages in a loaded document
pub fn page_count(doc: &Document) -> usize {
    doc.get_pages().len()
}

/// Size of one page (0-based index) in points.
///
/// Uses the page's MediaBox, inherited from the page tree when the page
/// doesn't carry one, with width and height swapped for 90°/270° rotation.
pub fn page_size(doc: &Document, page_index: usize) -> Result<SourcePage> {
    let pages = doc.get_pages();
    let page_id = *pages.values().nth(page_index).ok_or_else(|| {
        LayoutError::InvalidFormat(format!(
            "page {} requested but document has {} page(s)",
            page_index + 1,
            pages.len()
        ))
    })?;

    let media_box = inherited_attribute(doc, page_id, b"MediaBox")?
        .ok_or_else(|| LayoutError::InvalidFormat("page has no MediaBox".to_string()))?;
    let (width, height) = box_size(doc, media_box)?;

    let rotate = match inherited_attribute(doc, page_id, b"Rotate")? {
        Some(obj) => number(resolve(doc, obj)?).unwrap_or(0.0) as i64,
        None => 0,
    };

    if rotate.rem_euclid(180) == 90 {
        Ok(SourcePage::new(height, width))
    } else {
        Ok(SourcePage::new(width, height))
    }
}

/// Walk up the page tree until `key` is found
fn inherited_attribute<'a>(
    doc: &'a Document,
    page_id: ObjectId,
    key: &[u8],
) -> Result<Option<&'a Object>> {
    let mut node: &Dictionary = doc.get_dictionary(page_id)?;
    for _ in 0..MAX_PAGE_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Ok(Some(value));
        }
        match node.get(b"Parent").and_then(Object::as_reference) {
            Ok(parent) => node = doc.get_dictionary(parent)?,
            Err(_) => return Ok(None),
        }
    }
    Ok(None)
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> Result<&'a Object> {
    match obj {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

fn box_size(doc: &Document, obj: &Object) -> Result<(f64, f64)> {
    let values = match resolve(doc, obj)? {
        Object::Array(arr) if arr.len() == 4 => arr
            .iter()
            .map(|v| resolve(doc, v).ok().and_then(number))
            .collect::<Option<Vec<f64>>>(),
        _ => None,
    }
    .ok_or_else(|| LayoutError::InvalidFormat("MediaBox is not a 4-number array".to_string()))?;

    Ok(((values[2] - values[0]).abs(), (values[3] - values[1]).abs()))
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}
