//! Document source interface.
//!
//! Raw PDF parsing is an external collaborator: something else extracts page
//! text, counts vector-drawing elements, and rasterizes pages. This module
//! defines the boundary the pipeline consumes ([`DocumentSource`]) and one
//! concrete implementation, [`ExtractedDocument`], which loads an extractor's
//! JSON output from disk.

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Read access to one extracted document. Pages are 1-based.
pub trait DocumentSource: Send + Sync {
    /// Display name of the document (used as unit provenance).
    fn name(&self) -> &str;

    /// Number of pages.
    fn page_count(&self) -> u32;

    /// Extracted text of a page.
    fn page_text(&self, page: u32) -> Result<String>;

    /// Number of vector-drawing elements on a page, used as the figure
    /// detection heuristic.
    fn drawing_count(&self, page: u32) -> Result<usize>;

    /// PNG bytes of the page rendered at the given zoom factor.
    fn render_page_png(&self, page: u32, zoom: f32) -> Result<Vec<u8>>;
}

/// One page of an extracted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// Extracted page text.
    pub text: String,
    /// Vector-drawing element count reported by the extractor.
    #[serde(default)]
    pub drawing_elements: usize,
    /// Base64-encoded PNG of the rendered page, if the extractor produced one.
    #[serde(default)]
    pub image_png_base64: Option<String>,
}

/// A document as produced by an external PDF extractor.
///
/// The on-disk format is a JSON object `{name, pages: [{text,
/// drawing_elements, image_png_base64}]}`. Rendering is pre-baked by the
/// extractor, so [`DocumentSource::render_page_png`] ignores the zoom factor
/// and fails for pages without an image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub name: String,
    pub pages: Vec<ExtractedPage>,
}

impl ExtractedDocument {
    /// Load an extracted document from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading extracted document {}", path.display()))?;
        let document: ExtractedDocument = serde_json::from_str(&raw)
            .with_context(|| format!("parsing extracted document {}", path.display()))?;
        Ok(document)
    }

    fn page(&self, page: u32) -> Result<&ExtractedPage> {
        if page == 0 || page as usize > self.pages.len() {
            bail!(
                "page {page} out of range for {} ({} pages)",
                self.name,
                self.pages.len()
            );
        }
        Ok(&self.pages[page as usize - 1])
    }
}

impl DocumentSource for ExtractedDocument {
    fn name(&self) -> &str {
        &self.name
    }

    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String> {
        Ok(self.page(page)?.text.clone())
    }

    fn drawing_count(&self, page: u32) -> Result<usize> {
        Ok(self.page(page)?.drawing_elements)
    }

    fn render_page_png(&self, page: u32, _zoom: f32) -> Result<Vec<u8>> {
        let encoded = self
            .page(page)?
            .image_png_base64
            .as_ref()
            .with_context(|| format!("page {page} of {} has no rendered image", self.name))?;
        BASE64
            .decode(encoded)
            .with_context(|| format!("decoding page {page} image of {}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> ExtractedDocument {
        ExtractedDocument {
            name: "report.pdf".to_string(),
            pages: vec![
                ExtractedPage {
                    text: "First page text.".to_string(),
                    drawing_elements: 2,
                    image_png_base64: None,
                },
                ExtractedPage {
                    text: "Second page, see Figure 1.".to_string(),
                    drawing_elements: 20,
                    image_png_base64: Some(BASE64.encode(b"not-a-real-png")),
                },
            ],
        }
    }

    #[test]
    fn pages_are_one_based() {
        let doc = document();
        assert_eq!(doc.page_count(), 2);
        assert_eq!(doc.page_text(1).unwrap(), "First page text.");
        assert_eq!(doc.drawing_count(2).unwrap(), 20);
        assert!(doc.page_text(0).is_err());
        assert!(doc.page_text(3).is_err());
    }

    #[test]
    fn render_decodes_prebaked_image() {
        let doc = document();
        assert_eq!(doc.render_page_png(2, 3.0).unwrap(), b"not-a-real-png");
        assert!(doc.render_page_png(1, 3.0).is_err());
    }

    #[test]
    fn loads_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, serde_json::to_string(&document()).unwrap()).unwrap();

        let loaded = ExtractedDocument::load(&path).unwrap();
        assert_eq!(loaded.name, "report.pdf");
        assert_eq!(loaded.page_count(), 2);
    }
}
