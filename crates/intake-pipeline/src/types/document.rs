//! Assessment document kinds and how their text is obtained

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Supported assessment document kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    /// Plain text, markdown, csv, json - read directly
    Text,
    /// PDF - sent to provider OCR
    Pdf,
    /// Raster image - sent to provider OCR
    Image,
}

impl DocumentKind {
    /// Detect kind from extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "md" | "markdown" | "csv" | "json" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "png" | "jpg" | "jpeg" | "webp" => Some(Self::Image),
            _ => None,
        }
    }

    /// Detect kind from a file name
    pub fn from_filename(filename: &str) -> Option<Self> {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether text comes from provider OCR
    pub fn needs_ocr(&self) -> bool {
        matches!(self, Self::Pdf | Self::Image)
    }
}

/// A document held in memory for text extraction
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub filename: String,
    pub kind: DocumentKind,
    pub data: Vec<u8>,
}

impl SourceDocument {
    /// Wrap bytes if the file name has a supported extension
    pub fn detect(filename: impl Into<String>, data: Vec<u8>) -> Option<Self> {
        let filename = filename.into();
        let kind = DocumentKind::from_filename(&filename)?;
        Some(Self { filename, kind, data })
    }

    /// MIME type for OCR payloads
    pub fn mime_type(&self) -> String {
        match self.kind {
            DocumentKind::Pdf => "application/pdf".to_string(),
            _ => mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_filename() {
        assert_eq!(DocumentKind::from_filename("q1.PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_filename("scan.jpeg"), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_filename("notes.md"), Some(DocumentKind::Text));
        assert_eq!(DocumentKind::from_filename("deck.pptx"), None);
        assert_eq!(DocumentKind::from_filename("README"), None);
    }

    #[test]
    fn test_mime_type() {
        let doc = SourceDocument::detect("page.png", vec![1, 2]).unwrap();
        assert_eq!(doc.mime_type(), "image/png");
        assert!(doc.kind.needs_ocr());

        let doc = SourceDocument::detect("paper.pdf", vec![]).unwrap();
        assert_eq!(doc.mime_type(), "application/pdf");
    }
}
