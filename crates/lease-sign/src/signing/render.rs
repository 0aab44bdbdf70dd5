use std::collections::BTreeMap;

use super::domain::{FieldValue, TemplateSnapshot};

/// Output of the external document renderer. The engine never interprets the
/// bytes; it stores the digest at creation and re-verifies it at completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub bytes: Vec<u8>,
    pub digest: String,
}

/// Rendering failure surfaced by the external renderer.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("document renderer unavailable: {0}")]
    Unavailable(String),
    #[error("renderer rejected the document: {0}")]
    Rejected(String),
}

/// Seam to the external document renderer (PDF generation lives outside
/// this engine).
pub trait DocumentRenderer: Send + Sync {
    fn render(
        &self,
        snapshot: &TemplateSnapshot,
        values: &BTreeMap<String, FieldValue>,
    ) -> Result<RenderedDocument, RenderError>;
}
