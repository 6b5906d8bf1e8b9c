//! Daemon configuration synthesis.
//!
//! # Data Flow
//! ```text
//! active servers + active tenant credentials
//!     → synthesizer.rs (typed ConfigDocument)
//!     → render (JSON value)
//!     → hash.rs (sha256 over key-sorted JSON)
//!     → validation.rs (structural check before apply)
//! ```
//!
//! # Design Decisions
//! - Synthesis is pure; ordering comes from the inputs and fixed tables
//! - The hash never depends on map iteration order

pub mod document;
pub mod hash;
pub mod synthesizer;
pub mod validation;

use serde_json::Value;

pub use document::ConfigDocument;
pub use hash::{canonicalize, content_hash};
pub use synthesizer::ConfigSynthesizer;
pub use validation::{validate, InvalidDocument};

/// A rendered document and its content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub document: Value,
    pub hash: String,
}

/// Render `document` to JSON and hash it.
pub fn render(document: &ConfigDocument) -> Result<Rendered, serde_json::Error> {
    let document = serde_json::to_value(document)?;
    let hash = content_hash(&document);
    Ok(Rendered { document, hash })
}
