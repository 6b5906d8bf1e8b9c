//! Structural sanity check of a rendered document.
//!
//! Only the shape is checked; broken per-protocol settings pass.

use serde_json::Value;
use thiserror::Error;

/// Top-level sections every document must carry.
pub const REQUIRED_SECTIONS: [&str; 4] = ["log", "inbounds", "outbounds", "routing"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidDocument {
    #[error("document is not an object")]
    NotAnObject,

    #[error("missing required section: {0}")]
    MissingSection(&'static str),

    #[error("{0} must be a list")]
    NotAList(&'static str),

    #[error("at least one outbound is required")]
    NoOutbounds,
}

pub fn validate(document: &Value) -> Result<(), InvalidDocument> {
    let root = document.as_object().ok_or(InvalidDocument::NotAnObject)?;

    for section in REQUIRED_SECTIONS {
        if !root.contains_key(section) {
            return Err(InvalidDocument::MissingSection(section));
        }
    }

    if !root["inbounds"].is_array() {
        return Err(InvalidDocument::NotAList("inbounds"));
    }

    match root["outbounds"].as_array() {
        None => Err(InvalidDocument::NotAList("outbounds")),
        Some(outbounds) if outbounds.is_empty() => Err(InvalidDocument::NoOutbounds),
        Some(_) => Ok(()),
    }
}
