//! Pluggable source file resolution.
//!
//! The engine never touches the filesystem itself: `LoadFile` and import
//! resolution go through a [`FileResolver`], which maps an import request to
//! either an existence marker or readable content plus a canonical path.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Result, SdlError};

/// What a resolver found for `(importer, path)`.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// The file exists; content was not requested.
    Exists { canonical: String },
    /// The file exists and was opened.
    Content { canonical: String, source: String },
}

#[async_trait]
pub trait FileResolver: Send + Sync {
    /// Resolve `path` relative to `importer` (empty for top-level loads).
    /// `open` requests content; otherwise an existence check suffices.
    async fn resolve(&self, importer: &str, path: &str, open: bool) -> Result<Resolved>;
}

/// In-memory resolver backed by a path → source map. The server seeds one at
/// startup; tests seed their own.
#[derive(Debug, Default)]
pub struct MemoryResolver {
    files: HashMap<String, String>,
}

impl MemoryResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, source: &str) -> Self {
        self.files.insert(path.to_string(), source.to_string());
        self
    }

    pub fn insert(&mut self, path: &str, source: &str) {
        self.files.insert(path.to_string(), source.to_string());
    }
}

#[async_trait]
impl FileResolver for MemoryResolver {
    async fn resolve(&self, _importer: &str, path: &str, open: bool) -> Result<Resolved> {
        match self.files.get(path) {
            Some(source) if open => Ok(Resolved::Content {
                canonical: path.to_string(),
                source: source.clone(),
            }),
            Some(_) => Ok(Resolved::Exists {
                canonical: path.to_string(),
            }),
            None => Err(SdlError::NotFound(format!("no such file: {path}"))),
        }
    }
}
