//! Parser seam.
//!
//! The surface DSL grammar lives outside this crate. Whatever implements
//! [`DslParser`] turns a source file into a [`FileDecl`]; parse failures
//! propagate through `LoadFile` as `SdlError::Parse`. The bundled default
//! accepts the AST's serde form directly, which is what the front-end
//! toolchain emits after its own parse.

use crate::ast::FileDecl;
use crate::error::{Result, SdlError};

pub trait DslParser: Send + Sync {
    fn parse_file(&self, path: &str, source: &str) -> Result<FileDecl>;
}

/// Deserializes the typed AST from its JSON form.
#[derive(Debug, Default)]
pub struct AstJsonParser;

impl DslParser for AstJsonParser {
    fn parse_file(&self, path: &str, source: &str) -> Result<FileDecl> {
        let mut decl: FileDecl =
            serde_json::from_str(source).map_err(|e| SdlError::Parse {
                path: path.to_string(),
                message: e.to_string(),
            })?;
        decl.path = path.to_string();
        Ok(decl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_carries_path() {
        let err = AstJsonParser.parse_file("bad.sdl", "{not json").unwrap_err();
        match err {
            SdlError::Parse { path, .. } => assert_eq!(path, "bad.sdl"),
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn parses_minimal_file() {
        let decl = AstJsonParser
            .parse_file("app.sdl", r#"{"path":"","components":[],"systems":[]}"#)
            .unwrap();
        assert_eq!(decl.path, "app.sdl");
        assert!(decl.components.is_empty());
    }
}
