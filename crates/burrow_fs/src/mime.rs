//! Extension to MIME type table

use crate::FileUrl;
use once_cell::sync::Lazy;
use std::collections::HashMap;

static BUILTIN: Lazy<MimeTable> =
    Lazy::new(|| MimeTable::parse(include_str!("../resources/mime.types")));

/// MIME types that are browsed like directories
const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Mapping from lower-case file extension to MIME type
#[derive(Debug, Clone, Default)]
pub struct MimeTable {
    by_extension: HashMap<String, String>,
}

impl MimeTable {
    /// Parse `mimetype ext1 ext2 ...` lines; `#` starts a comment
    pub fn parse(text: &str) -> Self {
        let mut by_extension = HashMap::new();

        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("");
            let mut fields = line.split_whitespace();
            let Some(mime) = fields.next() else {
                continue;
            };
            for ext in fields {
                by_extension.insert(ext.to_lowercase(), mime.to_string());
            }
        }

        Self { by_extension }
    }

    /// Table shipped with the crate
    pub fn builtin() -> &'static MimeTable {
        &BUILTIN
    }

    pub fn len(&self) -> usize {
        self.by_extension.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_extension.is_empty()
    }

    /// MIME type for a filename, by extension
    pub fn mime_type_for(&self, filename: &str) -> Option<&str> {
        let (_, ext) = filename.rsplit_once('.')?;
        self.by_extension.get(&ext.to_lowercase()).map(String::as_str)
    }

    /// Should a remote resource at this location be browsed like a directory?
    ///
    /// Locations with no path or with a query are assumed to produce a page.
    /// A known type is browsable when it is HTML-like; an unknown one only when
    /// the path names a directory.
    pub fn guess_browsable(&self, url: &FileUrl) -> bool {
        if url.is_root() || url.query().is_some() {
            return true;
        }

        match url.filename().and_then(|name| self.mime_type_for(name)) {
            Some(mime) => HTML_TYPES.contains(&mime),
            None => url.path().ends_with('/'),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let table = MimeTable::parse("# comment\ntext/html html htm\n\nimage/png PNG # inline\n");
        assert_eq!(table.len(), 3);
        assert_eq!(table.mime_type_for("index.HTM"), Some("text/html"));
        assert_eq!(table.mime_type_for("a.png"), Some("image/png"));
        assert_eq!(table.mime_type_for("noext"), None);
    }

    #[test]
    fn test_builtin() {
        let table = MimeTable::builtin();
        assert!(!table.is_empty());
        assert_eq!(table.mime_type_for("archive.zip"), Some("application/zip"));
    }

    #[test]
    fn test_guess_browsable() {
        let table = MimeTable::builtin();
        let browsable = |s: &str| table.guess_browsable(&FileUrl::parse(s).unwrap());

        assert!(browsable("http://example.com"));
        assert!(browsable("http://example.com/search?q=x"));
        assert!(browsable("http://example.com/index.html"));
        assert!(browsable("http://example.com/docs/"));
        assert!(!browsable("http://example.com/file.zip"));
        assert!(!browsable("http://example.com/unknown.zzz"));
    }
}
