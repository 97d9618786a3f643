//! Source identifiers and line locations.
//!
//! Every token carries the identifier of the source it was read from,
//! and every diagnostic carries a [`Location`] built from it. The
//! identifier is reference counted so that tokens can share it cheaply.

use std::fmt;
use std::sync::Arc;

/// Display identifier of a source unit (usually its path).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId(Arc<str>);

impl SourceId {
    pub fn new(name: impl AsRef<str>) -> Self {
        SourceId(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A source line inside a source unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub source: SourceId,
    pub line: u32,
}

impl Location {
    pub fn new(source: SourceId, line: u32) -> Self {
        Location { source, line }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.line)
    }
}
