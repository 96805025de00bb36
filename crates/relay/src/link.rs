//! Object-storage link parsing.
//!
//! Accepted shape: `http(s)://<host>/<file|folder>/<id>[#<key>]`, where the
//! id and key are URL-safe tokens (`[A-Za-z0-9_-]+`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::FetchError;

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<scheme>https?)://(?P<host>[A-Za-z0-9.-]+(?::[0-9]{1,5})?)/(?P<kind>file|folder)/(?P<id>[A-Za-z0-9_-]+)(?:#(?P<key>[A-Za-z0-9_-]+))?",
    )
    .expect("link pattern is valid")
});

/// Whether a link points at a single object or a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    File,
    Folder,
}

impl LinkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

/// A parsed object-storage link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceLink {
    pub scheme: String,
    pub host: String,
    pub kind: LinkKind,
    pub id: String,
    /// Decryption key carried in the fragment.
    #[serde(skip_serializing)]
    pub key: Option<String>,
}

impl SourceLink {
    /// Parses `s` as exactly one link (surrounding whitespace ignored).
    pub fn parse(s: &str) -> Result<Self, FetchError> {
        let trimmed = s.trim();
        match LINK_PATTERN.captures(trimmed) {
            Some(caps) if caps.get(0).is_some_and(|m| m.range() == (0..trimmed.len())) => {
                Ok(Self::from_captures(&caps))
            }
            _ => Err(FetchError::LinkInvalid(format!(
                "not an object-storage link: {trimmed}"
            ))),
        }
    }

    /// Finds the first link anywhere in free text.
    pub fn find(text: &str) -> Result<Self, FetchError> {
        LINK_PATTERN
            .captures(text)
            .map(|caps| Self::from_captures(&caps))
            .ok_or_else(|| FetchError::LinkInvalid("no object-storage link in message".into()))
    }

    fn from_captures(caps: &regex::Captures<'_>) -> Self {
        let text = |name: &str| caps.name(name).map(|m| m.as_str().to_string());
        let kind = match caps.name("kind").map(|m| m.as_str()) {
            Some("folder") => LinkKind::Folder,
            _ => LinkKind::File,
        };
        Self {
            scheme: text("scheme").unwrap_or_default(),
            host: text("host").unwrap_or_default(),
            kind,
            id: text("id").unwrap_or_default(),
            key: text("key"),
        }
    }

    /// Rejects anything that is not a single-file link.
    pub fn require_file(&self) -> Result<(), FetchError> {
        match self.kind {
            LinkKind::File => Ok(()),
            LinkKind::Folder => Err(FetchError::UnsupportedSource(format!(
                "folder links are not supported: {}",
                self.redacted()
            ))),
        }
    }

    /// The link without its key, safe for logs.
    pub fn redacted(&self) -> String {
        format!(
            "{}://{}/{}/{}",
            self.scheme,
            self.host,
            self.kind.as_str(),
            self.id
        )
    }
}

impl fmt::Display for SourceLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())?;
        if let Some(key) = &self.key {
            write!(f, "#{key}")?;
        }
        Ok(())
    }
}
