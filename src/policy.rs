//! File extension policy: the server's allow-set and filename helpers
// (c) 2025 Ross Younger

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;

/// Derives a file's extension from its name.
///
/// This is the substring after the last `.`, lowercased.
/// It is empty when there is no `.`, when the `.` is the first character
/// (dotfiles have no extension), or when the name ends with a `.`.
#[must_use]
pub fn extension_of(filename: &str) -> String {
    match filename.rfind('.') {
        Some(i) if i > 0 => filename[i + 1..].to_lowercase(),
        _ => String::new(),
    }
}

/// The set of file extensions a server accepts.
///
/// Entries are lowercase, carry no leading dot and are never empty.
/// Ordering is deterministic so the set renders the same way every time
/// it is announced on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionSet(BTreeSet<String>);

impl ExtensionSet {
    /// The policy applied when the operator does not specify one.
    #[must_use]
    pub fn standard() -> Self {
        Self::normalize("txt,pdf,jpg,png")
    }

    /// Parses a comma-separated specification into a canonical set.
    ///
    /// Tokens are lowercased and stripped of whitespace and leading dots;
    /// empty tokens are dropped. The operation is idempotent: normalizing
    /// the rendering of a set yields the same set.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        Self(
            raw.split(',')
                .map(|tok| tok.trim().trim_start_matches('.').to_lowercase())
                .filter(|tok| !tok.is_empty())
                .collect(),
        )
    }

    /// Membership test used for policy enforcement
    #[must_use]
    pub fn allows(&self, extension: &str) -> bool {
        self.0.contains(extension)
    }

    /// True if no extensions are present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of extensions in the set
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Display for ExtensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for ext in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(ext)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ExtensionSet {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::normalize(s))
    }
}
