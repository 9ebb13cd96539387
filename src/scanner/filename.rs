//! Augmented file name grammar.
//!
//! Augmented copies of one sample share a base name and differ only in a
//! trailing augmentation index:
//!
//! ```text
//! name      := stem "[" parameter "]" separator index "." extension
//! stem      := one or more characters
//! parameter := one or more characters other than "]"
//! separator := zero or more characters, not ending in a digit
//! index     := one or more ASCII digits
//! extension := one or more characters without "."
//! ```
//!
//! `v_Walk_g01_p_[0.5]_3.png` parses to stem `v_Walk_g01_p_`, parameter
//! `0.5`, separator `_`, index `3`, extension `png`. The base name is
//! everything before the index: `v_Walk_g01_p_[0.5]_`.
//!
//! Indices are unpadded. Member names are synthesized as `0, 1, 2, ...`, so a
//! zero-padded copy such as `clip[0.5]_00.png` parses to index 0 but its
//! siblings are looked up as `clip[0.5]_1.png`, not `clip[0.5]_01.png`.

use std::fmt;
use thiserror::Error;

/// Reasons a file name does not follow the augmentation convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilenameError {
    #[error("file name is not valid UTF-8")]
    NotUtf8,
    #[error("no bracketed parameter token")]
    MissingParameter,
    #[error("bracketed parameter token is empty")]
    EmptyParameter,
    #[error("nothing precedes the bracketed parameter token")]
    EmptyStem,
    #[error("no file extension after the augmentation index")]
    MissingExtension,
    #[error("no augmentation index before the extension")]
    MissingIndex,
    #[error("augmentation index '{0}' is out of range")]
    InvalidIndex(String),
}

/// A parsed augmented file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AugmentedName {
    pub stem: String,
    pub parameter: String,
    pub separator: String,
    pub index: usize,
    pub extension: String,
}

impl AugmentedName {
    /// Parse a bare file name (no directory components).
    pub fn parse(file_name: &str) -> Result<Self, FilenameError> {
        let close = file_name.rfind(']').ok_or(FilenameError::MissingParameter)?;
        let open = file_name[..close]
            .rfind('[')
            .ok_or(FilenameError::MissingParameter)?;

        let parameter = &file_name[open + 1..close];
        if parameter.is_empty() {
            return Err(FilenameError::EmptyParameter);
        }

        let stem = &file_name[..open];
        if stem.is_empty() {
            return Err(FilenameError::EmptyStem);
        }

        let tail = &file_name[close + 1..];
        let dot = tail.rfind('.').ok_or(FilenameError::MissingExtension)?;
        let extension = &tail[dot + 1..];
        if extension.is_empty() {
            return Err(FilenameError::MissingExtension);
        }

        let numbered = &tail[..dot];
        let digits_start = numbered
            .char_indices()
            .rev()
            .take_while(|(_, c)| c.is_ascii_digit())
            .last()
            .map(|(i, _)| i)
            .ok_or(FilenameError::MissingIndex)?;

        let digits = &numbered[digits_start..];
        let index = digits
            .parse::<usize>()
            .map_err(|_| FilenameError::InvalidIndex(digits.to_string()))?;

        Ok(Self {
            stem: stem.to_string(),
            parameter: parameter.to_string(),
            separator: numbered[..digits_start].to_string(),
            index,
            extension: extension.to_string(),
        })
    }

    /// Parse the final component of a path.
    pub fn from_path(path: &std::path::Path) -> Result<Self, FilenameError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or(FilenameError::NotUtf8)?;
        Self::parse(name)
    }

    /// The augmentation-invariant part of the name.
    pub fn base_name(&self) -> String {
        format!("{}[{}]{}", self.stem, self.parameter, self.separator)
    }

    /// File name of the member with the given augmentation index.
    pub fn member_name(&self, index: usize) -> String {
        format!("{}{}.{}", self.base_name(), index, self.extension)
    }

    /// File names of members `0..n`, in index order.
    pub fn member_names(&self, n: usize) -> Vec<String> {
        (0..n).map(|i| self.member_name(i)).collect()
    }
}

impl fmt::Display for AugmentedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.member_name(self.index))
    }
}
