use std::fmt::Display;

use lazy_static::lazy_static;
use regex::Regex;

use super::RestoreError;

lazy_static! {
    static ref ARCHIVE_NAME_REGEX: Regex = Regex::new("^[A-Za-z0-9:+.-]+$").unwrap();
}

/// Name of a borg archive. Construction goes through [`ArchiveName::parse`]
/// so a name is always safe to embed in a SQL identifier or hand to a
/// subprocess.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArchiveName(String);

impl ArchiveName {
    pub fn parse(value: impl AsRef<str>) -> Result<ArchiveName, RestoreError> {
        let value = value.as_ref();
        if !ARCHIVE_NAME_REGEX.is_match(value) {
            return Err(RestoreError::InvalidInput(format!(
                "archive name '{}' may only contain letters, digits and ':+.-'",
                value
            )));
        }
        Ok(ArchiveName(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ArchiveName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One version of a path: the archive it was found in and the modification
/// time recorded for it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveVersion {
    pub archive: ArchiveName,
    pub mtime: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_parsing() {
        let valid_cases = &["abc-1234:5+1", "abc", "host-2023-01-01T00:00:00", "a.b.c"];
        let invalid_cases = &[
            "",
            "with space",
            "back`tick",
            "double\"quote",
            "single'quote",
            "semi;colon",
            "slash/name",
            "dollar$sign",
        ];
        for item in valid_cases {
            assert!(ArchiveName::parse(item).is_ok(), "{item:?} should parse");
        }
        for item in invalid_cases {
            assert!(ArchiveName::parse(item).is_err(), "{item:?} should not parse");
        }
    }
}
