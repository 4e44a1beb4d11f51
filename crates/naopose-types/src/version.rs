//! Loose dotted versions as reported by `ALMemory.version()`.
//!
//! NAOqi firmware strings are not semver: they carry four numeric parts
//! (`2.8.5.10`) and older builds append alphabetic tags (`1.14.5-rc1`).
//! A version is split into runs of digits and runs of letters; everything
//! else is a separator.  Comparison is lexicographic over those runs with
//! a numeric run sorting before an alphabetic one, so `1.6 < 2.8.5.10` and
//! `2.8 < 2.8.5`.
//!
//! Separators are dropped rather than kept as string components, so
//! `2-8-5-10` and `2.8.5.10` compare equal.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::BridgeError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Component {
    Numeric(u64),
    Alpha(String),
}

/// A comparable firmware version.  Equality and ordering only look at the
/// parsed components; [`fmt::Display`] gives back the original string.
#[derive(Debug, Clone)]
pub struct NaoqiVersion {
    raw: String,
    components: Vec<Component>,
}

impl NaoqiVersion {
    /// Parse `raw` into its components.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::VersionParse`] when the string contains no
    /// digits or letters, or a numeric run does not fit in a `u64`.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let raw = raw.trim();
        let mut components = Vec::new();
        let mut chars = raw.char_indices().peekable();

        while let Some(&(start, c)) = chars.peek() {
            if c.is_ascii_digit() {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    end = i + d.len_utf8();
                    chars.next();
                }
                let run = &raw[start..end];
                let n = run
                    .parse::<u64>()
                    .map_err(|e| BridgeError::VersionParse(format!("{raw:?}: {e}")))?;
                components.push(Component::Numeric(n));
            } else if c.is_ascii_alphabetic() {
                let mut end = start;
                while let Some(&(i, a)) = chars.peek() {
                    if !a.is_ascii_alphabetic() {
                        break;
                    }
                    end = i + a.len_utf8();
                    chars.next();
                }
                components.push(Component::Alpha(raw[start..end].to_string()));
            } else {
                chars.next();
            }
        }

        if components.is_empty() {
            return Err(BridgeError::VersionParse(format!("{raw:?} has no components")));
        }

        Ok(Self {
            raw: raw.to_string(),
            components,
        })
    }

    /// Leading numeric components, e.g. `[2, 8, 5, 10]`.
    pub fn numeric_parts(&self) -> Vec<u64> {
        self.components
            .iter()
            .map_while(|c| match c {
                Component::Numeric(n) => Some(*n),
                Component::Alpha(_) => None,
            })
            .collect()
    }

    /// Major version, if the string starts with a number.
    pub fn major(&self) -> Option<u64> {
        self.numeric_parts().first().copied()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for NaoqiVersion {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for NaoqiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for NaoqiVersion {
    fn eq(&self, other: &Self) -> bool {
        self.components == other.components
    }
}

impl Eq for NaoqiVersion {}

impl PartialOrd for NaoqiVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NaoqiVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> NaoqiVersion {
        NaoqiVersion::parse(s).unwrap()
    }

    #[test]
    fn parses_four_part_firmware_version() {
        let version = v("2.8.5.10");
        assert_eq!(version.numeric_parts(), vec![2, 8, 5, 10]);
        assert_eq!(version.major(), Some(2));
        assert_eq!(version.to_string(), "2.8.5.10");
    }

    /// Verify that releases order by their numeric parts.
    #[test]
    fn older_release_sorts_first() {
        assert!(v("1.6") < v("2.8.5.10"));
        assert!(v("2.8") < v("2.8.5"));
        assert!(v("1.14.5") > v("1.6"));
    }

    #[test]
    fn numbers_compare_numerically_not_textually() {
        assert!(v("2.10") > v("2.9"));
    }

    /// Verify that a numeric part sorts before an alphabetic tag.
    #[test]
    fn numeric_component_sorts_before_alpha_tag() {
        assert!(v("1.14.5.3") < v("1.14.5rc"));
        assert_eq!(v("1.14.5-rc1").numeric_parts(), vec![1, 14, 5]);
    }

    /// Verify that separators and surrounding whitespace do not affect
    /// equality.
    #[test]
    fn equality_ignores_separators_and_whitespace() {
        assert_eq!(v(" 2.8.5.10\n"), v("2-8-5-10"));
    }

    /// Verify that strings without digits or letters are rejected.
    #[test]
    fn rejects_strings_without_components() {
        assert!(matches!(
            NaoqiVersion::parse("..."),
            Err(BridgeError::VersionParse(_))
        ));
        assert!(NaoqiVersion::parse("").is_err());
    }

    #[test]
    fn rejects_overflowing_numeric_run() {
        assert!(NaoqiVersion::parse("99999999999999999999999.1").is_err());
    }

    #[test]
    fn from_str_matches_parse() {
        let parsed: NaoqiVersion = "2.5.0".parse().unwrap();
        assert_eq!(parsed, v("2.5.0"));
    }
}
