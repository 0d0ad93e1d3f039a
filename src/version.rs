//! Loose semantic version handling
//!
//! Release manifests carry version strings with two to four numeric
//! components and an optional pre-release tag: `1.2`, `1.2.3.4`,
//! `1.2.3-beta2`. Missing components normalize to zero, and a tagged
//! version orders before the untagged release with the same numbers.
//! The accepted grammar is deliberately loose: whitespace is tolerated
//! around the numeric components on parse.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use regex::Regex;

use crate::error::{Result, UpdeltaError};

/// Grammar for the loose version form (whitespace-tolerant)
const VERSION_PATTERN: &str =
    r"^\s*(\d+)(?:\s*\.\s*(\d+))?(?:\s*\.\s*(\d+))?(?:\s*\.\s*(\d+))?\s*(?:-([A-Za-z][0-9A-Za-z-]*))?\s*$";

/// Splits a pre-release tag into an alphabetic prefix and a numeric tail
const SPECIAL_TAIL_PATTERN: &str = r"^([A-Za-z]+)([0-9]+)$";

/// A parsed release version
///
/// Ordering and equality work on the normalized four-component tuple plus
/// the tag; the string the version was parsed from is kept for display only.
#[derive(Debug, Clone)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub build: u64,
    pub revision: u64,

    /// Pre-release tag, empty when absent. Compared case-insensitively.
    pub special: String,

    /// The input the version was parsed from, trimmed. Display only.
    original: String,
}

impl Version {
    /// Parse a loose version string (2-4 numeric components)
    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_inner(input, false)
    }

    /// Parse a version string that must have exactly three numeric components
    pub fn parse_strict(input: &str) -> Result<Self> {
        Self::parse_inner(input, true)
    }

    fn parse_inner(input: &str, strict: bool) -> Result<Self> {
        let malformed = || UpdeltaError::MalformedVersion(input.to_string());

        let re = Regex::new(VERSION_PATTERN).expect("static version pattern");
        let caps = re.captures(input).ok_or_else(malformed)?;

        let component = |idx: usize| -> Result<Option<u64>> {
            match caps.get(idx) {
                Some(m) => m.as_str().parse::<u64>().map(Some).map_err(|_| malformed()),
                None => Ok(None),
            }
        };

        let major = component(1)?.ok_or_else(malformed)?;
        let minor = component(2)?;
        let build = component(3)?;
        let revision = component(4)?;

        if strict && (minor.is_none() || build.is_none() || revision.is_some()) {
            return Err(malformed());
        }

        Ok(Self {
            major,
            minor: minor.unwrap_or(0),
            build: build.unwrap_or(0),
            revision: revision.unwrap_or(0),
            special: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
            original: input.trim().to_string(),
        })
    }

    /// Whether this is a pre-release version
    pub fn is_prerelease(&self) -> bool {
        !self.special.is_empty()
    }

    /// Canonical four-component form, e.g. `1.2.3.0-beta2`
    pub fn canonical(&self) -> String {
        if self.special.is_empty() {
            format!("{}.{}.{}.{}", self.major, self.minor, self.build, self.revision)
        } else {
            format!(
                "{}.{}.{}.{}-{}",
                self.major, self.minor, self.build, self.revision, self.special
            )
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

impl FromStr for Version {
    type Err = UpdeltaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.major == other.major
            && self.minor == other.minor
            && self.build == other.build
            && self.revision == other.revision
            && self.special.eq_ignore_ascii_case(&other.special)
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.build.hash(state);
        self.revision.hash(state);
        self.special.to_ascii_lowercase().hash(state);
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let numeric = (self.major, self.minor, self.build, self.revision).cmp(&(
            other.major,
            other.minor,
            other.build,
            other.revision,
        ));
        if numeric != Ordering::Equal {
            return numeric;
        }

        // Pre-release precedes release: no tag outranks any tag.
        match (self.special.is_empty(), other.special.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => compare_specials(&self.special, &other.special),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Order two pre-release tags
///
/// When both tags are an alphabetic prefix followed by trailing digits and
/// the prefixes match case-insensitively, the trailing integers decide
/// (`beta2` < `beta10`). Anything else falls back to a case-insensitive
/// ordinal comparison.
fn compare_specials(a: &str, b: &str) -> Ordering {
    if let (Some((prefix_a, tail_a)), Some((prefix_b, tail_b))) =
        (split_numeric_tail(a), split_numeric_tail(b))
    {
        if prefix_a.eq_ignore_ascii_case(prefix_b) {
            return tail_a.cmp(&tail_b);
        }
    }

    a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase())
}

fn split_numeric_tail(tag: &str) -> Option<(&str, u64)> {
    let re = Regex::new(SPECIAL_TAIL_PATTERN).expect("static tag pattern");
    let caps = re.captures(tag)?;
    let prefix = caps.get(1)?.as_str();
    let tail = caps.get(2)?.as_str().parse::<u64>().ok()?;
    Some((prefix, tail))
}
