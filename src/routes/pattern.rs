//! Wildcard domain patterns.
//!
//! A pattern is a domain where `*` stands for one or more characters and
//! every other character is literal. Matching is suffix anchored and
//! prefix tolerant: `*.internal.example` matches `db.internal.example` and
//! `a.b.internal.example`, and `internal.example` matches
//! `www.internal.example` as well as `internal.example` itself.

use std::fmt;

/// A compiled wildcard domain pattern.
///
/// Stored as the literal runs between wildcards, so `a*b.c` becomes
/// `["a", "b.c"]` and `*.example` becomes `["", ".example"]`. Each
/// boundary between two runs is one wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainPattern {
    source: String,
    literals: Vec<Box<[u8]>>,
}

/// Why a wildcard string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternError {
    Empty,
    InvalidCharacter,
}

impl PatternError {
    pub fn reason(self) -> &'static str {
        match self {
            PatternError::Empty => "pattern is empty",
            PatternError::InvalidCharacter => "pattern contains whitespace or control characters",
        }
    }
}

impl DomainPattern {
    /// Compile a wildcard domain string.
    ///
    /// The pattern goes through the same normalization as query names:
    /// lowercased, with a trailing root dot removed.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let normalized = normalize(pattern);
        if normalized.is_empty() {
            return Err(PatternError::Empty);
        }
        if normalized
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(PatternError::InvalidCharacter);
        }

        let literals = normalized
            .split('*')
            .map(|part| part.as_bytes().into())
            .collect();

        Ok(Self {
            source: normalized,
            literals,
        })
    }

    /// The normalized wildcard string this pattern was compiled from.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Check a query name against the pattern.
    ///
    /// The name is normalized first, so both `DB.Internal.Example.` and
    /// `db.internal.example` are accepted.
    pub fn matches(&self, name: &str) -> bool {
        let name = normalize(name);
        self.matches_normalized(name.as_bytes())
    }

    /// Check an already normalized name.
    ///
    /// Places literals right to left, each as far right as it can go. The
    /// last literal is pinned to the end of the name, every wildcard
    /// consumes at least one byte, and whatever is left in front of the
    /// first literal is the tolerated prefix.
    pub fn matches_normalized(&self, name: &[u8]) -> bool {
        let Some((last, rest)) = self.literals.split_last() else {
            return false;
        };

        if !name.ends_with(last) {
            return false;
        }
        let mut end = name.len() - last.len();

        for literal in rest.iter().rev() {
            if end == 0 {
                return false;
            }
            end -= 1;
            match rfind(&name[..end], literal) {
                Some(start) => end = start,
                None => return false,
            }
        }

        true
    }
}

impl fmt::Display for DomainPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Lowercase a domain and drop the trailing root dot.
pub fn normalize(name: &str) -> String {
    let name = name.strip_suffix('.').unwrap_or(name);
    name.to_ascii_lowercase()
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&start| &haystack[start..start + needle.len()] == needle)
}
