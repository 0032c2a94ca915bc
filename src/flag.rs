//! Message flags reported in XIMSS folder reports
//!
//! The server sends flags as a comma-separated `FLAGS` element, e.g.
//! `<FLAGS>Seen,Recent</FLAGS>`. Well-known flags get dedicated
//! variants; anything else is kept as a keyword.

use std::fmt;

/// A message flag.
///
/// # Examples
///
/// ```
/// use ximss_poller::Flag;
///
/// let flags = Flag::parse_list("Seen,Recent,$Work");
/// assert_eq!(flags, vec![Flag::Seen, Flag::Recent, Flag::Keyword("$Work".to_string())]);
/// assert_eq!(Flag::Seen.as_ximss_str(), "Seen");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Seen,
    Answered,
    Flagged,
    Deleted,
    Draft,
    /// First time this session sees the message.
    Recent,
    /// A server or user keyword.
    Keyword(String),
}

impl Flag {
    /// Parse a `FLAGS` element body. Empty items are skipped.
    #[must_use]
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Self::from)
            .collect()
    }

    /// The XIMSS wire spelling of this flag.
    #[must_use]
    pub fn as_ximss_str(&self) -> &str {
        match self {
            Self::Seen => "Seen",
            Self::Answered => "Answered",
            Self::Flagged => "Flagged",
            Self::Deleted => "Deleted",
            Self::Draft => "Draft",
            Self::Recent => "Recent",
            Self::Keyword(kw) => kw,
        }
    }
}

impl From<&str> for Flag {
    fn from(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "seen" | "read" => Self::Seen,
            "answered" => Self::Answered,
            "flagged" => Self::Flagged,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "recent" => Self::Recent,
            _ => Self::Keyword(s.to_string()),
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ximss_str())
    }
}
