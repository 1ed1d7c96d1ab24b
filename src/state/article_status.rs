use std::fmt;
use std::str::FromStr;

/// Triage status of a captured article
///
/// Articles start as `New`. An editor may pick them for follow-up, then archive
/// or discard them. `Archived` and `Discarded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArticleStatus {
    /// Captured, not yet looked at
    New,

    /// Flagged by an editor for follow-up
    Picked,

    // ===== Terminal States =====
    /// Kept permanently; exported in the portable snapshot
    Archived,

    /// Rejected; eligible for pruning
    Discarded,
}

impl ArticleStatus {
    pub const ALL: [ArticleStatus; 4] = [
        ArticleStatus::New,
        ArticleStatus::Picked,
        ArticleStatus::Archived,
        ArticleStatus::Discarded,
    ];

    /// Returns true if no further transition is allowed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived | Self::Discarded)
    }

    /// Checks a move against the transition table
    ///
    /// | from \ to | Picked | Archived | Discarded |
    /// |-----------|--------|----------|-----------|
    /// | New       | yes    | yes      | yes       |
    /// | Picked    | no     | yes      | yes       |
    ///
    /// Nothing ever moves back to `New`, and same-state moves are rejected.
    pub fn can_transition_to(&self, next: ArticleStatus) -> bool {
        match (self, next) {
            (Self::New, Self::Picked | Self::Archived | Self::Discarded) => true,
            (Self::Picked, Self::Archived | Self::Discarded) => true,
            _ => false,
        }
    }

    /// Integer stored in the `status` column
    pub fn to_db_value(&self) -> i64 {
        match self {
            Self::New => 0,
            Self::Picked => 1,
            Self::Archived => 2,
            Self::Discarded => -1,
        }
    }

    /// Parses the `status` column; None for unknown values
    pub fn from_db_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::New),
            1 => Some(Self::Picked),
            2 => Some(Self::Archived),
            -1 => Some(Self::Discarded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Picked => "picked",
            Self::Archived => "archived",
            Self::Discarded => "discarded",
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "new" => Ok(Self::New),
            "picked" => Ok(Self::Picked),
            "archived" => Ok(Self::Archived),
            "discarded" => Ok(Self::Discarded),
            other => Err(format!("unknown article status '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_value_roundtrip() {
        for status in ArticleStatus::ALL {
            let value = status.to_db_value();
            assert_eq!(ArticleStatus::from_db_value(value), Some(status));
        }
        assert_eq!(ArticleStatus::from_db_value(7), None);
    }

    #[test]
    fn test_transition_table() {
        use ArticleStatus::*;

        assert!(New.can_transition_to(Picked));
        assert!(New.can_transition_to(Archived));
        assert!(New.can_transition_to(Discarded));
        assert!(Picked.can_transition_to(Archived));
        assert!(Picked.can_transition_to(Discarded));

        assert!(!Picked.can_transition_to(New));
        assert!(!Picked.can_transition_to(Picked));
        for terminal in [Archived, Discarded] {
            assert!(terminal.is_terminal());
            for next in ArticleStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_same_state_is_not_a_transition() {
        for status in ArticleStatus::ALL {
            assert!(!status.can_transition_to(status));
        }
    }

    #[test]
    fn test_parse_from_str() {
        assert_eq!("Picked".parse::<ArticleStatus>(), Ok(ArticleStatus::Picked));
        assert_eq!(
            "discarded".parse::<ArticleStatus>(),
            Ok(ArticleStatus::Discarded)
        );
        assert!("gone".parse::<ArticleStatus>().is_err());
    }
}
