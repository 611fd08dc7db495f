//! Status icons for CLI output

use crate::domain::pipeline::Outcome;

/// Status icons for different states
pub struct StatusIcon;

impl StatusIcon {
    /// Applied or deleted
    pub const SUCCESS: &'static str = "✓";

    /// Enabled but never reached
    pub const WARNING: &'static str = "⚠";

    pub const ERROR: &'static str = "✗";

    /// Disabled in the config
    pub const SKIPPED: &'static str = "-";

    /// Icon for a tester outcome
    pub fn for_outcome(outcome: &Outcome) -> &'static str {
        match outcome {
            Outcome::Applied | Outcome::Deleted => Self::SUCCESS,
            Outcome::NotRun => Self::WARNING,
            Outcome::Failed(_) => Self::ERROR,
            Outcome::Skipped => Self::SKIPPED,
        }
    }

    pub fn for_enabled(enabled: bool) -> &'static str {
        if enabled {
            Self::SUCCESS
        } else {
            Self::SKIPPED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_outcome() {
        assert_eq!(StatusIcon::for_outcome(&Outcome::Applied), StatusIcon::SUCCESS);
        assert_eq!(StatusIcon::for_outcome(&Outcome::Deleted), StatusIcon::SUCCESS);
        assert_eq!(StatusIcon::for_outcome(&Outcome::NotRun), StatusIcon::WARNING);
        assert_eq!(
            StatusIcon::for_outcome(&Outcome::Failed("boom".to_string())),
            StatusIcon::ERROR
        );
        assert_eq!(StatusIcon::for_outcome(&Outcome::Skipped), StatusIcon::SKIPPED);
    }
}
