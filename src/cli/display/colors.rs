//! Color theme for CLI output

use crate::domain::pipeline::Outcome;
use comfy_table::Color as TableColor;

/// Color theme for terminal output
#[derive(Debug, Clone)]
pub struct ColorTheme {
    pub success: TableColor,
    pub warning: TableColor,
    pub error: TableColor,
    pub info: TableColor,
    pub muted: TableColor,
}

impl Default for ColorTheme {
    fn default() -> Self {
        Self {
            success: TableColor::Green,
            warning: TableColor::Yellow,
            error: TableColor::Red,
            info: TableColor::Cyan,
            muted: TableColor::DarkGrey,
        }
    }
}

impl ColorTheme {
    /// Get color for a tester outcome
    pub fn outcome_color(&self, outcome: &Outcome) -> TableColor {
        match outcome {
            Outcome::Applied | Outcome::Deleted => self.success,
            Outcome::NotRun => self.warning,
            Outcome::Failed(_) => self.error,
            Outcome::Skipped => self.muted,
        }
    }

    /// Read-only fields are muted in the docs tables
    pub fn field_color(&self, read_only: bool) -> TableColor {
        if read_only {
            self.muted
        } else {
            self.info
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_theme() {
        let theme = ColorTheme::default();
        assert_eq!(theme.success, TableColor::Green);
        assert_eq!(theme.warning, TableColor::Yellow);
        assert_eq!(theme.error, TableColor::Red);
    }

    #[test]
    fn test_outcome_color() {
        let theme = ColorTheme::default();
        assert_eq!(theme.outcome_color(&Outcome::Applied), TableColor::Green);
        assert_eq!(theme.outcome_color(&Outcome::NotRun), TableColor::Yellow);
        assert_eq!(
            theme.outcome_color(&Outcome::Failed("x".to_string())),
            TableColor::Red
        );
        assert_eq!(theme.outcome_color(&Outcome::Skipped), TableColor::DarkGrey);
        assert_eq!(theme.field_color(true), TableColor::DarkGrey);
    }
}
