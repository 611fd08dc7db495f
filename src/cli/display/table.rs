//! Table rendering for CLI output

use super::{ColorTheme, StatusIcon};
use crate::domain::config::schema::{env_key, FieldSchema};
use crate::domain::pipeline::TesterOutcome;
use crate::shared::duration::format_duration;
use chrono::{DateTime, Local};
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Cell, CellAlignment, ContentArrangement, Table};
use std::time::Duration;

/// Table renderer for formatted output
pub struct TableRenderer {
    theme: ColorTheme,
}

impl Default for TableRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole seconds are enough for the summary.
fn took(d: Duration) -> String {
    if d.is_zero() {
        return "-".to_string();
    }
    format_duration(Duration::from_secs(d.as_secs()))
}

impl TableRenderer {
    /// Create a new table renderer with default theme
    pub fn new() -> Self {
        Self {
            theme: ColorTheme::default(),
        }
    }

    /// Render the per-tester result of one `apply` or `delete` run
    pub fn render_summary(
        &self,
        action: &str,
        finished_at: DateTime<Local>,
        outcomes: &[TesterOutcome],
    ) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("#").set_alignment(CellAlignment::Right),
                Cell::new("ADD-ON").set_alignment(CellAlignment::Left),
                Cell::new("ENABLED").set_alignment(CellAlignment::Center),
                Cell::new("OUTCOME").set_alignment(CellAlignment::Left),
                Cell::new("TOOK").set_alignment(CellAlignment::Right),
            ]);

        for o in outcomes {
            table.add_row(vec![
                Cell::new(o.order).set_alignment(CellAlignment::Right),
                Cell::new(&o.name),
                Cell::new(StatusIcon::for_enabled(o.enabled)).set_alignment(CellAlignment::Center),
                Cell::new(format!(
                    "{} {}",
                    StatusIcon::for_outcome(&o.outcome),
                    o.outcome.label()
                ))
                .fg(self.theme.outcome_color(&o.outcome)),
                Cell::new(took(o.took)).set_alignment(CellAlignment::Right),
            ]);
        }

        let mut output = String::new();
        output.push_str(&format!(
            "╭─ {} {} ─╮\n",
            action,
            format!("[{}]", finished_at.format("%Y-%m-%d %H:%M:%S"))
                .bright_black()
        ));
        output.push_str(&table.to_string());
        output.push('\n');
        output.push_str(&format!(
            "Legend: {} Done  {} Not run  {} Failed  {} Disabled\n",
            StatusIcon::SUCCESS.green(),
            StatusIcon::WARNING.yellow(),
            StatusIcon::ERROR.red(),
            StatusIcon::SKIPPED.bright_black()
        ));
        output
    }

    /// Render one config section: field, type, env key, read-only, description
    pub fn render_schema(&self, title: &str, env_prefix: &str, schema: &[FieldSchema]) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("FIELD"),
                Cell::new("TYPE"),
                Cell::new("ENV"),
                Cell::new("READ-ONLY").set_alignment(CellAlignment::Center),
                Cell::new("DESCRIPTION"),
            ]);
        for f in schema {
            table.add_row(vec![
                Cell::new(f.name).fg(self.theme.field_color(f.read_only)),
                Cell::new(f.kind.as_str()),
                Cell::new(env_key(env_prefix, f.name)),
                Cell::new(if f.read_only { "yes" } else { "" }).set_alignment(CellAlignment::Center),
                Cell::new(f.doc),
            ]);
        }
        format!("{}\n{}\n", title.bold(), table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::schema::{FieldKind, ENABLE};
    use crate::domain::pipeline::Outcome;

    #[test]
    fn test_render_summary() {
        colored::control::set_override(false);
        let renderer = TableRenderer::new();
        let outcomes = vec![
            TesterOutcome {
                order: 1,
                name: "metrics-server".to_string(),
                enabled: true,
                outcome: Outcome::Applied,
                took: Duration::from_millis(61_500),
            },
            TesterOutcome {
                order: 2,
                name: "fluent-bit".to_string(),
                enabled: false,
                outcome: Outcome::Skipped,
                took: Duration::ZERO,
            },
        ];
        let output = renderer.render_summary("apply", Local::now(), &outcomes);
        assert!(output.contains("metrics-server"));
        assert!(output.contains("applied"));
        assert!(output.contains("1m1s"));
        assert!(output.contains("skipped"));
    }

    #[test]
    fn test_render_schema() {
        colored::control::set_override(false);
        let renderer = TableRenderer::new();
        let schema = [
            ENABLE,
            FieldSchema::read_only("total_nodes", FieldKind::UInt, "node count"),
        ];
        let output = renderer.render_schema("metrics-server", "K8S_TESTER_ADD_ON_METRICS_SERVER_", &schema);
        assert!(output.contains("K8S_TESTER_ADD_ON_METRICS_SERVER_ENABLE"));
        assert!(output.contains("K8S_TESTER_ADD_ON_METRICS_SERVER_TOTAL_NODES"));
        assert!(output.contains("yes"));
    }
}
