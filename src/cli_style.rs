/*!
 * Tunegate CLI tables
 */

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::collections::BTreeMap;
use tunegate_core_resilience::{QuotaStatus, QuotaUsage};

/// Create a styled table with standard formatting
pub fn create_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(text: &str) -> Cell {
    Cell::new(text)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}

/// Colored cell for a quota status tier
pub fn status_cell(status: QuotaStatus) -> Cell {
    let color = match status {
        QuotaStatus::Ok => Color::Green,
        QuotaStatus::Warning => Color::Yellow,
        QuotaStatus::Critical => Color::Red,
        QuotaStatus::Exceeded => Color::DarkRed,
    };
    Cell::new(status.as_str().to_uppercase())
        .fg(color)
        .add_attribute(Attribute::Bold)
}

/// One row per upstream with hourly and daily usage
pub fn quota_table(usages: &BTreeMap<String, QuotaUsage>) -> Table {
    let mut table = create_table();
    table.set_header(vec![
        header("Upstream"),
        header("Hourly"),
        header("Daily"),
        header("Used"),
        header("Status"),
    ]);

    for (name, usage) in usages {
        let peak = usage.hourly_percentage().max(usage.daily_percentage());
        table.add_row(vec![
            Cell::new(name)
                .fg(Color::White)
                .add_attribute(Attribute::Bold),
            Cell::new(format!("{}/{}", usage.hourly_used, usage.hourly_limit)),
            Cell::new(format!(
                "{}/{}",
                usage.daily_used,
                usage.daily_limit_display()
            )),
            Cell::new(format!("{:.0}%", peak * 100.0)).fg(Color::DarkGrey),
            status_cell(usage.status()),
        ]);
    }

    table
}
