use comfy_table::{Attribute, Cell, CellAlignment, Color, Table, modifiers, presets};

use crate::core::soc::SocPlan;

/// Render the projected SoC trajectory for operator inspection.
#[must_use]
pub fn build_plan_table(plan: &SocPlan, min_soc: u8) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED).apply_modifier(modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["Time", "Projected SoC"]);
    for (time, soc) in &plan.projection {
        table.add_row(vec![
            Cell::new(time.format("%H:%M")),
            Cell::new(format!("{soc:.1} %")).set_alignment(CellAlignment::Right).fg(
                if *soc < f64::from(min_soc) { Color::Red } else { Color::Reset },
            ),
        ]);
    }
    table.add_row(vec![
        Cell::new(format!("Target for {}", plan.date)).add_attribute(Attribute::Bold),
        Cell::new(format!("{} %", plan.target))
            .add_attribute(Attribute::Bold)
            .set_alignment(CellAlignment::Right),
    ]);
    table
}
