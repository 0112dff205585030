//! `reel presets` command.

use std::fmt::Write as _;

use crate::schedule::Preset;

/// Execute the `presets` command.
///
/// # Errors
///
/// Never fails; returns `Result` for dispatch uniformity.
pub fn run() -> Result<(), String> {
    print!("{}", render());
    Ok(())
}

fn render() -> String {
    let rows: Vec<(&str, String, &str)> = Preset::ALL
        .iter()
        .map(|p| {
            let tiers: Vec<&str> = p.tiers().iter().map(|t| t.as_str()).collect();
            (p.as_str(), tiers.join(","), p.description())
        })
        .collect();
    let name_width = rows.iter().map(|r| r.0.len()).max().unwrap_or(6).max(6);
    let tiers_width = rows.iter().map(|r| r.1.len()).max().unwrap_or(5).max(5);

    let mut out = String::new();
    let _ = writeln!(out, "{:<name_width$}  {:<tiers_width$}  DESCRIPTION", "PRESET", "TIERS");
    let _ = writeln!(out, "{:-<name_width$}  {:-<tiers_width$}  {:-<11}", "", "", "");
    for (name, tiers, description) in &rows {
        let _ = writeln!(out, "{name:<name_width$}  {tiers:<tiers_width$}  {description}");
    }
    out
}
