use console::{Emoji, style};

use crate::core::routing::IntentResponse;
use crate::core::types::{Envelope, ResultSet};

pub static SUCCESS_ICON: Emoji<'_, '_> = Emoji("✅ ", "");
pub static INFO_ICON: Emoji<'_, '_> = Emoji("ℹ️  ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "");
pub static GLOBE: Emoji<'_, '_> = Emoji("🌐 ", "");
pub static GEAR: Emoji<'_, '_> = Emoji("⚙️  ", "");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
pub static DATABASE: Emoji<'_, '_> = Emoji("🗄️  ", "");
pub static QUESTION: Emoji<'_, '_> = Emoji("❓ ", "");

/// Rows printed by [`print_result_table`] before eliding the rest.
pub const TABLE_PREVIEW_ROWS: usize = 20;
const MAX_CELL_WIDTH: usize = 32;

pub fn print_success(msg: &str) {
    println!("{} {}", SUCCESS_ICON, style(msg).green());
}

pub fn print_info(msg: &str) {
    println!("{} {}", INFO_ICON, style(msg).blue());
}

pub fn print_warn(msg: &str) {
    println!("{} {}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", ERROR_ICON, style(msg).red().bold());
}

pub fn print_status(label: &str, msg: &str) {
    println!("  {} {}: {}", GEAR, style(label).bold().cyan(), msg);
}

pub fn print_link(label: &str, url: &str) {
    println!(
        "  {} {}: {}",
        GLOBE,
        style(label).bold(),
        style(url).underlined().cyan()
    );
}

enum GuideLine {
    Command(String, String),
    Status(String, String),
    Blank,
}

/// A titled block of aligned help or status lines.
pub struct GuideSection {
    title: String,
    lines: Vec<GuideLine>,
}

impl GuideSection {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn command(mut self, name: &str, description: &str) -> Self {
        self.lines
            .push(GuideLine::Command(name.to_string(), description.to_string()));
        self
    }

    pub fn status(mut self, label: &str, value: &str) -> Self {
        self.lines
            .push(GuideLine::Status(label.to_string(), value.to_string()));
        self
    }

    pub fn blank(mut self) -> Self {
        self.lines.push(GuideLine::Blank);
        self
    }

    pub fn print(&self) {
        let width = self
            .lines
            .iter()
            .filter_map(|line| match line {
                GuideLine::Command(name, _) => Some(name.len()),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        println!("\n {}", style(&self.title).bold().underlined());
        for line in &self.lines {
            match line {
                GuideLine::Command(name, description) => println!(
                    "   {}  {}",
                    style(format!("{:<width$}", name, width = width)).green(),
                    style(description).dim()
                ),
                GuideLine::Status(label, value) => print_status(label, value),
                GuideLine::Blank => println!(),
            }
        }
    }
}

pub fn print_banner() {
    let lines: &[&str] = &[
        "                          _             _      ",
        "  __ _ _  _ ___ _ _ _  _| |__ _ _ __ _(_)_ _  ",
        " / _` | || / -_) '_| || | '_ \\ '_/ _` | | ' \\ ",
        " \\__, |\\_,_\\___|_|  \\_, |_.__/_| \\__,_|_|_||_|",
        "    |_|             |__/                      ",
    ];

    // Gradient: #818cf8 → #a78bfa → #22d3ee (diagonal top-left → bottom-right)
    let stops: [(u8, u8, u8); 3] = [(129, 140, 248), (167, 139, 250), (34, 211, 238)];
    let max_w = 46u32;
    let max_d = max_w + 5 * 10;

    println!();
    for (y, line) in lines.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            if ch == ' ' {
                print!(" ");
                continue;
            }
            let d = ((x as u32 + y as u32 * 10) * 1000 / max_d).min(1000);
            let (r, g, b) = if d <= 500 {
                lerp_color(stops[0], stops[1], d * 2)
            } else {
                lerp_color(stops[1], stops[2], (d - 500) * 2)
            };
            print!("\x1b[38;2;{};{};{}m{}", r, g, b, ch);
        }
        println!();
    }
    print!("\x1b[0m");

    println!("\x1b[38;2;34;211;238mAsk your warehouse in plain words.\x1b[0m\n");
}

fn lerp_color(a: (u8, u8, u8), b: (u8, u8, u8), t: u32) -> (u8, u8, u8) {
    let r = (a.0 as u32 * (1000 - t) + b.0 as u32 * t) / 1000;
    let g = (a.1 as u32 * (1000 - t) + b.1 as u32 * t) / 1000;
    let b_val = (a.2 as u32 * (1000 - t) + b.2 as u32 * t) / 1000;
    (r as u8, g as u8, b_val as u8)
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_CELL_WIDTH {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_CELL_WIDTH - 1).collect();
    clipped.push('…');
    clipped
}

/// Plain-text table of the first `max_rows` records.
pub fn format_result_table(result: &ResultSet, max_rows: usize) -> String {
    if result.column_metadata.is_empty() {
        return "(no result set)".to_string();
    }
    let header: Vec<String> = result.column_metadata.iter().map(|c| clip(&c.name)).collect();
    let rows: Vec<Vec<String>> = result
        .records
        .iter()
        .take(max_rows)
        .map(|row| row.iter().map(|cell| clip(&cell.to_string())).collect())
        .collect();

    let mut widths: Vec<usize> = header.iter().map(|h| h.chars().count()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.chars().count());
            }
        }
    }

    let render = |cells: &[String]| {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths.get(i).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    let mut out = vec![render(&header)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.extend(rows.iter().map(|row| render(row)));
    let total = result.total_num_rows.max(result.records.len() as u64);
    if (rows.len() as u64) < total {
        out.push(format!("… {} of {} rows shown", rows.len(), total));
    }
    out.join("\n")
}

pub fn print_result_table(result: &ResultSet) {
    println!("{}", format_result_table(result, TABLE_PREVIEW_ROWS));
}

pub fn print_envelope(envelope: &Envelope) {
    match envelope {
        Envelope::Success {
            query,
            result,
            insights,
        } => {
            println!("\n{} {}", DATABASE, style("Query").bold());
            println!("{}\n", style(query).cyan());
            print_result_table(result);
            println!("\n{} {}", SPARKLE, style("Insights").bold());
            println!("{}", insights);
        }
        Envelope::Error {
            error,
            error_type,
            query,
        } => {
            print_error(&format!("{} ({})", error, error_type.as_str()));
            if let Some(query) = query {
                print_status("Query", query);
            }
        }
    }
}

pub fn print_intent_response(response: &IntentResponse) {
    match response {
        IntentResponse::Query { envelope } => print_envelope(envelope),
        IntentResponse::Sql { query } => {
            println!("\n{} {}", DATABASE, style("Generated SQL").bold());
            println!("{}", style(query).cyan());
        }
        IntentResponse::Chat { content } => println!("\n{}", content),
        IntentResponse::Clarification { clarification } => {
            print_warn(&format!("Missing information: {}", clarification.missing_info));
            for question in &clarification.questions {
                println!("  {} {}", QUESTION, question);
            }
        }
    }
}

pub fn print_goodbye() {
    println!(
        "\n{} {}",
        SPARKLE,
        style("Thanks for using querybrain.").bold().cyan()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CellValue, ColumnMetadata};

    fn sample(rows: i64) -> ResultSet {
        ResultSet {
            column_metadata: vec![
                ColumnMetadata {
                    name: "site".to_string(),
                    type_name: "varchar".to_string(),
                },
                ColumnMetadata {
                    name: "temp".to_string(),
                    type_name: "float8".to_string(),
                },
            ],
            records: (0..rows)
                .map(|i| vec![CellValue::String(format!("s{}", i)), CellValue::Null])
                .collect(),
            total_num_rows: rows as u64,
        }
    }

    #[test]
    fn table_aligns_columns_and_prints_nulls() {
        let table = format_result_table(&sample(2), 10);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[0], "site | temp");
        assert_eq!(lines[1], "-----+-----");
        assert_eq!(lines[2], "s0   | NULL");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn table_notes_elided_rows() {
        let table = format_result_table(&sample(5), 2);
        assert!(table.ends_with("… 2 of 5 rows shown"));
    }

    #[test]
    fn long_cells_are_clipped() {
        let clipped = clip(&"x".repeat(100));
        assert_eq!(clipped.chars().count(), MAX_CELL_WIDTH);
        assert!(clipped.ends_with('…'));
    }

    #[test]
    fn empty_result_has_placeholder() {
        assert_eq!(format_result_table(&ResultSet::empty(), 5), "(no result set)");
    }
}
