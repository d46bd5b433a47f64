//! Rendering of query reports

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use comfy_table::presets::NOTHING;
use comfy_table::{Table, TableComponent};

use crate::query::{base_name, Comparison, Mode, Report};
use crate::Header;

pub const NO_MATCHING_FILES: &str = "No matching files found";

/// An ASCII table with a single rule under the header and no rules between rows
fn table() -> Table {
    use TableComponent::*;

    let mut table = Table::new();
    table.load_preset(NOTHING);
    for (component, character) in [
        (LeftBorder, '|'),
        (RightBorder, '|'),
        (VerticalLines, '|'),
        (TopBorder, '-'),
        (BottomBorder, '-'),
        (HeaderLines, '-'),
        (LeftHeaderIntersection, '+'),
        (RightHeaderIntersection, '+'),
        (MiddleHeaderIntersections, '+'),
        (TopBorderIntersections, '+'),
        (BottomBorderIntersections, '+'),
        (TopLeftCorner, '+'),
        (TopRightCorner, '+'),
        (BottomLeftCorner, '+'),
        (BottomRightCorner, '+'),
    ] {
        table.set_style(component, character);
    }
    table
}

pub fn render_header(header: &Header) -> String {
    let mut table = table();
    table.set_header(vec!["Header Keyword", "Value"]);
    for (key, value) in header.entries() {
        table.add_row(vec![key.to_string(), value.to_string()]);
    }
    format!(
        "\n\nDisplaying full header {}\n\n\n{}",
        base_name(header.path()),
        table
    )
}

pub fn render_comparison(comparison: &Comparison) -> String {
    let mut table = table();
    let mut columns = vec![String::from("Filename")];
    columns.extend(comparison.keys.iter().cloned());
    table.set_header(columns);
    for row in &comparison.rows {
        let mut cells = vec![row.file_name.clone()];
        cells.extend(
            row.values
                .iter()
                .map(|value| value.as_ref().map(ToString::to_string).unwrap_or_default()),
        );
        table.add_row(cells);
    }
    table.to_string()
}

pub fn no_matching_entries(keywords: &[String]) -> String {
    let plural = if keywords.len() > 1 { "s" } else { "" };
    format!(
        "\nNo matching entries found for header keyword{}: {}\n",
        plural,
        keywords.join(", ")
    )
}

pub fn render_matches(matches: &[PathBuf]) -> String {
    if matches.is_empty() {
        return NO_MATCHING_FILES.to_string();
    }
    matches
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

/// The text printed for `report`; `pattern` is the expanded glob pattern
pub fn render(report: &Report, mode: &Mode, pattern: &str) -> String {
    match report {
        Report::Matches(matches) => render_matches(matches),
        Report::Header(header) => render_header(header),
        Report::Comparison(comparison) if comparison.is_empty() => match mode {
            Mode::Compare(keywords) => no_matching_entries(keywords),
            _ => no_matching_entries(&[]),
        },
        Report::Comparison(comparison) => render_comparison(comparison),
        Report::NoFiles => format!("No files found matching {}", pattern),
    }
}

/// Write one path per line
pub fn write_matches(outfile: &Path, matches: &[PathBuf]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(outfile)?);
    for path in matches {
        writeln!(writer, "{}", path.display())?;
    }
    writer.flush()
}
