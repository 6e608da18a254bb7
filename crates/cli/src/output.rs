//! Rendering of scenario listings and run results

use std::fmt::Write as _;

use anyhow::Result;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Bordered table for terminals
    #[default]
    Table,
    /// Pretty-printed JSON array
    Json,
    /// YAML sequence
    Yaml,
    /// Tab-separated rows with a header line, for shell pipelines
    Plain,
}

/// A row in a scenario or result listing
pub trait Columns {
    fn headers() -> &'static [&'static str];
    fn row(&self) -> Vec<String>;

    /// Whether the row reports a failure; failing rows are highlighted in tables
    fn failed(&self) -> bool {
        false
    }
}

/// Render `items` in `format`; `empty` is printed instead of an empty listing
pub fn render<T: Serialize + Columns>(items: &[T], format: OutputFormat, empty: &str) -> Result<String> {
    if items.is_empty() {
        return Ok(format!("{}\n", empty));
    }

    let rendered = match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(T::headers().iter().copied());

            for item in items {
                let color = if item.failed() { Color::Red } else { Color::Reset };
                table.add_row(item.row().into_iter().map(|value| Cell::new(value).fg(color)));
            }
            format!("{table}\n")
        }
        OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(items)?),
        OutputFormat::Yaml => serde_yaml::to_string(items)?,
        OutputFormat::Plain => {
            let mut out = String::new();
            writeln!(out, "{}", T::headers().join("\t"))?;
            for item in items {
                let row: Vec<String> = item.row().into_iter().map(|v| v.replace(['\t', '\n'], " ")).collect();
                writeln!(out, "{}", row.join("\t"))?;
            }
            out
        }
    };
    Ok(rendered)
}

pub fn print_rows<T: Serialize + Columns>(items: &[T], format: OutputFormat, empty: &str) -> Result<()> {
    print!("{}", render(items, format, empty)?);
    Ok(())
}

pub fn print_pass(message: &str) {
    println!("✓ {}", message);
}

pub fn print_fail(message: &str) {
    eprintln!("✗ {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Line {
        name: &'static str,
        note: &'static str,
    }

    impl Columns for Line {
        fn headers() -> &'static [&'static str] {
            &["Name", "Note"]
        }

        fn row(&self) -> Vec<String> {
            vec![self.name.to_string(), self.note.to_string()]
        }
    }

    #[test]
    fn test_plain_is_tab_separated_with_header() {
        let lines = [
            Line { name: "tribe-dock", note: "ok" },
            Line { name: "stats", note: "two\tcells\nand lines" },
        ];
        let out = render(&lines, OutputFormat::Plain, "none").unwrap();
        assert_eq!(out, "Name\tNote\ntribe-dock\tok\nstats\ttwo cells and lines\n");
    }

    #[test]
    fn test_empty_listing_uses_caller_message() {
        let out = render::<Line>(&[], OutputFormat::Json, "No scenarios matched.").unwrap();
        assert_eq!(out, "No scenarios matched.\n");
    }

    #[test]
    fn test_json_and_yaml_serialize_rows() {
        let lines = [Line { name: "a", note: "b" }];
        let json: serde_json::Value = serde_json::from_str(&render(&lines, OutputFormat::Json, "").unwrap()).unwrap();
        assert_eq!(json[0]["name"], "a");

        let yaml = render(&lines, OutputFormat::Yaml, "").unwrap();
        assert!(yaml.contains("name: a"));
    }
}
