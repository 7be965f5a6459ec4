//! Terminal rendering for query results and errors.
//!
//! Results print to stdout in the selected format; errors print to stderr
//! in Markdown mode (with a distinguishing glyph) but to stdout as JSON so
//! scripted consumers always receive parseable output.

use colored::Colorize;
use librovore_core::{ErrorResponse, Render};

use crate::cli::OutputFormat;

/// Print a successful result in the selected format.
pub fn emit_result(result: &dyn Render, format: OutputFormat, reveal_internals: bool) {
    match format {
        OutputFormat::Json => {
            let value = result.render_as_json(reveal_internals);
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            );
        },
        OutputFormat::Markdown => {
            for line in result.render_as_markdown(reveal_internals) {
                println!("{line}");
            }
        },
    }
}

/// Print an error response in the selected format.
pub fn emit_error(response: &ErrorResponse, format: OutputFormat, reveal_internals: bool) {
    match format {
        OutputFormat::Json => {
            let value = response.render_as_json(reveal_internals);
            println!(
                "{}",
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            );
        },
        OutputFormat::Markdown => {
            let glyph = "✗".red().bold();
            for (index, line) in response.render_as_markdown(reveal_internals).iter().enumerate() {
                if index == 0 {
                    eprintln!("{glyph} {line}");
                } else {
                    eprintln!("  {line}");
                }
            }
        },
    }
}
