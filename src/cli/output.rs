//! Output formatting utilities for CLI

use std::io::IsTerminal;

use serde::Serialize;

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print a serializable value as JSON or use custom text formatter
pub fn print_formatted<T, F>(value: &T, format: OutputFormat, text_formatter: F)
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Text => println!("{}", text_formatter(value)),
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string_pretty(value) {
                println!("{}", json);
            }
        }
    }
}

/// Print a success message (suppressed in quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

/// Print an error message (never suppressed)
pub fn print_error(message: &str) {
    eprintln!("Error: {}", message);
}

/// Print a status line with a check mark or X
pub fn status_line(ok: bool, message: &str) -> String {
    if ok {
        format!("[OK] {}", message)
    } else {
        format!("[  ] {}", message)
    }
}

/// Live progress is drawn on stderr only for interactive text output
pub fn should_show_progress(quiet: bool, format: OutputFormat) -> bool {
    !quiet && format == OutputFormat::Text && std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        assert_eq!(status_line(true, "valid"), "[OK] valid");
        assert_eq!(status_line(false, "missing"), "[  ] missing");
    }

    #[test]
    fn test_no_progress_for_json_or_quiet() {
        assert!(!should_show_progress(false, OutputFormat::Json));
        assert!(!should_show_progress(true, OutputFormat::Text));
    }
}
