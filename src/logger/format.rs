//! Log formatting and output with ANSI colors and text wrapping
//!
//! Handles:
//! - Colorized console output with tag and level formatting
//! - Text wrapping at word boundaries
//! - Broken pipe handling for piped commands

use super::tags::LogTag;
use chrono::Local;
use colored::*;
use std::io::{stdout, ErrorKind, Write};

/// Log format widths for alignment
const TAG_WIDTH: usize = 8;
const LOG_TYPE_WIDTH: usize = 10;
const BRACKET_SPACE_WIDTH: usize = 3;
const TOTAL_PREFIX_WIDTH: usize = TAG_WIDTH + LOG_TYPE_WIDTH + BRACKET_SPACE_WIDTH * 2;

/// Maximum line length before wrapping
const MAX_LINE_LENGTH: usize = 145;

/// Format and output a log message
pub fn format_and_log(tag: LogTag, log_type: &str, message: &str) {
    let now = Local::now();
    let time = now.format("%H:%M:%S").to_string();
    let prefix = format!("{} ", time).dimmed().to_string();

    let tag_str = format_tag(&tag);
    let log_type_str = format_log_type(log_type);

    let base_line = format!("{}[{}] [{}] ", prefix, tag_str, log_type_str);

    let base_length = strip_ansi_codes(&base_line)
        .len()
        .max(TOTAL_PREFIX_WIDTH + strip_ansi_codes(&prefix).len());
    let available_space = if MAX_LINE_LENGTH > base_length {
        MAX_LINE_LENGTH - base_length
    } else {
        50
    };

    // Split message into chunks that fit
    let message_chunks = wrap_text(message, available_space);

    // Print first line
    print_stdout_safe(&format!("{}{}", base_line, message_chunks[0]));

    // Print continuation lines
    if message_chunks.len() > 1 {
        let continuation_prefix = format!(
            "{}{}",
            " ".repeat(strip_ansi_codes(&prefix).len()),
            " ".repeat(TOTAL_PREFIX_WIDTH)
        );
        for chunk in &message_chunks[1..] {
            print_stdout_safe(&format!("{}{}", continuation_prefix, chunk));
        }
    }
}

/// Format a tag with fixed width and per-tag color
fn format_tag(tag: &LogTag) -> String {
    let padded = format!("{:<width$}", tag.as_str(), width = TAG_WIDTH);
    match tag {
        LogTag::Channel => padded.cyan().to_string(),
        LogTag::Config => padded.yellow().to_string(),
        LogTag::System => padded.green().to_string(),
    }
}

/// Format a log type with fixed width and severity color
fn format_log_type(log_type: &str) -> String {
    let padded = format!("{:<width$}", log_type, width = LOG_TYPE_WIDTH);
    match log_type {
        "ERROR" => padded.red().bold().to_string(),
        "WARNING" => padded.yellow().bold().to_string(),
        "INFO" => padded.normal().to_string(),
        "DEBUG" => padded.blue().to_string(),
        "VERBOSE" => padded.dimmed().to_string(),
        _ => padded.normal().to_string(),
    }
}

/// Wrap text at word boundaries into chunks of at most max_length
fn wrap_text(text: &str, max_length: usize) -> Vec<String> {
    if text.len() <= max_length {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= max_length {
            current.push(' ');
            current.push_str(word);
        } else {
            chunks.push(current);
            current = word.to_string();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }

    chunks
}

/// Remove ANSI escape sequences for width calculations
fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            // Skip until the terminating letter of the escape sequence
            for esc in chars.by_ref() {
                if esc.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}

/// Print to stdout, ignoring broken pipes (e.g. when piped to head)
fn print_stdout_safe(line: &str) {
    let mut out = stdout();
    if let Err(e) = writeln!(out, "{}", line) {
        if e.kind() == ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
    }
}
