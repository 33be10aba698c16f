//! Parsers for Dokku's text reports.
//!
//! Dokku prints one header line (`=====> ...` or `-----> ...`) followed by
//! detail lines. Three detail shapes recur: `key: value` reports, whitespace
//! separated tables and plain name lists. Headers are validated before any
//! detail line is read.

use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

use crate::error::ParseError;

/// Header markers Dokku prints before report bodies.
const HEADER_MARKERS: [&str; 2] = ["=====>", "----->"];

/// Number of header lines before port rows.
const PORT_TABLE_HEADER_LINES: usize = 2;

/// Number of tokens in a port row (scheme, host port, container port).
const PORT_ROW_TOKENS: usize = 3;

/// Key normalization for key-value reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCase {
    /// Keys are lower-cased (service reports).
    Lower,
    /// Keys are kept as printed (config reports).
    Preserve,
}

/// Splits output into its header and detail lines.
///
/// # Errors
///
/// Returns a parse error if there is no header line, or if it does not start
/// with a Dokku header marker.
pub fn split_header<'a>(
    command: &str,
    output: &'a str,
) -> Result<(&'a str, Vec<&'a str>), ParseError> {
    let mut lines = output.lines();
    let header = lines
        .next()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ParseError::MissingHeader {
            command: command.to_string(),
        })?;

    if !HEADER_MARKERS.iter().any(|m| header.starts_with(m)) {
        return Err(ParseError::UnexpectedHeader {
            command: command.to_string(),
            found: header.to_string(),
        });
    }

    Ok((header, lines.collect()))
}

/// Parses `key: value` lines.
///
/// Each non-blank line is split on its first colon; any further colons stay
/// in the value. Lines without a colon are ignored.
#[must_use]
pub fn parse_key_values<'a, I>(lines: I, case: KeyCase) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    lines
        .into_iter()
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(key, value)| {
            let key = key.trim();
            let key = match case {
                KeyCase::Lower => key.to_lowercase(),
                KeyCase::Preserve => key.to_string(),
            };
            (key, value.trim().to_string())
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Parses a report with a header followed by `key: value` lines.
///
/// # Errors
///
/// Returns a parse error if the header is missing or malformed.
pub fn parse_report(
    command: &str,
    output: &str,
    case: KeyCase,
) -> Result<BTreeMap<String, String>, ParseError> {
    let (_, lines) = split_header(command, output)?;
    Ok(parse_key_values(lines, case))
}

/// Parses a header followed by one name per line, in order.
///
/// # Errors
///
/// Returns a parse error if the header is missing or malformed.
pub fn parse_list(command: &str, output: &str) -> Result<Vec<String>, ParseError> {
    let (_, lines) = split_header(command, output)?;
    Ok(lines
        .into_iter()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Parses a port table into `scheme:hostPort:containerPort` entries.
///
/// Output with fewer lines than the table header is an empty table. Rows that
/// do not have exactly three tokens are dropped with a warning.
///
/// # Errors
///
/// Returns a parse error if the first header line is malformed.
pub fn parse_port_table(command: &str, output: &str) -> Result<BTreeSet<String>, ParseError> {
    if output.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    split_header(command, output)?;

    let mut ports = BTreeSet::new();
    for line in output.lines().skip(PORT_TABLE_HEADER_LINES) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() == PORT_ROW_TOKENS {
            ports.insert(tokens.join(":"));
        } else {
            warn!("Ignoring malformed row in `{command}` output: {}", line.trim());
        }
    }
    Ok(ports)
}

/// Splits a space separated value into its entries.
#[must_use]
pub fn split_words(value: &str) -> Vec<String> {
    value.split_whitespace().map(String::from).collect()
}

/// Splits an `image:tag` reference at its last colon.
///
/// A reference without a tag yields an empty version.
#[must_use]
pub fn split_image(reference: &str) -> (String, String) {
    match reference.trim().rsplit_once(':') {
        Some((image, tag)) if !tag.contains('/') => {
            (image.to_string(), tag.to_string())
        }
        _ => (reference.trim().to_string(), String::new()),
    }
}
