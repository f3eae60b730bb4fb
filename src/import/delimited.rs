//! Delimited record parsing.
//!
//! The legacy export is comma-delimited text with a header row, but it is not
//! well-behaved CSV: fields may be quoted (with doubled quotes as escapes),
//! and unquoted fields may embed whole object/array literals whose internal
//! commas must not split the field. The splitter therefore tracks quote state
//! and brace/bracket depth per line and only treats the delimiter as a field
//! separator when quotes are closed and depth is zero.
//!
//! Failed lines never abort a parse. A malformed line (unterminated quote,
//! more fields than the header declares) is skipped and recorded as a
//! warning; a short line is padded with nulls.

use std::sync::Arc;

use thiserror::Error;

pub const DEFAULT_DELIMITER: char = ',';

const QUOTE: char = '"';

/// One parsed row of raw field values, keyed by the (normalized) header row.
///
/// Immutable once created. The header row is shared by every record of one
/// parse. An absent value means the source field was empty or whitespace.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    headers: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Record {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.values.get(idx)?.as_deref()
    }

    /// Iterate `(column, value)` pairs in header order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.headers
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(Option::as_deref))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    fn is_blank(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }
}

/// Result of parsing one delimited block: the records that parsed cleanly
/// plus a warning per line that did not.
#[derive(Debug, Default)]
pub struct ParsedTable {
    pub records: Vec<Record>,
    pub warnings: Vec<String>,
}

/// Errors that can invalidate a single line without aborting the parse.
#[derive(Debug, Error)]
pub enum LineError {
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("line has {found} fields but the header declares {expected}")]
    TooManyFields { found: usize, expected: usize },
}

/// Parse a delimited block whose first non-blank line is the header row.
pub fn parse_table(block: &str, delimiter: char) -> ParsedTable {
    let mut table = ParsedTable::default();
    let mut lines = block
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header_line)) = lines.next() else {
        return table;
    };

    let headers: Vec<String> = match split_fields(header_line, delimiter) {
        Ok(cells) => cells
            .iter()
            .enumerate()
            .map(|(idx, cell)| header_name(cell.as_deref(), idx))
            .collect(),
        Err(err) => {
            let warning = format!("header row unparseable: {err}");
            log::warn!("{warning}");
            table.warnings.push(warning);
            return table;
        }
    };
    let headers: Arc<[String]> = headers.into();

    for (lineno, line) in lines {
        match split_fields(line, delimiter) {
            Ok(mut values) => {
                if values.len() > headers.len() {
                    let warning = format!(
                        "line {}: {}",
                        lineno + 1,
                        LineError::TooManyFields {
                            found: values.len(),
                            expected: headers.len(),
                        }
                    );
                    log::warn!("skipping malformed line: {warning}");
                    table.warnings.push(warning);
                    continue;
                }
                values.resize(headers.len(), None);

                for value in values.iter_mut() {
                    let Some(raw) = value.as_deref() else { continue };
                    if looks_like_literal(raw) {
                        match normalize_literal(raw) {
                            Some(normalized) => *value = Some(normalized),
                            None => log::debug!(
                                "line {}: leaving unrepairable literal verbatim",
                                lineno + 1
                            ),
                        }
                    }
                }

                let record = Record {
                    headers: Arc::clone(&headers),
                    values,
                };
                if record.is_blank() {
                    log::debug!("line {}: skipping blank record", lineno + 1);
                    continue;
                }
                // Concatenated duplicate sections repeat their header row.
                if matches_header(&record) {
                    log::debug!("line {}: skipping repeated header row", lineno + 1);
                    continue;
                }
                table.records.push(record);
            }
            Err(err) => {
                let warning = format!("line {}: {err}", lineno + 1);
                log::warn!("skipping malformed line: {warning}");
                table.warnings.push(warning);
            }
        }
    }

    log::debug!(
        "parsed {} records with {} warnings",
        table.records.len(),
        table.warnings.len()
    );
    table
}

/// Serialize records back to delimited text, quoting where necessary.
/// The header row is taken from the first record.
pub fn write_table(records: &[Record], delimiter: char) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };

    let mut out = String::new();
    let header_cells: Vec<String> = first
        .headers()
        .iter()
        .map(|h| escape_field(h, delimiter))
        .collect();
    out.push_str(&header_cells.join(&delimiter.to_string()));
    out.push('\n');

    for record in records {
        let cells: Vec<String> = record
            .fields()
            .map(|(_, value)| value.map(|v| escape_field(v, delimiter)).unwrap_or_default())
            .collect();
        out.push_str(&cells.join(&delimiter.to_string()));
        out.push('\n');
    }
    out
}

/// Lowercase a header cell and collapse non-alphanumeric runs to `_` so
/// legacy headers like `Client Name` address the column `client_name`.
pub fn normalize_header(raw: &str) -> String {
    let mut name = String::with_capacity(raw.len());
    let mut gap = false;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            name.push(ch.to_ascii_lowercase());
            gap = false;
        } else if !gap && !name.is_empty() {
            name.push('_');
            gap = true;
        }
    }
    while name.ends_with('_') {
        name.pop();
    }
    name
}

fn header_name(cell: Option<&str>, idx: usize) -> String {
    let name = cell.map(normalize_header).unwrap_or_default();
    if name.is_empty() {
        format!("column_{}", idx + 1)
    } else {
        name
    }
}

fn matches_header(record: &Record) -> bool {
    record
        .fields()
        .all(|(name, value)| value.map(|v| normalize_header(v) == *name).unwrap_or(false))
}

/// Split one line into raw field values.
///
/// The delimiter separates fields only when quote state is closed and
/// brace/bracket depth is zero. Wrapping quotes are stripped and doubled
/// quotes unescaped, except inside a brace/bracket literal where quote
/// characters belong to the literal and are preserved verbatim.
fn split_fields(line: &str, delimiter: char) -> Result<Vec<Option<String>>, LineError> {
    let mut fields = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut depth = 0usize;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == QUOTE {
                if chars.peek() == Some(&QUOTE) {
                    chars.next();
                    buf.push(QUOTE);
                    if depth > 0 {
                        buf.push(QUOTE);
                    }
                } else {
                    in_quotes = false;
                    if depth > 0 {
                        buf.push(QUOTE);
                    }
                }
            } else {
                buf.push(ch);
            }
            continue;
        }

        match ch {
            QUOTE => {
                in_quotes = true;
                if depth > 0 {
                    buf.push(QUOTE);
                }
            }
            '{' | '[' => {
                depth += 1;
                buf.push(ch);
            }
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                buf.push(ch);
            }
            c if c == delimiter && depth == 0 => {
                fields.push(finish_field(&mut buf));
            }
            _ => buf.push(ch),
        }
    }

    if in_quotes {
        return Err(LineError::UnterminatedQuote);
    }
    fields.push(finish_field(&mut buf));
    Ok(fields)
}

fn finish_field(buf: &mut String) -> Option<String> {
    let text = buf.trim();
    let out = if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    };
    buf.clear();
    out
}

fn escape_field(value: &str, delimiter: char) -> String {
    if value.contains(delimiter) || value.contains(QUOTE) {
        format!("\"{}\"", value.replace(QUOTE, "\"\""))
    } else {
        value.to_string()
    }
}

fn looks_like_literal(value: &str) -> bool {
    value.starts_with('{') || value.starts_with('[')
}

/// Attempt to turn a loose object/array literal into strict JSON.
///
/// Legacy exports write literals with bare keys and bare string elements
/// (`{name: Acme, seats: 3}`, `[design, billing]`). Bare keys and bare
/// non-numeric elements are quoted, then the result is validated with
/// `serde_json`. Returns `None` when the value is not a literal or cannot
/// be repaired.
pub fn normalize_literal(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if !looks_like_literal(trimmed) {
        return None;
    }
    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Some(trimmed.to_string());
    }
    let repaired = repair_literal(trimmed);
    if serde_json::from_str::<serde_json::Value>(&repaired).is_ok() {
        Some(repaired)
    } else {
        None
    }
}

fn repair_literal(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            '{' | '}' | '[' | ']' | ',' | ':' => {
                out.push(ch);
                i += 1;
            }
            '"' => {
                // Copy a quoted string verbatim, honoring escapes.
                out.push('"');
                i += 1;
                while i < chars.len() {
                    let c = chars[i];
                    out.push(c);
                    i += 1;
                    if c == '\\' {
                        if i < chars.len() {
                            out.push(chars[i]);
                            i += 1;
                        }
                    } else if c == '"' {
                        break;
                    }
                }
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            _ => {
                let start = i;
                while i < chars.len() && !matches!(chars[i], ',' | ':' | '{' | '}' | '[' | ']') {
                    i += 1;
                }
                let token: String = chars[start..i].iter().collect();
                let token = token.trim();
                let is_key = chars.get(i) == Some(&':');
                if token.is_empty() {
                    // whitespace run already emitted above
                } else if !is_key && is_bare_json_scalar(token) {
                    out.push_str(token);
                } else {
                    out.push('"');
                    out.push_str(token);
                    out.push('"');
                }
            }
        }
    }
    out
}

fn is_bare_json_scalar(token: &str) -> bool {
    matches!(token, "true" | "false" | "null") || token.parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(block: &str) -> ParsedTable {
        parse_table(block, DEFAULT_DELIMITER)
    }

    #[test]
    fn test_splits_simple_fields() {
        let table = parse("name,email\nAcme,a@x.com\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].get("name"), Some("Acme"));
        assert_eq!(table.records[0].get("email"), Some("a@x.com"));
        assert!(table.warnings.is_empty());
    }

    #[test]
    fn test_commas_inside_quotes_do_not_split() {
        let table = parse("name,email\n\"Acme, Inc., Ltd.\",a@x.com\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].get("name"), Some("Acme, Inc., Ltd."));
        assert_eq!(table.records[0].get("email"), Some("a@x.com"));
    }

    #[test]
    fn test_doubled_quote_is_literal_quote() {
        let table = parse("note\n\"she said \"\"hi\"\"\"\n");
        assert_eq!(table.records[0].get("note"), Some("she said \"hi\""));
    }

    #[test]
    fn test_braced_literal_stays_one_field() {
        let table = parse("name,meta,email\nAcme,{\"seats\": 3, \"tier\": \"pro\"},a@x.com\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(
            table.records[0].get("meta"),
            Some("{\"seats\": 3, \"tier\": \"pro\"}")
        );
        assert_eq!(table.records[0].get("email"), Some("a@x.com"));
    }

    #[test]
    fn test_bracketed_literal_stays_one_field() {
        let table = parse("name,tags\nAcme,\"[\"\"design\"\", \"\"billing\"\"]\"\n");
        assert_eq!(table.records[0].get("tags"), Some("[\"design\", \"billing\"]"));
    }

    #[test]
    fn test_short_line_pads_with_null() {
        let table = parse("a,b,c\n1,2\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].get("a"), Some("1"));
        assert_eq!(table.records[0].get("b"), Some("2"));
        assert_eq!(table.records[0].get("c"), None);
    }

    #[test]
    fn test_long_line_is_skipped_with_warning() {
        let table = parse("a,b\n1,2,3\n4,5\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].get("a"), Some("4"));
        assert_eq!(table.warnings.len(), 1);
        assert!(table.warnings[0].contains("3 fields"));
    }

    #[test]
    fn test_unterminated_quote_is_skipped_with_warning() {
        let table = parse("a,b\n\"open,2\nok,3\n");
        assert_eq!(table.records.len(), 1);
        assert_eq!(table.records[0].get("a"), Some("ok"));
        assert_eq!(table.warnings.len(), 1);
        assert!(table.warnings[0].contains("unterminated"));
    }

    #[test]
    fn test_empty_field_is_null_not_empty_string() {
        let table = parse("a,b,c\n1,,3\n");
        assert_eq!(table.records[0].get("b"), None);
    }

    #[test]
    fn test_fields_are_trimmed() {
        let table = parse("a,b\n  1 ,  hi there  \n");
        assert_eq!(table.records[0].get("a"), Some("1"));
        assert_eq!(table.records[0].get("b"), Some("hi there"));
    }

    #[test]
    fn test_blank_records_are_dropped() {
        let table = parse("a,b\n,,\n1,2\n");
        assert_eq!(table.records.len(), 1);
    }

    #[test]
    fn test_headers_are_normalized() {
        let table = parse("Client Name,Billing Rate ($/hr)\nAcme,50\n");
        assert_eq!(table.records[0].get("client_name"), Some("Acme"));
        assert_eq!(table.records[0].get("billing_rate_hr"), Some("50"));
    }

    #[test]
    fn test_repeated_header_row_is_dropped() {
        let table = parse("name,email\nAcme,a@x.com\nname,email\nGlobex,g@x.com\n");
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[1].get("name"), Some("Globex"));
    }

    #[test]
    fn test_loose_literal_is_repaired_to_strict_json() {
        let table = parse("name,meta\nAcme,{tier: pro, seats: 3}\n");
        let meta = table.records[0].get("meta").unwrap();
        let value: serde_json::Value = serde_json::from_str(meta).expect("repaired literal parses");
        assert_eq!(value["tier"], "pro");
        assert_eq!(value["seats"], 3);
    }

    #[test]
    fn test_normalize_literal_repairs_bare_array_elements() {
        let repaired = normalize_literal("[design, billing, 3]").unwrap();
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value[0], "design");
        assert_eq!(value[1], "billing");
        assert_eq!(value[2], 3);
    }

    #[test]
    fn test_normalize_literal_keeps_strict_json_as_is() {
        assert_eq!(
            normalize_literal("{\"a\": 1}").as_deref(),
            Some("{\"a\": 1}")
        );
    }

    #[test]
    fn test_normalize_literal_rejects_non_literals() {
        assert_eq!(normalize_literal("plain text"), None);
    }

    #[test]
    fn test_normalize_header() {
        assert_eq!(normalize_header("Client Name"), "client_name");
        assert_eq!(normalize_header("  hours (billable)  "), "hours_billable");
        assert_eq!(normalize_header("already_fine"), "already_fine");
    }

    #[test]
    fn test_round_trip_is_stable_for_simple_fields() {
        let source = "name,email,phone\nAcme,a@x.com,555-0100\n\"Globex, Corp.\",g@x.com,\nInitech,,555-0199\n";
        let first = parse(source);
        let rewritten = write_table(&first.records, DEFAULT_DELIMITER);
        let second = parse(&rewritten);
        assert_eq!(first.records, second.records);
    }
}
