// SPDX-License-Identifier: Apache-2.0

//! Roster CSV decoding.
//!
//! Two encodings are accepted: a raw headerless roster whose first column is
//! the email (rows without an '@' are silently dropped), and a headered
//! import file whose columns are located by case-tolerant name. Decoding is
//! pure; per-row email validation happens later in the import loop so one
//! malformed row never hides its siblings.

use crate::ids::ValidationError;

/// One decoded roster row. The email is kept raw here: the import operation
/// validates it per row and reports failures individually.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRow {
    pub email: String,
    pub username: Option<String>,
}

/// Headerless roster: one record per line, first column is the email. Rows
/// whose first column lacks an '@' are dropped without error.
#[must_use]
pub fn decode_headerless(input: &str) -> Vec<RosterRow> {
    input
        .lines()
        .filter_map(|line| {
            let fields = split_record(line);
            let first = fields.first().map(String::as_str).unwrap_or_default();
            let email = first.trim();
            if email.contains('@') {
                Some(RosterRow {
                    email: email.to_string(),
                    username: None,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Headered import: the first line names the columns. `email`/`Email` is
/// required, `username`/`Username` optional; any column order is accepted
/// because lookup is by name only.
pub fn decode_headered(input: &str) -> Result<Vec<RosterRow>, ValidationError> {
    let mut lines = input.lines();
    let header_line = lines
        .next()
        .ok_or_else(|| ValidationError("empty import file".to_string()))?;
    let header = split_record(header_line);

    let email_col = find_column(&header, "email")
        .ok_or_else(|| ValidationError("import file has no email column".to_string()))?;
    let username_col = find_column(&header, "username");

    let mut rows = Vec::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_record(line);
        let email = fields
            .get(email_col)
            .map(|f| f.trim().to_string())
            .unwrap_or_default();
        let username = username_col
            .and_then(|idx| fields.get(idx))
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty());
        rows.push(RosterRow { email, username });
    }
    Ok(rows)
}

fn find_column(header: &[String], name: &str) -> Option<usize> {
    header
        .iter()
        .position(|col| col.trim().eq_ignore_ascii_case(name))
}

/// Comma splitting with minimal double-quote handling; embedded quotes
/// escape as "".
fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            ',' if !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
