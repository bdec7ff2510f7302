//! Minimal CSV row handling for the log files.
//!
//! Fields containing a delimiter, quote or line break are quoted, with
//! embedded quotes doubled. Rows end with `\n`.

use std::borrow::Cow;

/// Quote a field if needed.
pub fn escape_field(field: &str) -> Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", field.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(field)
    }
}

/// Join fields into one terminated row.
pub fn format_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut row = fields
        .iter()
        .map(|f| escape_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push('\n');
    row
}

/// Split one row into fields, undoing [`escape_field`].
///
/// Rows are expected on a single line; a trailing `\r\n` or `\n` is ignored.
pub fn parse_row(line: &str) -> Vec<String> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.is_empty() => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_fields_unquoted() {
        assert_eq!(format_row(&["1.000", "abc", "2", "3.5"]), "1.000,abc,2,3.5\n");
    }

    #[test]
    fn test_special_fields_quoted() {
        assert_eq!(escape_field("(1.0, 2.0)"), "\"(1.0, 2.0)\"");
        assert_eq!(escape_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_parse_quoted_row() {
        let row = format_row(&["1.500", "s1", "2", "(1.0, 2.0)", "a \"b\""]);
        assert_eq!(
            parse_row(&row),
            vec!["1.500", "s1", "2", "(1.0, 2.0)", "a \"b\""]
        );
    }

    #[test]
    fn test_parse_empty_trailing_field() {
        assert_eq!(parse_row("1.000,s1,2,\r\n"), vec!["1.000", "s1", "2", ""]);
    }
}
