//! Client-side placeholder interpolation.
//!
//! Statements are sent over the text protocol, so parameters are rendered as
//! escaped SQL literals before the command packet is built. Placeholders that
//! appear inside string literals or quoted identifiers are left untouched.

use crate::value::Value;
use std::fmt::Write as _;

/// Which placeholder syntax a dialect uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`, substituted left to right (MySQL family)
    QuestionMark,
    /// `$1`, `$2`, ... referencing parameters by position (Postgres family)
    Dollar,
}

/// How string literals are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralStyle {
    /// Backslash is an escape character inside `'...'`
    Backslash,
    /// Standard-conforming strings; backslashes need an `E'...'` literal
    Standard,
}

/// Render one value as a SQL literal.
///
/// Non-finite floats become `NULL`, booleans `TRUE`/`FALSE`.
pub fn format_value_for_sql(value: &Value, style: LiteralStyle) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_finite() {
                f.to_string()
            } else {
                "NULL".to_string()
            }
        }
        Value::Text(s) => escape_string(s, style),
        Value::Bytes(b) => escape_bytes(b, style),
    }
}

fn escape_string(s: &str, style: LiteralStyle) -> String {
    let mut result = String::with_capacity(s.len() + 3);
    match style {
        LiteralStyle::Backslash => {
            result.push('\'');
            for ch in s.chars() {
                match ch {
                    '\'' => result.push_str("''"),
                    '\\' => result.push_str("\\\\"),
                    '\0' => result.push_str("\\0"),
                    '\n' => result.push_str("\\n"),
                    '\r' => result.push_str("\\r"),
                    '\x1a' => result.push_str("\\Z"),
                    _ => result.push(ch),
                }
            }
        }
        LiteralStyle::Standard => {
            if s.contains('\\') {
                result.push('E');
            }
            result.push('\'');
            for ch in s.chars() {
                match ch {
                    '\'' => result.push_str("''"),
                    '\\' => result.push_str("\\\\"),
                    _ => result.push(ch),
                }
            }
        }
    }
    result.push('\'');
    result
}

fn escape_bytes(data: &[u8], style: LiteralStyle) -> String {
    let mut result = String::with_capacity(data.len() * 2 + 12);
    match style {
        LiteralStyle::Backslash => result.push_str("X'"),
        LiteralStyle::Standard => result.push_str("'\\x"),
    }
    for byte in data {
        let _ = write!(result, "{byte:02X}");
    }
    result.push('\'');
    if style == LiteralStyle::Standard {
        result.push_str("::bytea");
    }
    result
}

/// Substitute placeholders in `sql` with escaped literals.
///
/// Unmatched placeholders (too few parameters, `$0`, out-of-range `$n`) are
/// left in place so the server reports them.
pub fn interpolate_params(
    sql: &str,
    params: &[Value],
    placeholders: PlaceholderStyle,
    literals: LiteralStyle,
) -> String {
    if params.is_empty() {
        return sql.to_string();
    }

    let mut result = String::with_capacity(sql.len() + params.len() * 20);
    let mut chars = sql.chars().peekable();
    let mut param_index = 0;

    while let Some(ch) = chars.next() {
        match ch {
            '?' if placeholders == PlaceholderStyle::QuestionMark => {
                if let Some(value) = params.get(param_index) {
                    result.push_str(&format_value_for_sql(value, literals));
                    param_index += 1;
                } else {
                    result.push('?');
                }
            }
            '$' if placeholders == PlaceholderStyle::Dollar => {
                let mut num_str = String::new();
                while let Some(&next_ch) = chars.peek() {
                    if next_ch.is_ascii_digit() {
                        num_str.push(next_ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match num_str.parse::<usize>() {
                    Ok(n) if n > 0 && n <= params.len() => {
                        result.push_str(&format_value_for_sql(&params[n - 1], literals));
                    }
                    _ => {
                        result.push('$');
                        result.push_str(&num_str);
                    }
                }
            }
            // Quoted regions: string literals and identifiers, with doubled-quote escapes
            '\'' | '"' | '`' => {
                result.push(ch);
                while let Some(next_ch) = chars.next() {
                    result.push(next_ch);
                    if next_ch == '\\' && ch == '\'' && literals == LiteralStyle::Backslash {
                        if let Some(escaped) = chars.next() {
                            result.push(escaped);
                        }
                        continue;
                    }
                    if next_ch == ch {
                        if chars.peek() == Some(&ch) {
                            result.push(ch);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mysql(sql: &str, params: &[Value]) -> String {
        interpolate_params(
            sql,
            params,
            PlaceholderStyle::QuestionMark,
            LiteralStyle::Backslash,
        )
    }

    fn pg(sql: &str, params: &[Value]) -> String {
        interpolate_params(sql, params, PlaceholderStyle::Dollar, LiteralStyle::Standard)
    }

    #[test]
    fn test_format_value() {
        let b = LiteralStyle::Backslash;
        assert_eq!(format_value_for_sql(&Value::Null, b), "NULL");
        assert_eq!(format_value_for_sql(&Value::Int(42), b), "42");
        assert_eq!(format_value_for_sql(&Value::Float(1.5), b), "1.5");
        assert_eq!(format_value_for_sql(&Value::Float(f64::NAN), b), "NULL");
        assert_eq!(format_value_for_sql(&Value::Float(f64::INFINITY), b), "NULL");
        assert_eq!(format_value_for_sql(&Value::Bool(true), b), "TRUE");
        assert_eq!(format_value_for_sql(&Value::Bool(false), b), "FALSE");
        assert_eq!(
            format_value_for_sql(&Value::Bytes(vec![0xde, 0xad]), b),
            "X'DEAD'"
        );
    }

    #[test]
    fn test_escape_string() {
        let b = LiteralStyle::Backslash;
        assert_eq!(escape_string("it's", b), "'it''s'");
        assert_eq!(escape_string("a\\b", b), "'a\\\\b'");
        assert_eq!(escape_string("line\nbreak", b), "'line\\nbreak'");

        let s = LiteralStyle::Standard;
        assert_eq!(escape_string("it's", s), "'it''s'");
        assert_eq!(escape_string("a\\b", s), "E'a\\\\b'");
    }

    #[test]
    fn test_question_mark_placeholders() {
        let sql = mysql(
            "SELECT * FROM users WHERE id = ? AND name = ?",
            &[Value::Int(1), Value::Text("O'Brien".to_string())],
        );
        assert_eq!(sql, "SELECT * FROM users WHERE id = 1 AND name = 'O''Brien'");
    }

    #[test]
    fn test_question_mark_inside_literal_untouched() {
        let sql = mysql("SELECT '?', `a?b`, ? FROM t", &[Value::Int(7)]);
        assert_eq!(sql, "SELECT '?', `a?b`, 7 FROM t");
    }

    #[test]
    fn test_escaped_quote_inside_literal() {
        let sql = mysql("SELECT 'it\\'s ?', ?", &[Value::Int(1)]);
        assert_eq!(sql, "SELECT 'it\\'s ?', 1");
    }

    #[test]
    fn test_too_few_params_leaves_placeholder() {
        assert_eq!(mysql("SELECT ?, ?", &[Value::Int(1)]), "SELECT 1, ?");
    }

    #[test]
    fn test_dollar_placeholders() {
        let sql = pg(
            "SELECT $2, $1, $1 WHERE x = '$1'",
            &[Value::Text("a".to_string()), Value::Bool(false)],
        );
        assert_eq!(sql, "SELECT FALSE, 'a', 'a' WHERE x = '$1'");
    }

    #[test]
    fn test_dollar_out_of_range() {
        assert_eq!(pg("SELECT $3, $0", &[Value::Int(1)]), "SELECT $3, $0");
    }

    #[test]
    fn test_styles_do_not_mix() {
        assert_eq!(pg("SELECT ?", &[Value::Int(1)]), "SELECT ?");
        assert_eq!(mysql("SELECT $1", &[Value::Int(1)]), "SELECT $1");
    }
}
