//! Statement scanning and parameter rendering
//!
//! A small lexer splits statement text into segments so that placeholder
//! substitution and write classification never look inside string literals,
//! quoted identifiers or comments.

use crate::error::{QueryError, QuarryResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::CharIndices;

/// Bound parameters, by placeholder name.
pub type QueryParams = BTreeMap<String, Value>;

// ============================================================================
// SCANNER
// ============================================================================

/// Kind of a scanned statement segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Identifier, keyword or bare number.
    Word,
    /// `:name` placeholder. The segment text includes the colon.
    Placeholder,
    /// `'...'` literal.
    StringLiteral,
    /// `"..."` identifier.
    QuotedIdentifier,
    /// `-- ...` or `/* ... */`.
    Comment,
    Whitespace,
    /// Any other punctuation, including `::` casts.
    Symbol,
}

/// A contiguous slice of the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub kind: SegmentKind,
    pub text: &'a str,
}

impl<'a> Segment<'a> {
    /// Placeholder name without the leading colon.
    pub fn placeholder_name(&self) -> Option<&'a str> {
        match self.kind {
            SegmentKind::Placeholder => Some(&self.text[1..]),
            _ => None,
        }
    }
}

/// Iterator over the segments of a statement.
pub struct Scanner<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Scanner<'a> {
    /// Create a scanner over `source`.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn offset(&mut self) -> usize {
        self.chars
            .peek()
            .map(|(i, _)| *i)
            .unwrap_or(self.source.len())
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek_char() {
            if !pred(c) {
                break;
            }
            self.chars.next();
        }
    }

    /// Consume a quoted run whose delimiter is escaped by doubling.
    fn advance_quoted(&mut self, quote: char) {
        while let Some((_, c)) = self.chars.next() {
            if c == quote {
                if self.peek_char() == Some(quote) {
                    self.chars.next();
                } else {
                    return;
                }
            }
        }
    }

    fn advance_block_comment(&mut self) {
        let mut prev = '\0';
        for (_, c) in self.chars.by_ref() {
            if prev == '*' && c == '/' {
                return;
            }
            prev = c;
        }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, c) = self.chars.next()?;

        let kind = match c {
            c if c.is_whitespace() => {
                self.advance_while(char::is_whitespace);
                SegmentKind::Whitespace
            }
            '-' if self.peek_char() == Some('-') => {
                self.advance_while(|c| c != '\n');
                SegmentKind::Comment
            }
            '/' if self.peek_char() == Some('*') => {
                self.chars.next();
                self.advance_block_comment();
                SegmentKind::Comment
            }
            '\'' => {
                self.advance_quoted('\'');
                SegmentKind::StringLiteral
            }
            '"' => {
                self.advance_quoted('"');
                SegmentKind::QuotedIdentifier
            }
            ':' => match self.peek_char() {
                Some(':') => {
                    self.chars.next();
                    SegmentKind::Symbol
                }
                Some(next) if next.is_alphabetic() || next == '_' => {
                    self.advance_while(is_word_char);
                    SegmentKind::Placeholder
                }
                _ => SegmentKind::Symbol,
            },
            c if is_word_start(c) => {
                self.advance_while(is_word_char);
                SegmentKind::Word
            }
            _ => SegmentKind::Symbol,
        };

        let end = self.offset();
        Some(Segment {
            kind,
            text: &self.source[start..end],
        })
    }
}

// ============================================================================
// PARAMETER RENDERING
// ============================================================================

/// Render `:name` placeholders in `statement` as SQL literals.
///
/// With no parameters the statement comes back unchanged. Unused parameters
/// are ignored; a placeholder without a parameter is an error.
pub fn render_named(statement: &str, params: &QueryParams) -> QuarryResult<String> {
    if params.is_empty() {
        return Ok(statement.to_string());
    }

    let mut rendered = String::with_capacity(statement.len());
    for segment in Scanner::new(statement) {
        match segment.placeholder_name() {
            Some(name) => {
                let value = params.get(name).ok_or_else(|| QueryError::MissingParameter {
                    name: name.to_string(),
                })?;
                rendered.push_str(&sql_literal(value));
            }
            None => rendered.push_str(segment.text),
        }
    }
    Ok(rendered)
}

/// Render a JSON value as a SQL literal.
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote_string(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(sql_literal).collect();
            format!("ARRAY[{}]", inner.join(", "))
        }
        Value::Object(_) => quote_string(&value.to_string()),
    }
}

fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuarryError;
    use serde_json::json;

    fn kinds(source: &str) -> Vec<(SegmentKind, &str)> {
        Scanner::new(source).map(|s| (s.kind, s.text)).collect()
    }

    #[test]
    fn test_scanner_covers_whole_input() {
        let source = "SELECT a::int, 'it''s' -- trailing\n/* block */ \"Col\" FROM t WHERE x = :x";
        let rebuilt: String = Scanner::new(source).map(|s| s.text).collect();
        assert_eq!(rebuilt, source);
    }

    #[test]
    fn test_scanner_segments() {
        let segments = kinds("a::int = :v");
        assert_eq!(
            segments,
            vec![
                (SegmentKind::Word, "a"),
                (SegmentKind::Symbol, "::"),
                (SegmentKind::Word, "int"),
                (SegmentKind::Whitespace, " "),
                (SegmentKind::Symbol, "="),
                (SegmentKind::Whitespace, " "),
                (SegmentKind::Placeholder, ":v"),
            ]
        );
    }

    #[test]
    fn test_scanner_unterminated_literal_runs_to_end() {
        let segments = kinds("'open");
        assert_eq!(segments, vec![(SegmentKind::StringLiteral, "'open")]);
    }

    #[test]
    fn test_render_without_params_is_identity() {
        let statement = "SELECT ':not_a_param', x::text FROM t";
        assert_eq!(render_named(statement, &QueryParams::new()).unwrap(), statement);
    }

    #[test]
    fn test_render_named_values() {
        let params = QueryParams::from([
            ("name".to_string(), json!("O'Brien")),
            ("age".to_string(), json!(42)),
            ("active".to_string(), json!(true)),
            ("gone".to_string(), Value::Null),
            ("ids".to_string(), json!([1, 2])),
        ]);
        let rendered = render_named(
            "SELECT * FROM p WHERE name = :name AND age > :age AND active = :active \
             AND deleted IS :gone AND id = ANY(:ids) AND note = ':name'",
            &params,
        )
        .unwrap();
        assert_eq!(
            rendered,
            "SELECT * FROM p WHERE name = 'O''Brien' AND age > 42 AND active = TRUE \
             AND deleted IS NULL AND id = ANY(ARRAY[1, 2]) AND note = ':name'"
        );
    }

    #[test]
    fn test_render_object_as_json_string() {
        let params = QueryParams::from([("doc".to_string(), json!({"k": "v"}))]);
        let rendered = render_named("SELECT :doc::jsonb", &params).unwrap();
        assert_eq!(rendered, r#"SELECT '{"k":"v"}'::jsonb"#);
    }

    #[test]
    fn test_render_missing_param() {
        let params = QueryParams::from([("a".to_string(), json!(1))]);
        let err = render_named("SELECT :a, :b", &params).unwrap_err();
        assert_eq!(
            err,
            QuarryError::from(QueryError::MissingParameter {
                name: "b".to_string()
            })
        );
    }
}
