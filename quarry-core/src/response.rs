//! Normalized tabular query results

use crate::error::{QuarryResult, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// One result record, keyed by field name.
pub type Row = BTreeMap<String, Value>;

/// Timing metrics in seconds, keyed by metric name.
pub type Profiling = BTreeMap<String, f64>;

/// Profiling key for statement execution time.
pub const EXECUTE_TIME: &str = "execute_time";

/// Profiling key for commit time.
pub const COMMIT_TIME: &str = "commit_time";

/// Rows shown by the preview helpers when the caller has no preference.
pub const DEFAULT_PREVIEW_ROWS: usize = 10;

/// Run `f` and return its result with the elapsed wall time in seconds.
pub fn timed<T, E>(f: impl FnOnce() -> Result<T, E>) -> Result<(T, f64), E> {
    let start = Instant::now();
    let value = f()?;
    Ok((value, start.elapsed().as_secs_f64()))
}

// ============================================================================
// FIELDS
// ============================================================================

/// Type descriptor for one field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Semantic type name, e.g. `integer` or `string`.
    #[serde(rename = "type")]
    pub field_type: String,
}

impl FieldDescriptor {
    pub fn new(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
        }
    }
}

/// Ordered mapping from field name to descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Fields(Vec<(String, FieldDescriptor)>);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field, replacing the type of an existing field with the same name.
    pub fn with_field(mut self, name: impl Into<String>, field_type: impl Into<String>) -> Self {
        self.insert(name, field_type);
        self
    }

    /// Insert a field, keeping the original position of an existing name.
    pub fn insert(&mut self, name: impl Into<String>, field_type: impl Into<String>) {
        let name = name.into();
        let descriptor = FieldDescriptor::new(field_type);
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = descriptor,
            None => self.0.push((name, descriptor)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Field names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.0.iter().map(|(name, descriptor)| (name.as_str(), descriptor))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Fields
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, field_type) in iter {
            fields.insert(name, field_type);
        }
        fields
    }
}

// ============================================================================
// QUERY RESPONSE
// ============================================================================

/// Normalized result of a query.
///
/// Immutable once built. Every row carries exactly the keys named by
/// `fields`, in engine result order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    rows: Vec<Row>,
    fields: Fields,
    profiling: Profiling,
}

impl QueryResponse {
    /// Build a response from keyed rows.
    ///
    /// Fails when any row's key set differs from the field names.
    pub fn new(rows: Vec<Row>, fields: Fields, profiling: Profiling) -> QuarryResult<Self> {
        let mut expected: Vec<String> = fields.names().map(str::to_string).collect();
        expected.sort();

        for (index, row) in rows.iter().enumerate() {
            // Row keys are sorted by construction.
            let matches = row.len() == expected.len()
                && row.keys().zip(expected.iter()).all(|(a, b)| a == b);
            if !matches {
                return Err(ValidationError::RowShapeMismatch {
                    row: index,
                    expected,
                    found: row.keys().cloned().collect(),
                }
                .into());
            }
        }

        Ok(Self {
            rows,
            fields,
            profiling,
        })
    }

    /// Build a response from positional rows, zipped with the field order.
    pub fn from_positional(
        rows: Vec<Vec<Value>>,
        fields: Fields,
        profiling: Profiling,
    ) -> QuarryResult<Self> {
        let names: Vec<String> = fields.names().map(str::to_string).collect();
        let mut keyed = Vec::with_capacity(rows.len());

        for (index, values) in rows.into_iter().enumerate() {
            if values.len() != names.len() {
                return Err(ValidationError::RowArity {
                    row: index,
                    expected: names.len(),
                    found: values.len(),
                }
                .into());
            }
            keyed.push(names.iter().cloned().zip(values).collect::<Row>());
        }

        Self::new(keyed, fields, profiling)
    }

    /// A response with no rows and no fields.
    pub fn empty(profiling: Profiling) -> Self {
        Self {
            rows: Vec::new(),
            fields: Fields::new(),
            profiling,
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn profiling(&self) -> &Profiling {
        &self.profiling
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Render the first `n` rows as a fixed-width table.
    pub fn preview_top(&self, n: usize) -> String {
        let end = n.min(self.rows.len());
        self.render(&self.rows[..end])
    }

    /// Render the last `n` rows, in original order, as a fixed-width table.
    pub fn preview_bottom(&self, n: usize) -> String {
        let start = self.rows.len().saturating_sub(n);
        self.render(&self.rows[start..])
    }

    /// Header line, dash separator, then one line per row. Column widths are
    /// computed over the header and the rows being shown only.
    fn render(&self, rows: &[Row]) -> String {
        if self.fields.is_empty() {
            return String::new();
        }

        let names: Vec<&str> = self.fields.names().collect();
        let cells: Vec<Vec<String>> = rows
            .iter()
            .map(|row| names.iter().map(|name| render_cell(row.get(*name))).collect())
            .collect();

        let widths: Vec<usize> = names
            .iter()
            .enumerate()
            .map(|(column, name)| {
                cells
                    .iter()
                    .map(|line| line[column].chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let separators: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();

        let mut out = String::new();
        push_line(&mut out, names.iter().copied(), &widths);
        push_line(&mut out, separators.iter().map(String::as_str), &widths);
        for line in &cells {
            push_line(&mut out, line.iter().map(String::as_str), &widths);
        }
        out
    }
}

impl fmt::Display for QueryResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.preview_top(DEFAULT_PREVIEW_ROWS))
    }
}

/// Append one table line. Every column but the last is padded to its width.
fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let last = widths.len().saturating_sub(1);
    for (column, cell) in cells.enumerate() {
        if column > 0 {
            out.push(' ');
        }
        if column == last {
            out.push_str(cell);
        } else {
            out.push_str(&format!("{:<width$}", cell, width = widths[column]));
        }
    }
    out.push('\n');
}

fn render_cell(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QuarryError;
    use proptest::prelude::*;
    use serde_json::json;

    fn people() -> QueryResponse {
        let fields = Fields::new()
            .with_field("name", "string")
            .with_field("age", "integer");
        QueryResponse::from_positional(
            vec![
                vec![json!("Ada"), json!(36)],
                vec![json!("Grace"), Value::Null],
                vec![json!("Linus"), json!(7)],
            ],
            fields,
            Profiling::from([(EXECUTE_TIME.to_string(), 0.25)]),
        )
        .unwrap()
    }

    #[test]
    fn test_fields_keep_insertion_order() {
        let fields: Fields = vec![("z", "string"), ("a", "integer"), ("z", "float")]
            .into_iter()
            .collect();
        assert_eq!(fields.names().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(fields.get("z").unwrap().field_type, "float");
        assert!(!fields.contains("missing"));
    }

    #[test]
    fn test_field_descriptor_serializes_as_type() {
        let descriptor = FieldDescriptor::new("string");
        assert_eq!(serde_json::to_value(&descriptor).unwrap(), json!({"type": "string"}));
    }

    #[test]
    fn test_new_rejects_row_with_wrong_keys() {
        let fields = Fields::new().with_field("a", "integer");
        let row = Row::from([("b".to_string(), json!(1))]);
        let err = QueryResponse::new(vec![row], fields, Profiling::new()).unwrap_err();
        assert!(matches!(
            err,
            QuarryError::Validation(ValidationError::RowShapeMismatch { row: 0, .. })
        ));
    }

    #[test]
    fn test_from_positional_rejects_wrong_arity() {
        let fields = Fields::new().with_field("a", "integer");
        let err = QueryResponse::from_positional(
            vec![vec![json!(1)], vec![json!(1), json!(2)]],
            fields,
            Profiling::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            QuarryError::from(ValidationError::RowArity {
                row: 1,
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn test_accessors() {
        let response = people();
        assert_eq!(response.len(), 3);
        assert_eq!(response.rows()[1]["name"], json!("Grace"));
        assert_eq!(response.fields().len(), 2);
        assert_eq!(response.profiling()[EXECUTE_TIME], 0.25);
    }

    #[test]
    fn test_preview_renders_nulls_and_numbers() {
        let expected = "\
name  age
----- ----
Ada   36
Grace NULL
Linus 7
";
        assert_eq!(people().preview_top(10), expected);
    }

    #[test]
    fn test_preview_width_uses_shown_rows_only() {
        let expected = "\
name  age
----- ---
Linus 7
";
        assert_eq!(people().preview_bottom(1), expected);
    }

    #[test]
    fn test_preview_empty_fields() {
        assert_eq!(QueryResponse::empty(Profiling::new()).preview_top(10), "");
    }

    #[test]
    fn test_preview_zero_rows_renders_header() {
        assert_eq!(people().preview_top(0), "name age\n---- ---\n");
    }

    #[test]
    fn test_display_is_top_preview() {
        let response = people();
        assert_eq!(response.to_string(), response.preview_top(DEFAULT_PREVIEW_ROWS));
    }

    #[test]
    fn test_timed_reports_elapsed() {
        let (value, elapsed) = timed(|| Ok::<_, ()>(7)).unwrap();
        assert_eq!(value, 7);
        assert!(elapsed >= 0.0);
        assert_eq!(timed(|| Err::<(), _>("boom")), Err("boom"));
    }

    proptest! {
        #[test]
        fn prop_preview_lines_are_aligned(
            values in proptest::collection::vec(("[a-z]{0,12}", "[a-z]{0,12}"), 1..30),
            n in 0usize..40,
        ) {
            let fields = Fields::new().with_field("left", "string").with_field("right", "string");
            let rows = values
                .iter()
                .map(|(a, b)| vec![json!(a), json!(b)])
                .collect();
            let response = QueryResponse::from_positional(rows, fields, Profiling::new()).unwrap();

            let rendered = response.preview_top(n);
            let lines: Vec<&str> = rendered.lines().collect();
            prop_assert_eq!(lines.len(), 2 + n.min(values.len()));

            // The second column starts at the same offset on every line.
            let offset = lines[1].find(' ').unwrap() + 1;
            for line in &lines {
                prop_assert_eq!(line.as_bytes()[offset - 1], b' ');
            }
        }
    }
}
