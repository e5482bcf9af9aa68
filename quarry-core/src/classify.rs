//! Read/write classification of statements
//!
//! Only statements classified as reads are eligible for the cache. The
//! policy is replaceable: anything implementing [`WriteClassifier`],
//! including a plain closure, can be installed on a data source.

use crate::statement::{Scanner, SegmentKind};

/// Decides whether a statement mutates the engine.
pub trait WriteClassifier: Send + Sync {
    /// True when `statement` is a write.
    fn is_write(&self, statement: &str) -> bool;
}

impl<F> WriteClassifier for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_write(&self, statement: &str) -> bool {
        self(statement)
    }
}

/// Leading keywords that always mutate.
const SQL_WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE", "GRANT", "REVOKE",
    "MERGE", "COPY", "COMMENT", "REINDEX", "VACUUM", "CLUSTER", "REFRESH", "CALL", "DO", "LOCK",
];

/// Keywords that turn a `WITH` statement into a write.
const SQL_CTE_WRITE_KEYWORDS: &[&str] = &["INSERT", "UPDATE", "DELETE", "MERGE"];

/// Keyword-based classifier.
///
/// Looks at the first keyword of the statement, skipping whitespace,
/// comments and opening parentheses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordClassifier {
    write_keywords: Vec<String>,
    cte_write_keywords: Vec<String>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::sql()
    }
}

impl KeywordClassifier {
    /// The SQL dialect policy.
    pub fn sql() -> Self {
        Self {
            write_keywords: SQL_WRITE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            cte_write_keywords: SQL_CTE_WRITE_KEYWORDS
                .iter()
                .map(|k| k.to_string())
                .collect(),
        }
    }

    /// Custom keyword sets. Keywords are matched case-insensitively.
    pub fn with_keywords<I, S>(write_keywords: I, cte_write_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            write_keywords: write_keywords
                .into_iter()
                .map(|k| k.as_ref().to_ascii_uppercase())
                .collect(),
            cte_write_keywords: cte_write_keywords
                .into_iter()
                .map(|k| k.as_ref().to_ascii_uppercase())
                .collect(),
        }
    }

    fn is_write_keyword(&self, word: &str) -> bool {
        self.write_keywords.iter().any(|k| k == word)
    }

    fn is_cte_write_keyword(&self, word: &str) -> bool {
        self.cte_write_keywords.iter().any(|k| k == word)
    }
}

impl WriteClassifier for KeywordClassifier {
    fn is_write(&self, statement: &str) -> bool {
        let mut words = Scanner::new(statement)
            .filter(|segment| segment.kind == SegmentKind::Word)
            .map(|segment| segment.text.to_ascii_uppercase());

        let Some(first) = words.next() else {
            return false;
        };

        match first.as_str() {
            "WITH" => words.any(|word| self.is_cte_write_keyword(&word)),
            // SELECT ... INTO creates a table
            "SELECT" => words.any(|word| word == "INTO"),
            other => self.is_write_keyword(other),
        }
    }
}

/// Classify with the default SQL policy.
pub fn is_write_query(statement: &str) -> bool {
    KeywordClassifier::sql().is_write(statement)
}

// =============================================================================
// TESTS
// =============================================================================
