//! Query normalization

use crate::error::{Result, SemdexError};

/// Query text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedQuery {
    pub text: String,
    pub truncated: bool,
}

/// Collapse whitespace and cap the query at `max_chars` characters.
///
/// Empty queries, and queries without a single letter or digit, are rejected.
pub fn normalize_query(raw: &str, max_chars: usize) -> Result<NormalizedQuery> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.is_empty() {
        return Err(SemdexError::InvalidQuery(
            "Query text cannot be empty".to_string(),
        ));
    }
    if !collapsed.chars().any(char::is_alphanumeric) {
        return Err(SemdexError::InvalidQuery(
            "Query has no searchable text".to_string(),
        ));
    }

    if collapsed.chars().count() <= max_chars {
        return Ok(NormalizedQuery {
            text: collapsed,
            truncated: false,
        });
    }

    let text: String = collapsed.chars().take(max_chars).collect();
    Ok(NormalizedQuery {
        text: text.trim_end().to_string(),
        truncated: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace() {
        let query = normalize_query("  where   did\tI\npark ", 100).unwrap();
        assert_eq!(query.text, "where did I park");
        assert!(!query.truncated);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(matches!(
            normalize_query("   \n", 100),
            Err(SemdexError::InvalidQuery(_))
        ));
        assert!(matches!(
            normalize_query("?!...", 100),
            Err(SemdexError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        let query = normalize_query("ééééé ééééé", 7).unwrap();
        assert_eq!(query.text, "ééééé é");
        assert!(query.truncated);
    }
}
