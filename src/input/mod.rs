//! Boundary parsing for name parameters.
//!
//! Tools accept a name list as a plain string, a JSON array, a JSON-encoded
//! array inside a string, or a comma-separated string. All of those are
//! normalized here once into a [`NameQuery`].

use serde_json::Value;

use crate::error::{DocsError, DocsResult};

/// A normalized name parameter
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NameQuery {
    #[default]
    None,
    Single(String),
    Many(Vec<String>),
}

impl NameQuery {
    pub fn names(&self) -> Vec<&str> {
        match self {
            NameQuery::None => Vec::new(),
            NameQuery::Single(name) => vec![name.as_str()],
            NameQuery::Many(names) => names.iter().map(String::as_str).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, NameQuery::None)
    }

    fn from_list(names: Vec<String>) -> Self {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        match names.len() {
            0 => NameQuery::None,
            1 => NameQuery::Single(names.remove(0)),
            _ => NameQuery::Many(names),
        }
    }
}

/// Normalize a raw tool argument into a [`NameQuery`].
pub fn parse_names(raw: &Value) -> DocsResult<NameQuery> {
    match raw {
        Value::Null => Ok(NameQuery::None),
        Value::String(s) => parse_name_string(s),
        Value::Array(items) => {
            let names = items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(DocsError::InvalidInput(format!(
                        "expected a list of names, found element {other}"
                    ))),
                })
                .collect::<DocsResult<Vec<_>>>()?;
            Ok(NameQuery::from_list(names))
        }
        other => Err(DocsError::InvalidInput(format!(
            "expected a name or list of names, found {other}"
        ))),
    }
}

/// A string starting with `[` must be a JSON array of strings.
fn parse_name_string(s: &str) -> DocsResult<NameQuery> {
    let trimmed = s.trim();
    if trimmed.starts_with('[') {
        let names = serde_json::from_str::<Vec<String>>(trimmed).map_err(|e| {
            DocsError::InvalidInput(format!("malformed JSON list of names: {e}"))
        })?;
        return Ok(NameQuery::from_list(names));
    }
    if trimmed.contains(',') {
        return Ok(NameQuery::from_list(trimmed.split(',').map(str::to_string).collect()));
    }
    Ok(NameQuery::from_list(vec![trimmed.to_string()]))
}

/// Per-item outcome of a batch operation
#[derive(Debug)]
pub struct BatchResult<T> {
    pub succeeded: Vec<(String, T)>,
    pub failed: Vec<(String, DocsError)>,
}

impl<T> Default for BatchResult<T> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BatchResult<T> {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
