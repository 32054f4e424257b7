//! Metadata search predicates.
//!
//! A predicate is an ordered list of clauses. The first clause is the base
//! match; every later clause is joined to everything before it with its own
//! connector (`AND` narrows, `OR` widens).

use crate::error::{Result, StoreError};
use serde_json::Value as JsonValue;

/// How a clause combines with the clauses before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connector {
    And,
    #[default]
    Or,
}

impl Connector {
    /// Case-insensitive; anything other than `and` is `OR`.
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("and") {
            Connector::And
        } else {
            Connector::Or
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Connector::And => "AND",
            Connector::Or => "OR",
        }
    }
}

/// One value, or a set of values any of which may match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueMatch {
    One(String),
    AnyOf(Vec<String>),
}

impl ValueMatch {
    pub fn values(&self) -> &[String] {
        match self {
            ValueMatch::One(v) => std::slice::from_ref(v),
            ValueMatch::AnyOf(vs) => vs,
        }
    }
}

impl From<&str> for ValueMatch {
    fn from(v: &str) -> Self {
        ValueMatch::One(v.to_string())
    }
}

impl From<String> for ValueMatch {
    fn from(v: String) -> Self {
        ValueMatch::One(v)
    }
}

impl From<Vec<String>> for ValueMatch {
    fn from(vs: Vec<String>) -> Self {
        ValueMatch::AnyOf(vs)
    }
}

impl From<Vec<&str>> for ValueMatch {
    fn from(vs: Vec<&str>) -> Self {
        ValueMatch::AnyOf(vs.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for ValueMatch {
    fn from(vs: [&str; N]) -> Self {
        ValueMatch::AnyOf(vs.iter().map(|v| v.to_string()).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clause {
    /// Ignored on the first clause.
    pub connector: Connector,
    pub key: String,
    pub value: ValueMatch,
}

/// Ordered metadata search predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPredicate {
    clauses: Vec<Clause>,
}

impl SearchPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Predicate whose base clause is `key` matching `value`.
    pub fn matching(key: impl Into<String>, value: impl Into<ValueMatch>) -> Self {
        Self::new().then(Connector::Or, key, value)
    }

    pub fn and(self, key: impl Into<String>, value: impl Into<ValueMatch>) -> Self {
        self.then(Connector::And, key, value)
    }

    pub fn or(self, key: impl Into<String>, value: impl Into<ValueMatch>) -> Self {
        self.then(Connector::Or, key, value)
    }

    pub fn then(
        mut self,
        connector: Connector,
        key: impl Into<String>,
        value: impl Into<ValueMatch>,
    ) -> Self {
        self.clauses.push(Clause {
            connector,
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parses the JSON form:
    ///
    /// ```json
    /// [{"key": "color", "value": "red"}, {"AND": {"key": "size", "value": ["*L", "M"]}}]
    /// ```
    ///
    /// An entry without a connector wrapper joins with `OR`. Scalar values are
    /// coerced to strings.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        let entries = value
            .as_array()
            .ok_or_else(|| StoreError::invalid("predicate must be an array of clauses"))?;

        let mut predicate = SearchPredicate::new();
        for (idx, entry) in entries.iter().enumerate() {
            let obj = entry
                .as_object()
                .ok_or_else(|| StoreError::invalid(format!("clause {} must be an object", idx)))?;

            let (connector, body) = if obj.contains_key("key") {
                (Connector::Or, entry)
            } else {
                match obj.iter().next() {
                    Some((conn, body)) if obj.len() == 1 => (Connector::parse(conn), body),
                    _ => {
                        return Err(StoreError::invalid(format!(
                            "clause {} must have a key or a single connector entry",
                            idx
                        )))
                    }
                }
            };

            let key = body
                .get("key")
                .and_then(coerce_scalar)
                .ok_or_else(|| StoreError::invalid(format!("clause {} has no usable key", idx)))?;
            let value = match body.get("value") {
                Some(JsonValue::Array(items)) => {
                    let values = items
                        .iter()
                        .map(|v| {
                            coerce_scalar(v).ok_or_else(|| {
                                StoreError::invalid(format!("clause {} has a non-scalar value", idx))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    ValueMatch::AnyOf(values)
                }
                Some(v) => ValueMatch::One(coerce_scalar(v).ok_or_else(|| {
                    StoreError::invalid(format!("clause {} has a non-scalar value", idx))
                })?),
                None => {
                    return Err(StoreError::invalid(format!("clause {} has no value", idx)));
                }
            };

            predicate = predicate.then(connector, key, value);
        }
        Ok(predicate)
    }
}

fn coerce_scalar(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
