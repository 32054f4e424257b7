//! Metadata predicate compiler.
//!
//! A [`SearchPredicate`] is first lowered into a small expression tree
//! ([`PredicatePlan`]) and only then rendered to SQL for a given dialect.
//! Rendering walks the tree once, left to right, taking a placeholder from
//! [`Placeholders`] at the exact moment it writes one, so the argument list
//! always lines up with the positional placeholders in the text.
//!
//! The base clause filters rows of the metadata relation aliased `m0`. Every
//! further clause becomes a correlated `EXISTS` against a fresh alias `mN`
//! tied to `m0.object`, so any number of clauses works over the sparse
//! key/value table without a fixed join count.

use crate::domain::predicate::{Connector, SearchPredicate, ValueMatch};
use crate::error::{Result, StoreError};
use crate::storage::connection::{Placeholders, SqlArg};

/// Alias of the base metadata row in compiled SQL.
pub const BASE_ALIAS: &str = "m0";

const WILDCARD: char = '*';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Exact,
    Like,
}

/// One `value = ?` or `value LIKE ?` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueTest {
    pub comparison: Comparison,
    pub operand: String,
}

impl ValueTest {
    /// A leading `*` marks a wildcard; every `*` then becomes `%`.
    pub fn from_raw(raw: &str) -> Self {
        if raw.starts_with(WILDCARD) {
            ValueTest {
                comparison: Comparison::Like,
                operand: raw.replace(WILDCARD, "%"),
            }
        } else {
            ValueTest {
                comparison: Comparison::Exact,
                operand: raw.to_string(),
            }
        }
    }
}

/// Key plus OR'd value tests against one alias of the metadata relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    pub alias: usize,
    pub key: String,
    pub tests: Vec<ValueTest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Filter on the base row `m0`.
    Base(KeyFilter),
    /// Correlated existence check on alias `mN`.
    Exists(KeyFilter),
    Combine {
        left: Box<Node>,
        connector: Connector,
        right: Box<Node>,
    },
}

/// Rendered predicate: a boolean SQL expression plus its bound arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPredicate {
    pub sql: String,
    pub args: Vec<SqlArg>,
}

/// Dialect-independent form of a predicate over one metadata relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicatePlan {
    relation: String,
    root: Node,
}

impl PredicatePlan {
    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Renders the plan, drawing placeholders from `placeholders`.
    pub fn render(&self, placeholders: &mut Placeholders) -> CompiledPredicate {
        let mut out = Renderer {
            relation: &self.relation,
            placeholders,
            sql: String::new(),
            args: Vec::new(),
        };
        out.node(&self.root);
        CompiledPredicate {
            sql: out.sql,
            args: out.args,
        }
    }
}

/// Compiles predicates against one metadata relation (`{object, name, value}`).
#[derive(Debug, Clone)]
pub struct PredicateCompiler {
    relation: String,
}

impl PredicateCompiler {
    pub fn new(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
        }
    }

    /// Lowers `predicate` into a plan. Fails on an empty predicate or an
    /// empty value set.
    pub fn plan(&self, predicate: &SearchPredicate) -> Result<PredicatePlan> {
        let mut clauses = predicate.clauses().iter().enumerate();
        let (_, first) = clauses
            .next()
            .ok_or_else(|| StoreError::invalid("metadata predicate must not be empty"))?;

        let mut root = Node::Base(key_filter(0, &first.key, &first.value)?);
        for (alias, clause) in clauses {
            let exists = Node::Exists(key_filter(alias, &clause.key, &clause.value)?);
            root = Node::Combine {
                left: Box::new(root),
                connector: clause.connector,
                right: Box::new(exists),
            };
        }

        Ok(PredicatePlan {
            relation: self.relation.clone(),
            root,
        })
    }

    /// Plans and renders in one step.
    pub fn compile(
        &self,
        predicate: &SearchPredicate,
        placeholders: &mut Placeholders,
    ) -> Result<CompiledPredicate> {
        let plan = self.plan(predicate)?;
        let compiled = plan.render(placeholders);
        tracing::debug!(sql = %compiled.sql, args = compiled.args.len(), "compiled metadata predicate");
        Ok(compiled)
    }
}

fn key_filter(alias: usize, key: &str, value: &ValueMatch) -> Result<KeyFilter> {
    let values = value.values();
    if values.is_empty() {
        return Err(StoreError::invalid(format!(
            "value set for metadata key '{}' is empty",
            key
        )));
    }
    Ok(KeyFilter {
        alias,
        key: key.to_string(),
        tests: values.iter().map(|v| ValueTest::from_raw(v)).collect(),
    })
}

struct Renderer<'a> {
    relation: &'a str,
    placeholders: &'a mut Placeholders,
    sql: String,
    args: Vec<SqlArg>,
}

impl Renderer<'_> {
    fn bind(&mut self, value: &str) {
        let ph = self.placeholders.next();
        self.sql.push_str(&ph);
        self.args.push(SqlArg::Text(value.to_string()));
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Base(filter) => {
                self.sql.push('(');
                self.key_filter(filter);
                self.sql.push(')');
            }
            Node::Exists(filter) => {
                let alias = format!("m{}", filter.alias);
                self.sql.push_str(&format!(
                    "EXISTS (SELECT 1 FROM {} {} WHERE {}.object = {}.object AND ",
                    self.relation, alias, alias, BASE_ALIAS
                ));
                self.key_filter(filter);
                self.sql.push(')');
            }
            Node::Combine {
                left,
                connector,
                right,
            } => {
                self.sql.push('(');
                self.node(left);
                self.sql.push(' ');
                self.sql.push_str(connector.as_sql());
                self.sql.push(' ');
                self.node(right);
                self.sql.push(')');
            }
        }
    }

    fn key_filter(&mut self, filter: &KeyFilter) {
        let alias = format!("m{}", filter.alias);
        self.sql.push_str(&format!("{}.name = ", alias));
        self.bind(&filter.key);
        self.sql.push_str(" AND ");

        let grouped = filter.tests.len() > 1;
        if grouped {
            self.sql.push('(');
        }
        for (idx, test) in filter.tests.iter().enumerate() {
            if idx > 0 {
                self.sql.push_str(" OR ");
            }
            let op = match test.comparison {
                Comparison::Exact => "=",
                Comparison::Like => "LIKE",
            };
            self.sql.push_str(&format!("{}.value {} ", alias, op));
            self.bind(&test.operand);
        }
        if grouped {
            self.sql.push(')');
        }
    }
}
