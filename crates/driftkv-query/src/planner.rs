//! Parse `SCAN` statements and build operator trees.

use thiserror::Error;

use driftkv_core::{Filter, KvScan, Limit, Operator, Project, Row, Store, StoreError};

use crate::glob::glob_match;

/// A planning failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("query syntax error: {reason}")]
    Syntax { reason: String },

    #[error("LIMIT takes a non-negative integer, got {input:?}")]
    BadLimit { input: String },

    #[error("unexpected token {word:?}")]
    UnknownClause { word: String },
}

/// A planning or evaluation failure, for callers running a whole query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Planner-supplied filter predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pred {
    /// Key name matches a `*`-wildcard pattern.
    KeyLike(String),
    /// Value payload contains a substring.
    ValueContains(String),
}

impl Pred {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Pred::KeyLike(pattern) => glob_match(pattern, row.key.as_str()),
            Pred::ValueContains(needle) => row.value.data.contains(needle.as_str()),
        }
    }
}

/// What the query projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Whole rows (`SELECT *`, or no SELECT clause).
    #[default]
    All,
    /// Keys with blanked values (`SELECT key`).
    KeysOnly,
}

/// A parsed query, ready to build.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryPlan {
    pub filter: Option<Pred>,
    pub limit: Option<usize>,
    pub projection: Projection,
}

/// Parse a tokenized `SCAN` statement.
pub fn parse(tokens: &[&str]) -> Result<QueryPlan, PlanError> {
    let mut tokens = tokens.iter();
    match tokens.next() {
        Some(t) if t.eq_ignore_ascii_case("SCAN") => {}
        other => {
            return Err(PlanError::Syntax {
                reason: format!("expected SCAN, got {:?}", other.copied().unwrap_or("")),
            })
        }
    }

    let mut plan = QueryPlan::default();
    let mut saw_select = false;

    while let Some(word) = tokens.next() {
        if word.eq_ignore_ascii_case("WHERE") {
            if plan.filter.is_some() {
                return Err(PlanError::Syntax {
                    reason: "duplicate WHERE clause".to_string(),
                });
            }
            let field = tokens.next();
            let op = tokens.next();
            let operand = tokens.next();
            let (Some(field), Some(op), Some(operand)) = (field, op, operand) else {
                return Err(PlanError::Syntax {
                    reason: "WHERE takes <field> <op> <operand>".to_string(),
                });
            };
            plan.filter = Some(match () {
                _ if field.eq_ignore_ascii_case("key") && op.eq_ignore_ascii_case("LIKE") => {
                    Pred::KeyLike((*operand).to_string())
                }
                _ if field.eq_ignore_ascii_case("value") && op.eq_ignore_ascii_case("CONTAINS") => {
                    Pred::ValueContains((*operand).to_string())
                }
                _ => {
                    return Err(PlanError::Syntax {
                        reason: format!("unsupported condition {field} {op}"),
                    })
                }
            });
        } else if word.eq_ignore_ascii_case("SELECT") {
            if saw_select {
                return Err(PlanError::Syntax {
                    reason: "duplicate SELECT clause".to_string(),
                });
            }
            saw_select = true;
            match tokens.next() {
                Some(t) if t.eq_ignore_ascii_case("key") => {
                    plan.projection = Projection::KeysOnly;
                }
                Some(&"*") => plan.projection = Projection::All,
                other => {
                    return Err(PlanError::Syntax {
                        reason: format!(
                            "SELECT takes `key` or `*`, got {:?}",
                            other.copied().unwrap_or("")
                        ),
                    })
                }
            }
        } else if word.eq_ignore_ascii_case("LIMIT") {
            if plan.limit.is_some() {
                return Err(PlanError::Syntax {
                    reason: "duplicate LIMIT clause".to_string(),
                });
            }
            let Some(n) = tokens.next() else {
                return Err(PlanError::Syntax {
                    reason: "LIMIT takes a count".to_string(),
                });
            };
            plan.limit = Some(n.parse().map_err(|_| PlanError::BadLimit {
                input: (*n).to_string(),
            })?);
        } else {
            return Err(PlanError::UnknownClause {
                word: (*word).to_string(),
            });
        }
    }

    Ok(plan)
}

/// Build the operator tree for a plan: scan, then filter, then limit, with
/// the projection outermost.
pub fn build<'a>(store: &'a Store, plan: &QueryPlan) -> Box<dyn Operator + 'a> {
    let mut op: Box<dyn Operator + 'a> = Box::new(KvScan::new(store));
    if let Some(pred) = plan.filter.clone() {
        op = Box::new(Filter::new(op, move |row: &Row| pred.matches(row)));
    }
    if let Some(max) = plan.limit {
        op = Box::new(Limit::new(op, max));
    }
    if plan.projection == Projection::KeysOnly {
        op = Box::new(Project::new(op, true));
    }
    op
}

/// Parse, build, and drain a query in one call.
pub fn execute(store: &Store, input: &str) -> Result<Vec<Row>, QueryError> {
    let tokens: Vec<&str> = input.split_whitespace().collect();
    let plan = parse(&tokens)?;

    let mut op = build(store, &plan);
    op.open()?;
    let mut rows = Vec::new();
    let outcome = loop {
        match op.next() {
            Ok(Some(row)) => rows.push(row),
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    op.close()?;
    outcome?;
    Ok(rows)
}
