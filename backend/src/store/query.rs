//! Query model and the evaluator shared by every store backend

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::StoredDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A predicate on one (possibly dotted) field path
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    pub fn order_by(mut self, field: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(body))
    }

    /// Filter, sort and truncate a candidate set
    pub fn apply(&self, documents: impl IntoIterator<Item = StoredDocument>) -> Vec<StoredDocument> {
        let mut matched: Vec<StoredDocument> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.body))
            .collect();

        match &self.order_by {
            Some(order) => matched.sort_by(|a, b| {
                compare_optional(
                    field_value(&a.body, &order.field),
                    field_value(&b.body, &order.field),
                    order.descending,
                )
                .then_with(|| a.id.cmp(&b.id))
            }),
            None => matched.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }

    /// Equality filters folded into one JSON object, for containment lookups
    pub fn containment(&self) -> Value {
        let mut root = Map::new();
        for filter in self.filters.iter().filter(|f| f.op == FilterOp::Eq) {
            let mut segments: Vec<&str> = filter.field.split('.').collect();
            let leaf = segments.pop().unwrap_or_default();
            let mut node = &mut root;
            for segment in segments {
                let entry = node
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !entry.is_object() {
                    *entry = Value::Object(Map::new());
                }
                node = match entry {
                    Value::Object(map) => map,
                    _ => unreachable!("entry was just made an object"),
                };
            }
            node.insert(leaf.to_string(), filter.value.clone());
        }
        Value::Object(root)
    }
}

impl Filter {
    pub fn matches(&self, body: &Value) -> bool {
        let Some(actual) = field_value(body, &self.field) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => {
                actual == &self.value || compare_values(actual, &self.value) == Some(Ordering::Equal)
            }
            FilterOp::Lt => compare_values(actual, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare_values(actual, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare_values(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        }
    }
}

/// Resolve a dotted path such as `stock.id`
pub fn field_value<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(body, |node, segment| node.get(segment))
        .filter(|v| !v.is_null())
}

/// Numbers compare numerically, strings lexically (ISO dates sort correctly)
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Missing values sort last in either direction
fn compare_optional(a: Option<&Value>, b: Option<&Value>, descending: bool) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => {
            let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
