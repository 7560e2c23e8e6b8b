//! Filter predicates, ordering and limits for collection queries.
//!
//! A [`Query`] is backend-neutral. `RestStore` renders it as PostgREST URL
//! parameters via [`Query::to_params`]; `MemoryStore` evaluates it directly
//! against JSON rows via [`Query::matches`] and [`Query::sort`].

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Case-sensitive pattern match, `%` matches any run of characters.
    Like,
    /// Case-insensitive pattern match.
    ILike,
    IsNull,
    NotNull,
    /// Value is one of a list.
    In,
    /// Array column contains every given element.
    Contains,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Like => "like",
            Self::ILike => "ilike",
            Self::IsNull => "is",
            Self::NotNull => "not.is",
            Self::In => "in",
            Self::Contains => "cs",
        }
    }
}

/// A single `field op value` predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, op: Op, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, Op::Eq, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, Op::IsNull, Value::Null)
    }

    /// `op.value` part of the PostgREST encoding.
    fn encode_rhs(&self) -> String {
        match self.op {
            Op::IsNull | Op::NotNull => format!("{}.null", self.op.as_str()),
            Op::In => format!("{}.({})", self.op.as_str(), join_values(&self.value)),
            Op::Contains => format!("{}.{{{}}}", self.op.as_str(), join_values(&self.value)),
            op => format!("{}.{}", op.as_str(), scalar_text(&self.value)),
        }
    }

    /// Evaluate against a JSON row. Missing fields count as null.
    pub fn matches(&self, row: &Value) -> bool {
        let actual = row.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            Op::IsNull => actual.is_null(),
            Op::NotNull => !actual.is_null(),
            Op::Eq => !actual.is_null() && compare(actual, &self.value) == Ordering::Equal,
            // SQL semantics: NULL <> x is unknown, so the row is excluded
            Op::Neq => !actual.is_null() && compare(actual, &self.value) != Ordering::Equal,
            Op::Gt => !actual.is_null() && compare(actual, &self.value) == Ordering::Greater,
            Op::Gte => !actual.is_null() && compare(actual, &self.value) != Ordering::Less,
            Op::Lt => !actual.is_null() && compare(actual, &self.value) == Ordering::Less,
            Op::Lte => !actual.is_null() && compare(actual, &self.value) != Ordering::Greater,
            Op::Like => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => like(text, pattern),
                _ => false,
            },
            Op::ILike => match (actual.as_str(), self.value.as_str()) {
                (Some(text), Some(pattern)) => {
                    like(&text.to_lowercase(), &pattern.to_lowercase())
                }
                _ => false,
            },
            Op::In => self
                .value
                .as_array()
                .is_some_and(|opts| opts.iter().any(|v| compare(actual, v) == Ordering::Equal)),
            Op::Contains => match (actual.as_array(), self.value.as_array()) {
                (Some(have), Some(want)) => want.iter().all(|w| have.contains(w)),
                _ => false,
            },
        }
    }
}

/// A top-level query condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Filter(Filter),
    /// At least one of the filters must hold.
    Or(Vec<Filter>),
}

impl Condition {
    fn matches(&self, row: &Value) -> bool {
        match self {
            Self::Filter(f) => f.matches(row),
            Self::Or(fs) => fs.iter().any(|f| f.matches(row)),
        }
    }
}

/// Sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub ascending: bool,
}

/// A filtered, ordered, limited collection query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub conditions: Vec<Condition>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.conditions.push(Condition::Filter(filter));
        self
    }

    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(field, Op::Eq, value))
    }

    pub fn neq(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(field, Op::Neq, value))
    }

    pub fn gt(self, field: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::new(field, Op::Gt, value))
    }

    pub fn ilike(self, field: &str, pattern: impl Into<String>) -> Self {
        self.filter(Filter::new(field, Op::ILike, pattern.into()))
    }

    pub fn is_null(self, field: &str) -> Self {
        self.filter(Filter::is_null(field))
    }

    pub fn not_null(self, field: &str) -> Self {
        self.filter(Filter::new(field, Op::NotNull, Value::Null))
    }

    pub fn in_list<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(Filter::new(field, Op::In, Value::Array(list)))
    }

    pub fn contains<I, V>(self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let list: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.filter(Filter::new(field, Op::Contains, Value::Array(list)))
    }

    /// Apply `eq` only when a value is present.
    pub fn eq_opt(self, field: &str, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.eq(field, v),
            None => self,
        }
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.conditions.push(Condition::Or(filters));
        self
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.order.push(Order {
            field: field.to_string(),
            ascending: true,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.order.push(Order {
            field: field.to_string(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Render as PostgREST query-string pairs.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        for condition in &self.conditions {
            match condition {
                Condition::Filter(f) => params.push((f.field.clone(), f.encode_rhs())),
                Condition::Or(fs) => {
                    let inner: Vec<String> = fs
                        .iter()
                        .map(|f| format!("{}.{}", f.field, f.encode_rhs()))
                        .collect();
                    params.push(("or".to_string(), format!("({})", inner.join(","))));
                }
            }
        }
        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.field, if o.ascending { "asc" } else { "desc" }))
                .collect();
            params.push(("order".to_string(), order.join(",")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }

    /// True when every condition holds for `row`.
    pub fn matches(&self, row: &Value) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }

    /// Stable sort by the order keys. Nulls sort last ascending, first descending.
    pub fn sort(&self, rows: &mut [Value]) {
        if self.order.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for key in &self.order {
                let left = a.get(&key.field).unwrap_or(&Value::Null);
                let right = b.get(&key.field).unwrap_or(&Value::Null);
                let ord = match (left.is_null(), right.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => compare(left, right),
                };
                let ord = if key.ascending { ord } else { ord.reverse() };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn join_values(value: &Value) -> String {
    match value {
        Value::Array(items) => items.iter().map(scalar_text).collect::<Vec<_>>().join(","),
        other => scalar_text(other),
    }
}

/// Compare two JSON scalars: timestamps chronologically, numbers numerically,
/// everything else by text.
fn compare(a: &Value, b: &Value) -> Ordering {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        if let (Ok(tx), Ok(ty)) = (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
            return tx.cmp(&ty);
        }
        return x.cmp(y);
    }
    scalar_text(a).cmp(&scalar_text(b))
}

/// SQL `LIKE` with `%` (any run) and `_` (one char).
fn like(text: &str, pattern: &str) -> bool {
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    // dp[j] = pattern[..j] matches text[..i]
    let mut dp = vec![false; p.len() + 1];
    dp[0] = true;
    for j in 1..=p.len() {
        dp[j] = dp[j - 1] && p[j - 1] == '%';
    }
    for &tc in &t {
        let mut prev_diag = dp[0];
        dp[0] = false;
        for j in 1..=p.len() {
            let above = dp[j];
            dp[j] = match p[j - 1] {
                '%' => dp[j - 1] || above,
                '_' => prev_diag,
                pc => prev_diag && pc == tc,
            };
            prev_diag = above;
        }
    }
    dp[p.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_postgrest_params() {
        let q = Query::new()
            .eq("status", "pending")
            .or(vec![Filter::eq("to_target", "R"), Filter::is_null("to_target")])
            .is_null("deleted_at")
            .order_asc("priority")
            .order_asc("created_at")
            .limit(10);
        let params = q.to_params();
        assert_eq!(
            params,
            vec![
                ("status".to_string(), "eq.pending".to_string()),
                ("or".to_string(), "(to_target.eq.R,to_target.is.null)".to_string()),
                ("deleted_at".to_string(), "is.null".to_string()),
                ("order".to_string(), "priority.asc,created_at.asc".to_string()),
                ("limit".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn encodes_list_operators() {
        let q = Query::new()
            .in_list("status", ["claimed", "in_progress"])
            .contains("tags", ["rust"])
            .not_null("claimed_by");
        let params = q.to_params();
        assert_eq!(params[0].1, "in.(claimed,in_progress)");
        assert_eq!(params[1].1, "cs.{rust}");
        assert_eq!(params[2].1, "not.is.null");
    }

    #[test]
    fn null_semantics() {
        let row = json!({"claimed_by": null, "author": "R"});
        assert!(Filter::is_null("claimed_by").matches(&row));
        assert!(Filter::is_null("missing").matches(&row));
        assert!(!Filter::new("claimed_by", Op::Neq, "G").matches(&row));
        assert!(Filter::new("author", Op::Neq, "G").matches(&row));
    }

    #[test]
    fn timestamps_compare_chronologically() {
        // Different fractional precision must not break ordering
        let row = json!({"created_at": "2026-01-01T10:00:00.5Z"});
        assert!(Filter::new("created_at", Op::Gt, "2026-01-01T10:00:00Z").matches(&row));
        assert!(!Filter::new("created_at", Op::Gt, "2026-01-01T10:00:00.9Z").matches(&row));
    }

    #[test]
    fn like_patterns() {
        assert!(like("hello world", "%lo w%"));
        assert!(like("abc", "a_c"));
        assert!(!like("abc", "a_d"));
        assert!(like("", "%"));
        let row = json!({"content": "Memory Management tips"});
        assert!(Filter::new("content", Op::ILike, "%memory%").matches(&row));
    }

    #[test]
    fn contains_and_in() {
        let row = json!({"tags": ["a", "b", "c"], "status": "claimed"});
        assert!(Filter::new("tags", Op::Contains, json!(["a", "c"])).matches(&row));
        assert!(!Filter::new("tags", Op::Contains, json!(["z"])).matches(&row));
        assert!(Filter::new("status", Op::In, json!(["claimed", "in_progress"])).matches(&row));
    }

    #[test]
    fn sort_is_stable_with_nulls_last() {
        let q = Query::new().order_asc("priority");
        let mut rows = vec![
            json!({"n": 1, "priority": 5}),
            json!({"n": 2, "priority": null}),
            json!({"n": 3, "priority": 1}),
            json!({"n": 4, "priority": 5}),
        ];
        q.sort(&mut rows);
        let order: Vec<i64> = rows.iter().map(|r| r["n"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![3, 1, 4, 2]);
    }
}
