//! Filter expressions over lead records.
//!
//! Two JSON shapes are accepted:
//!
//! - object: `{"status": "New", "industry": ["in", ["Retail", "Energy"]]}`
//! - list: `[["status", "=", "New"], ["CRM Lead", "industry", "like", "%tech%"]]`
//!
//! All conditions are ANDed. A missing field behaves like an empty string.

use std::cmp::Ordering;

use serde_json::Value;

use crate::records::LeadRecord;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed filter: {0}")]
pub struct FilterError(pub String);

impl FilterError {
    fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
    Like,
    NotLike,
    IsSet,
    IsNotSet,
}

impl FilterOp {
    /// Parse an operator token. `is` needs its operand to pick set/not set.
    fn parse(token: &str, operand: &Value) -> Result<Self, FilterError> {
        let op = match token.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => FilterOp::Eq,
            "!=" | "<>" => FilterOp::Ne,
            ">" => FilterOp::Gt,
            "<" => FilterOp::Lt,
            ">=" => FilterOp::Ge,
            "<=" => FilterOp::Le,
            "in" => FilterOp::In,
            "not in" => FilterOp::NotIn,
            "like" => FilterOp::Like,
            "not like" => FilterOp::NotLike,
            "is" => match operand.as_str().map(|s| s.trim().to_ascii_lowercase()) {
                Some(s) if s == "set" => FilterOp::IsSet,
                Some(s) if s == "not set" => FilterOp::IsNotSet,
                _ => {
                    return Err(FilterError::new(format!(
                        "operator 'is' expects 'set' or 'not set', got {operand}"
                    )));
                }
            },
            other => return Err(FilterError::new(format!("unknown operator '{other}'"))),
        };

        if matches!(op, FilterOp::In | FilterOp::NotIn) && !operand.is_array() {
            return Err(FilterError::new(format!("operator '{token}' expects an array operand")));
        }
        if matches!(op, FilterOp::Like | FilterOp::NotLike) && !operand.is_string() {
            return Err(FilterError::new(format!("operator '{token}' expects a string pattern")));
        }
        Ok(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
    pub operand: Value,
}

impl Condition {
    fn new(field: &str, op: FilterOp, operand: Value) -> Result<Self, FilterError> {
        let field = field.trim();
        if field.is_empty() {
            return Err(FilterError::new("empty field name"));
        }
        Ok(Self {
            field: field.to_string(),
            op,
            operand,
        })
    }

    pub fn matches(&self, record: &LeadRecord) -> bool {
        let value = record.field(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => loose_eq(value, &self.operand),
            FilterOp::Ne => !loose_eq(value, &self.operand),
            FilterOp::Gt => compare(value, &self.operand) == Some(Ordering::Greater),
            FilterOp::Lt => compare(value, &self.operand) == Some(Ordering::Less),
            FilterOp::Ge => matches!(compare(value, &self.operand), Some(Ordering::Greater | Ordering::Equal)),
            FilterOp::Le => matches!(compare(value, &self.operand), Some(Ordering::Less | Ordering::Equal)),
            FilterOp::In => in_list(value, &self.operand),
            FilterOp::NotIn => !in_list(value, &self.operand),
            FilterOp::Like => like(value, &self.operand),
            FilterOp::NotLike => !like(value, &self.operand),
            FilterOp::IsSet => is_set(value),
            FilterOp::IsNotSet => !is_set(value),
        }
    }
}

/// A parsed filter. An empty filter matches every record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn parse(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Null => Ok(Self::default()),
            // Filters arriving as a serialized JSON string.
            Value::String(raw) if raw.trim().is_empty() => Ok(Self::default()),
            Value::String(raw) => {
                let inner: Value = serde_json::from_str(raw)
                    .map_err(|e| FilterError::new(format!("filter string is not JSON: {e}")))?;
                if inner.is_string() {
                    return Err(FilterError::new("filter must be an object or a list"));
                }
                Self::parse(&inner)
            }
            Value::Object(map) => {
                let conditions = map
                    .iter()
                    .map(|(field, v)| object_condition(field, v))
                    .collect::<Result<_, _>>()?;
                Ok(Self { conditions })
            }
            Value::Array(items) => {
                let conditions = items.iter().map(list_condition).collect::<Result<_, _>>()?;
                Ok(Self { conditions })
            }
            other => Err(FilterError::new(format!(
                "filter must be an object or a list, got {other}"
            ))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, record: &LeadRecord) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }
}

fn object_condition(field: &str, value: &Value) -> Result<Condition, FilterError> {
    match value {
        Value::Array(pair) => match pair.as_slice() {
            [Value::String(op), operand] => Condition::new(field, FilterOp::parse(op, operand)?, operand.clone()),
            _ => Err(FilterError::new(format!(
                "field '{field}': expected [operator, value]"
            ))),
        },
        other => Condition::new(field, FilterOp::Eq, other.clone()),
    }
}

fn list_condition(item: &Value) -> Result<Condition, FilterError> {
    let Value::Array(parts) = item else {
        return Err(FilterError::new(format!("filter entry must be a list, got {item}")));
    };
    // Optional leading document type: [doctype, field, op, value].
    let parts = match parts.len() {
        3 => &parts[..],
        4 => &parts[1..],
        n => {
            return Err(FilterError::new(format!(
                "filter entry must have 3 or 4 elements, got {n}"
            )));
        }
    };
    let (Some(field), Some(op)) = (parts[0].as_str(), parts[1].as_str()) else {
        return Err(FilterError::new("field and operator must be strings"));
    };
    Condition::new(field, FilterOp::parse(op, &parts[2])?, parts[2].clone())
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Numeric comparison when either side is a JSON number/bool and both
/// parse as numbers; text comparison otherwise.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    let numeric_hint = matches!(a, Value::Number(_) | Value::Bool(_)) || matches!(b, Value::Number(_) | Value::Bool(_));
    if numeric_hint {
        if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
            return x.partial_cmp(&y);
        }
    }
    Some(as_text(a).cmp(&as_text(b)))
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    compare(a, b) == Some(Ordering::Equal)
}

fn in_list(value: &Value, list: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| loose_eq(value, item)))
}

fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn like(value: &Value, pattern: &Value) -> bool {
    let text: Vec<char> = as_text(value).to_lowercase().chars().collect();
    let pattern: Vec<char> = as_text(pattern).to_lowercase().chars().collect();
    like_match(&text, &pattern)
}

/// `%` matches any run, `_` exactly one character.
fn like_match(text: &[char], pattern: &[char]) -> bool {
    // dp[j]: pattern[..i] matches text[..j]
    let mut dp = vec![false; text.len() + 1];
    dp[0] = true;
    for &p in pattern {
        let mut next = vec![false; text.len() + 1];
        match p {
            '%' => {
                let mut seen = false;
                for j in 0..=text.len() {
                    seen |= dp[j];
                    next[j] = seen;
                }
            }
            _ => {
                for j in 1..=text.len() {
                    next[j] = dp[j - 1] && (p == '_' || p == text[j - 1]);
                }
            }
        }
        dp = next;
    }
    dp[text.len()]
}
