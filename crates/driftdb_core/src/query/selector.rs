//! Selector expressions and their interpreter.

use super::QueryError;
use driftdb_storage::{compare_values, values_equal};
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A predicate over one field path.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Equal (arrays also match when any element is equal).
    Eq(Value),
    /// Not equal.
    Ne(Value),
    /// Greater than, within the same type class.
    Gt(Value),
    /// Greater than or equal, within the same type class.
    Gte(Value),
    /// Less than, within the same type class.
    Lt(Value),
    /// Less than or equal, within the same type class.
    Lte(Value),
    /// Equal to any listed value.
    In(Vec<Value>),
    /// Equal to none of the listed values.
    Nin(Vec<Value>),
    /// Field presence.
    Exists(bool),
    /// String matches the pattern.
    Regex(Regex),
    /// Negation of the inner predicate.
    Not(Box<FieldOp>),
    /// Array contains every listed value.
    All(Vec<Value>),
    /// Array has exactly this many elements.
    Size(usize),
    /// Some array element matches the selector.
    ElemMatch(Box<Selector>),
    /// Some array element satisfies the predicate.
    ElemMatchOp(Box<FieldOp>),
    /// Every predicate holds.
    Every(Vec<FieldOp>),
}

/// A record-matching expression.
#[derive(Debug, Clone)]
pub enum Selector {
    /// A predicate on one dotted field path.
    Field {
        /// Dotted path into the record.
        path: String,
        /// Predicate applied to the values found at `path`.
        op: FieldOp,
    },
    /// Every sub-selector matches.
    And(Vec<Selector>),
    /// At least one sub-selector matches.
    Or(Vec<Selector>),
    /// No sub-selector matches.
    Nor(Vec<Selector>),
    /// Matches everything.
    All,
}

impl Selector {
    /// Shorthand for an equality predicate.
    pub fn eq(path: impl Into<String>, value: Value) -> Self {
        Self::Field {
            path: path.into(),
            op: FieldOp::Eq(value),
        }
    }

    /// Parses a MongoDB-style selector document.
    ///
    /// # Errors
    ///
    /// Returns an error for non-object input, malformed operator arguments
    /// and unsupported operators such as `$where` and `$text`.
    pub fn parse(doc: &Value) -> Result<Self, QueryError> {
        let Value::Object(map) = doc else {
            return Err(QueryError::InvalidSelector(format!(
                "expected an object, got {doc}"
            )));
        };

        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Self::And(parse_list(key, value)?),
                "$or" => Self::Or(parse_list(key, value)?),
                "$nor" => Self::Nor(parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(QueryError::UnsupportedOperator(op.to_string()))
                }
                path => Self::Field {
                    path: path.to_string(),
                    op: parse_condition(value)?,
                },
            };
            clauses.push(clause);
        }

        Ok(match clauses.len() {
            0 => Self::All,
            1 => clauses.remove(0),
            _ => Self::And(clauses),
        })
    }

    /// Tests a JSON document against this selector.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::All => true,
            Self::And(list) => list.iter().all(|s| s.matches(doc)),
            Self::Or(list) => list.iter().any(|s| s.matches(doc)),
            Self::Nor(list) => !list.iter().any(|s| s.matches(doc)),
            Self::Field { path, op } => {
                let segments: Vec<&str> = path.split('.').collect();
                let mut found = Vec::new();
                collect_path(doc, &segments, &mut found);
                op.matches(&found)
            }
        }
    }
}

fn parse_list(op: &str, value: &Value) -> Result<Vec<Selector>, QueryError> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Selector::parse).collect(),
        _ => Err(QueryError::invalid_argument(op, "expected a non-empty array")),
    }
}

fn is_operator_doc(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

/// Parses the value side of `{ path: condition }`.
fn parse_condition(value: &Value) -> Result<FieldOp, QueryError> {
    match value {
        Value::Object(map) if is_operator_doc(map) => parse_operators(map),
        literal => Ok(FieldOp::Eq(literal.clone())),
    }
}

fn parse_operators(map: &Map<String, Value>) -> Result<FieldOp, QueryError> {
    let options = match map.get("$options") {
        Some(Value::String(flags)) => Some(flags.as_str()),
        Some(_) => return Err(QueryError::invalid_argument("$options", "expected a string")),
        None => None,
    };
    if options.is_some() && !map.contains_key("$regex") {
        return Err(QueryError::invalid_argument("$options", "requires $regex"));
    }

    let mut ops = Vec::with_capacity(map.len());
    for (name, arg) in map {
        if name == "$options" {
            continue;
        }
        ops.push(parse_operator(name, arg, options)?);
    }

    Ok(if ops.len() == 1 {
        ops.remove(0)
    } else {
        FieldOp::Every(ops)
    })
}

fn parse_operator(name: &str, arg: &Value, options: Option<&str>) -> Result<FieldOp, QueryError> {
    let op = match name {
        "$eq" => FieldOp::Eq(arg.clone()),
        "$ne" => FieldOp::Ne(arg.clone()),
        "$gt" => FieldOp::Gt(arg.clone()),
        "$gte" => FieldOp::Gte(arg.clone()),
        "$lt" => FieldOp::Lt(arg.clone()),
        "$lte" => FieldOp::Lte(arg.clone()),
        "$in" => FieldOp::In(expect_array(name, arg)?),
        "$nin" => FieldOp::Nin(expect_array(name, arg)?),
        "$all" => FieldOp::All(expect_array(name, arg)?),
        "$exists" => FieldOp::Exists(truthy(arg)),
        "$size" => {
            let size = arg
                .as_u64()
                .ok_or_else(|| QueryError::invalid_argument(name, "expected a non-negative integer"))?;
            FieldOp::Size(usize::try_from(size).unwrap_or(usize::MAX))
        }
        "$regex" => {
            let pattern = arg
                .as_str()
                .ok_or_else(|| QueryError::invalid_argument(name, "expected a string"))?;
            FieldOp::Regex(build_regex(pattern, options.unwrap_or(""))?)
        }
        "$not" => match arg {
            Value::Object(map) if is_operator_doc(map) => {
                FieldOp::Not(Box::new(parse_operators(map)?))
            }
            _ => return Err(QueryError::invalid_argument(name, "expected an operator document")),
        },
        "$elemMatch" => match arg {
            Value::Object(map) if is_operator_doc(map) && !has_logical(map) => {
                FieldOp::ElemMatchOp(Box::new(parse_operators(map)?))
            }
            Value::Object(_) => FieldOp::ElemMatch(Box::new(Selector::parse(arg)?)),
            _ => return Err(QueryError::invalid_argument(name, "expected an object")),
        },
        other => return Err(QueryError::UnsupportedOperator(other.to_string())),
    };
    Ok(op)
}

fn has_logical(map: &Map<String, Value>) -> bool {
    ["$and", "$or", "$nor"].iter().any(|k| map.contains_key(*k))
}

fn expect_array(op: &str, arg: &Value) -> Result<Vec<Value>, QueryError> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| QueryError::invalid_argument(op, "expected an array"))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, QueryError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(QueryError::invalid_argument(
                    "$options",
                    format!("unknown flag '{other}'"),
                ))
            }
        };
    }
    builder
        .build()
        .map_err(|e| QueryError::invalid_argument("$regex", e.to_string()))
}

/// Collects every value reachable through `segments`, fanning out over arrays.
fn collect_path<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect_path(next, rest, out);
            }
        }
        Value::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    collect_path(next, rest, out);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| item.is_object()) {
                    collect_path(item, segments, out);
                }
            }
        },
        _ => {}
    }
}

/// Ordering within one type class; `None` across classes.
fn compare_same_class(a: &Value, b: &Value) -> Option<Ordering> {
    let same = matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
            | (Value::Null, Value::Null)
            | (Value::Array(_), Value::Array(_))
            | (Value::Object(_), Value::Object(_))
    );
    same.then(|| compare_values(a, b))
}

impl FieldOp {
    /// Applies the predicate to the values found at a path (empty if missing).
    fn matches(&self, found: &[&Value]) -> bool {
        match self {
            Self::Ne(v) => !Self::Eq(v.clone()).matches(found),
            Self::Nin(list) => !Self::In(list.clone()).matches(found),
            Self::Not(inner) => !inner.matches(found),
            Self::Exists(expected) => !found.is_empty() == *expected,
            Self::Every(ops) => ops.iter().all(|op| op.matches(found)),
            _ if found.is_empty() => self.matches_missing(),
            _ => found.iter().any(|v| self.matches_value(v)),
        }
    }

    fn matches_missing(&self) -> bool {
        match self {
            Self::Eq(Value::Null) => true,
            Self::In(list) => list.iter().any(Value::is_null),
            _ => false,
        }
    }

    fn matches_value(&self, value: &Value) -> bool {
        let elements = value.as_array();
        let any_element = |pred: &dyn Fn(&Value) -> bool| {
            pred(value) || elements.is_some_and(|items| items.iter().any(|item| pred(item)))
        };

        match self {
            Self::Eq(expected) => any_element(&|v| values_equal(v, expected)),
            Self::Gt(bound) => any_element(&|v| compare_same_class(v, bound) == Some(Ordering::Greater)),
            Self::Gte(bound) => any_element(&|v| {
                matches!(compare_same_class(v, bound), Some(Ordering::Greater | Ordering::Equal))
            }),
            Self::Lt(bound) => any_element(&|v| compare_same_class(v, bound) == Some(Ordering::Less)),
            Self::Lte(bound) => any_element(&|v| {
                matches!(compare_same_class(v, bound), Some(Ordering::Less | Ordering::Equal))
            }),
            Self::In(list) => list
                .iter()
                .any(|candidate| any_element(&|v| values_equal(v, candidate))),
            Self::Regex(re) => any_element(&|v| v.as_str().is_some_and(|s| re.is_match(s))),
            Self::All(list) => {
                !list.is_empty()
                    && elements.is_some_and(|items| {
                        list.iter()
                            .all(|wanted| items.iter().any(|item| values_equal(item, wanted)))
                    })
            }
            Self::Size(size) => elements.is_some_and(|items| items.len() == *size),
            Self::ElemMatch(selector) => {
                elements.is_some_and(|items| items.iter().any(|item| selector.matches(item)))
            }
            Self::ElemMatchOp(op) => {
                elements.is_some_and(|items| items.iter().any(|item| op.matches(&[item])))
            }
            Self::Ne(_) | Self::Nin(_) | Self::Not(_) | Self::Exists(_) | Self::Every(_) => {
                self.matches(&[value])
            }
        }
    }
}
