//! Residual document matcher.
//!
//! Re-checks documents against the full predicate after an index scan has
//! narrowed the candidates. Comparison is strict: numbers compare
//! numerically, strings compare as strings, and there is no cross-type
//! coercion.
//!
//! Regex matching is limited to the literal-prefix forms the planner
//! exploits: `^literal` matches by prefix, a bare literal by substring.
//! Metacharacters after the literal part are ignored by the match (the
//! planner has already bounded the scan by the prefix).

use serde_json::Value;

use crate::key::KeyValue;

use super::ast::{ClauseOp, Predicate};

/// Evaluates a predicate against documents.
#[derive(Debug, Clone)]
pub struct Matcher {
    predicate: Predicate,
}

impl Matcher {
    /// Build a matcher for a predicate.
    pub fn new(predicate: Predicate) -> Self {
        Self { predicate }
    }

    /// The wrapped predicate.
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    /// True when the document satisfies the full predicate.
    pub fn matches(&self, document: &Value) -> bool {
        Self::matches_predicate(&self.predicate, document)
    }

    fn matches_predicate(predicate: &Predicate, document: &Value) -> bool {
        let clauses_ok = predicate
            .clauses
            .iter()
            .all(|clause| Self::matches_op(document.get(&clause.field), &clause.op));
        if !clauses_ok {
            return false;
        }
        if !predicate.or_branches.is_empty()
            && !predicate
                .or_branches
                .iter()
                .any(|branch| Self::matches_predicate(branch, document))
        {
            return false;
        }
        predicate
            .nor_branches
            .iter()
            .all(|branch| !Self::matches_predicate(branch, document))
    }

    fn matches_op(field_value: Option<&Value>, op: &ClauseOp) -> bool {
        match op {
            ClauseOp::Exists(wanted) => field_value.is_some() == *wanted,
            ClauseOp::Not(inner) => !Self::matches_op(field_value, inner),
            _ => {
                let Some(actual) = field_value else {
                    return false;
                };
                if Self::matches_value(actual, op) {
                    return true;
                }
                // An array field matches when any element does (the index
                // fans arrays out per element the same way).
                actual
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| Self::matches_value(item, op)))
            }
        }
    }

    fn matches_value(actual: &Value, op: &ClauseOp) -> bool {
        match op {
            ClauseOp::Eq(expected) => Self::values_equal(actual, expected),
            ClauseOp::Gt(bound) => Self::compare_same_class(actual, bound)
                .is_some_and(|o| o == std::cmp::Ordering::Greater),
            ClauseOp::Gte(bound) => Self::compare_same_class(actual, bound)
                .is_some_and(|o| o != std::cmp::Ordering::Less),
            ClauseOp::Lt(bound) => Self::compare_same_class(actual, bound)
                .is_some_and(|o| o == std::cmp::Ordering::Less),
            ClauseOp::Lte(bound) => Self::compare_same_class(actual, bound)
                .is_some_and(|o| o != std::cmp::Ordering::Greater),
            ClauseOp::In(values) => values.iter().any(|v| Self::values_equal(actual, v)),
            ClauseOp::Regex(pattern) => actual
                .as_str()
                .is_some_and(|s| Self::regex_matches(pattern, s)),
            // Distance ordering belongs to the special access path; the
            // residual check only validates the point shape.
            ClauseOp::Near(_, _) => Self::is_point(actual),
            ClauseOp::Exists(_) | ClauseOp::Not(_) => unreachable!(),
        }
    }

    /// Equality through the ordered key domain, so 3 == 3.0.
    fn values_equal(a: &Value, b: &Value) -> bool {
        KeyValue::from_json(a) == KeyValue::from_json(b)
    }

    /// Ordering only within a comparable class (numbers or strings).
    fn compare_same_class(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
        match (a, b) {
            (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
                Some(KeyValue::from_json(a).cmp(&KeyValue::from_json(b)))
            }
            _ => None,
        }
    }

    fn regex_matches(pattern: &str, value: &str) -> bool {
        let (anchored, rest) = match pattern.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, pattern),
        };
        let literal = literal_prefix(rest);
        if anchored {
            value.starts_with(literal)
        } else {
            value.contains(literal)
        }
    }

    fn is_point(value: &Value) -> bool {
        value
            .as_array()
            .is_some_and(|a| a.len() == 2 && a.iter().all(|v| v.is_number()))
    }
}

/// Longest leading run of the pattern with no regex metacharacters.
pub fn literal_prefix(pattern: &str) -> &str {
    let end = pattern
        .find(|c: char| ".^$*+?()[]{}|\\".contains(c))
        .unwrap_or(pattern.len());
    &pattern[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(query: serde_json::Value) -> Matcher {
        Matcher::new(Predicate::parse(&query).unwrap())
    }

    #[test]
    fn test_equality_match() {
        let m = matcher(json!({"name": "Alice"}));
        assert!(m.matches(&json!({"name": "Alice", "age": 30})));
        assert!(!m.matches(&json!({"name": "Bob"})));
        assert!(!m.matches(&json!({})));
    }

    #[test]
    fn test_numeric_equality_across_representations() {
        let m = matcher(json!({"n": 3}));
        assert!(m.matches(&json!({"n": 3.0})));
        assert!(!m.matches(&json!({"n": "3"})));
    }

    #[test]
    fn test_range_predicates() {
        let m = matcher(json!({"age": {"$gte": 18, "$lt": 65}}));
        assert!(m.matches(&json!({"age": 18})));
        assert!(m.matches(&json!({"age": 40})));
        assert!(!m.matches(&json!({"age": 65})));
        assert!(!m.matches(&json!({"age": "forty"})));
    }

    #[test]
    fn test_in_membership() {
        let m = matcher(json!({"a": {"$in": [2, 3, 6]}}));
        assert!(m.matches(&json!({"a": 3})));
        assert!(!m.matches(&json!({"a": 4})));
        assert!(!matcher(json!({"a": {"$in": []}})).matches(&json!({"a": 1})));
    }

    #[test]
    fn test_exists() {
        let m = matcher(json!({"a": {"$exists": true}}));
        assert!(m.matches(&json!({"a": null})));
        assert!(!m.matches(&json!({"b": 1})));

        let m = matcher(json!({"a": {"$exists": false}}));
        assert!(m.matches(&json!({"b": 1})));
        assert!(!m.matches(&json!({"a": 1})));
    }

    #[test]
    fn test_ne_matches_missing() {
        let m = matcher(json!({"_id": {"$ne": 0}}));
        assert!(m.matches(&json!({"_id": 1})));
        assert!(!m.matches(&json!({"_id": 0})));
        assert!(m.matches(&json!({"x": 1})));
    }

    #[test]
    fn test_regex_prefix() {
        let m = matcher(json!({"a": {"$regex": "^ddd"}}));
        assert!(m.matches(&json!({"a": "dddzzz"})));
        assert!(!m.matches(&json!({"a": "zddd"})));
        assert!(!m.matches(&json!({"a": 7})));

        let m = matcher(json!({"a": {"$regex": "dd"}}));
        assert!(m.matches(&json!({"a": "zddz"})));
    }

    #[test]
    fn test_or_and_nor_branches() {
        let m = matcher(json!({"x": 1, "$or": [{"a": 1}, {"b": 2}]}));
        assert!(m.matches(&json!({"x": 1, "b": 2})));
        assert!(!m.matches(&json!({"x": 1, "b": 3})));
        assert!(!m.matches(&json!({"x": 2, "a": 1})));

        let m = matcher(json!({"$nor": [{"a": 1}]}));
        assert!(m.matches(&json!({"a": 2})));
        assert!(!m.matches(&json!({"a": 1})));
    }

    #[test]
    fn test_array_field_element_membership() {
        // A scalar equality matches an array field containing the value.
        let m = matcher(json!({"a": 1}));
        assert!(m.matches(&json!({"a": [1, 2]})));
        assert!(!m.matches(&json!({"a": [2, 3]})));

        // Whole-array equality still matches.
        let m = matcher(json!({"a": [0, 0]}));
        assert!(m.matches(&json!({"a": [0, 0]})));
        assert!(!m.matches(&json!({"a": [0, 1]})));

        // Ranges and $in see elements too.
        let m = matcher(json!({"a": {"$gt": 5}}));
        assert!(m.matches(&json!({"a": [1, 9]})));
        let m = matcher(json!({"a": {"$in": [7]}}));
        assert!(m.matches(&json!({"a": [6, 7]})));
    }

    #[test]
    fn test_near_checks_point_shape() {
        let m = matcher(json!({"a": {"$near": [50, 50]}}));
        assert!(m.matches(&json!({"a": [1, 2]})));
        assert!(!m.matches(&json!({"a": "nowhere"})));
    }
}
