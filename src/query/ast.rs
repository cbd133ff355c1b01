//! Predicate, sort and projection structures.
//!
//! A predicate is a conjunction of per-field clauses plus optional `$or` /
//! `$nor` branch lists. Clauses use the `$`-operator dialect; a bare value is
//! an equality. The predicate is immutable once handed to the planner.

use std::collections::BTreeSet;

use serde_json::Value;

use super::errors::{QueryError, QueryResult};

/// Special access kind tag requested by a geospatial clause
pub const SPECIAL_2D: &str = "2d";

/// One operator applied to a field
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseOp {
    /// Equality: field = value
    Eq(Value),
    /// Greater than
    Gt(Value),
    /// Greater than or equal
    Gte(Value),
    /// Less than
    Lt(Value),
    /// Less than or equal
    Lte(Value),
    /// Membership in a finite set
    In(Vec<Value>),
    /// Field existence test
    Exists(bool),
    /// Regex; only a literal `^prefix` is exploited for bounds
    Regex(String),
    /// Negation of an inner operator
    Not(Box<ClauseOp>),
    /// Geospatial near-point; served by a special access path
    Near(f64, f64),
}

impl ClauseOp {
    /// Operator name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ClauseOp::Eq(_) => "$eq",
            ClauseOp::Gt(_) => "$gt",
            ClauseOp::Gte(_) => "$gte",
            ClauseOp::Lt(_) => "$lt",
            ClauseOp::Lte(_) => "$lte",
            ClauseOp::In(_) => "$in",
            ClauseOp::Exists(_) => "$exists",
            ClauseOp::Regex(_) => "$regex",
            ClauseOp::Not(_) => "$not",
            ClauseOp::Near(_, _) => "$near",
        }
    }

    /// True if this is a plain equality
    pub fn is_equality(&self) -> bool {
        matches!(self, ClauseOp::Eq(_))
    }

    /// True if this is a half-open range bound
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            ClauseOp::Gt(_) | ClauseOp::Gte(_) | ClauseOp::Lt(_) | ClauseOp::Lte(_)
        )
    }

    /// True for `$exists` in any polarity, including under `$not`
    pub fn is_exists_form(&self) -> bool {
        match self {
            ClauseOp::Exists(_) => true,
            ClauseOp::Not(inner) => inner.is_exists_form(),
            _ => false,
        }
    }
}

/// A field name paired with one operator
#[derive(Debug, Clone, PartialEq)]
pub struct FieldClause {
    /// Field name
    pub field: String,
    /// Operator
    pub op: ClauseOp,
}

impl FieldClause {
    pub fn new(field: impl Into<String>, op: ClauseOp) -> Self {
        Self {
            field: field.into(),
            op,
        }
    }

    /// Equality clause
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, ClauseOp::Eq(value))
    }

    /// `$in` clause
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(field, ClauseOp::In(values))
    }
}

/// A parsed predicate: top-level AND of clauses, plus branch lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    /// Per-field clauses, all required to match
    pub clauses: Vec<FieldClause>,
    /// `$or` branches; when non-empty, at least one branch must match
    pub or_branches: Vec<Predicate>,
    /// `$nor` branches; no branch may match
    pub nor_branches: Vec<Predicate>,
}

impl Predicate {
    /// Empty predicate matching every document
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a JSON query document.
    pub fn parse(query: &Value) -> QueryResult<Self> {
        let map = match query {
            Value::Object(map) => map,
            Value::Null => return Ok(Self::empty()),
            _ => {
                return Err(QueryError::InvalidOperand {
                    operator: "query".into(),
                    field: String::new(),
                    reason: "query must be a document".into(),
                })
            }
        };

        let mut predicate = Predicate::empty();
        for (key, value) in map {
            match key.as_str() {
                "$and" => {
                    for branch in Self::parse_branch_list("$and", value)? {
                        predicate.merge(branch);
                    }
                }
                "$or" => {
                    if !predicate.or_branches.is_empty() {
                        return Err(QueryError::InvalidBranchList("$or".into()));
                    }
                    predicate.or_branches = Self::parse_branch_list("$or", value)?;
                }
                "$nor" => {
                    predicate
                        .nor_branches
                        .extend(Self::parse_branch_list("$nor", value)?);
                }
                other if other.starts_with('$') => {
                    return Err(QueryError::UnknownOperator(other.to_string()));
                }
                field => {
                    Self::parse_field(field, value, &mut predicate.clauses)?;
                }
            }
        }
        Ok(predicate)
    }

    fn parse_branch_list(operator: &str, value: &Value) -> QueryResult<Vec<Predicate>> {
        let items = value
            .as_array()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| QueryError::InvalidBranchList(operator.to_string()))?;
        items.iter().map(Self::parse).collect()
    }

    fn parse_field(field: &str, value: &Value, out: &mut Vec<FieldClause>) -> QueryResult<()> {
        match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                for (op_name, operand) in map {
                    let op = Self::parse_operator(field, op_name, operand)?;
                    out.push(FieldClause::new(field, op));
                }
                Ok(())
            }
            // A plain value, including an object with no $-operators, is an
            // equality match.
            other => {
                out.push(FieldClause::eq(field, other.clone()));
                Ok(())
            }
        }
    }

    fn parse_operator(field: &str, op_name: &str, operand: &Value) -> QueryResult<ClauseOp> {
        let invalid = |reason: &str| QueryError::InvalidOperand {
            operator: op_name.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };
        match op_name {
            "$eq" => Ok(ClauseOp::Eq(operand.clone())),
            "$gt" => Ok(ClauseOp::Gt(operand.clone())),
            "$gte" => Ok(ClauseOp::Gte(operand.clone())),
            "$lt" => Ok(ClauseOp::Lt(operand.clone())),
            "$lte" => Ok(ClauseOp::Lte(operand.clone())),
            "$ne" => Ok(ClauseOp::Not(Box::new(ClauseOp::Eq(operand.clone())))),
            "$in" => {
                let items = operand.as_array().ok_or_else(|| invalid("expected array"))?;
                Ok(ClauseOp::In(items.clone()))
            }
            "$exists" => {
                let flag = operand.as_bool().ok_or_else(|| invalid("expected bool"))?;
                Ok(ClauseOp::Exists(flag))
            }
            "$regex" => {
                let pattern = operand.as_str().ok_or_else(|| invalid("expected string"))?;
                Ok(ClauseOp::Regex(pattern.to_string()))
            }
            "$not" => {
                let inner = operand
                    .as_object()
                    .ok_or_else(|| invalid("expected operator document"))?;
                let (inner_name, inner_operand) = inner
                    .iter()
                    .next()
                    .ok_or_else(|| invalid("expected one inner operator"))?;
                let inner_op = Self::parse_operator(field, inner_name, inner_operand)?;
                Ok(ClauseOp::Not(Box::new(inner_op)))
            }
            "$near" => {
                let point = operand
                    .as_array()
                    .filter(|a| a.len() == 2)
                    .ok_or_else(|| invalid("expected [x, y]"))?;
                let x = point[0].as_f64().ok_or_else(|| invalid("expected [x, y]"))?;
                let y = point[1].as_f64().ok_or_else(|| invalid("expected [x, y]"))?;
                Ok(ClauseOp::Near(x, y))
            }
            other => Err(QueryError::UnknownOperator(other.to_string())),
        }
    }

    /// Fold another predicate's clauses and branches into this one (AND).
    pub fn merge(&mut self, other: Predicate) {
        self.clauses.extend(other.clauses);
        self.or_branches.extend(other.or_branches);
        self.nor_branches.extend(other.nor_branches);
    }

    /// Add a clause (builder style).
    pub fn with_clause(mut self, clause: FieldClause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// True when nothing constrains the document.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty() && self.or_branches.is_empty() && self.nor_branches.is_empty()
    }

    /// Special access kind requested by any geospatial clause.
    pub fn special_kind(&self) -> Option<&'static str> {
        self.clauses
            .iter()
            .any(|c| matches!(c.op, ClauseOp::Near(_, _)))
            .then_some(SPECIAL_2D)
    }

    /// Distinct top-level field names referenced by clauses.
    pub fn field_names(&self) -> BTreeSet<&str> {
        self.clauses.iter().map(|c| c.field.as_str()).collect()
    }

    /// True when a sparse index (which omits documents lacking the indexed
    /// field) cannot be trusted for this predicate: a top-level
    /// `$exists:false` or `$not:{$exists:true}`, or any `$exists` form
    /// nested inside `$or` / `$nor`.
    pub fn excludes_sparse_indexes(&self) -> bool {
        let top_level_unsafe = self.clauses.iter().any(|c| match &c.op {
            ClauseOp::Exists(false) => true,
            ClauseOp::Not(inner) => matches!(**inner, ClauseOp::Exists(true)),
            _ => false,
        });
        let nested_unsafe = self
            .or_branches
            .iter()
            .chain(self.nor_branches.iter())
            .any(Self::contains_exists_form);
        top_level_unsafe || nested_unsafe
    }

    fn contains_exists_form(branch: &Predicate) -> bool {
        branch.clauses.iter().any(|c| c.op.is_exists_form())
            || branch
                .or_branches
                .iter()
                .chain(branch.nor_branches.iter())
                .any(Self::contains_exists_form)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }

    pub fn from_i32(v: i64) -> Option<Self> {
        match v {
            1 => Some(SortDirection::Asc),
            -1 => Some(SortDirection::Desc),
            _ => None,
        }
    }

    pub fn reversed(&self) -> Self {
        match self {
            SortDirection::Asc => SortDirection::Desc,
            SortDirection::Desc => SortDirection::Asc,
        }
    }
}

/// An ordered sort specification; empty means unordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SortKey {
    /// Fields in significance order with their directions
    pub fields: Vec<(String, SortDirection)>,
}

impl SortKey {
    /// Unordered sort
    pub fn none() -> Self {
        Self::default()
    }

    /// Single ascending field
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            fields: vec![(field.into(), SortDirection::Asc)],
        }
    }

    /// Parse a `{field: ±1, ...}` document. Field order is significant.
    pub fn parse(sort: &Value) -> QueryResult<Self> {
        let map = match sort {
            Value::Null => return Ok(Self::none()),
            Value::Object(map) => map,
            _ => return Err(QueryError::InvalidSort("sort must be a document".into())),
        };
        let mut fields = Vec::with_capacity(map.len());
        for (field, dir) in map {
            let n = dir
                .as_i64()
                .and_then(SortDirection::from_i32)
                .ok_or_else(|| {
                    QueryError::InvalidSort(format!("direction for '{}' must be 1 or -1", field))
                })?;
            fields.push((field.clone(), n));
        }
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render back as a JSON document.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::new();
        for (field, dir) in &self.fields {
            map.insert(field.clone(), Value::from(dir.as_i32()));
        }
        Value::Object(map)
    }
}

/// A parsed projection: which fields the caller wants back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Projected field names (inclusion list)
    pub fields: Vec<String>,
    /// Whether `_id` is included (defaults to true)
    pub include_id: bool,
    /// True for inclusion projections; exclusion projections can never be
    /// covered by an index
    pub inclusive: bool,
}

impl Projection {
    /// Parse a `{field: 0|1, ...}` document.
    ///
    /// Mixing inclusion and exclusion is rejected, except for `_id` which
    /// may always be excluded from an inclusion projection.
    pub fn parse(projection: &Value) -> QueryResult<Self> {
        let map = projection
            .as_object()
            .ok_or_else(|| QueryError::InvalidProjection("projection must be a document".into()))?;
        let mut fields = Vec::new();
        let mut include_id = true;
        let mut mode: Option<bool> = None;
        for (field, flag) in map {
            let include = match flag.as_i64() {
                Some(0) => false,
                Some(1) => true,
                _ => {
                    return Err(QueryError::InvalidProjection(format!(
                        "flag for '{}' must be 0 or 1",
                        field
                    )))
                }
            };
            if field == "_id" {
                include_id = include;
                continue;
            }
            match mode {
                None => mode = Some(include),
                Some(m) if m != include => {
                    return Err(QueryError::InvalidProjection(
                        "cannot mix inclusion and exclusion".into(),
                    ))
                }
                _ => {}
            }
            fields.push(field.clone());
        }
        Ok(Self {
            fields,
            include_id,
            inclusive: mode.unwrap_or(false),
        })
    }

    /// Shape a result document according to this projection.
    pub fn apply(&self, doc: &Value) -> Value {
        let Some(map) = doc.as_object() else {
            return doc.clone();
        };
        let mut out = serde_json::Map::new();
        if self.inclusive {
            if self.include_id {
                if let Some(id) = map.get("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
            for field in &self.fields {
                if let Some(v) = map.get(field) {
                    out.insert(field.clone(), v.clone());
                }
            }
        } else {
            for (k, v) in map {
                if k == "_id" && !self.include_id {
                    continue;
                }
                if self.fields.contains(k) {
                    continue;
                }
                out.insert(k.clone(), v.clone());
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_plain_equality() {
        let p = Predicate::parse(&json!({"a": 4})).unwrap();
        assert_eq!(p.clauses.len(), 1);
        assert_eq!(p.clauses[0], FieldClause::eq("a", json!(4)));
        assert!(p.or_branches.is_empty());
    }

    #[test]
    fn test_parse_operator_document() {
        let p = Predicate::parse(&json!({"age": {"$gte": 18, "$lt": 65}})).unwrap();
        assert_eq!(p.clauses.len(), 2);
        assert_eq!(p.clauses[0].op, ClauseOp::Gte(json!(18)));
        assert_eq!(p.clauses[1].op, ClauseOp::Lt(json!(65)));
    }

    #[test]
    fn test_parse_ne_desugars_to_not_eq() {
        let p = Predicate::parse(&json!({"a": {"$ne": 0}})).unwrap();
        assert_eq!(
            p.clauses[0].op,
            ClauseOp::Not(Box::new(ClauseOp::Eq(json!(0))))
        );
    }

    #[test]
    fn test_parse_or_branches() {
        let p = Predicate::parse(&json!({"x": 1, "$or": [{"a": 1}, {"b": 2}]})).unwrap();
        assert_eq!(p.clauses.len(), 1);
        assert_eq!(p.or_branches.len(), 2);
        assert_eq!(p.or_branches[1].clauses[0], FieldClause::eq("b", json!(2)));
    }

    #[test]
    fn test_parse_and_flattens() {
        let p = Predicate::parse(&json!({"$and": [{"a": 1}, {"b": {"$gt": 2}}]})).unwrap();
        assert_eq!(p.clauses.len(), 2);
    }

    #[test]
    fn test_empty_or_rejected() {
        let err = Predicate::parse(&json!({"$or": []})).unwrap_err();
        assert_eq!(err.code(), "QUILL_QUERY_INVALID_BRANCH_LIST");
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = Predicate::parse(&json!({"a": {"$frobnicate": 1}})).unwrap_err();
        assert_eq!(err, QueryError::UnknownOperator("$frobnicate".into()));
    }

    #[test]
    fn test_object_without_operators_is_equality() {
        let p = Predicate::parse(&json!({"a": {"c": "d"}})).unwrap();
        assert_eq!(p.clauses[0].op, ClauseOp::Eq(json!({"c": "d"})));
    }

    #[test]
    fn test_special_kind_from_near() {
        let p = Predicate::parse(&json!({"a": {"$near": [50, 50]}})).unwrap();
        assert_eq!(p.special_kind(), Some(SPECIAL_2D));

        let p2 = Predicate::parse(&json!({"a": [0, 0]})).unwrap();
        assert_eq!(p2.special_kind(), None);
    }

    #[test]
    fn test_sparse_exclusion_top_level() {
        // Plain predicates and $exists:true allow sparse indexes.
        for allowed in [json!({"a": 1}), json!({"a": {"$exists": true}})] {
            assert!(!Predicate::parse(&allowed).unwrap().excludes_sparse_indexes());
        }
        // $exists:false and $not:{$exists:true} exclude them, on any field.
        for disallowed in [
            json!({"a": {"$exists": false}}),
            json!({"b": {"$exists": false}}),
            json!({"a": {"$not": {"$exists": true}}}),
        ] {
            assert!(
                Predicate::parse(&disallowed).unwrap().excludes_sparse_indexes(),
                "{disallowed} should exclude sparse indexes"
            );
        }
        // $not:{$exists:false} is fine at top level.
        let p = Predicate::parse(&json!({"a": {"$not": {"$exists": false}}})).unwrap();
        assert!(!p.excludes_sparse_indexes());
    }

    #[test]
    fn test_sparse_exclusion_nested() {
        // Non-$exists branches are fine.
        let p = Predicate::parse(&json!({"$nor": [{"a": 1}]})).unwrap();
        assert!(!p.excludes_sparse_indexes());
        // Any $exists form under $nor or $or excludes sparse indexes.
        for nested in [
            json!({"$nor": [{"a": {"$exists": false}}]}),
            json!({"$nor": [{"b": {"$exists": true}}]}),
            json!({"$nor": [{"a": {"$not": {"$exists": false}}}]}),
            json!({"$or": [{"a": {"$exists": true}}, {"b": 1}]}),
        ] {
            assert!(
                Predicate::parse(&nested).unwrap().excludes_sparse_indexes(),
                "{nested} should exclude sparse indexes"
            );
        }
    }

    #[test]
    fn test_sort_key_order_preserved() {
        let sort = SortKey::parse(&json!({"a": 1, "b": -1})).unwrap();
        assert_eq!(
            sort.fields,
            vec![
                ("a".to_string(), SortDirection::Asc),
                ("b".to_string(), SortDirection::Desc)
            ]
        );
        assert_eq!(sort.to_json(), json!({"a": 1, "b": -1}));
    }

    #[test]
    fn test_sort_rejects_bad_direction() {
        assert!(SortKey::parse(&json!({"a": 2})).is_err());
        assert!(SortKey::parse(&json!("a")).is_err());
    }

    #[test]
    fn test_projection_parsing() {
        let p = Projection::parse(&json!({"_id": 0, "a": 1})).unwrap();
        assert!(p.inclusive);
        assert!(!p.include_id);
        assert_eq!(p.fields, vec!["a"]);

        let err = Projection::parse(&json!({"a": 1, "b": 0})).unwrap_err();
        assert_eq!(err.code(), "QUILL_QUERY_INVALID_PROJECTION");
    }

    #[test]
    fn test_projection_apply() {
        let doc = json!({"_id": 7, "a": 1, "b": 2});

        let p = Projection::parse(&json!({"a": 1})).unwrap();
        assert_eq!(p.apply(&doc), json!({"_id": 7, "a": 1}));

        let p = Projection::parse(&json!({"_id": 0, "a": 1})).unwrap();
        assert_eq!(p.apply(&doc), json!({"a": 1}));

        let p = Projection::parse(&json!({"b": 0})).unwrap();
        assert_eq!(p.apply(&doc), json!({"_id": 7, "a": 1}));
    }
}
