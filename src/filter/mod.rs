//! CQL2 filter expressions.
//!
//! Both surface syntaxes, CQL2-text and CQL2-JSON, are parsed with the
//! [cql2] crate and lowered into one [Predicate] tree. Equivalent expressions produce equal trees: nested
//! logical nodes of the same kind are flattened and `literal op property`
//! is turned around into `property op literal`.

mod lower;

use serde_json::{json, Map, Value};
use std::cmp::Ordering;

/// A comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    /// `=`
    Eq,

    /// `!=`, also spelled `<>`
    NotEq,

    /// `<`
    Lt,

    /// `<=`
    Lte,

    /// `>`
    Gt,

    /// `>=`
    Gte,
}

/// A logical operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    /// All operands hold.
    And,

    /// Any operand holds.
    Or,

    /// The single operand does not hold.
    Not,
}

/// A filter predicate.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// `property op literal`
    Comparison {
        /// The operator.
        op: ComparisonOp,

        /// The property reference.
        property: String,

        /// A string, number, or boolean.
        literal: Value,
    },

    /// A logical combination of predicates.
    Logical {
        /// The operator.
        op: LogicalOp,

        /// The operands, in order.
        args: Vec<Predicate>,
    },

    /// `property IS NULL`
    IsNull(String),
}

impl ComparisonOp {
    pub(crate) fn from_name(s: &str) -> Option<ComparisonOp> {
        match s {
            "=" | "eq" => Some(ComparisonOp::Eq),
            "!=" | "<>" | "neq" => Some(ComparisonOp::NotEq),
            "<" | "lt" => Some(ComparisonOp::Lt),
            "<=" | "lte" => Some(ComparisonOp::Lte),
            ">" | "gt" => Some(ComparisonOp::Gt),
            ">=" | "gte" => Some(ComparisonOp::Gte),
            _ => None,
        }
    }

    /// Returns the CQL2 symbol for this operator.
    pub fn symbol(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "<>",
            ComparisonOp::Lt => "<",
            ComparisonOp::Lte => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Gte => ">=",
        }
    }

    /// The operator that holds when the operands are swapped.
    pub fn flip(self) -> ComparisonOp {
        match self {
            ComparisonOp::Lt => ComparisonOp::Gt,
            ComparisonOp::Lte => ComparisonOp::Gte,
            ComparisonOp::Gt => ComparisonOp::Lt,
            ComparisonOp::Gte => ComparisonOp::Lte,
            op => op,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            ComparisonOp::Eq => ordering.is_eq(),
            ComparisonOp::NotEq => ordering.is_ne(),
            ComparisonOp::Lt => ordering.is_lt(),
            ComparisonOp::Lte => ordering.is_le(),
            ComparisonOp::Gt => ordering.is_gt(),
            ComparisonOp::Gte => ordering.is_ge(),
        }
    }
}

impl LogicalOp {
    fn name(self) -> &'static str {
        match self {
            LogicalOp::And => "and",
            LogicalOp::Or => "or",
            LogicalOp::Not => "not",
        }
    }
}

impl Predicate {
    /// Parses a CQL2-text expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use pgstac_search::Predicate;
    ///
    /// let text = Predicate::parse_text("foo = 'bar'").unwrap();
    /// let json = Predicate::parse_json(&serde_json::json!({
    ///     "op": "=",
    ///     "args": [{"property": "foo"}, "bar"]
    /// }))
    /// .unwrap();
    /// assert_eq!(text, json);
    /// ```
    pub fn parse_text(s: &str) -> crate::Result<Predicate> {
        lower::parse_text(s)
    }

    /// Parses a CQL2-JSON expression.
    pub fn parse_json(value: &Value) -> crate::Result<Predicate> {
        lower::parse_json(value)
    }

    /// Creates a comparison.
    pub fn comparison(op: ComparisonOp, property: impl ToString, literal: impl Into<Value>) -> Predicate {
        Predicate::Comparison {
            op,
            property: property.to_string(),
            literal: literal.into(),
        }
    }

    /// Conjunction, flattening nested conjunctions.
    pub fn and(args: Vec<Predicate>) -> Predicate {
        Predicate::combine(LogicalOp::And, args)
    }

    /// Disjunction, flattening nested disjunctions.
    pub fn or(args: Vec<Predicate>) -> Predicate {
        Predicate::combine(LogicalOp::Or, args)
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(arg: Predicate) -> Predicate {
        Predicate::Logical {
            op: LogicalOp::Not,
            args: vec![arg],
        }
    }

    fn combine(op: LogicalOp, args: Vec<Predicate>) -> Predicate {
        let mut flat = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Predicate::Logical { op: inner, args } if inner == op => flat.extend(args),
                arg => flat.push(arg),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Predicate::Logical { op, args: flat }
        }
    }

    /// Compiles this predicate to CQL2-JSON.
    pub fn to_cql2_json(&self) -> Value {
        match self {
            Predicate::Comparison {
                op,
                property,
                literal,
            } => json!({"op": op.symbol(), "args": [{"property": property}, literal]}),
            Predicate::Logical { op, args } => json!({
                "op": op.name(),
                "args": args.iter().map(Predicate::to_cql2_json).collect::<Vec<_>>(),
            }),
            Predicate::IsNull(property) => json!({"op": "isNull", "args": [{"property": property}]}),
        }
    }

    /// Evaluates this predicate against a feature.
    ///
    /// Evaluation is three-valued, as in SQL: a comparison against a missing
    /// or null property, or against a value of another type, is unknown, and
    /// only a predicate that is true matches. `not foo = 'x'` does not match
    /// a feature without `foo`.
    pub fn matches(&self, feature: &Map<String, Value>) -> bool {
        self.evaluate(feature, &compare) == Some(true)
    }

    /// Like [Predicate::matches], but values of different kinds compare in
    /// the order catalogs sort them, so a keyset predicate selects exactly
    /// the rows past its cursor.
    pub fn matches_in_sort_order(&self, feature: &Map<String, Value>) -> bool {
        self.evaluate(feature, &|a: &Value, b: &Value| Some(total_order(a, b))) == Some(true)
    }

    fn evaluate(&self, feature: &Map<String, Value>, compare: &Compare<'_>) -> Option<bool> {
        match self {
            Predicate::Comparison {
                op,
                property,
                literal,
            } => {
                let value = lookup(feature, property)?;
                compare(value, literal).map(|ordering| op.holds(ordering))
            }
            Predicate::Logical { op, args } => {
                let mut values = args.iter().map(|arg| arg.evaluate(feature, compare));
                match op {
                    LogicalOp::And => fold(&mut values, false),
                    LogicalOp::Or => fold(&mut values, true),
                    LogicalOp::Not => fold(&mut values, false).map(|value| !value),
                }
            }
            Predicate::IsNull(property) => Some(lookup(feature, property).is_none()),
        }
    }
}

type Compare<'a> = dyn Fn(&Value, &Value) -> Option<Ordering> + 'a;

/// Three-valued conjunction (`decisive == false`) or disjunction
/// (`decisive == true`).
fn fold(values: &mut dyn Iterator<Item = Option<bool>>, decisive: bool) -> Option<bool> {
    let mut unknown = false;
    for value in values {
        match value {
            Some(value) if value == decisive => return Some(decisive),
            Some(_) => {}
            None => unknown = true,
        }
    }
    if unknown {
        None
    } else {
        Some(!decisive)
    }
}

/// Resolves a property reference against a feature.
///
/// `id`, `collection`, and `geometry` are top-level; `properties.` prefixed
/// names are explicit; anything else is looked up in `properties`. Null
/// values resolve to `None`.
pub fn lookup<'a>(feature: &'a Map<String, Value>, property: &str) -> Option<&'a Value> {
    let value = match property {
        "id" | "collection" | "geometry" => feature.get(property),
        _ => {
            let name = property.strip_prefix("properties.").unwrap_or(property);
            feature
                .get("properties")
                .and_then(Value::as_object)
                .and_then(|properties| properties.get(name))
        }
    };
    value.filter(|value| !value.is_null())
}

/// Compares two scalar values of the same kind.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                Some(a.cmp(&b))
            } else {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Total order used for sorting: values of different kinds are ranked
/// booleans, numbers, strings, then anything else.
pub(crate) fn total_order(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }
    compare(a, b).unwrap_or_else(|| rank(a).cmp(&rank(b)))
}

#[cfg(test)]
mod tests {
    use super::{compare, lookup, ComparisonOp, LogicalOp, Predicate};
    use serde_json::{json, Map, Value};
    use std::cmp::Ordering;

    fn feature() -> Map<String, Value> {
        json!({
            "id": "a",
            "collection": "c",
            "properties": {"foo": "bar", "count": 3, "flag": true, "nothing": null},
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn text_and_json_agree() {
        let pairs = [
            (
                "foo = 'bar'",
                json!({"op": "=", "args": [{"property": "foo"}, "bar"]}),
            ),
            (
                "foo <> 'bar'",
                json!({"op": "<>", "args": [{"property": "foo"}, "bar"]}),
            ),
            (
                "count >= 3 and (flag = true or not foo < 'x')",
                json!({"op": "and", "args": [
                    {"op": ">=", "args": [{"property": "count"}, 3]},
                    {"op": "or", "args": [
                        {"op": "=", "args": [{"property": "flag"}, true]},
                        {"op": "not", "args": [{"op": "<", "args": [{"property": "foo"}, "x"]}]},
                    ]},
                ]}),
            ),
            (
                "a = 1 and b = 2 and c = 3",
                json!({"op": "and", "args": [
                    {"op": "=", "args": [{"property": "a"}, 1]},
                    {"op": "and", "args": [
                        {"op": "=", "args": [{"property": "b"}, 2]},
                        {"op": "=", "args": [{"property": "c"}, 3]},
                    ]},
                ]}),
            ),
            (
                "3 < count",
                json!({"op": ">", "args": [{"property": "count"}, 3]}),
            ),
            (
                "foo IS NULL",
                json!({"op": "isNull", "args": [{"property": "foo"}]}),
            ),
        ];
        for (text, value) in pairs {
            assert_eq!(
                Predicate::parse_text(text).unwrap(),
                Predicate::parse_json(&value).unwrap(),
                "{text}"
            );
        }
    }

    #[test]
    fn cql2_json_parses_back() {
        let predicate =
            Predicate::parse_text("not (foo = 'bar' or count > 2.5) and flag is not null").unwrap();
        assert_eq!(
            Predicate::parse_json(&predicate.to_cql2_json()).unwrap(),
            predicate
        );
    }

    #[test]
    fn flatten() {
        let predicate = Predicate::and(vec![
            Predicate::and(vec![Predicate::IsNull("a".into()), Predicate::IsNull("b".into())]),
            Predicate::IsNull("c".into()),
        ]);
        let Predicate::Logical { op, args } = predicate else {
            panic!("expected a logical predicate");
        };
        assert_eq!(op, LogicalOp::And);
        assert_eq!(args.len(), 3);
        assert_eq!(
            Predicate::or(vec![Predicate::IsNull("a".into())]),
            Predicate::IsNull("a".into())
        );
    }

    #[test]
    fn matches() {
        let feature = feature();
        let matches = |text: &str| Predicate::parse_text(text).unwrap().matches(&feature);
        assert!(matches("foo = 'bar'"));
        assert!(!matches("foo <> 'bar'"));
        assert!(matches("count > 2 and count <= 3"));
        assert!(matches("count = 3.0"));
        assert!(matches("flag = true"));
        assert!(!matches("foo = 3"));
        assert!(!matches("missing = 'bar'"));
        assert!(matches("missing is null"));
        assert!(matches("nothing is null"));
        assert!(matches("foo is not null"));
        assert!(matches("id = 'a' and collection = 'c'"));
        let explicit = json!({"op": "=", "args": [{"property": "properties.foo"}, "bar"]});
        assert!(Predicate::parse_json(&explicit).unwrap().matches(&feature));
        assert!(matches("not foo = 'baz'"));
    }

    #[test]
    fn unknown_is_not_negated() {
        let feature = feature();
        let matches = |text: &str| Predicate::parse_text(text).unwrap().matches(&feature);
        assert!(!matches("not missing = 'bar'"));
        assert!(!matches("not foo = 3"));
        assert!(matches("missing = 'bar' or foo = 'bar'"));
        assert!(!matches("not (missing = 'bar' and foo = 'bar')"));
        assert!(matches("not (missing = 'bar' and foo = 'baz')"));
    }

    #[test]
    fn sort_order_ranks_kinds() {
        let feature = feature();
        let gt_number = Predicate::comparison(ComparisonOp::Gt, "foo", 10);
        assert!(!gt_number.matches(&feature));
        assert!(gt_number.matches_in_sort_order(&feature));
        let lt_number = Predicate::comparison(ComparisonOp::Lt, "flag", 10);
        assert!(lt_number.matches_in_sort_order(&feature));
        let missing = Predicate::comparison(ComparisonOp::Gt, "missing", 10);
        assert!(!missing.matches_in_sort_order(&feature));
    }

    #[test]
    fn empty_logical() {
        let feature = feature();
        assert!(Predicate::and(Vec::new()).matches(&feature));
        assert!(!Predicate::or(Vec::new()).matches(&feature));
    }

    #[test]
    fn lookup_and_compare() {
        let feature = feature();
        assert_eq!(lookup(&feature, "foo"), Some(&json!("bar")));
        assert_eq!(lookup(&feature, "nothing"), None);
        assert_eq!(compare(&json!(1), &json!(1.5)), Some(Ordering::Less));
        assert_eq!(compare(&json!("a"), &json!(1)), None);
        assert_eq!(ComparisonOp::Lt.flip(), ComparisonOp::Gt);
    }
}
