//! Lowers parsed [cql2::Expr] trees into [Predicate]s.

use super::{ComparisonOp, Predicate};
use crate::{Error, Result};
use cql2::Expr;
use serde_json::{Number, Value};

// Largest float that still holds every integer exactly.
const MAX_EXACT: f64 = 9_007_199_254_740_992.0;

pub(super) fn parse_text(input: &str) -> Result<Predicate> {
    let input = input.trim();
    let expr = cql2::parse_text(input).map_err(|err| Error::filter_parse(input, err))?;
    predicate(&expr, "$")
}

pub(super) fn parse_json(value: &Value) -> Result<Predicate> {
    let expr =
        cql2::parse_json(&value.to_string()).map_err(|err| Error::filter_parse("$", err))?;
    predicate(&expr, "$")
}

fn predicate(expr: &Expr, path: &str) -> Result<Predicate> {
    let Expr::Operation { op, args } = expr else {
        return Err(Error::filter_parse(path, "expected an operation"));
    };
    let arg_path = |i: usize| format!("{path}.args[{i}]");
    match op.to_ascii_lowercase().as_str() {
        name @ ("and" | "or") => {
            if args.is_empty() {
                return Err(Error::filter_parse(path, format!("{op} needs operands")));
            }
            let args = args
                .iter()
                .enumerate()
                .map(|(i, arg)| predicate(arg, &arg_path(i)))
                .collect::<Result<Vec<_>>>()?;
            if name == "and" {
                Ok(Predicate::and(args))
            } else {
                Ok(Predicate::or(args))
            }
        }
        "not" => match args.as_slice() {
            [arg] => Ok(Predicate::not(predicate(arg, &arg_path(0))?)),
            _ => Err(Error::filter_parse(path, "not takes exactly one operand")),
        },
        "isnull" => match args.as_slice() {
            [arg] => match property(arg) {
                Some(property) => Ok(Predicate::IsNull(property.to_string())),
                None => Err(Error::filter_parse(arg_path(0), "expected a property")),
            },
            _ => Err(Error::filter_parse(path, "isNull takes exactly one operand")),
        },
        name => {
            let Some(comparison) = ComparisonOp::from_name(name) else {
                return Err(Error::filter_parse(path, format!("unsupported op {op:?}")));
            };
            let [left, right] = args.as_slice() else {
                return Err(Error::filter_parse(path, format!("{op} takes two operands")));
            };
            match (property(left), property(right)) {
                (Some(property), None) => Ok(Predicate::comparison(
                    comparison,
                    property,
                    literal(right, &arg_path(1))?,
                )),
                (None, Some(property)) => Ok(Predicate::comparison(
                    comparison.flip(),
                    property,
                    literal(left, &arg_path(0))?,
                )),
                _ => Err(Error::filter_parse(
                    path,
                    "a comparison needs one property and one literal",
                )),
            }
        }
    }
}

fn property(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Property { property } => Some(property),
        _ => None,
    }
}

fn literal(expr: &Expr, path: &str) -> Result<Value> {
    match expr {
        Expr::Literal(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Float(f) => {
            number(*f).ok_or_else(|| Error::filter_parse(path, "expected a finite number"))
        }
        _ => Err(Error::filter_parse(
            path,
            "expected a string, number, or boolean",
        )),
    }
}

// cql2 reads every number as a float; whole numbers go back to integers so
// they compile to the same JSON the caller wrote.
fn number(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() <= MAX_EXACT {
        Some(Value::from(f as i64))
    } else {
        Number::from_f64(f).map(Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_json, parse_text};
    use crate::{filter::ComparisonOp, Error, Predicate};
    use serde_json::{json, Value};

    fn path(value: Value) -> String {
        match parse_json(&value).unwrap_err() {
            Error::FilterParse { fragment, .. } => fragment,
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn text_comparison() {
        assert_eq!(
            parse_text("foo = 'bar'").unwrap(),
            Predicate::comparison(ComparisonOp::Eq, "foo", "bar")
        );
        assert_eq!(
            parse_text("landsat:wrs_row <> 10").unwrap(),
            Predicate::comparison(ComparisonOp::NotEq, "landsat:wrs_row", 10)
        );
        assert_eq!(
            parse_text("cloud_cover < 2.5").unwrap(),
            Predicate::comparison(ComparisonOp::Lt, "cloud_cover", json!(2.5))
        );
    }

    #[test]
    fn json_comparison() {
        assert_eq!(
            parse_json(&json!({"op": "<>", "args": [{"property": "foo"}, "bar"]})).unwrap(),
            Predicate::comparison(ComparisonOp::NotEq, "foo", "bar")
        );
        assert_eq!(
            parse_json(&json!({"op": "<", "args": [1, {"property": "foo"}]})).unwrap(),
            Predicate::comparison(ComparisonOp::Gt, "foo", 1)
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            parse_text("a = 1 AND NOT b = TRUE").unwrap(),
            parse_text("a = 1 and not b = true").unwrap()
        );
    }

    #[test]
    fn precedence() {
        assert_eq!(
            parse_text("a = 1 or b = 2 and c = 3").unwrap(),
            Predicate::or(vec![
                parse_text("a = 1").unwrap(),
                Predicate::and(vec![parse_text("b = 2").unwrap(), parse_text("c = 3").unwrap()]),
            ])
        );
    }

    #[test]
    fn syntax_errors_carry_the_input() {
        match parse_text(" foo = 'bar ").unwrap_err() {
            Error::FilterParse { fragment, .. } => assert_eq!(fragment, "foo = 'bar"),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn unsupported_text_points_at_the_node() {
        match parse_text("a = 1 and b = c").unwrap_err() {
            Error::FilterParse { fragment, .. } => assert_eq!(fragment, "$.args[1]"),
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn error_paths() {
        assert_eq!(path(json!("foo = 'bar'")), "$");
        assert_eq!(path(json!({"op": "like", "args": [{"property": "a"}, "b%"]})), "$");
        assert_eq!(
            path(json!({"op": "and", "args": [
                {"op": "=", "args": [{"property": "a"}, 1]},
                {"op": "=", "args": [{"property": "b"}, [1, 2]]},
            ]})),
            "$.args[1].args[1]"
        );
        assert_eq!(
            path(json!({"op": "not", "args": [{"op": "isNull", "args": ["a"]}]})),
            "$.args[0].args[0]"
        );
        assert_eq!(
            path(json!({"op": "=", "args": [{"property": "a"}, {"property": "b"}]})),
            "$"
        );
    }
}
