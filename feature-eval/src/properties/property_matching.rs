use std::cmp::Ordering;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::properties::property_models::{AttributeType, Condition, OperatorType};
use crate::properties::version::pad_version;

static LEADING_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").expect("number pattern is valid")
});

pub fn to_string_representation(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Truthiness shared by feature values and the `$exists` operator:
/// null, `false`, `0` and `""` are falsy, everything else is truthy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluates a targeting condition against an attribute tree.
///
/// Combinators are checked in the order `$or`, `$nor`, `$and`, `$not`; any other map is a
/// set of path constraints that must all hold. Malformed conditions evaluate to false.
pub fn eval_condition(attributes: &Value, condition: &Condition) -> bool {
    if let Some(conditions) = condition.get("$or") {
        return eval_or(attributes, conditions).unwrap_or(false);
    }
    if let Some(conditions) = condition.get("$nor") {
        return eval_or(attributes, conditions).is_some_and(|matched| !matched);
    }
    if let Some(conditions) = condition.get("$and") {
        return eval_and(attributes, conditions).unwrap_or(false);
    }
    if let Some(nested) = condition.get("$not") {
        return match nested {
            Value::Object(nested) => !eval_condition(attributes, nested),
            _ => false,
        };
    }

    condition.iter().all(|(path, expected)| {
        let actual = get_path(attributes, path).unwrap_or(&Value::Null);
        eval_condition_value(expected, actual)
    })
}

/// `None` when the combinator operand is not a list of conditions.
fn eval_or(attributes: &Value, conditions: &Value) -> Option<bool> {
    let conditions = conditions.as_array()?;
    if conditions.is_empty() {
        return Some(true);
    }
    Some(conditions.iter().any(|condition| match condition {
        Value::Object(condition) => eval_condition(attributes, condition),
        _ => false,
    }))
}

fn eval_and(attributes: &Value, conditions: &Value) -> Option<bool> {
    let conditions = conditions.as_array()?;
    Some(conditions.iter().all(|condition| match condition {
        Value::Object(condition) => eval_condition(attributes, condition),
        _ => false,
    }))
}

/// Resolves a dot-separated path. A missing key or a non-map intermediate yields `None`.
pub fn get_path<'a>(attributes: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(attributes, |current, segment| current.as_object()?.get(segment))
}

fn is_operator_object(condition: &Condition) -> bool {
    condition.keys().all(|key| key.starts_with('$'))
}

/// Evaluates an expected value (operator object or literal) against an attribute value.
///
/// Literals compare by their serialized JSON, so arrays and objects must match exactly,
/// including element order and number representation.
pub fn eval_condition_value(expected: &Value, actual: &Value) -> bool {
    if let Value::Object(operators) = expected {
        if is_operator_object(operators) {
            return operators
                .iter()
                .all(|(operator, operand)| eval_operator_condition(operator, actual, operand));
        }
    }
    expected.to_string() == actual.to_string()
}

fn eval_operator_condition(operator: &str, actual: &Value, expected: &Value) -> bool {
    let operator = match OperatorType::from_str(operator) {
        Ok(operator) => operator,
        Err(_) => {
            tracing::debug!("Unknown condition operator '{}'", operator);
            return false;
        }
    };

    match operator {
        OperatorType::Eq => compare(actual, expected) == Some(Ordering::Equal),
        OperatorType::Ne => compare(actual, expected).is_some_and(|o| o != Ordering::Equal),
        OperatorType::Lt => compare(actual, expected) == Some(Ordering::Less),
        OperatorType::Lte => compare(actual, expected).is_some_and(|o| o != Ordering::Greater),
        OperatorType::Gt => compare(actual, expected) == Some(Ordering::Greater),
        OperatorType::Gte => compare(actual, expected).is_some_and(|o| o != Ordering::Less),
        OperatorType::VersionEq
        | OperatorType::VersionNe
        | OperatorType::VersionGt
        | OperatorType::VersionGte
        | OperatorType::VersionLt
        | OperatorType::VersionLte => {
            let (Some(actual), Some(expected)) = (version_operand(actual), version_operand(expected))
            else {
                return false;
            };
            let ordering = pad_version(&actual).cmp(&pad_version(&expected));
            match operator {
                OperatorType::VersionEq => ordering == Ordering::Equal,
                OperatorType::VersionNe => ordering != Ordering::Equal,
                OperatorType::VersionGt => ordering == Ordering::Greater,
                OperatorType::VersionGte => ordering != Ordering::Less,
                OperatorType::VersionLt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        OperatorType::Regex => {
            let (Some(haystack), Some(pattern)) = (actual.as_str(), expected.as_str()) else {
                return false;
            };
            match Regex::new(pattern) {
                Ok(re) => re.is_match(haystack),
                Err(e) => {
                    tracing::debug!("Invalid regex pattern '{}': {}", pattern, e);
                    false
                }
            }
        }
        OperatorType::In => expected
            .as_array()
            .is_some_and(|expected| is_in(actual, expected)),
        OperatorType::NotIn => expected
            .as_array()
            .is_some_and(|expected| !is_in(actual, expected)),
        OperatorType::ElemMatch => elem_match(expected, actual),
        OperatorType::Size => match actual {
            Value::Array(items) => eval_condition_value(expected, &Value::from(items.len())),
            _ => false,
        },
        OperatorType::All => match (actual, expected) {
            (Value::Array(items), Value::Array(conditions)) => conditions.iter().all(|condition| {
                items
                    .iter()
                    .any(|item| eval_condition_value(condition, item))
            }),
            _ => false,
        },
        OperatorType::Exists => is_truthy(expected) != actual.is_null(),
        OperatorType::Type => expected.as_str() == Some(AttributeType::of(actual).as_ref()),
        OperatorType::Not => !eval_condition_value(expected, actual),
    }
}

fn elem_match(expected: &Value, actual: &Value) -> bool {
    let (Value::Object(condition), Value::Array(items)) = (expected, actual) else {
        return false;
    };
    if is_operator_object(condition) {
        items
            .iter()
            .any(|item| eval_condition_value(expected, item))
    } else {
        items.iter().any(|item| eval_condition(item, condition))
    }
}

fn is_in(actual: &Value, expected: &[Value]) -> bool {
    match actual {
        Value::Array(items) => items
            .iter()
            .any(|item| expected.iter().any(|e| values_equal(item, e))),
        _ => expected.iter().any(|e| values_equal(actual, e)),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Orders two values for the comparison operators. Returns `None` when they are not
/// comparable, which makes every comparison operator evaluate to false.
fn compare(actual: &Value, expected: &Value) -> Option<Ordering> {
    if actual.is_number() || expected.is_number() {
        let lhs = coerce_to_f64(actual)?;
        let rhs = coerce_to_f64(expected)?;
        return lhs.partial_cmp(&rhs);
    }
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn coerce_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(parse_leading_f64(s)),
        Value::Null => Some(0.0),
        _ => None,
    }
}

/// Best-effort float parse: the longest numeric prefix, or 0 when there is none.
fn parse_leading_f64(input: &str) -> f64 {
    LEADING_NUMBER
        .find(input)
        .and_then(|m| m.as_str().trim_start().parse::<f64>().ok())
        .unwrap_or(0.0)
}

fn version_operand(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn condition(value: Value) -> Condition {
        match value {
            Value::Object(map) => map,
            other => panic!("expected a condition object, got {other}"),
        }
    }

    fn eval(condition_json: Value, attributes: Value) -> bool {
        eval_condition(&attributes, &condition(condition_json))
    }

    #[test]
    fn test_and_range() {
        assert!(eval(
            json!({"$and": [{"id": {"$gt": 4}}, {"id": {"$lt": 10}}]}),
            json!({"id": 5})
        ));
        assert!(!eval(
            json!({"$and": [{"id": {"$gt": 4}}, {"id": {"$lt": 10}}]}),
            json!({"id": 10})
        ));
    }

    #[rstest]
    #[case(json!({"$or": []}), json!({}), true)]
    #[case(json!({"$and": []}), json!({}), true)]
    #[case(json!({"$nor": []}), json!({}), false)]
    #[case(json!({"$or": [{"a": 1}, {"b": 2}]}), json!({"b": 2}), true)]
    #[case(json!({"$or": [{"a": 1}, {"b": 2}]}), json!({"a": 2}), false)]
    #[case(json!({"$nor": [{"a": 1}, {"b": 2}]}), json!({"a": 2}), true)]
    #[case(json!({"$nor": [{"a": 1}, {"b": 2}]}), json!({"a": 1}), false)]
    #[case(json!({"$not": {"a": 1}}), json!({"a": 2}), true)]
    #[case(json!({"$not": {"a": 1}}), json!({"a": 1}), false)]
    #[case(json!({"$or": "not a list"}), json!({}), false)]
    #[case(json!({"$and": {"a": 1}}), json!({"a": 1}), false)]
    #[case(json!({"$not": [1]}), json!({}), false)]
    fn test_combinators(#[case] cond: Value, #[case] attrs: Value, #[case] expected: bool) {
        assert_eq!(eval(cond, attrs), expected);
    }

    #[test]
    fn test_combinator_precedence() {
        // $or wins over $and when both appear at the top level
        assert!(eval(
            json!({"$or": [{"a": 1}], "$and": [{"a": 2}]}),
            json!({"a": 1})
        ));
    }

    #[test]
    fn test_field_constraints_must_all_hold() {
        let cond = json!({"name": "hello", "age": {"$gte": 18}});
        assert!(eval(cond.clone(), json!({"name": "hello", "age": 21})));
        assert!(!eval(cond.clone(), json!({"name": "hello", "age": 12})));
        assert!(!eval(cond, json!({"name": "world", "age": 21})));
    }

    #[test]
    fn test_nested_paths() {
        let attrs = json!({"company": {"name": "acme", "meta": {"tier": 2}}, "tags": ["a"]});
        assert_eq!(get_path(&attrs, "company.meta.tier"), Some(&json!(2)));
        assert_eq!(get_path(&attrs, "company.missing"), None);
        assert_eq!(get_path(&attrs, "tags.0"), None);
        assert_eq!(get_path(&attrs, "company.name.first"), None);
        assert!(eval(json!({"company.name": "acme"}), attrs.clone()));
        assert!(eval(json!({"company.meta.tier": {"$gt": 1}}), attrs));
    }

    #[test]
    fn test_literal_equality_is_serialization_based() {
        assert!(eval(json!({"tags": ["a", "b"]}), json!({"tags": ["a", "b"]})));
        assert!(!eval(json!({"tags": ["a", "b"]}), json!({"tags": ["b", "a"]})));
        assert!(!eval(json!({"n": "1"}), json!({"n": 1})));
        assert!(eval(json!({"obj": {"x": 1}}), json!({"obj": {"x": 1}})));
        assert!(!eval(json!({"obj": {"x": 1}}), json!({"obj": {"x": 1, "y": 2}})));
        assert!(eval(json!({"missing": null}), json!({})));
    }

    #[test]
    fn test_mixed_key_object_is_a_literal() {
        let cond = json!({"obj": {"$gt": 1, "plain": 2}});
        assert!(!eval(cond.clone(), json!({"obj": 5})));
        assert!(eval(cond, json!({"obj": {"$gt": 1, "plain": 2}})));
    }

    #[rstest]
    #[case(json!({"$eq": 5}), json!(5), true)]
    #[case(json!({"$eq": 5}), json!("5"), true)]
    #[case(json!({"$eq": "abc"}), json!("abc"), true)]
    #[case(json!({"$ne": "abc"}), json!("abd"), true)]
    #[case(json!({"$ne": 5}), json!(5.0), false)]
    #[case(json!({"$lt": 10}), json!(9), true)]
    #[case(json!({"$lt": 10}), json!("9"), true)]
    #[case(json!({"$lt": "b"}), json!("a"), true)]
    #[case(json!({"$lte": 10}), json!(10), true)]
    #[case(json!({"$gt": 10}), json!("12abc"), true)]
    #[case(json!({"$gt": 10}), json!("abc"), false)]
    #[case(json!({"$gte": "a"}), json!("a"), true)]
    #[case(json!({"$gt": 4}), json!(true), false)]
    #[case(json!({"$eq": true}), json!(true), true)]
    #[case(json!({"$gt": "a"}), json!(["b"]), false)]
    #[case(json!({"$lt": 10}), json!(null), true)]
    fn test_comparison_operators(
        #[case] expected: Value,
        #[case] actual: Value,
        #[case] result: bool,
    ) {
        assert_eq!(eval_condition_value(&expected, &actual), result);
    }

    #[rstest]
    #[case("$vgt", "1.0.0", "1.0.0-beta", true)]
    #[case("$vgt", "2.0.1", "2.0.10", false)]
    #[case("$vlt", "2.0.1", "2.0.10", true)]
    #[case("$veq", "v1.2.3", "1.2.3", true)]
    #[case("$veq", "1.2.3+build", "1.2.3", true)]
    #[case("$vne", "1.2.3", "1.2.4", true)]
    #[case("$vgte", "1.2.3", "1.2.3", true)]
    #[case("$vlte", "1.2.3-alpha", "1.2.3", true)]
    #[case("$vlt", "1.0.0-alpha", "1.0.0-beta", true)]
    fn test_version_operators(
        #[case] op: &str,
        #[case] actual: &str,
        #[case] operand: &str,
        #[case] result: bool,
    ) {
        let expected = json!({ op: operand });
        assert_eq!(eval_condition_value(&expected, &json!(actual)), result);
    }

    #[test]
    fn test_version_operators_reject_non_strings() {
        assert!(!eval_condition_value(&json!({"$veq": "1.0.0"}), &json!(null)));
        assert!(!eval_condition_value(&json!({"$vgt": [1]}), &json!("1.0.0")));
    }

    #[rstest]
    #[case(json!("^[0-9]{3}-[a-z]{3}$"), json!("123-abc"), true)]
    #[case(json!("^[0-9]{3}-[a-z]{3}$"), json!("abc-123"), false)]
    #[case(json!("bc"), json!("abcd"), true)]
    #[case(json!("abc)"), json!("abc"), false)]
    #[case(json!("1"), json!(1), false)]
    #[case(json!(5), json!("5"), false)]
    fn test_regex(#[case] pattern: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(
            eval_condition_value(&json!({ "$regex": pattern }), &actual),
            result
        );
    }

    #[rstest]
    #[case(json!({"$in": ["a", "b"]}), json!("a"), true)]
    #[case(json!({"$in": ["a", "b"]}), json!("c"), false)]
    #[case(json!({"$in": [1, 2]}), json!(2.0), true)]
    #[case(json!({"$in": ["a", "b"]}), json!(["c", "b"]), true)]
    #[case(json!({"$in": ["a", "b"]}), json!(["c", "d"]), false)]
    #[case(json!({"$in": ["a", "b"]}), json!([]), false)]
    #[case(json!({"$in": "a"}), json!("a"), false)]
    #[case(json!({"$nin": ["a", "b"]}), json!("c"), true)]
    #[case(json!({"$nin": ["a", "b"]}), json!(["a"]), false)]
    #[case(json!({"$nin": "a"}), json!("c"), false)]
    fn test_membership(#[case] expected: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(eval_condition_value(&expected, &actual), result);
    }

    #[test]
    fn test_elem_match_with_operators() {
        let expected = json!({"$elemMatch": {"$gt": 10}});
        assert!(eval_condition_value(&expected, &json!([1, 5, 12])));
        assert!(!eval_condition_value(&expected, &json!([1, 5])));
        assert!(!eval_condition_value(&expected, &json!(12)));
    }

    #[test]
    fn test_elem_match_with_sub_condition() {
        let cond = json!({"hobbies": {"$elemMatch": {"name": {"$regex": "^ping"}}}});
        assert!(eval(
            cond.clone(),
            json!({"hobbies": [{"name": "bowling"}, {"name": "pingpong"}]})
        ));
        assert!(!eval(cond, json!({"hobbies": [{"name": "bowling"}]})));
    }

    #[test]
    fn test_gluten_free_elem_match() {
        let cond = json!({"dietaryRestrictions": {"$elemMatch": {"$eq": "gluten_free"}}});
        assert!(eval(
            cond.clone(),
            json!({"dietaryRestrictions": ["vegan", "gluten_free"]})
        ));
        assert!(!eval(cond, json!({"dietaryRestrictions": ["vegan"]})));
    }

    #[rstest]
    #[case(json!({"$size": 3}), json!([1, 2, 3]), true)]
    #[case(json!({"$size": 2}), json!([1, 2, 3]), false)]
    #[case(json!({"$size": {"$gt": 1}}), json!([1, 2]), true)]
    #[case(json!({"$size": 0}), json!("abc"), false)]
    #[case(json!({"$all": ["a", "b"]}), json!(["b", "c", "a"]), true)]
    #[case(json!({"$all": ["a", "b"]}), json!(["a", "c"]), false)]
    #[case(json!({"$all": [{"$gt": 5}]}), json!([1, 7]), true)]
    #[case(json!({"$all": ["a"]}), json!("a"), false)]
    #[case(json!({"$all": "a"}), json!(["a"]), false)]
    fn test_array_operators(#[case] expected: Value, #[case] actual: Value, #[case] result: bool) {
        assert_eq!(eval_condition_value(&expected, &actual), result);
    }

    #[test]
    fn test_exists() {
        assert!(eval(json!({"a": {"$exists": true}}), json!({"a": 0})));
        assert!(!eval(json!({"a": {"$exists": true}}), json!({})));
        assert!(!eval(json!({"a": {"$exists": true}}), json!({"a": null})));
        assert!(eval(json!({"a": {"$exists": false}}), json!({})));
        assert!(!eval(json!({"a": {"$exists": false}}), json!({"a": "x"})));
    }

    #[rstest]
    #[case("string", json!("a"))]
    #[case("number", json!(1))]
    #[case("number", json!(1.5))]
    #[case("boolean", json!(true))]
    #[case("array", json!([]))]
    #[case("null", json!(null))]
    #[case("object", json!({}))]
    fn test_type(#[case] tag: &str, #[case] actual: Value) {
        assert!(eval_condition_value(&json!({ "$type": tag }), &actual));
        assert!(!eval_condition_value(&json!({"$type": "unknown"}), &actual));
    }

    #[test]
    fn test_type_of_missing_attribute_is_null() {
        assert!(eval(json!({"nope": {"$type": "null"}}), json!({})));
    }

    #[test]
    fn test_not_operator() {
        assert!(eval_condition_value(
            &json!({"$not": {"$regex": "^a"}}),
            &json!("bcd")
        ));
        assert!(!eval_condition_value(&json!({"$not": "x"}), &json!("x")));
    }

    #[test]
    fn test_multiple_operators_are_anded() {
        let expected = json!({"$gt": 1, "$lt": 5});
        assert!(eval_condition_value(&expected, &json!(3)));
        assert!(!eval_condition_value(&expected, &json!(7)));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        assert!(!eval_condition_value(&json!({"$regexp": "a"}), &json!("a")));
        assert!(!eval(json!({"a": {"$bogus": 1}}), json!({"a": 1})));
    }

    #[test]
    fn test_empty_operator_object_matches_everything() {
        assert!(eval(json!({"a": {}}), json!({"a": 1})));
    }

    #[test]
    fn test_evaluation_is_stable() {
        let cond = condition(json!({"$or": [{"tags": {"$in": ["beta"]}}, {"age": {"$gt": 30}}]}));
        let attrs = json!({"tags": ["beta"], "age": 20});
        let first = eval_condition(&attrs, &cond);
        for _ in 0..5 {
            assert_eq!(eval_condition(&attrs, &cond), first);
        }
        assert!(first);
    }

    #[rstest]
    #[case(json!(null), false)]
    #[case(json!(false), false)]
    #[case(json!(0), false)]
    #[case(json!(0.0), false)]
    #[case(json!(""), false)]
    #[case(json!(true), true)]
    #[case(json!(1), true)]
    #[case(json!("off"), true)]
    #[case(json!([]), true)]
    #[case(json!({}), true)]
    fn test_truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(is_truthy(&value), expected);
    }

    #[rstest]
    #[case("12abc", 12.0)]
    #[case("  3.5", 3.5)]
    #[case("-2", -2.0)]
    #[case("1e3", 1000.0)]
    #[case(".5", 0.5)]
    #[case("abc", 0.0)]
    #[case("", 0.0)]
    fn test_parse_leading_f64(#[case] input: &str, #[case] expected: f64) {
        assert_eq!(parse_leading_f64(input), expected);
    }

    #[test]
    fn test_to_string_representation() {
        assert_eq!(to_string_representation(&json!("abc")), "abc");
        assert_eq!(to_string_representation(&json!(123)), "123");
        assert_eq!(to_string_representation(&json!(true)), "true");
        assert_eq!(to_string_representation(&json!(null)), "");
    }
}
