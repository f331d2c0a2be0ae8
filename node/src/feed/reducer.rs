//! Value transforms applied to a fetched response before aggregation.
//!
//! A feed declares its reducers as `{ "function": "PARSE", "args": [...] }`
//! objects; an on-chain data request encodes the same steps as key/value
//! pairs (`path`, `mul`, ...). Both forms resolve to [`Reducer`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReducerError;
use crate::feed::aggregator::round_half_up;

#[derive(Clone, Debug, PartialEq)]
pub enum Reducer {
    /// Walk nested objects by key.
    Parse(Vec<String>),
    /// Select an array element.
    Index(usize),
    /// Multiply by each factor in turn.
    Mul(Vec<f64>),
    Div(f64),
    /// `x / value`
    DivFrom(f64),
    /// Multiply by `10^n`.
    Pow10(i32),
    Round,
}

/// Declarative form found in feed configuration files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReducerConfig {
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

impl Reducer {
    pub fn from_config(name: &str, args: &Value) -> Result<Self, ReducerError> {
        let upper = name.trim().to_uppercase();
        let invalid = |reason: &str| ReducerError::InvalidReducer {
            name: upper.clone(),
            reason: reason.to_string(),
        };

        match upper.as_str() {
            "PARSE" | "PATH" => {
                let path = match args {
                    Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => Ok(s.clone()),
                            other => Err(invalid(&format!("path segment {other} is not a string"))),
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                    _ => return Err(invalid("expected a path")),
                };
                Ok(Reducer::Parse(path))
            }
            "INDEX" => {
                let index = first_number(args).map_err(|_| invalid("expected an index"))?;
                if index < 0.0 || index.fract() != 0.0 {
                    return Err(invalid("index must be a non-negative integer"));
                }
                Ok(Reducer::Index(index as usize))
            }
            "MUL" => {
                let factors = match args {
                    Value::Array(items) => items.iter().map(as_number).collect::<Result<Vec<_>, _>>(),
                    other => as_number(other).map(|f| vec![f]),
                }
                .map_err(|_| invalid("expected numeric factors"))?;
                Ok(Reducer::Mul(factors))
            }
            "DIV" => {
                let divisor = first_number(args).map_err(|_| invalid("expected a divisor"))?;
                if divisor == 0.0 {
                    return Err(ReducerError::DivisionByZero);
                }
                Ok(Reducer::Div(divisor))
            }
            "DIVFROM" => first_number(args)
                .map(Reducer::DivFrom)
                .map_err(|_| invalid("expected a dividend")),
            "POW10" => first_number(args)
                .map(|n| Reducer::Pow10(n as i32))
                .map_err(|_| invalid("expected an exponent")),
            "ROUND" => Ok(Reducer::Round),
            _ => Err(invalid("unknown reducer")),
        }
    }

    pub fn apply(&self, value: Value) -> Result<Value, ReducerError> {
        match self {
            Reducer::Parse(path) => {
                let mut current = value;
                for key in path {
                    current = match current {
                        Value::Object(mut map) => {
                            map.remove(key).ok_or_else(|| ReducerError::MissingKey(key.clone()))?
                        }
                        _ => return Err(ReducerError::MissingKey(key.clone())),
                    };
                }
                Ok(current)
            }
            Reducer::Index(index) => match value {
                Value::Array(mut items) => {
                    if *index >= items.len() {
                        Err(ReducerError::IndexOutOfBounds {
                            index: *index,
                            len: items.len(),
                        })
                    } else {
                        Ok(items.swap_remove(*index))
                    }
                }
                other => Err(ReducerError::NotANumber(format!("expected an array, got {other}"))),
            },
            Reducer::Mul(factors) => {
                let product = factors.iter().fold(as_number(&value)?, |acc, f| acc * f);
                number(product)
            }
            Reducer::Div(divisor) => number(as_number(&value)? / divisor),
            Reducer::DivFrom(dividend) => {
                let divisor = as_number(&value)?;
                if divisor == 0.0 {
                    return Err(ReducerError::DivisionByZero);
                }
                number(dividend / divisor)
            }
            Reducer::Pow10(exp) => number(10f64.powi(*exp) * as_number(&value)?),
            Reducer::Round => {
                let n = as_number(&value)?;
                round_half_up(n)
                    .map(Value::from)
                    .map_err(|_| ReducerError::NotANumber(n.to_string()))
            }
        }
    }
}

/// Resolve a list of declared reducers.
pub fn build_reducers(configs: &[ReducerConfig]) -> Result<Vec<Reducer>, ReducerError> {
    configs
        .iter()
        .map(|c| Reducer::from_config(&c.function, &c.args))
        .collect()
}

/// Run `reducers` in order over `value`.
pub fn apply_all(reducers: &[Reducer], value: Value) -> Result<Value, ReducerError> {
    reducers.iter().try_fold(value, |acc, reducer| reducer.apply(acc))
}

/// Coerce a JSON number or numeric string (thousands separators allowed) to
/// a finite `f64`. `NaN` and infinities are rejected.
pub fn as_number(value: &Value) -> Result<f64, ReducerError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ReducerError::NotANumber(n.to_string())),
        Value::String(s) => s
            .replace(',', "")
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .ok_or_else(|| ReducerError::NotANumber(s.clone())),
        other => Err(ReducerError::NotANumber(other.to_string())),
    }
}

fn first_number(args: &Value) -> Result<f64, ReducerError> {
    match args {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| ReducerError::NotANumber("[]".to_string()))
            .and_then(as_number),
        other => as_number(other),
    }
}

fn number(value: f64) -> Result<Value, ReducerError> {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ReducerError::NotANumber(value.to_string()))
}

/// Parsed form of an on-chain data request: the URL to fetch and the steps
/// to apply to its response.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestPlan {
    pub url: String,
    pub reducers: Vec<Reducer>,
}

impl RequestPlan {
    /// Build a plan from alternating key/value strings, e.g.
    /// `["get", "https://..", "path", "RAW,ETH,USD,PRICE", "pow10", "8"]`.
    /// Keys without a value (`round`) may appear last.
    pub fn from_pairs(items: &[String]) -> Result<Self, ReducerError> {
        let mut url = None;
        let mut reducers = Vec::new();
        let mut iter = items.iter();

        while let Some(key) = iter.next() {
            let lowered = key.trim().to_lowercase();
            if lowered == "round" {
                reducers.push(Reducer::Round);
                continue;
            }
            let value = iter.next().ok_or_else(|| ReducerError::InvalidReducer {
                name: lowered.clone(),
                reason: "missing value".to_string(),
            })?;

            if lowered == "get" {
                url = Some(value.trim().to_string());
            } else {
                let args = Value::String(value.trim().to_string());
                reducers.push(Reducer::from_config(&lowered, &args)?);
            }
        }

        let url = url.ok_or_else(|| ReducerError::InvalidReducer {
            name: "GET".to_string(),
            reason: "request has no url".to_string(),
        })?;
        Ok(RequestPlan { url, reducers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_walks_nested_keys() {
        let reducer = Reducer::from_config("PARSE", &json!(["a", "b"])).unwrap();
        assert_eq!(reducer.apply(json!({"a": {"b": 5}})).unwrap(), json!(5));
    }

    #[test]
    fn parse_missing_key_fails() {
        let reducer = Reducer::from_config("path", &json!("a,c")).unwrap();
        assert_eq!(
            reducer.apply(json!({"a": {"b": 5}})),
            Err(ReducerError::MissingKey("c".to_string()))
        );
    }

    #[test]
    fn mul_folds_every_factor() {
        let reducer = Reducer::from_config("MUL", &json!([2, 3])).unwrap();
        assert_eq!(as_number(&reducer.apply(json!(4)).unwrap()).unwrap(), 24.0);

        let single = Reducer::from_config("mul", &json!(10)).unwrap();
        assert_eq!(as_number(&single.apply(json!("1,234.5")).unwrap()).unwrap(), 12345.0);
    }

    #[test]
    fn arithmetic_reducers() {
        let div = Reducer::from_config("DIV", &json!(4)).unwrap();
        assert_eq!(as_number(&div.apply(json!(10)).unwrap()).unwrap(), 2.5);

        let div_from = Reducer::from_config("DIVFROM", &json!(1)).unwrap();
        assert_eq!(as_number(&div_from.apply(json!(4)).unwrap()).unwrap(), 0.25);
        assert_eq!(div_from.apply(json!(0)), Err(ReducerError::DivisionByZero));

        let pow = Reducer::from_config("POW10", &json!(3)).unwrap();
        assert_eq!(as_number(&pow.apply(json!(1.5)).unwrap()).unwrap(), 1500.0);

        assert_eq!(Reducer::Round.apply(json!(2.5)).unwrap(), json!(3));
        assert_eq!(
            Reducer::from_config("DIV", &json!(0)),
            Err(ReducerError::DivisionByZero)
        );
    }

    #[test]
    fn index_selects_and_bounds_checks() {
        let reducer = Reducer::from_config("INDEX", &json!(1)).unwrap();
        assert_eq!(reducer.apply(json!([7, 8, 9])).unwrap(), json!(8));
        assert_eq!(
            reducer.apply(json!([7])),
            Err(ReducerError::IndexOutOfBounds { index: 1, len: 1 })
        );
        assert!(Reducer::from_config("INDEX", &json!(-1)).is_err());
    }

    #[test]
    fn pipeline_applies_in_order() {
        let reducers = build_reducers(&[
            ReducerConfig { function: "parse".into(), args: json!(["data", "prices"]) },
            ReducerConfig { function: "index".into(), args: json!(0) },
            ReducerConfig { function: "mul".into(), args: json!([100]) },
            ReducerConfig { function: "round".into(), args: Value::Null },
        ])
        .unwrap();

        let out = apply_all(&reducers, json!({"data": {"prices": ["12.346", 1]}})).unwrap();
        assert_eq!(out, json!(1235));
    }

    #[test]
    fn unknown_reducer_is_rejected() {
        assert!(matches!(
            Reducer::from_config("SQRT", &Value::Null),
            Err(ReducerError::InvalidReducer { .. })
        ));
        assert!(matches!(
            as_number(&json!({"x": 1})),
            Err(ReducerError::NotANumber(_))
        ));
    }

    #[test]
    fn non_finite_strings_are_not_numbers() {
        for text in ["NaN", "nan", "inf", "-inf", "infinity", "-Infinity"] {
            assert!(
                matches!(as_number(&json!(text)), Err(ReducerError::NotANumber(_))),
                "{text} was accepted"
            );
        }
        assert_eq!(as_number(&json!("1,234.5")), Ok(1234.5));

        let round = build_reducers(&[ReducerConfig { function: "round".into(), args: Value::Null }])
            .unwrap();
        assert!(apply_all(&round, json!("inf")).is_err());
        assert!(apply_all(&round, json!(1e300)).is_err());

        let mul = Reducer::from_config("MUL", &json!([1e308])).unwrap();
        assert!(mul.apply(json!(1e308)).is_err());
    }

    #[test]
    fn request_plan_from_key_value_pairs() {
        let items: Vec<String> = [
            "get",
            "https://example.com/price",
            "path",
            "RAW,ETH,USD,PRICE",
            "pow10",
            "8",
            "round",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let plan = RequestPlan::from_pairs(&items).unwrap();
        assert_eq!(plan.url, "https://example.com/price");
        assert_eq!(
            plan.reducers,
            vec![
                Reducer::Parse(vec!["RAW".into(), "ETH".into(), "USD".into(), "PRICE".into()]),
                Reducer::Pow10(8),
                Reducer::Round,
            ]
        );

        assert!(RequestPlan::from_pairs(&["path".to_string(), "a".to_string()]).is_err());
    }
}
