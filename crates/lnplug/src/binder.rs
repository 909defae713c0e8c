//! Maps inbound JSON-RPC parameters onto a handler's declared parameters.
//!
//! JSON-RPC allows both positional (`params: [..]`) and named
//! (`params: {..}`) call styles; handlers declare their parameters once and
//! accept either. Named entries are overlaid by name; positional values are
//! walked onto the declared slots in order; anything left unfilled takes its
//! declared default. Handlers receive the running [`Plugin`] and the raw
//! request as fixed arguments, not as bindable parameters.
//!
//! [`Plugin`]: crate::Plugin

use serde_json::{Map, Value};

/// Parameter binding failures, surfaced to the dispatcher as error replies.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),

    #[error("missing required parameter `{0}`")]
    MissingParameter(String),

    #[error("too many positional parameters: expected at most {expected}, got {got}")]
    TooManyPositional { expected: usize, got: usize },

    #[error("parameters must be an array or an object, got {0}")]
    InvalidParams(&'static str),

    #[error("parameter `{name}` has the wrong shape: {source}")]
    InvalidValue {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One declared handler parameter: a name and, for optional parameters, a
/// default value.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    name: String,
    default: Option<Value>,
}

impl ParamSpec {
    /// A parameter the caller must supply.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }

    /// A parameter that falls back to `default` when absent.
    #[must_use]
    pub fn optional(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The fully-bound arguments of one call, keyed by declared parameter name.
#[derive(Debug, Clone, Default)]
pub struct Args(Map<String, Value>);

impl Args {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn take(&mut self, name: &str) -> Option<Value> {
        self.0.remove(name)
    }

    /// Deserialize the argument `name` as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::MissingParameter`] if the argument is absent and
    /// [`BindError::InvalidValue`] if it does not deserialize as `T`.
    pub fn demand<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, BindError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| BindError::MissingParameter(name.to_string()))?;
        serde_json::from_value(value.clone()).map_err(|source| BindError::InvalidValue {
            name: name.to_string(),
            source,
        })
    }

    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Bind `params` onto the declared `specs`.
///
/// Named entries are overlaid first and exclusively: an object-style call
/// never enters the positional walk. `null` params behave as an empty
/// positional list.
///
/// # Errors
///
/// Returns a [`BindError`] for unknown named entries, surplus positional
/// values, a missing required parameter, or a params value that is neither
/// array nor object.
pub fn bind(specs: &[ParamSpec], params: &Value) -> Result<Args, BindError> {
    let mut filled: Map<String, Value> = Map::new();

    match params {
        Value::Null => {}
        Value::Object(named) => {
            for (key, value) in named {
                if !specs.iter().any(|spec| spec.name == *key) {
                    return Err(BindError::UnknownParameter(key.clone()));
                }
                filled.insert(key.clone(), value.clone());
            }
        }
        Value::Array(positional) => {
            if positional.len() > specs.len() {
                return Err(BindError::TooManyPositional {
                    expected: specs.len(),
                    got: positional.len(),
                });
            }
            // All slots are unfilled here, so the in-order walk consumes one
            // positional value per declared slot.
            for (spec, value) in specs.iter().zip(positional) {
                filled.insert(spec.name.clone(), value.clone());
            }
        }
        other => return Err(BindError::InvalidParams(json_type_name(other))),
    }

    for spec in specs {
        if !filled.contains_key(&spec.name) {
            match &spec.default {
                Some(default) => {
                    filled.insert(spec.name.clone(), default.clone());
                }
                None => return Err(BindError::MissingParameter(spec.name.clone())),
            }
        }
    }

    Ok(Args(filled))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("amount"),
            ParamSpec::optional("label", "default-label"),
        ]
    }

    #[test]
    fn test_positional_binding() {
        let args = bind(&specs(), &json!([42, "mine"])).unwrap();
        assert_eq!(args.get("amount"), Some(&json!(42)));
        assert_eq!(args.get("label"), Some(&json!("mine")));
    }

    #[test]
    fn test_positional_fills_remainder_from_defaults() {
        let args = bind(&specs(), &json!([42])).unwrap();
        assert_eq!(args.get("amount"), Some(&json!(42)));
        assert_eq!(args.get("label"), Some(&json!("default-label")));
    }

    #[test]
    fn test_named_binding() {
        let args = bind(&specs(), &json!({"label": "x", "amount": 7})).unwrap();
        assert_eq!(args.get("amount"), Some(&json!(7)));
        assert_eq!(args.get("label"), Some(&json!("x")));
    }

    #[test]
    fn test_named_binding_applies_defaults() {
        let args = bind(&specs(), &json!({"amount": 7})).unwrap();
        assert_eq!(args.get("label"), Some(&json!("default-label")));
    }

    #[test]
    fn test_unknown_named_parameter() {
        let err = bind(&specs(), &json!({"amount": 7, "bogus": 1})).unwrap_err();
        assert!(matches!(err, BindError::UnknownParameter(name) if name == "bogus"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let err = bind(&specs(), &json!({})).unwrap_err();
        assert!(matches!(err, BindError::MissingParameter(name) if name == "amount"));

        let err = bind(&specs(), &json!([])).unwrap_err();
        assert!(matches!(err, BindError::MissingParameter(name) if name == "amount"));
    }

    #[test]
    fn test_too_many_positional() {
        let err = bind(&specs(), &json!([1, 2, 3])).unwrap_err();
        assert!(matches!(
            err,
            BindError::TooManyPositional {
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn test_null_params_behave_as_empty() {
        let only_optional = vec![ParamSpec::optional("label", Value::Null)];
        let args = bind(&only_optional, &Value::Null).unwrap();
        assert_eq!(args.get("label"), Some(&Value::Null));
    }

    #[test]
    fn test_scalar_params_rejected() {
        let err = bind(&specs(), &json!(5)).unwrap_err();
        assert!(matches!(err, BindError::InvalidParams("number")));
    }

    #[test]
    fn test_demand_typed() {
        let args = bind(&specs(), &json!([42])).unwrap();
        let amount: u64 = args.demand("amount").unwrap();
        assert_eq!(amount, 42);

        let err = args.demand::<Vec<String>>("amount").unwrap_err();
        assert!(matches!(err, BindError::InvalidValue { name, .. } if name == "amount"));

        let err = args.demand::<u64>("nope").unwrap_err();
        assert!(matches!(err, BindError::MissingParameter(_)));
    }

    #[test]
    fn test_take_removes_argument() {
        let mut args = bind(&specs(), &json!([42])).unwrap();
        assert_eq!(args.take("amount"), Some(json!(42)));
        assert_eq!(args.take("amount"), None);
    }
}
