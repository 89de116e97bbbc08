use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Positional and keyword arguments of an activity call.
///
/// Encoded as `{"args": [...], "kwargs": {...}}` before the codec is applied.
///
/// ```
/// use beeline::Arguments;
/// use serde_json::json;
///
/// let args = Arguments::new().arg("lucy").kwarg("greeting", "hello");
/// assert_eq!(
///     args.to_value(),
///     json!({"args": ["lucy"], "kwargs": {"greeting": "hello"}})
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument.
    pub fn kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("args".into(), Value::Array(self.args.clone()));
        map.insert("kwargs".into(), Value::Object(self.kwargs.clone()));
        Value::Object(map)
    }

    /// Decode a payload. A missing `args` or `kwargs` is treated as empty.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// Positional argument `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Keyword argument `key`, if present.
    pub fn get_kwarg(&self, key: &str) -> Option<&Value> {
        self.kwargs.get(key)
    }
}
