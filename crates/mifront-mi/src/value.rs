//! MI values: constants, tuples and lists.

use std::str::FromStr;

/// An ordered sequence of `variable=value` pairs.
///
/// Order is preserved and duplicate keys are allowed, since GDB emits
/// both (e.g. `stack=[frame={..},frame={..}]`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Results(Vec<(String, Value)>);

/// A single MI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A decoded C-string.
    Const(String),
    /// `{variable=value,...}`.
    Tuple(Results),
    /// `[value,...]`.
    List(Vec<Value>),
    /// `[variable=value,...]`.
    ResultList(Results),
}

impl Results {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pair.
    pub fn push(&mut self, key: impl Into<String>, value: Value) {
        self.0.push((key.into(), value));
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Every value stored under `key`, in order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.0.iter().filter(move |(k, _)| k == key).map(|(_, v)| v)
    }

    /// String constant stored under `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Parse the string constant stored under `key`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// Follow a `/`-separated path through nested tuples, e.g. `frame/line`.
    pub fn path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('/');
        let mut current = self.get(segments.next()?)?;
        for seg in segments {
            current = current.get(seg)?;
        }
        Some(current)
    }

    /// String constant at `path`.
    pub fn path_str(&self, path: &str) -> Option<&str> {
        self.path(path).and_then(Value::as_str)
    }

    /// Iterate over the pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Convert into a JSON object. Repeated keys collapse into an array.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (key, _) in &self.0 {
            if map.contains_key(key) {
                continue;
            }
            let mut values: Vec<_> = self.get_all(key).map(Value::to_json).collect();
            let json = if values.len() == 1 {
                values.swap_remove(0)
            } else {
                serde_json::Value::Array(values)
            };
            map.insert(key.clone(), json);
        }
        serde_json::Value::Object(map)
    }
}

impl FromIterator<(String, Value)> for Results {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Value {
    /// The string, if this is a constant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Const(s) => Some(s),
            _ => None,
        }
    }

    /// The pairs, if this is a tuple or a list of results.
    pub fn as_results(&self) -> Option<&Results> {
        match self {
            Value::Tuple(r) | Value::ResultList(r) => Some(r),
            _ => None,
        }
    }

    /// Look up `key` inside a tuple or result list.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_results().and_then(|r| r.get(key))
    }

    /// String constant under `key` inside a tuple.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    /// Parse the constant under `key` inside a tuple.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        self.get_str(key).and_then(|s| s.trim().parse().ok())
    }

    /// Elements of a list, whichever list flavour GDB chose.
    ///
    /// `threads=[{..},{..}]` and `stack=[frame={..},frame={..}]` both
    /// yield their tuples. Non-list values yield nothing.
    pub fn items(&self) -> Vec<&Value> {
        match self {
            Value::List(values) => values.iter().collect(),
            Value::ResultList(results) => results.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }

    /// Convert into a JSON value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Const(s) => serde_json::Value::String(s.clone()),
            Value::Tuple(r) => r.to_json(),
            Value::List(values) => {
                serde_json::Value::Array(values.iter().map(Value::to_json).collect())
            }
            Value::ResultList(r) => {
                serde_json::Value::Array(r.iter().map(|(_, v)| v.to_json()).collect())
            }
        }
    }
}
