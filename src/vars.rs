use std::collections::{BTreeMap, HashMap};

/// A variable's value: an ordered list of words or a map from key to words.
///
/// Scalars are one-word lists; the empty scalar is the empty list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    List(Vec<String>),
    Map(BTreeMap<String, Vec<String>>),
}

impl Value {
    pub fn scalar(s: impl Into<String>) -> Self {
        let s = s.into();
        if s.is_empty() {
            Value::List(Vec::new())
        } else {
            Value::List(vec![s])
        }
    }

    /// Number of elements, or of keys for a map.
    pub fn len(&self) -> usize {
        match self {
            Value::List(l) => l.len(),
            Value::Map(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The list itself, or the map's keys.
    pub fn words(&self) -> Vec<String> {
        match self {
            Value::List(l) => l.clone(),
            Value::Map(m) => m.keys().cloned().collect(),
        }
    }

    /// Text form used for the status variable and exported environments.
    pub fn text(&self) -> String {
        self.words().join(" ")
    }
}

/// The variable store.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    vars: HashMap<String, Value>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables imported from a process environment; each value is one word.
    pub fn from_env(env: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars = env
            .into_iter()
            .map(|(k, v)| (k, Value::List(vec![v])))
            .collect();
        Self { vars }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn is_map(&self, name: &str) -> bool {
        matches!(self.vars.get(name), Some(Value::Map(_)))
    }

    /// Words of `name`; map keys for a map, empty when unset.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.vars.get(name).map(Value::words).unwrap_or_default()
    }

    pub fn map(&self, name: &str) -> BTreeMap<String, Vec<String>> {
        match self.vars.get(name) {
            Some(Value::Map(m)) => m.clone(),
            _ => BTreeMap::new(),
        }
    }

    pub fn scalar(&self, name: &str) -> String {
        self.vars.get(name).map(Value::text).unwrap_or_default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn set_list(&mut self, name: impl Into<String>, words: Vec<String>) {
        self.set(name, Value::List(words));
    }

    pub fn set_map(&mut self, name: impl Into<String>, map: BTreeMap<String, Vec<String>>) {
        self.set(name, Value::Map(map));
    }

    pub fn set_scalar(&mut self, name: impl Into<String>, s: impl Into<String>) {
        self.set(name, Value::scalar(s));
    }

    /// Environment bindings for a child process.
    ///
    /// Lists are joined with single spaces; maps are not exported.
    pub fn export(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .vars
            .iter()
            .filter_map(|(k, v)| match v {
                Value::List(l) => Some((k.clone(), l.join(" "))),
                Value::Map(_) => None,
            })
            .collect();
        out.sort();
        out
    }
}

fn parse_index(idx: &str) -> Option<usize> {
    idx.parse::<usize>().ok()
}

/// Element `idx` of `list`, or the empty string if `idx` is not a valid index.
pub fn list_el(list: &[String], idx: &str) -> String {
    parse_index(idx)
        .and_then(|i| list.get(i))
        .cloned()
        .unwrap_or_default()
}

/// Set element `idx` of `list`, padding with empty elements as needed.
///
/// Returns `None` when `idx` is not a number.
pub fn set_list_el(mut list: Vec<String>, idx: &str, val: String) -> Option<Vec<String>> {
    let i = parse_index(idx)?;
    if i >= list.len() {
        list.resize(i + 1, String::new());
    }
    list[i] = val;
    Some(list)
}
