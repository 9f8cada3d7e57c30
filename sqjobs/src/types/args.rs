use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{JobError, HookResult};

use super::payload::null_as_default;

/// Positional and keyword arguments of one job call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobArgs {
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub kwargs: Map<String, Value>,
}

impl JobArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Set a keyword argument
    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    /// Positional argument at `index`
    pub fn positional<T: DeserializeOwned>(&self, index: usize) -> HookResult<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| JobError::MissingArgument(format!("#{index}")))?;
        decode(&format!("#{index}"), value)
    }

    /// Keyword argument `name`
    pub fn keyword<T: DeserializeOwned>(&self, name: &str) -> HookResult<T> {
        let value = self
            .kwargs
            .get(name)
            .ok_or_else(|| JobError::MissingArgument(name.to_string()))?;
        decode(name, value)
    }

    /// Optional keyword argument; `null` counts as absent
    pub fn keyword_opt<T: DeserializeOwned>(&self, name: &str) -> HookResult<Option<T>> {
        match self.kwargs.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => decode(name, value).map(Some),
        }
    }

    /// Resolve a parameter that may be passed either positionally at `index`
    /// or by keyword `name`. Positional wins.
    pub fn get<T: DeserializeOwned>(&self, index: usize, name: &str) -> HookResult<T> {
        match self.args.get(index) {
            Some(value) => decode(name, value),
            None => self.keyword(name),
        }
    }

    /// Remove and return a keyword argument
    pub fn take_kwarg(&mut self, name: &str) -> Option<Value> {
        self.kwargs.remove(name)
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

impl From<Vec<Value>> for JobArgs {
    fn from(args: Vec<Value>) -> Self {
        Self {
            args,
            kwargs: Map::new(),
        }
    }
}

fn decode<T: DeserializeOwned>(name: &str, value: &Value) -> HookResult<T> {
    T::deserialize(value).map_err(|e| JobError::InvalidArgument {
        name: name.to_string(),
        reason: e.to_string(),
    })
}
