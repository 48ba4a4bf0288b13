//! Field-level request validation

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Validation messages keyed by request field.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn messages(&self, field: &str) -> &[String] {
        self.0.get(field).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let joined: Vec<String> = self
            .0
            .iter()
            .flat_map(|(field, msgs)| msgs.iter().map(move |m| format!("{}: {}", field, m)))
            .collect();
        f.write_str(&joined.join("; "))
    }
}

fn label(field: &str) -> String {
    field.replace('_', " ")
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

/// Reads typed fields out of a JSON object, collecting every failure.
pub struct FieldReader<'a> {
    body: &'a Map<String, Value>,
    errors: ValidationErrors,
}

impl<'a> FieldReader<'a> {
    pub fn new(body: &'a Map<String, Value>) -> Self {
        Self {
            body,
            errors: ValidationErrors::new(),
        }
    }

    pub fn fail(&mut self, field: &str, message: impl Into<String>) {
        self.errors.add(field, message);
    }

    pub fn raw(&self, field: &str) -> Option<&'a Value> {
        self.body.get(field)
    }

    fn required(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.body.get(field);
        if is_missing(value) {
            self.fail(field, format!("The {} field is required.", label(field)));
            return None;
        }
        value
    }

    pub fn required_string(&mut self, field: &str) -> Option<String> {
        match self.required(field)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.fail(field, format!("The {} field must be a string.", label(field)));
                None
            }
        }
    }

    /// Finite numbers, or strings holding one. `NaN` and `inf` are rejected.
    pub fn required_number(&mut self, field: &str) -> Option<f64> {
        let parsed = match self.required(field)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
        .filter(|f| f.is_finite());
        if parsed.is_none() {
            self.fail(field, format!("The {} field must be a number.", label(field)));
        }
        parsed
    }

    pub fn required_integer(&mut self, field: &str) -> Option<i64> {
        let parsed = match self.required(field)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        if parsed.is_none() {
            self.fail(field, format!("The {} field must be an integer.", label(field)));
        }
        parsed
    }

    /// Field must exist in the body, whatever its value.
    pub fn present(&mut self, field: &str) -> Option<&'a Value> {
        let value = self.body.get(field);
        if value.is_none() {
            self.fail(field, format!("The {} field must be present.", label(field)));
        }
        value
    }

    pub fn finish<T>(self, value: Option<T>) -> Result<T, ValidationErrors> {
        match value {
            Some(v) if self.errors.is_empty() => Ok(v),
            _ => Err(self.errors),
        }
    }
}
