//! Canonical recipe records and the normalizer that turns loosely-typed
//! admin input into them.
//!
//! Input arrives as arbitrary JSON. Every field is coerced into the canonical
//! shape with loose-JSON truthiness: `null`, `false`, `0`, `""` and absent
//! values are all treated as "not provided".

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_SWEETNESS: &str = "balanced";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("recipe input is not an object")]
    NotAnObject,
    #[error("recipe input has no name")]
    MissingName,
}

/// An `(amount, item)` pair, persisted as a two-element array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient(pub String, pub String);

impl Ingredient {
    pub fn amount(&self) -> &str {
        &self.0
    }

    pub fn item(&self) -> &str {
        &self.1
    }

    fn from_value(value: &Value) -> Self {
        match value {
            Value::Array(slots) => Ingredient(slot_text(slots.first()), slot_text(slots.get(1))),
            Value::Object(fields) => {
                Ingredient(slot_text(fields.get("amount")), slot_text(fields.get("item")))
            }
            other => Ingredient(String::new(), to_text(other)),
        }
    }
}

/// The persisted form of a single recipe.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub id: String,
    pub name: String,
    pub base: Vec<String>,
    pub profile: Vec<String>,
    pub sweetness: String,
    pub ingredients: Vec<Ingredient>,
    pub method: String,
    pub glass: String,
    pub garnish: String,
    pub tags: Vec<String>,
}

impl RecipeRecord {
    /// Builds the canonical record from one raw input object.
    pub fn normalize(raw: &Value) -> Result<Self, NormalizeError> {
        let fields = raw.as_object().ok_or(NormalizeError::NotAnObject)?;

        let name = truthy_field(fields, "name")
            .map(to_text)
            .ok_or(NormalizeError::MissingName)?;

        let id = truthy_field(fields, "id")
            .map(to_text)
            .unwrap_or_else(|| slug(&name));

        let base = sequence(fields.get("base"))
            .into_iter()
            .map(|b| b.to_lowercase())
            .collect();

        let ingredients = match fields.get("ingredients") {
            Some(Value::Array(items)) => items.iter().map(Ingredient::from_value).collect(),
            Some(other) if is_truthy(other) => vec![Ingredient::from_value(other)],
            _ => Vec::new(),
        };

        Ok(RecipeRecord {
            id,
            name,
            base,
            profile: sequence(fields.get("profile")),
            sweetness: text_or(fields, "sweetness", DEFAULT_SWEETNESS),
            ingredients,
            method: text_or(fields, "method", ""),
            glass: text_or(fields, "glass", ""),
            garnish: text_or(fields, "garnish", ""),
            tags: sequence(fields.get("tags")),
        })
    }

    /// The record as a JSON object, fields in canonical order.
    pub fn to_object(&self) -> Map<String, Value> {
        let strings = |items: &[String]| Value::from(items.to_vec());

        let mut object = Map::new();
        object.insert("id".into(), Value::from(self.id.as_str()));
        object.insert("name".into(), Value::from(self.name.as_str()));
        object.insert("base".into(), strings(&self.base));
        object.insert("profile".into(), strings(&self.profile));
        object.insert("sweetness".into(), Value::from(self.sweetness.as_str()));
        object.insert(
            "ingredients".into(),
            Value::Array(
                self.ingredients
                    .iter()
                    .map(|i| Value::from(vec![i.amount(), i.item()]))
                    .collect(),
            ),
        );
        object.insert("method".into(), Value::from(self.method.as_str()));
        object.insert("glass".into(), Value::from(self.glass.as_str()));
        object.insert("garnish".into(), Value::from(self.garnish.as_str()));
        object.insert("tags".into(), strings(&self.tags));
        object
    }
}

/// Lowercased, hyphenated identifier derived from a display name.
///
/// Runs of anything other than ASCII letters and digits collapse into a single
/// hyphen; leading and trailing hyphens are dropped.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    out
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// String form of an arbitrary JSON value.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Object(_) => value.to_string(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(","),
    }
}

fn truthy_field<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    fields.get(key).filter(|v| is_truthy(v))
}

fn text_or(fields: &Map<String, Value>, key: &str, default: &str) -> String {
    truthy_field(fields, key)
        .map(to_text)
        .unwrap_or_else(|| default.to_string())
}

fn slot_text(value: Option<&Value>) -> String {
    value
        .filter(|v| is_truthy(v))
        .map(to_text)
        .unwrap_or_default()
}

// Sequences are copied element-wise; a truthy scalar becomes a single element.
fn sequence(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().map(to_text).collect(),
        Some(other) if is_truthy(other) => vec![to_text(other)],
        _ => Vec::new(),
    }
}
