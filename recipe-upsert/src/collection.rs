use crate::recipe::{RecipeRecord, is_truthy, slug, to_text};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// A persisted record. Kept as a raw JSON object so that keys written by
/// other tools survive a merge.
pub type RecordObject = Map<String, Value>;

/// Result of merging one batch into a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSummary {
    pub count: usize,
    /// Ids in input order, one entry per upserted record.
    pub ids: Vec<String>,
}

/// The ordered list of records stored as a single JSON document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Collection {
    records: Vec<RecordObject>,
}

impl Collection {
    pub fn new(records: Vec<RecordObject>) -> Self {
        Collection { records }
    }

    /// Decodes a stored document.
    ///
    /// Anything other than a JSON array yields an empty collection, and array
    /// elements that are not objects are dropped.
    pub fn decode(content: &str) -> Self {
        let items = match serde_json::from_str::<Value>(content) {
            Ok(Value::Array(items)) => items,
            Ok(_) => {
                tracing::warn!("Stored document is not a JSON array, starting from empty");
                return Collection::default();
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Stored document is not valid JSON, starting from empty"
                );
                return Collection::default();
            }
        };

        let total = items.len();
        let records: Vec<RecordObject> = items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(record) => Some(record),
                _ => None,
            })
            .collect();

        if records.len() != total {
            tracing::warn!(
                dropped = total - records.len(),
                "Dropped non-object entries from stored document"
            );
        }

        Collection { records }
    }

    /// Pretty-printed JSON array with a trailing newline.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let mut content = serde_json::to_string_pretty(&self.records)?;
        content.push('\n');
        Ok(content)
    }

    pub fn records(&self) -> &[RecordObject] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Inserts `candidate`, or shallow-merges it over the existing record with
    /// the same derived id. Returns true when an existing record was updated.
    pub fn upsert(&mut self, candidate: &RecipeRecord) -> bool {
        let existing = self
            .records
            .iter_mut()
            .find(|record| derived_id(record) == candidate.id);

        match existing {
            Some(record) => {
                record.extend(candidate.to_object());
                true
            }
            None => {
                self.records.push(candidate.to_object());
                false
            }
        }
    }

    /// Upserts every candidate in order, then sorts the collection by name.
    pub fn upsert_all<'a, I>(&mut self, candidates: I) -> UpsertSummary
    where
        I: IntoIterator<Item = &'a RecipeRecord>,
    {
        let mut ids = Vec::new();
        let mut names_by_id: HashMap<&str, &str> = HashMap::new();

        for candidate in candidates {
            if let Some(previous) = names_by_id.insert(&candidate.id, &candidate.name)
                && previous != candidate.name
            {
                tracing::warn!(
                    id = %candidate.id,
                    previous = %previous,
                    name = %candidate.name,
                    "Recipes in the same batch share an id, the later one wins"
                );
            }

            self.upsert(candidate);
            ids.push(candidate.id.clone());
        }

        self.sort_by_name();

        UpsertSummary {
            count: ids.len(),
            ids,
        }
    }

    /// Stable sort by `name`; records without a name sort as the empty string.
    pub fn sort_by_name(&mut self) {
        self.records
            .sort_by(|a, b| compare_names(&record_name(a), &record_name(b)));
    }
}

/// The key a stored record is matched by: its `id`, or the slug of its name.
pub fn derived_id(record: &RecordObject) -> String {
    match record.get("id").filter(|id| is_truthy(id)) {
        Some(id) => to_text(id),
        None => slug(&record_name(record)),
    }
}

fn record_name(record: &RecordObject) -> String {
    record.get("name").map(to_text).unwrap_or_default()
}

/// Dictionary-style ordering. Names compare by their letters with accents
/// and case removed; ties go to the unaccented form, then to lowercase at the
/// first letter that differs only in case.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    base_letters(a)
        .cmp(base_letters(b))
        .then_with(|| accented_letters(a).cmp(accented_letters(b)))
        .then_with(|| {
            a.chars()
                .zip(b.chars())
                .find(|(x, y)| x != y)
                .map(|(x, y)| {
                    x.is_uppercase()
                        .cmp(&y.is_uppercase())
                        .then_with(|| x.cmp(&y))
                })
                .unwrap_or_else(|| a.len().cmp(&b.len()))
        })
}

fn base_letters(name: &str) -> impl Iterator<Item = char> + '_ {
    accented_letters(name).filter(|c| !is_combining_mark(*c))
}

// Decomposed, so an accent follows its base letter as a combining mark
fn accented_letters(name: &str) -> impl Iterator<Item = char> + '_ {
    name.nfd().flat_map(char::to_lowercase)
}
