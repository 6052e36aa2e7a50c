//! Snapshot normalization.
//!
//! # Responsibility
//! - Decode raw document bodies into typed entities with defaults.
//! - Apply deterministic ordering per collection.
//!
//! # Invariants
//! - Missing `color` is green, missing `order` is 0, missing references are
//!   unset, missing or pending timestamps sort as oldest.
//! - Categories and stacks sort by `order` ascending; ties keep snapshot order.
//! - Notes sort by color priority ascending, then `created_at` descending.
//! - Undecodable documents are skipped and reported, never guessed.

use crate::model::entity::{Category, Note, NoteColor, Stack};
use crate::store::RawDocument;
use log::debug;
use serde::Deserialize;
use serde_json::{Number, Value};
use uuid::Uuid;

/// Document dropped during normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedDocument {
    pub doc_id: String,
    pub reason: String,
}

/// Normalization output for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized<T> {
    /// Typed entities in display order.
    pub items: Vec<T>,
    pub skipped: Vec<SkippedDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryBody {
    name: Option<String>,
    order: Option<Number>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackBody {
    category_id: Option<String>,
    title: Option<String>,
    order: Option<Number>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NoteBody {
    text: Option<String>,
    color: Option<String>,
    category_id: Option<String>,
    stack_id: Option<String>,
}

/// Normalizes a `Categories(owner)` snapshot.
pub fn normalize_categories(docs: &[RawDocument]) -> Normalized<Category> {
    let mut normalized = decode_all(docs, |doc, id, owner| {
        let body: CategoryBody = decode_body(doc)?;
        Ok(Category {
            id,
            owner,
            name: body.name.unwrap_or_default(),
            order: order_value(body.order.as_ref()),
            created_at: doc.created_at,
        })
    });
    normalized.items.sort_by_key(|category| category.order);
    normalized
}

/// Normalizes a `Stacks(owner, categoryId)` snapshot.
pub fn normalize_stacks(docs: &[RawDocument]) -> Normalized<Stack> {
    let mut normalized = decode_all(docs, |doc, id, owner| {
        let body: StackBody = decode_body(doc)?;
        let category_id = body
            .category_id
            .as_deref()
            .and_then(parse_reference)
            .ok_or_else(|| "stack has no valid categoryId".to_string())?;
        Ok(Stack {
            id,
            owner,
            category_id,
            title: body.title.unwrap_or_default(),
            order: order_value(body.order.as_ref()),
            created_at: doc.created_at,
        })
    });
    normalized.items.sort_by_key(|stack| stack.order);
    normalized
}

/// Normalizes a `Notes(owner)` snapshot.
pub fn normalize_notes(docs: &[RawDocument]) -> Normalized<Note> {
    let mut normalized = decode_all(docs, |doc, id, owner| {
        let body: NoteBody = decode_body(doc)?;
        let color = match body.color.as_deref() {
            None => NoteColor::Green,
            Some(value) => NoteColor::parse(value).unwrap_or_else(|| {
                debug!(
                    "event=normalize module=sync status=fallback doc_id={} field=color value={}",
                    doc.id, value
                );
                NoteColor::Green
            }),
        };
        Ok(Note {
            id,
            owner,
            text: body.text.unwrap_or_default(),
            color,
            category_id: body.category_id.as_deref().and_then(parse_reference),
            stack_id: body.stack_id.as_deref().and_then(parse_reference),
            created_at: doc.created_at,
        })
    });
    sort_notes(&mut normalized.items);
    normalized
}

/// Sorts notes by color priority, newest first within one color.
///
/// `None` timestamps compare as oldest. The sort is stable.
pub fn sort_notes(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        a.color
            .priority()
            .cmp(&b.color.priority())
            .then_with(|| b.created_at.cmp(&a.created_at))
    });
}

fn decode_all<T>(
    docs: &[RawDocument],
    decode: impl Fn(&RawDocument, Uuid, Uuid) -> Result<T, String>,
) -> Normalized<T> {
    let mut items = Vec::with_capacity(docs.len());
    let mut skipped = Vec::new();

    for doc in docs {
        let result = parse_id(&doc.id, "id")
            .and_then(|id| parse_id(&doc.owner, "owner").map(|owner| (id, owner)))
            .and_then(|(id, owner)| decode(doc, id, owner));
        match result {
            Ok(item) => items.push(item),
            Err(reason) => skipped.push(SkippedDocument {
                doc_id: doc.id.clone(),
                reason,
            }),
        }
    }

    Normalized { items, skipped }
}

fn decode_body<T: for<'de> Deserialize<'de>>(doc: &RawDocument) -> Result<T, String> {
    serde_json::from_value(Value::Object(doc.fields.clone()))
        .map_err(|err| format!("undecodable body: {err}"))
}

fn parse_id(value: &str, what: &str) -> Result<Uuid, String> {
    Uuid::parse_str(value).map_err(|_| format!("invalid {what} `{value}`"))
}

fn parse_reference(value: &str) -> Option<Uuid> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Uuid::parse_str(trimmed).ok()
}

fn order_value(value: Option<&Number>) -> i64 {
    value
        .and_then(|number| {
            number
                .as_i64()
                .or_else(|| number.as_f64().map(|float| float as i64))
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{normalize_categories, normalize_notes, normalize_stacks};
    use crate::model::entity::NoteColor;
    use crate::store::RawDocument;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn raw(owner: Uuid, created_at: Option<i64>, body: Value) -> RawDocument {
        let Value::Object(fields) = body else {
            panic!("fixture body must be an object");
        };
        RawDocument {
            id: Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            created_at,
            fields,
        }
    }

    #[test]
    fn notes_sort_by_color_then_newest_first() {
        let owner = Uuid::new_v4();
        let docs = vec![
            raw(owner, Some(1), json!({"text": "red", "color": "red"})),
            raw(owner, Some(2), json!({"text": "green-old", "color": "green"})),
            raw(owner, Some(3), json!({"text": "yellow", "color": "yellow"})),
            raw(owner, Some(4), json!({"text": "green-new", "color": "green"})),
        ];

        let notes = normalize_notes(&docs).items;
        let texts: Vec<&str> = notes.iter().map(|note| note.text.as_str()).collect();
        assert_eq!(texts, ["green-new", "green-old", "yellow", "red"]);
    }

    #[test]
    fn note_defaults_apply_for_missing_fields() {
        let owner = Uuid::new_v4();
        let docs = vec![
            raw(owner, None, json!({"text": "pending"})),
            raw(owner, Some(10), json!({"text": "done", "categoryId": null})),
        ];

        let notes = normalize_notes(&docs).items;
        assert_eq!(notes[0].text, "done");
        assert_eq!(notes[1].text, "pending");
        assert!(notes.iter().all(|note| note.color == NoteColor::Green));
        assert!(notes.iter().all(|note| note.category_id.is_none()));
        assert!(notes.iter().all(|note| note.stack_id.is_none()));
    }

    #[test]
    fn unknown_color_falls_back_and_bad_reference_is_unset() {
        let owner = Uuid::new_v4();
        let docs = vec![raw(
            owner,
            Some(1),
            json!({"text": "x", "color": "blue", "categoryId": "not-a-uuid"}),
        )];

        let normalized = normalize_notes(&docs);
        assert!(normalized.skipped.is_empty());
        assert_eq!(normalized.items[0].color, NoteColor::Green);
        assert_eq!(normalized.items[0].category_id, None);
    }

    #[test]
    fn undecodable_documents_are_skipped() {
        let owner = Uuid::new_v4();
        let mut bad_id = raw(owner, Some(1), json!({"text": "x"}));
        bad_id.id = "legacy-id".to_string();
        let docs = vec![bad_id, raw(owner, Some(2), json!({"text": 42}))];

        let normalized = normalize_notes(&docs);
        assert!(normalized.items.is_empty());
        assert_eq!(normalized.skipped.len(), 2);
        assert_eq!(normalized.skipped[0].doc_id, "legacy-id");
    }

    #[test]
    fn categories_sort_by_order_with_stable_ties() {
        let owner = Uuid::new_v4();
        let docs = vec![
            raw(owner, Some(1), json!({"name": "b", "order": 1})),
            raw(owner, Some(2), json!({"name": "a0", "order": 0})),
            raw(owner, Some(3), json!({"name": "c"})),
            raw(owner, Some(4), json!({"name": "a1", "order": 0.0})),
        ];

        let first = normalize_categories(&docs).items;
        let second = normalize_categories(&docs).items;
        let names: Vec<&str> = first.iter().map(|category| category.name.as_str()).collect();
        assert_eq!(names, ["a0", "c", "a1", "b"]);
        assert_eq!(first, second);
    }

    #[test]
    fn stacks_without_category_are_skipped() {
        let owner = Uuid::new_v4();
        let category = Uuid::new_v4();
        let docs = vec![
            raw(owner, Some(1), json!({"title": "orphan"})),
            raw(
                owner,
                Some(2),
                json!({"title": "Sprint1", "categoryId": category.to_string(), "order": 0}),
            ),
        ];

        let normalized = normalize_stacks(&docs);
        assert_eq!(normalized.items.len(), 1);
        assert_eq!(normalized.items[0].category_id, category);
        assert_eq!(normalized.skipped.len(), 1);
    }
}
