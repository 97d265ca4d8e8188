//! Field-level change detection between entity snapshots.
//!
//! Snapshots are `serde_json::Value` objects (the shape the change-feed
//! producers already have in hand). Only an explicit allow-list of fields is
//! tracked per entity type; anything else is ignored even when it differs.
//!
//! Attachment-style arrays ("file-like" fields) are compared by their sorted
//! identity-key set rather than deep equality, because file ordering is
//! irrelevant in the shop UI and reorder-only updates must not notify anyone.

use std::collections::BTreeSet;

use chrono::DateTime;
use serde::Serialize;
use serde_json::Value;

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Tracked-field allow-list
// ---------------------------------------------------------------------------

/// How a tracked field's values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Primitive equality (string, number, bool).
    Scalar,
    /// RFC 3339 timestamps compared by instant.
    Date,
    /// Identity-bearing attachment array, compared by sorted id set.
    FileArray,
    /// Nested object, compared key-by-key.
    Object,
}

/// One entry of the per-entity tracked-field allow-list.
#[derive(Debug, Clone, Copy)]
pub struct TrackedField {
    /// JSON key in the entity snapshot.
    pub name: &'static str,
    /// Human-readable label used in notification bodies.
    pub label: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, label: &'static str, kind: FieldKind) -> TrackedField {
    TrackedField { name, label, kind }
}

const TASK_FIELDS: &[TrackedField] = &[
    field("status", "status", FieldKind::Scalar),
    field("title", "title", FieldKind::Scalar),
    field("description", "description", FieldKind::Scalar),
    field("priority", "priority", FieldKind::Scalar),
    field("assignee_id", "assignee", FieldKind::Scalar),
    field("deadline", "deadline", FieldKind::Date),
    field("attachments", "attachments", FieldKind::FileArray),
    field("checklist", "checklist", FieldKind::Object),
];

const ARTWORK_FIELDS: &[TrackedField] = &[
    field("status", "status", FieldKind::Scalar),
    field("name", "name", FieldKind::Scalar),
    field("version", "version", FieldKind::Scalar),
    field("approved_by", "approver", FieldKind::Scalar),
    field("due_date", "due date", FieldKind::Date),
    field("files", "files", FieldKind::FileArray),
];

const TRUCK_FIELDS: &[TrackedField] = &[
    field("status", "status", FieldKind::Scalar),
    field("plate", "plate", FieldKind::Scalar),
    field("sector", "sector", FieldKind::Scalar),
    field("scheduled_date", "scheduled date", FieldKind::Date),
    field("photos", "photos", FieldKind::FileArray),
    field("measurements", "measurements", FieldKind::Object),
];

/// The tracked-field allow-list for an entity type.
///
/// Unknown entity types track nothing, so `detect_changes` on them is a
/// guaranteed no-op.
pub fn tracked_fields(entity_type: &str) -> &'static [TrackedField] {
    match entity_type {
        "task" => TASK_FIELDS,
        "artwork" => ARTWORK_FIELDS,
        "truck" => TRUCK_FIELDS,
        _ => &[],
    }
}

// ---------------------------------------------------------------------------
// Change records
// ---------------------------------------------------------------------------

/// Added/removed breakdown for a file-like array field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArrayDelta {
    /// Identity keys present only in the new snapshot.
    pub added: Vec<String>,
    /// Identity keys present only in the old snapshot.
    pub removed: Vec<String>,
    /// Count-based human-readable summary (e.g. `"2 files added, 1 file removed"`).
    pub description: String,
}

impl ArrayDelta {
    /// Whether the identity sets are actually different.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// One detected field-level change.
#[derive(Debug, Clone, Serialize)]
pub struct FieldChange {
    /// JSON key of the changed field.
    pub field: &'static str,
    /// Human-readable field label for notification bodies.
    pub label: &'static str,
    /// Value in the old snapshot (`Null` when absent).
    pub old: Value,
    /// Value in the new snapshot (`Null` when absent).
    pub new: Value,
    /// Added/removed breakdown, present only for file-like array fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array_delta: Option<ArrayDelta>,
    /// The user whose mutation produced this change.
    pub changed_by: DbId,
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// Diff two snapshots of an entity, returning one entry per tracked field
/// whose value differs.
///
/// Fields missing from a snapshot are treated as `Null`; a field that is
/// `Null` on both sides is unchanged.
pub fn detect_changes(
    entity_type: &str,
    old: &Value,
    new: &Value,
    changed_by: DbId,
) -> Vec<FieldChange> {
    let mut changes = Vec::new();

    for tracked in tracked_fields(entity_type) {
        let old_value = old.get(tracked.name).cloned().unwrap_or(Value::Null);
        let new_value = new.get(tracked.name).cloned().unwrap_or(Value::Null);

        if values_equal(tracked.kind, &old_value, &new_value) {
            continue;
        }

        let array_delta = match tracked.kind {
            FieldKind::FileArray => Some(analyze_array_delta(&old_value, &new_value)),
            _ => None,
        };

        changes.push(FieldChange {
            field: tracked.name,
            label: tracked.label,
            old: old_value,
            new: new_value,
            array_delta,
            changed_by,
        });
    }

    changes
}

/// Compare two values under the given field kind.
fn values_equal(kind: FieldKind, old: &Value, new: &Value) -> bool {
    // Null identity first: equal iff both null.
    match (old.is_null(), new.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        (false, false) => {}
    }

    match kind {
        FieldKind::FileArray => identity_set(old) == identity_set(new),
        FieldKind::Date => dates_equal(old, new),
        FieldKind::Object => deep_equal(old, new),
        FieldKind::Scalar => old == new,
    }
}

/// Compare two RFC 3339 timestamps by instant, so `2024-05-01T12:00:00Z`
/// equals `2024-05-01T09:00:00-03:00`. Unparseable values fall back to
/// primitive equality.
fn dates_equal(old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(a), Some(b)) => {
            match (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
                (Ok(a), Ok(b)) => a == b,
                _ => a == b,
            }
        }
        _ => old == new,
    }
}

/// Recursive key-by-key object comparison with a serialization fallback for
/// mixed shapes (object vs. non-object on either side).
fn deep_equal(old: &Value, new: &Value) -> bool {
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            if a.len() != b.len() {
                return false;
            }
            a.iter().all(|(key, value)| match b.get(key) {
                Some(other) => deep_equal(value, other),
                None => false,
            })
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_equal(x, y))
        }
        // Mixed or primitive shapes: serialized-text comparison.
        _ => old.to_string() == new.to_string(),
    }
}

// ---------------------------------------------------------------------------
// File-like array analysis
// ---------------------------------------------------------------------------

/// Compute the added/removed identity sets between two file-like arrays and
/// a count-based description for notification bodies.
pub fn analyze_array_delta(old: &Value, new: &Value) -> ArrayDelta {
    let old_ids = identity_set(old);
    let new_ids = identity_set(new);

    let added: Vec<String> = new_ids.difference(&old_ids).cloned().collect();
    let removed: Vec<String> = old_ids.difference(&new_ids).cloned().collect();
    let description = describe_delta(added.len(), removed.len());

    ArrayDelta {
        added,
        removed,
        description,
    }
}

/// Extract the sorted identity-key set of a file-like array.
///
/// Items that are objects contribute their `"id"` (number or string); plain
/// string items contribute themselves. Items with no usable identity are
/// skipped.
fn identity_set(value: &Value) -> BTreeSet<String> {
    let Some(items) = value.as_array() else {
        return BTreeSet::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(map) => map.get("id").and_then(|id| match id {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }),
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}

/// Singular/plural-aware count summary.
fn describe_delta(added: usize, removed: usize) -> String {
    let mut parts = Vec::new();
    if added > 0 {
        parts.push(format!("{added} {} added", pluralize(added, "file", "files")));
    }
    if removed > 0 {
        parts.push(format!(
            "{removed} {} removed",
            pluralize(removed, "file", "files")
        ));
    }
    if parts.is_empty() {
        "no file changes".to_string()
    } else {
        parts.join(", ")
    }
}

fn pluralize<'a>(count: usize, singular: &'a str, plural: &'a str) -> &'a str {
    if count == 1 {
        singular
    } else {
        plural
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_snapshots_produce_no_changes() {
        let snapshot = json!({"status": "open", "title": "Wrap truck 12"});
        let changes = detect_changes("task", &snapshot, &snapshot, 1);
        assert!(changes.is_empty());
    }

    #[test]
    fn one_change_per_differing_tracked_field() {
        let old = json!({"status": "open", "title": "Wrap truck 12", "priority": 1});
        let new = json!({"status": "done", "title": "Wrap truck 12", "priority": 2});
        let changes = detect_changes("task", &old, &new, 1);

        assert_eq!(changes.len(), 2);
        let fields: Vec<_> = changes.iter().map(|c| c.field).collect();
        assert!(fields.contains(&"status"));
        assert!(fields.contains(&"priority"));
    }

    #[test]
    fn untracked_fields_are_ignored() {
        let old = json!({"internal_rev": 4});
        let new = json!({"internal_rev": 5});
        assert!(detect_changes("task", &old, &new, 1).is_empty());
    }

    #[test]
    fn unknown_entity_type_tracks_nothing() {
        let old = json!({"status": "a"});
        let new = json!({"status": "b"});
        assert!(detect_changes("invoice", &old, &new, 1).is_empty());
    }

    #[test]
    fn null_to_value_is_a_change() {
        let old = json!({"deadline": null});
        let new = json!({"deadline": "2024-06-01T07:30:00Z"});
        let changes = detect_changes("task", &old, &new, 1);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "deadline");
    }

    #[test]
    fn missing_field_is_treated_as_null() {
        let old = json!({});
        let new = json!({"deadline": null});
        assert!(detect_changes("task", &old, &new, 1).is_empty());
    }

    #[test]
    fn dates_compared_by_instant() {
        let old = json!({"deadline": "2024-05-01T12:00:00Z"});
        let new = json!({"deadline": "2024-05-01T09:00:00-03:00"});
        assert!(detect_changes("task", &old, &new, 1).is_empty());
    }

    #[test]
    fn date_instant_change_is_detected() {
        let old = json!({"deadline": "2024-05-01T12:00:00Z"});
        let new = json!({"deadline": "2024-05-02T12:00:00Z"});
        assert_eq!(detect_changes("task", &old, &new, 1).len(), 1);
    }

    #[test]
    fn reordered_file_array_is_unchanged() {
        let old = json!({"attachments": [{"id": 1}, {"id": 2}, {"id": 3}]});
        let new = json!({"attachments": [{"id": 3}, {"id": 1}, {"id": 2}]});
        assert!(detect_changes("task", &old, &new, 1).is_empty());
    }

    #[test]
    fn file_array_change_carries_delta() {
        let old = json!({"attachments": [{"id": 1}, {"id": 2}]});
        let new = json!({"attachments": [{"id": 2}, {"id": 3}, {"id": 4}]});
        let changes = detect_changes("task", &old, &new, 9);

        assert_eq!(changes.len(), 1);
        let delta = changes[0].array_delta.as_ref().unwrap();
        assert_eq!(delta.added, vec!["3", "4"]);
        assert_eq!(delta.removed, vec!["1"]);
        assert_eq!(delta.description, "2 files added, 1 file removed");
        assert_eq!(changes[0].changed_by, 9);
    }

    #[test]
    fn delta_description_singular() {
        let old = json!([{"id": "a"}]);
        let new = json!([{"id": "a"}, {"id": "b"}]);
        let delta = analyze_array_delta(&old, &new);
        assert_eq!(delta.description, "1 file added");
    }

    #[test]
    fn delta_of_equal_sets_is_empty() {
        let old = json!(["a.png", "b.png"]);
        let new = json!(["b.png", "a.png"]);
        let delta = analyze_array_delta(&old, &new);
        assert!(delta.is_empty());
        assert_eq!(delta.description, "no file changes");
    }

    #[test]
    fn nested_object_compared_key_by_key() {
        let old = json!({"checklist": {"cut": true, "print": {"done": false}}});
        let new = json!({"checklist": {"print": {"done": false}, "cut": true}});
        assert!(detect_changes("task", &old, &new, 1).is_empty());

        let new = json!({"checklist": {"cut": true, "print": {"done": true}}});
        assert_eq!(detect_changes("task", &old, &new, 1).len(), 1);
    }

    #[test]
    fn scalar_type_change_is_detected() {
        let old = json!({"priority": 1});
        let new = json!({"priority": "1"});
        assert_eq!(detect_changes("task", &old, &new, 1).len(), 1);
    }
}
