//! Documents, field operations and queries
//!
//! A document is a JSON object addressed by a slash path such as
//! `baths/B1` or `baths/B1/comments/C1`. Its id is the last path segment
//! and is never stored inside the object itself.
//!
//! Field paths use dots for nesting (`reactions.thumbsUp`).

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{StoreError, StoreResult};

/// Document body
pub type Fields = serde_json::Map<String, Value>;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Full path, `collection/id`
    pub path: String,
    pub data: Fields,
    /// Store-wide sequence number of the last write to this document
    pub version: u64,
}

impl Document {
    /// Last path segment
    pub fn id(&self) -> &str {
        split_path(&self.path).map(|(_, id)| id).unwrap_or("")
    }

    /// Everything before the last path segment
    pub fn collection(&self) -> &str {
        split_path(&self.path)
            .map(|(collection, _)| collection)
            .unwrap_or("")
    }

    /// Read a possibly nested field
    pub fn get(&self, field_path: &str) -> Option<&Value> {
        get_path(&self.data, field_path)
    }

    /// Deserialize into a typed value with the document id injected as `id`
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        let mut data = self.data.clone();
        data.insert("id".to_string(), Value::String(self.id().to_string()));
        serde_json::from_value(Value::Object(data)).map_err(|e| {
            StoreError::Serialization(format!("{}: {}", self.path, e))
        })
    }
}

/// Decode every document, failing on the first malformed one
pub fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> StoreResult<Vec<T>> {
    docs.iter().map(Document::decode).collect()
}

/// Decode every document, skipping malformed ones with a warning
pub fn decode_valid<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path = %doc.path, error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}

/// Serialize a typed value into document fields. The `id` key is dropped.
pub fn to_fields<T: Serialize>(value: &T) -> StoreResult<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove("id");
            Ok(map)
        }
        other => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Split `a/b/c/d` into (`a/b/c`, `d`)
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let (collection, id) = path.rsplit_once('/')?;
    if collection.is_empty() || id.is_empty() {
        None
    } else {
        Some((collection, id))
    }
}

/// Validate a document path: an even number of non-empty segments
pub fn validate_document_path(path: &str) -> StoreResult<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidField(format!(
            "'{}' is not a document path",
            path
        )));
    }
    Ok(())
}

/// Validate a collection path: an odd number of non-empty segments
pub fn validate_collection_path(path: &str) -> StoreResult<()> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.len() % 2 != 1 || segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidField(format!(
            "'{}' is not a collection path",
            path
        )));
    }
    Ok(())
}

fn get_path<'a>(data: &'a Fields, field_path: &str) -> Option<&'a Value> {
    let mut parts = field_path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Mutable slot for a nested field, creating intermediate objects
fn slot_mut<'a>(data: &'a mut Fields, field_path: &str) -> StoreResult<&'a mut Value> {
    let parts: Vec<&str> = field_path.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        return Err(StoreError::InvalidField(format!(
            "invalid field path '{}'",
            field_path
        )));
    }

    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| StoreError::InvalidField("empty field path".to_string()))?;

    let mut map = data;
    for part in parents {
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Fields::new()));
        if !entry.is_object() {
            *entry = Value::Object(Fields::new());
        }
        map = entry.as_object_mut().ok_or_else(|| {
            StoreError::InvalidField(format!("'{}' is not an object", part))
        })?;
    }

    Ok(map.entry(last.to_string()).or_insert(Value::Null))
}

/// A single field-level write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldOp {
    /// Replace the field
    Set { field: String, value: Value },
    /// Add to a numeric field; a missing or non-numeric field counts as 0
    Increment { field: String, by: i64 },
    /// Append each element not already present
    ArrayUnion { field: String, elements: Vec<Value> },
    /// Remove every occurrence of each element
    ArrayRemove { field: String, elements: Vec<Value> },
}

impl FieldOp {
    pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Self {
        FieldOp::Set {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn increment(field: impl Into<String>, by: i64) -> Self {
        FieldOp::Increment {
            field: field.into(),
            by,
        }
    }

    pub fn array_union(field: impl Into<String>, elements: Vec<Value>) -> Self {
        FieldOp::ArrayUnion {
            field: field.into(),
            elements,
        }
    }

    pub fn array_remove(field: impl Into<String>, elements: Vec<Value>) -> Self {
        FieldOp::ArrayRemove {
            field: field.into(),
            elements,
        }
    }

    /// Field path the op writes to
    pub fn field(&self) -> &str {
        match self {
            FieldOp::Set { field, .. }
            | FieldOp::Increment { field, .. }
            | FieldOp::ArrayUnion { field, .. }
            | FieldOp::ArrayRemove { field, .. } => field,
        }
    }

    /// Apply the op to a document body
    pub fn apply(&self, data: &mut Fields) -> StoreResult<()> {
        if self.field() == "id" {
            return Err(StoreError::InvalidField(
                "'id' is reserved for the document id".to_string(),
            ));
        }

        let slot = slot_mut(data, self.field())?;
        match self {
            FieldOp::Set { value, .. } => {
                *slot = value.clone();
            }
            FieldOp::Increment { by, .. } => {
                let next = match slot {
                    Value::Number(n) if n.is_i64() || n.is_u64() => {
                        Value::from(n.as_i64().unwrap_or(i64::MAX).saturating_add(*by))
                    }
                    Value::Number(n) => {
                        let current = n.as_f64().unwrap_or(0.0);
                        serde_json::Number::from_f64(current + *by as f64)
                            .map(Value::Number)
                            .unwrap_or(Value::from(*by))
                    }
                    _ => Value::from(*by),
                };
                *slot = next;
            }
            FieldOp::ArrayUnion { elements, .. } => {
                let mut items = match std::mem::take(slot) {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                for element in elements {
                    if !items.contains(element) {
                        items.push(element.clone());
                    }
                }
                *slot = Value::Array(items);
            }
            FieldOp::ArrayRemove { elements, .. } => {
                let items = match std::mem::take(slot) {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                *slot = Value::Array(
                    items
                        .into_iter()
                        .filter(|item| !elements.contains(item))
                        .collect(),
                );
            }
        }
        Ok(())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Query filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { field: String, value: Value },
    ArrayContains { field: String, value: Value },
}

impl Filter {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::ArrayContains { field, value } => doc
                .get(field)
                .and_then(Value::as_array)
                .map(|items| items.contains(value))
                .unwrap_or(false),
        }
    }
}

/// A query over a single collection
///
/// Documents missing an ordered-by field are excluded. Ties are broken by
/// document id so results are deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a document belongs to the result set, ignoring the limit
    pub fn matches(&self, doc: &Document) -> bool {
        doc.collection() == self.collection
            && self.filters.iter().all(|f| f.matches(doc))
            && self.order_by.iter().all(|o| doc.get(&o.field).is_some())
    }

    /// Result ordering
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for order in &self.order_by {
            let ord = compare_values(a.get(&order.field), b.get(&order.field));
            let ord = match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id().cmp(b.id())
    }

    /// Filter, sort and limit a candidate set
    pub fn apply<'a>(&self, docs: impl IntoIterator<Item = &'a Document>) -> Vec<Document> {
        let mut result: Vec<Document> = docs
            .into_iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect();
        result.sort_by(|a, b| self.compare(a, b));
        if let Some(limit) = self.limit {
            result.truncate(limit);
        }
        result
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

/// Total order over JSON values: missing < null < bool < number < string <
/// array < object
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .unwrap_or(0.0)
                    .partial_cmp(&y.as_f64().unwrap_or(0.0))
                    .unwrap_or(Ordering::Equal),
            }
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (i, j) in x.iter().zip(y.iter()) {
                let ord = compare_values(Some(i), Some(j));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(path: &str, data: Value) -> Document {
        Document {
            path: path.to_string(),
            data: data.as_object().cloned().unwrap(),
            version: 1,
        }
    }

    #[test]
    fn test_path_helpers() {
        let d = doc("baths/B1/comments/C1", json!({}));
        assert_eq!(d.id(), "C1");
        assert_eq!(d.collection(), "baths/B1/comments");

        assert!(validate_document_path("users/u1").is_ok());
        assert!(validate_document_path("users").is_err());
        assert!(validate_document_path("users//x/y").is_err());
        assert!(validate_collection_path("baths/B1/comments").is_ok());
        assert!(validate_collection_path("baths/B1").is_err());
    }

    #[test]
    fn test_decode_injects_id() {
        #[derive(Deserialize)]
        struct Named {
            id: String,
            name: String,
        }

        let d = doc("users/u1", json!({"name": "anna"}));
        let named: Named = d.decode().unwrap();
        assert_eq!(named.id, "u1");
        assert_eq!(named.name, "anna");
    }

    #[test]
    fn test_decode_valid_skips_malformed() {
        #[derive(Deserialize)]
        struct Counted {
            n: u32,
        }

        let docs = vec![
            doc("c/a", json!({"n": 1})),
            doc("c/b", json!({"n": "x"})),
            doc("c/c", json!({"n": 3})),
        ];
        assert!(decode_all::<Counted>(&docs).is_err());
        let valid: Vec<u32> = decode_valid::<Counted>(&docs).iter().map(|c| c.n).collect();
        assert_eq!(valid, vec![1, 3]);
    }

    #[test]
    fn test_to_fields_strips_id() {
        let fields = to_fields(&json!({"id": "x", "name": "anna"})).unwrap();
        assert!(!fields.contains_key("id"));
        assert_eq!(fields["name"], "anna");
        assert!(to_fields(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_increment_nested_field() {
        let mut data = json!({"reactions": {"thumbsUp": 2}}).as_object().cloned().unwrap();
        FieldOp::increment("reactions.thumbsUp", 1).apply(&mut data).unwrap();
        FieldOp::increment("reactions.party", 1).apply(&mut data).unwrap();
        FieldOp::increment("commentCount", 1).apply(&mut data).unwrap();

        assert_eq!(data["reactions"]["thumbsUp"], 3);
        assert_eq!(data["reactions"]["party"], 1);
        assert_eq!(data["commentCount"], 1);
    }

    #[test]
    fn test_array_union_and_remove() {
        let mut data = json!({"attendees": ["u1"]}).as_object().cloned().unwrap();

        FieldOp::array_union("attendees", vec![json!("u2"), json!("u1")])
            .apply(&mut data)
            .unwrap();
        assert_eq!(data["attendees"], json!(["u1", "u2"]));

        FieldOp::array_remove("attendees", vec![json!("u1"), json!("u9")])
            .apply(&mut data)
            .unwrap();
        assert_eq!(data["attendees"], json!(["u2"]));

        FieldOp::array_remove("missing", vec![json!("u1")])
            .apply(&mut data)
            .unwrap();
        assert_eq!(data["missing"], json!([]));
    }

    #[test]
    fn test_id_field_is_reserved() {
        let mut data = Fields::new();
        assert!(FieldOp::set("id", "x").apply(&mut data).is_err());
        assert!(FieldOp::set("a..b", 1).apply(&mut data).is_err());
    }

    #[test]
    fn test_query_order_filter_limit() {
        let docs = vec![
            doc("users/a", json!({"name": "Per", "currentBaths": 3})),
            doc("users/b", json!({"name": "Anna", "currentBaths": 3})),
            doc("users/c", json!({"name": "Ola", "currentBaths": 7})),
            doc("users/d", json!({"name": "Kari"})),
            doc("baths/x", json!({"name": "Not a user", "currentBaths": 99})),
        ];

        let query = Query::collection("users")
            .order_by("currentBaths", Direction::Descending)
            .order_by("name", Direction::Ascending)
            .limit(2);

        let result = query.apply(&docs);
        let ids: Vec<&str> = result.iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_query_filters() {
        let docs = vec![
            doc("baths/1", json!({"userId": "u1", "attendees": ["u1", "u2"]})),
            doc("baths/2", json!({"userId": "u2", "attendees": ["u2"]})),
        ];

        let mine = Query::collection("baths").where_eq("userId", "u1").apply(&docs);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id(), "1");

        let joined = Query::collection("baths")
            .where_array_contains("attendees", "u2")
            .apply(&docs);
        assert_eq!(joined.len(), 2);
    }

    #[test]
    fn test_compare_values_across_types() {
        assert_eq!(compare_values(None, Some(&json!(null))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(1)), Some(&json!("1"))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2.5)), Some(&json!(2))), Ordering::Greater);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }
}
