//! Data types for knowledge-base documents and search results.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::KbConfig;
use crate::error::{KbError, Result};
use crate::search::VectorField;

/// Format used for document timestamps.
pub const TIMESTAMP_FORMAT: &str = "%m/%d/%Y, %H:%M:%S";

/// Dimensionality of the computer-vision text and image vectors.
pub const CV_VECTOR_DIMENSIONS: usize = 1024;

/// Current local time rendered with [`TIMESTAMP_FORMAT`].
pub(crate) fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// A single hit returned by the vector search backend.
///
/// `fields` carries whatever the index returned for the hit (text,
/// categories, vectors) keyed by field name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Identifier of the hit, unique per index.
    pub id: String,
    /// The relevance score reported by the backend (higher is more relevant).
    pub score: f32,
    /// Named field values returned with the hit.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl SearchResult {
    /// Create a hit with no fields.
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self { id: id.into(), score, fields: Map::new() }
    }

    /// Attach a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Build a result from one raw hit object of a search response.
    ///
    /// `@search.score` becomes the score, `id` the identifier, and every
    /// other key not starting with `@` is kept as a field.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::SearchBackend`] if the hit is not an object or has
    /// no string `id`.
    pub fn from_hit(backend: &str, hit: Value) -> Result<Self> {
        let Value::Object(mut object) = hit else {
            return Err(KbError::SearchBackend {
                backend: backend.to_string(),
                message: "search hit is not a JSON object".to_string(),
            });
        };

        let id = match object.remove("id") {
            Some(Value::String(id)) => id,
            _ => {
                return Err(KbError::SearchBackend {
                    backend: backend.to_string(),
                    message: "search hit has no string id".to_string(),
                });
            }
        };
        let score = object.get("@search.score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        object.retain(|key, _| !key.starts_with('@'));

        Ok(Self { id, score, fields: object })
    }

    /// The value of a string field, if present.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The `text` field, if present.
    pub fn text(&self) -> Option<&str> {
        self.field_str(KbField::Text.as_str())
    }
}

/// The closed set of fields a knowledge-base document may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KbField {
    Id,
    Text,
    TextEn,
    DocUrl,
    Timestamp,
    ItemVector,
    OrigLang,
    Access,
    Client,
    Container,
    Filename,
    WebUrl,
    ContentType,
    CategoryId,
    CvImageVector,
    CvTextVector,
}

impl KbField {
    /// Every schema field, in declaration order.
    pub const ALL: [KbField; 16] = [
        KbField::Id,
        KbField::Text,
        KbField::TextEn,
        KbField::DocUrl,
        KbField::Timestamp,
        KbField::ItemVector,
        KbField::OrigLang,
        KbField::Access,
        KbField::Client,
        KbField::Container,
        KbField::Filename,
        KbField::WebUrl,
        KbField::ContentType,
        KbField::CategoryId,
        KbField::CvImageVector,
        KbField::CvTextVector,
    ];

    /// The field name as stored in the index and the database.
    pub fn as_str(self) -> &'static str {
        match self {
            KbField::Id => "id",
            KbField::Text => "text",
            KbField::TextEn => "text_en",
            KbField::DocUrl => "doc_url",
            KbField::Timestamp => "timestamp",
            KbField::ItemVector => "item_vector",
            KbField::OrigLang => "orig_lang",
            KbField::Access => "access",
            KbField::Client => "client",
            KbField::Container => "container",
            KbField::Filename => "filename",
            KbField::WebUrl => "web_url",
            KbField::ContentType => "contentType",
            KbField::CategoryId => "categoryId",
            KbField::CvImageVector => "cv_image_vector",
            KbField::CvTextVector => "cv_text_vector",
        }
    }

    /// Whether the field holds an embedding vector.
    pub fn is_vector(self) -> bool {
        matches!(self, KbField::ItemVector | KbField::CvImageVector | KbField::CvTextVector)
    }
}

impl fmt::Display for KbField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KbField {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        KbField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| KbError::UnknownField(s.to_string()))
    }
}

/// Names of every non-vector schema field, the default `select` list for
/// searches.
pub fn select_fields() -> Vec<&'static str> {
    KbField::ALL.into_iter().filter(|f| !f.is_vector()).map(KbField::as_str).collect()
}

/// A knowledge-base document: an explicit mapping from schema field to value.
///
/// Unknown field names are rejected when loading, so a typo in an ingestion
/// payload surfaces as [`KbError::UnknownField`] instead of being stored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct KbDocument {
    fields: BTreeMap<KbField, Value>,
}

impl KbDocument {
    /// Create a document populated with the schema defaults for `config`.
    pub fn new(config: &KbConfig) -> Self {
        let mut doc = Self::default();
        for field in [
            KbField::Id,
            KbField::Text,
            KbField::TextEn,
            KbField::DocUrl,
            KbField::Filename,
            KbField::WebUrl,
            KbField::ContentType,
        ] {
            doc.set(field, "");
        }
        doc.set(KbField::Timestamp, now_timestamp());
        doc.set(KbField::ItemVector, Value::Array(Vec::new()));
        doc.set(KbField::OrigLang, "en");
        doc.set(KbField::Access, "public");
        doc.set(KbField::Client, config.index_name.as_str());
        doc.set(KbField::Container, config.blob_container.as_str());

        if config.process_images {
            let zeros = vec![0.0f32; CV_VECTOR_DIMENSIONS];
            doc.set_vector(KbField::CvImageVector, &zeros);
            doc.set_vector(KbField::CvTextVector, &zeros);
        }
        doc
    }

    /// Overlay `data` onto this document.
    ///
    /// Every key is checked against the schema before anything is written,
    /// so a failed load leaves the document untouched.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::UnknownField`] for the first key outside the schema.
    pub fn load(&mut self, data: Map<String, Value>) -> Result<()> {
        let parsed = data
            .into_iter()
            .map(|(key, value)| key.parse::<KbField>().map(|field| (field, value)))
            .collect::<Result<Vec<_>>>()?;
        self.fields.extend(parsed);
        Ok(())
    }

    /// Get a field value.
    pub fn get(&self, field: KbField) -> Option<&Value> {
        self.fields.get(&field)
    }

    /// Set a field value.
    pub fn set(&mut self, field: KbField, value: impl Into<Value>) {
        self.fields.insert(field, value.into());
    }

    /// Store an embedding in a vector field.
    pub fn set_vector(&mut self, field: KbField, vector: &[f32]) {
        self.set(field, vector.iter().map(|v| Value::from(f64::from(*v))).collect::<Vec<_>>());
    }

    /// Read a vector field, empty when absent.
    pub fn vector(&self, field: VectorField) -> Vec<f32> {
        match self.get(field.into()) {
            Some(Value::Array(values)) => {
                values.iter().filter_map(Value::as_f64).map(|v| v as f32).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Get a string field, empty when absent or not a string.
    pub fn get_str(&self, field: KbField) -> &str {
        self.get(field).and_then(Value::as_str).unwrap_or_default()
    }

    /// The document identifier.
    pub fn id(&self) -> &str {
        self.get_str(KbField::Id)
    }

    /// The document text.
    pub fn text(&self) -> &str {
        self.get_str(KbField::Text)
    }

    /// Assign a random UUID if the identifier is empty; returns the id.
    pub fn ensure_id(&mut self) -> &str {
        if self.id().is_empty() {
            self.set(KbField::Id, uuid::Uuid::new_v4().to_string());
        }
        self.id()
    }

    /// Iterate the populated fields.
    pub fn fields(&self) -> impl Iterator<Item = (KbField, &Value)> {
        self.fields.iter().map(|(field, value)| (*field, value))
    }

    /// The document as a JSON object keyed by field name.
    pub fn to_json(&self) -> Value {
        Value::Object(self.clone().into())
    }
}

impl TryFrom<Map<String, Value>> for KbDocument {
    type Error = KbError;

    fn try_from(data: Map<String, Value>) -> Result<Self> {
        let mut doc = Self::default();
        doc.load(data)?;
        Ok(doc)
    }
}

impl From<KbDocument> for Map<String, Value> {
    fn from(doc: KbDocument) -> Self {
        doc.fields.into_iter().map(|(field, value)| (field.as_str().to_string(), value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_field_names_round_trip() {
        for field in KbField::ALL {
            assert_eq!(field.as_str().parse::<KbField>().unwrap(), field);
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = "colour".parse::<KbField>().unwrap_err();
        assert!(matches!(err, KbError::UnknownField(name) if name == "colour"));
    }

    #[test]
    fn test_defaults_follow_config() {
        let config = KbConfig::builder().index_name("kb").process_images(true).build().unwrap();
        let doc = KbDocument::new(&config);

        assert_eq!(doc.get_str(KbField::Client), "kb");
        assert_eq!(doc.get_str(KbField::OrigLang), "en");
        assert_eq!(doc.get_str(KbField::Access), "public");
        assert_eq!(doc.vector(VectorField::CvImage).len(), CV_VECTOR_DIMENSIONS);
        assert!(doc.vector(VectorField::Item).is_empty());
    }

    #[test]
    fn test_no_cv_vectors_without_image_processing() {
        let doc = KbDocument::new(&KbConfig::default());
        assert!(doc.get(KbField::CvImageVector).is_none());
        assert!(doc.get(KbField::CvTextVector).is_none());
    }

    #[test]
    fn test_failed_load_leaves_document_untouched() {
        let mut doc = KbDocument::new(&KbConfig::default());
        let before = doc.clone();
        let data = json!({ "text": "changed", "bogus": 1 });
        let Value::Object(map) = data else { unreachable!() };

        assert!(doc.load(map).is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let ok: KbDocument = serde_json::from_value(json!({ "id": "a", "text": "t" })).unwrap();
        assert_eq!(ok.id(), "a");

        let err = serde_json::from_value::<KbDocument>(json!({ "id": "a", "extra": "x" }));
        assert!(err.is_err());
    }

    #[test]
    fn test_ensure_id_assigns_once() {
        let mut doc = KbDocument::default();
        let first = doc.ensure_id().to_string();
        assert!(!first.is_empty());
        assert_eq!(doc.ensure_id(), first);
    }

    #[test]
    fn test_result_from_hit() {
        let hit = json!({
            "@search.score": 0.75,
            "@search.rerankerScore": 2.1,
            "id": "doc-1",
            "text": "hello",
            "categoryId": "KnowledgeBase"
        });
        let result = SearchResult::from_hit("test", hit).unwrap();

        assert_eq!(result.id, "doc-1");
        assert!((result.score - 0.75).abs() < 1e-6);
        assert_eq!(result.text(), Some("hello"));
        assert_eq!(result.fields.len(), 2);
    }

    #[test]
    fn test_result_from_hit_without_id() {
        let err = SearchResult::from_hit("test", json!({ "text": "x" })).unwrap_err();
        assert!(matches!(err, KbError::SearchBackend { .. }));
    }

    #[test]
    fn test_select_fields_exclude_vectors() {
        let fields = select_fields();
        assert!(fields.contains(&"text"));
        assert!(fields.contains(&"categoryId"));
        assert!(!fields.contains(&"item_vector"));
        assert!(!fields.contains(&"cv_image_vector"));
    }
}
