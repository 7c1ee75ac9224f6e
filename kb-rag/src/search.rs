//! Search request construction for the vector search backend.
//!
//! A [`SearchRequest`] describes one nearest-neighbour query: which vector
//! field to match, the query embedding, how many neighbours to return, and
//! for the hybrid modes the keyword text. [`SearchRequest::to_body`] renders
//! it as the JSON body of a search REST call.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::document::KbField;
use crate::error::{KbError, Result};

/// Name of the semantic ranking configuration used by `semantic_hybrid`.
pub const SEMANTIC_CONFIGURATION: &str = "default";

static IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(https?://[^/\s]+(?:/[^/\s]+)*/[^?/\s]+(?:\.jpg|\.jpeg|\.png)(?:\?[^\s'"]+)?)"#,
    )
    .expect("unreachable error: image URL pattern is valid")
});

/// Find the first link to a `.jpg`, `.jpeg` or `.png` image in `text`.
///
/// A trailing query string (e.g. a SAS token) is included in the match.
pub fn find_image_url(text: &str) -> Option<&str> {
    IMAGE_URL.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// How the backend ranks candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Pure nearest-neighbour search.
    #[default]
    Vector,
    /// Nearest-neighbour plus keyword search.
    Hybrid,
    /// Hybrid search re-ranked by the semantic ranker.
    SemanticHybrid,
}

impl SearchMode {
    /// The mode name.
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Vector => "vector",
            SearchMode::Hybrid => "hybrid",
            SearchMode::SemanticHybrid => "semantic_hybrid",
        }
    }

    /// Whether the mode sends the query text for keyword matching.
    pub fn uses_text(self) -> bool {
        !matches!(self, SearchMode::Vector)
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "vector" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            "semantic_hybrid" => Ok(SearchMode::SemanticHybrid),
            other => Err(KbError::UnsupportedSearchMode(other.to_string())),
        }
    }
}

/// The vector fields a query can be matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorField {
    /// The text embedding of the document (embedding model output).
    #[default]
    #[serde(rename = "item_vector")]
    Item,
    /// The computer-vision embedding of the document text.
    #[serde(rename = "cv_text_vector")]
    CvText,
    /// The computer-vision embedding of the document image.
    #[serde(rename = "cv_image_vector")]
    CvImage,
}

impl VectorField {
    /// The field name in the index.
    pub fn as_str(self) -> &'static str {
        KbField::from(self).as_str()
    }
}

impl From<VectorField> for KbField {
    fn from(field: VectorField) -> Self {
        match field {
            VectorField::Item => KbField::ItemVector,
            VectorField::CvText => KbField::CvTextVector,
            VectorField::CvImage => KbField::CvImageVector,
        }
    }
}

impl fmt::Display for VectorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VectorField {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "item_vector" => Ok(VectorField::Item),
            "cv_text_vector" => Ok(VectorField::CvText),
            "cv_image_vector" => Ok(VectorField::CvImage),
            other => Err(KbError::UnknownVectorField(other.to_string())),
        }
    }
}

/// The nearest-neighbour part of a search.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorQuery {
    /// Field to match against.
    pub field: VectorField,
    /// Query embedding.
    pub value: Vec<f32>,
    /// Number of neighbours.
    pub k: usize,
}

/// One search call against the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Ranking mode.
    pub mode: SearchMode,
    /// Keyword text, sent for the hybrid modes.
    pub text: String,
    /// Nearest-neighbour query.
    pub vector: VectorQuery,
    /// OData filter expression.
    pub filter: Option<String>,
    /// Fields to return with each hit.
    pub select: Vec<String>,
}

impl SearchRequest {
    /// Render the request as a search REST body.
    pub fn to_body(&self) -> Value {
        let mut body = json!({
            "vector": {
                "value": self.vector.value,
                "fields": self.vector.field.as_str(),
                "k": self.vector.k,
            },
            "select": self.select.join(", "),
        });

        if let Some(filter) = &self.filter {
            body["filter"] = Value::String(filter.clone());
        }
        if self.mode.uses_text() {
            body["search"] = Value::String(self.text.clone());
        }
        if self.mode == SearchMode::SemanticHybrid {
            body["queryType"] = Value::String("semantic".to_string());
            body["semanticConfiguration"] = Value::String(SEMANTIC_CONFIGURATION.to_string());
        }
        body
    }
}
