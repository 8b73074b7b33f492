//! Stage documents and the emitted pipeline

use std::fmt;
use std::io::Write;

use serde_json::Value;

use crate::bson::{document_to_json, write_document, Bson, BsonWriter, CodecResult, Document};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Match,
    Group,
    Project,
    Sort,
    Skip,
    Limit,
}

impl StageKind {
    pub fn operator(&self) -> &'static str {
        match self {
            StageKind::Match => "$match",
            StageKind::Group => "$group",
            StageKind::Project => "$project",
            StageKind::Sort => "$sort",
            StageKind::Skip => "$skip",
            StageKind::Limit => "$limit",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.operator())
    }
}

/// One pipeline stage: a single-key document such as `{$limit: 5}`.
///
/// Only the emitter builds these.
#[derive(Debug, Clone, PartialEq)]
pub struct StageDocument {
    kind: StageKind,
    body: Bson,
}

impl StageDocument {
    pub(crate) fn new(kind: StageKind, body: impl Into<Bson>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Value under the stage operator
    pub fn body(&self) -> &Bson {
        &self.body
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(self.kind.operator(), self.body.clone());
        document
    }
}

/// Ordered stage list for one collection
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub collection: String,
    pub stages: Vec<StageDocument>,
}

impl Pipeline {
    pub fn to_documents(&self) -> Vec<Document> {
        self.stages.iter().map(StageDocument::to_document).collect()
    }

    /// Writes each stage as one top-level document
    pub fn write_to<W: Write>(&self, writer: &mut BsonWriter<W>) -> CodecResult<()> {
        self.stages
            .iter()
            .try_for_each(|stage| write_document(writer, &stage.to_document()))
    }

    /// Stage operators in order, e.g. `["$match", "$group"]`
    pub fn operators(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.kind.operator()).collect()
    }

    /// `{"aggregate": <collection>, "pipeline": [...]}` in relaxed JSON
    pub fn to_json(&self) -> Value {
        let stages: Vec<Value> = self
            .stages
            .iter()
            .map(|s| document_to_json(&s.to_document()))
            .collect();
        serde_json::json!({
            "aggregate": self.collection,
            "pipeline": stages,
        })
    }
}
