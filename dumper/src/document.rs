use serde::Deserialize;
use serde_json::value::RawValue;

const DEFAULT_TYPE: &str = "_doc";

/// A single hit pulled out of a scroll page.
///
/// The body is kept exactly as the service serialized `_source`; nothing in the dump path
/// re-encodes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub index: String,
    pub doc_type: String,
    pub id: String,
    body: Vec<u8>,
}

impl Document {
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
            body: body.into(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

// Wire shape of one entry of `hits.hits`.
#[derive(Debug, Deserialize)]
pub(crate) struct Hit<'a> {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type")]
    doc_type: Option<String>,
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", borrow)]
    source: &'a RawValue,
}

impl Hit<'_> {
    pub(crate) fn into_document(self) -> Document {
        Document {
            index: self.index,
            doc_type: self.doc_type.unwrap_or_else(|| DEFAULT_TYPE.to_string()),
            id: self.id,
            body: self.source.get().as_bytes().to_vec(),
        }
    }
}
