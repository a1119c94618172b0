use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Turns a document into the bytes of one output record.
pub type FormatFn = fn(&Document) -> Vec<u8>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Format {
    #[default]
    RawSource,
    BulkIndexing,
}

impl Format {
    pub fn formatter(self) -> FormatFn {
        match self {
            Format::RawSource => raw_source,
            Format::BulkIndexing => bulk_indexing,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::RawSource => f.write_str("raw_source"),
            Format::BulkIndexing => f.write_str("bulk_indexing"),
        }
    }
}

/// The `_source` payload on a line of its own.
pub fn raw_source(doc: &Document) -> Vec<u8> {
    let body = doc.body();
    let mut out = Vec::with_capacity(body.len() + 1);
    out.extend_from_slice(body);
    out.push(b'\n');
    out
}

#[derive(Serialize)]
struct BulkAction<'a> {
    index: BulkTarget<'a>,
}

#[derive(Serialize)]
struct BulkTarget<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_type")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Action line followed by the source line, ready to be posted to `_bulk`.
pub fn bulk_indexing(doc: &Document) -> Vec<u8> {
    let action = BulkAction {
        index: BulkTarget {
            index: &doc.index,
            doc_type: &doc.doc_type,
            id: &doc.id,
        },
    };

    let body = doc.body();
    let mut out = Vec::with_capacity(body.len() + 96);
    // Serializing borrowed strings into a Vec cannot fail.
    if serde_json::to_writer(&mut out, &action).is_err() {
        out.clear();
    }
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(b'\n');
    out
}
