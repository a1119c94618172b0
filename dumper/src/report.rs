use std::fmt;
use std::time::Duration;

use crate::error::DumpError;

#[derive(Debug)]
pub enum IndexStatus {
    Drained,
    /// Some documents reached the destination before the chain stopped.
    Partial(DumpError),
    Failed(DumpError),
}

#[derive(Debug)]
pub struct IndexOutcome {
    pub index: String,
    pub documents: u64,
    pub pages: u64,
    pub status: IndexStatus,
}

impl IndexOutcome {
    pub(crate) fn new(
        index: String,
        documents: u64,
        pages: u64,
        result: Result<(), DumpError>,
    ) -> Self {
        let status = match result {
            Ok(()) => IndexStatus::Drained,
            Err(err) if documents > 0 => IndexStatus::Partial(err),
            Err(err) => IndexStatus::Failed(err),
        };
        Self {
            index,
            documents,
            pages,
            status,
        }
    }

    pub fn is_drained(&self) -> bool {
        matches!(self.status, IndexStatus::Drained)
    }

    pub fn error(&self) -> Option<&DumpError> {
        match &self.status {
            IndexStatus::Drained => None,
            IndexStatus::Partial(err) | IndexStatus::Failed(err) => Some(err),
        }
    }
}

/// Result of one dump run, one entry per requested index in request order.
#[derive(Debug)]
pub struct DumpReport {
    pub indexes: Vec<IndexOutcome>,
    pub elapsed: Duration,
}

impl DumpReport {
    pub fn is_success(&self) -> bool {
        self.indexes.iter().all(IndexOutcome::is_drained)
    }

    pub fn total_documents(&self) -> u64 {
        self.indexes.iter().map(|o| o.documents).sum()
    }

    pub fn outcome(&self, index: &str) -> Option<&IndexOutcome> {
        self.indexes.iter().find(|o| o.index == index)
    }

    pub fn failures(&self) -> impl Iterator<Item = &IndexOutcome> {
        self.indexes.iter().filter(|o| !o.is_drained())
    }
}

impl fmt::Display for DumpReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .indexes
            .iter()
            .map(|o| o.index.len())
            .max()
            .unwrap_or(0)
            .max("index".len());

        writeln!(f, "{:<width$}  {:>10}  {:>6}  status", "index", "documents", "pages")?;
        for outcome in &self.indexes {
            let status = match &outcome.status {
                IndexStatus::Drained => "drained".to_string(),
                IndexStatus::Partial(err) => format!("partial ({err})"),
                IndexStatus::Failed(err) => format!("failed ({err})"),
            };
            writeln!(
                f,
                "{:<width$}  {:>10}  {:>6}  {}",
                outcome.index, outcome.documents, outcome.pages, status
            )?;
        }

        let failed = self.failures().count();
        write!(
            f,
            "{} documents from {} indexes in {}",
            self.total_documents(),
            self.indexes.len(),
            humantime::format_duration(Duration::from_millis(self.elapsed.as_millis() as u64))
        )?;
        if failed > 0 {
            write!(f, ", {failed} incomplete")?;
        }
        writeln!(f)
    }
}
