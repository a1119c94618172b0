pub mod cli;
pub mod client;
pub mod config;
pub mod destination;
pub mod document;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod report;
pub mod utils;

pub use cli::run;
pub use client::{SearchClient, Transport};
pub use config::DumpConfig;
pub use destination::{Destination, FileDestination, Folder, StreamDestination};
pub use document::Document;
pub use error::DumpError;
pub use format::Format;
pub use pipeline::{PipelineOptions, ScrollPipeline};
pub use report::{DumpReport, IndexOutcome, IndexStatus};
