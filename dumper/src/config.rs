use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use humantime::parse_duration;
use serde::Deserialize;

use crate::format::Format;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 9200;
pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_SCROLL_TIME: &str = "10m";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_CHUNK: usize = 10_000;
pub const DEFAULT_REQUEST_TIMEOUT: &str = "60s";

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub source: SourceConfig,
    pub indexes: Vec<String>,
    pub concurrency: usize,
    pub output: OutputTarget,
    pub format: Format,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub page_size: usize,
    pub scroll_time: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
    Directory {
        dir: PathBuf,
        prefix: String,
        chunk_size: usize,
    },
}

/// One layer of settings, as read from a TOML file or collected from flags.
///
/// Layers are merged field by field before validation, so an unset flag never hides a value
/// from the file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub scroll_size: Option<usize>,
    pub scroll_time: Option<String>,
    pub concurrency: Option<usize>,
    pub index: Option<String>,
    pub file: Option<PathBuf>,
    pub directory: Option<PathBuf>,
    pub prefix: Option<String>,
    pub chunk: Option<usize>,
    pub format: Option<Format>,
    pub request_timeout: Option<String>,
}

impl RawConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;

        toml::from_str(&raw).with_context(|| format!("failed to parse TOML {}", path.display()))
    }

    /// Values set in `over` win.
    pub fn merge(self, over: RawConfig) -> RawConfig {
        RawConfig {
            host: over.host.or(self.host),
            port: over.port.or(self.port),
            scroll_size: over.scroll_size.or(self.scroll_size),
            scroll_time: over.scroll_time.or(self.scroll_time),
            concurrency: over.concurrency.or(self.concurrency),
            index: over.index.or(self.index),
            file: over.file.or(self.file),
            directory: over.directory.or(self.directory),
            prefix: over.prefix.or(self.prefix),
            chunk: over.chunk.or(self.chunk),
            format: over.format.or(self.format),
            request_timeout: over.request_timeout.or(self.request_timeout),
        }
    }
}

impl DumpConfig {
    pub fn from_raw(raw: RawConfig) -> Result<Self> {
        let host = raw.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
        if host.trim().is_empty() {
            bail!("host must not be empty");
        }

        let page_size = raw.scroll_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            bail!("scroll_size must be at least 1");
        }

        let concurrency = raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            bail!("concurrency must be at least 1");
        }

        let scroll_time = parse_duration_string(
            raw.scroll_time.as_deref().unwrap_or(DEFAULT_SCROLL_TIME),
            "scroll_time",
        )?;
        if scroll_time < Duration::from_secs(1) {
            bail!("scroll_time must be at least one second");
        }

        let request_timeout = parse_duration_string(
            raw.request_timeout
                .as_deref()
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            "request_timeout",
        )?;

        let indexes = parse_indexes(raw.index.as_deref().unwrap_or_default())?;

        let output = match (raw.file, raw.directory) {
            (Some(_), Some(_)) => bail!("file and directory outputs are mutually exclusive"),
            (Some(file), None) => OutputTarget::File(file),
            (None, Some(dir)) => OutputTarget::Directory {
                dir,
                prefix: raw.prefix.unwrap_or_default(),
                chunk_size: raw.chunk.unwrap_or(DEFAULT_CHUNK),
            },
            (None, None) => OutputTarget::Stdout,
        };

        Ok(Self {
            source: SourceConfig {
                host,
                port: raw.port.unwrap_or(DEFAULT_PORT),
                page_size,
                scroll_time,
                request_timeout,
            },
            indexes,
            concurrency,
            output,
            format: raw.format.unwrap_or_default(),
        })
    }
}

/// Splits a comma separated index list, dropping blanks and repeats.
pub fn parse_indexes(list: &str) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let indexes: Vec<String> = list
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect();

    if indexes.is_empty() {
        bail!("at least one index must be given");
    }
    Ok(indexes)
}

fn parse_duration_string(value: &str, field: &str) -> Result<Duration> {
    parse_duration(value).with_context(|| format!("invalid duration '{value}' for {field}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn with_index(index: &str) -> RawConfig {
        RawConfig {
            index: Some(index.to_string()),
            ..RawConfig::default()
        }
    }

    #[test]
    fn defaults_apply() {
        let cfg = DumpConfig::from_raw(with_index("a")).unwrap();

        assert_eq!(cfg.source.host, "localhost");
        assert_eq!(cfg.source.port, 9200);
        assert_eq!(cfg.source.page_size, 1000);
        assert_eq!(cfg.source.scroll_time, Duration::from_secs(600));
        assert_eq!(cfg.concurrency, 10);
        assert_eq!(cfg.source.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.output, OutputTarget::Stdout);
        assert_eq!(cfg.format, Format::RawSource);
    }

    #[test]
    fn index_list_is_trimmed_and_deduplicated() {
        assert_eq!(
            parse_indexes(" a, b,,a ,c").unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_indexes(" , ").is_err());
    }

    #[test]
    fn directory_output_carries_chunking() {
        let raw = RawConfig {
            directory: Some(PathBuf::from("/tmp/out")),
            prefix: Some("nightly-".into()),
            chunk: Some(0),
            ..with_index("a")
        };
        let cfg = DumpConfig::from_raw(raw).unwrap();

        assert_eq!(
            cfg.output,
            OutputTarget::Directory {
                dir: PathBuf::from("/tmp/out"),
                prefix: "nightly-".into(),
                chunk_size: 0,
            }
        );
    }

    #[test]
    fn rejects_conflicting_outputs_and_zero_workers() {
        let both = RawConfig {
            file: Some(PathBuf::from("out.json")),
            directory: Some(PathBuf::from("out")),
            ..with_index("a")
        };
        assert!(DumpConfig::from_raw(both).is_err());

        let idle = RawConfig {
            concurrency: Some(0),
            ..with_index("a")
        };
        assert!(DumpConfig::from_raw(idle).is_err());

        assert!(DumpConfig::from_raw(RawConfig::default()).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let file: RawConfig = toml::from_str(
            r#"
                host = "search.internal"
                port = 9300
                index = "from-file"
                scroll_time = "2m"
                format = "bulk_indexing"
            "#,
        )
        .unwrap();
        let flags = RawConfig {
            port: Some(9400),
            index: Some("from-flags".into()),
            ..RawConfig::default()
        };

        let cfg = DumpConfig::from_raw(file.merge(flags)).unwrap();
        assert_eq!(cfg.source.host, "search.internal");
        assert_eq!(cfg.source.port, 9400);
        assert_eq!(cfg.source.scroll_time, Duration::from_secs(120));
        assert_eq!(cfg.indexes, vec!["from-flags".to_string()]);
        assert_eq!(cfg.format, Format::BulkIndexing);
    }

    #[test]
    fn unknown_keys_and_bad_durations_fail() {
        assert!(toml::from_str::<RawConfig>("hots = \"x\"").is_err());

        let raw = RawConfig {
            scroll_time: Some("ten minutes".into()),
            ..with_index("a")
        };
        assert!(DumpConfig::from_raw(raw).is_err());
    }
}
