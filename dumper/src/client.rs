use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::trace;

use crate::config::SourceConfig;
use crate::document::{Document, Hit};
use crate::error::DumpError;

/// Fetches the body behind a URL.
///
/// The pipeline only ever issues GETs, so this is the whole surface it needs from HTTP.
pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Vec<u8>>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("failed request to {url}"))?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response.text().unwrap_or_default();
            anyhow::bail!("request to {url} failed with status {status}: {message}");
        }

        let bytes = response
            .bytes()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Clone)]
struct Endpoints {
    base: String,
    scroll: String,
    size: usize,
}

impl Endpoints {
    fn new(source: &SourceConfig) -> Self {
        Self {
            base: format!("http://{}:{}", source.host, source.port),
            scroll: format!("{}s", source.scroll_time.as_secs().max(1)),
            size: source.page_size,
        }
    }

    fn open(&self, index: &str) -> String {
        format!(
            "{}/{}/_search?scroll={}&size={}&search_type=scan",
            self.base,
            urlencoding::encode(index),
            self.scroll,
            self.size
        )
    }

    fn next(&self, scroll_id: &str) -> String {
        format!(
            "{}/_search/scroll?scroll={}&search_type=scan&size={}&scroll_id={}",
            self.base,
            self.scroll,
            self.size,
            urlencoding::encode(scroll_id)
        )
    }
}

/// One decoded scroll response.
#[derive(Debug)]
pub struct Page {
    pub scroll_id: String,
    /// `hits.total` when the service reports it.
    pub total: Option<u64>,
    pub documents: Vec<Document>,
}

/// Which request a response answers. Only the open request may come back without hits.
#[derive(Debug, Clone, Copy)]
enum Step {
    Open,
    Continue,
}

#[derive(Deserialize)]
struct ScrollResponse<'a> {
    #[serde(rename = "_scroll_id")]
    scroll_id: String,
    #[serde(borrow)]
    hits: Option<Hits<'a>>,
}

#[derive(Deserialize)]
struct Hits<'a> {
    total: Option<Total>,
    #[serde(borrow)]
    hits: Option<Vec<Hit<'a>>>,
}

// Older services report a bare count, newer ones an object with a relation.
#[derive(Deserialize)]
#[serde(untagged)]
enum Total {
    Count(u64),
    Tracked { value: u64 },
}

impl Total {
    fn value(&self) -> u64 {
        match self {
            Total::Count(n) => *n,
            Total::Tracked { value } => *value,
        }
    }
}

/// Talks the scroll protocol on top of a [`Transport`].
pub struct SearchClient {
    transport: Box<dyn Transport>,
    endpoints: Endpoints,
}

impl SearchClient {
    pub fn new(source: &SourceConfig, transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            endpoints: Endpoints::new(source),
        }
    }

    pub fn connect(source: &SourceConfig) -> Result<Self> {
        let transport = HttpTransport::new(source.request_timeout)?;
        Ok(Self::new(source, Box::new(transport)))
    }

    /// Starts a scroll over `index`.
    ///
    /// In scan mode the opening response carries no hits; anything it does carry belongs to
    /// the first page and is returned along with the token.
    pub fn open_scroll(&self, index: &str) -> Result<Page, DumpError> {
        self.fetch_page(&self.endpoints.open(index), Step::Open)
    }

    /// Fetches the page behind `scroll_id`. A response without `hits.hits` is a decode error,
    /// never an empty page.
    pub fn next_page(&self, scroll_id: &str) -> Result<Page, DumpError> {
        self.fetch_page(&self.endpoints.next(scroll_id), Step::Continue)
    }

    fn fetch_page(&self, url: &str, step: Step) -> Result<Page, DumpError> {
        let content = self
            .transport
            .get(url)
            .map_err(|err| DumpError::Transport {
                url: url.to_string(),
                message: format!("{err:#}"),
            })?;
        trace!(url, bytes = content.len(), "fetched scroll page");

        decode_page(&content, step).map_err(|message| DumpError::Decode {
            url: url.to_string(),
            message,
        })
    }
}

fn decode_page(content: &[u8], step: Step) -> Result<Page, String> {
    let response: ScrollResponse<'_> =
        serde_json::from_slice(content).map_err(|err| err.to_string())?;
    let (total, hits) = match response.hits {
        Some(hits) => (hits.total.map(|t| t.value()), hits.hits),
        None => (None, None),
    };

    let hits = match (hits, step) {
        (Some(hits), _) => hits,
        (None, Step::Open) => Vec::new(),
        (None, Step::Continue) => return Err("scroll page has no hits.hits".to_string()),
    };

    Ok(Page {
        scroll_id: response.scroll_id,
        total,
        documents: hits.into_iter().map(Hit::into_document).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Recorder {
        urls: Mutex<Vec<String>>,
        reply: &'static str,
    }

    impl Transport for std::sync::Arc<Recorder> {
        fn get(&self, url: &str) -> Result<Vec<u8>> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.reply.as_bytes().to_vec())
        }
    }

    fn source() -> SourceConfig {
        SourceConfig {
            host: "es.local".into(),
            port: 9201,
            page_size: 250,
            scroll_time: Duration::from_secs(90),
            request_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn builds_scan_urls() {
        let endpoints = Endpoints::new(&source());
        assert_eq!(
            endpoints.open("logs-2024"),
            "http://es.local:9201/logs-2024/_search?scroll=90s&size=250&search_type=scan"
        );
        assert_eq!(
            endpoints.next("c2Nhbj=="),
            "http://es.local:9201/_search/scroll?scroll=90s&search_type=scan&size=250&scroll_id=c2Nhbj%3D%3D"
        );
    }

    #[test]
    fn decodes_hits_and_token() {
        let body = br#"{
            "_scroll_id": "next",
            "hits": {
                "total": 3,
                "hits": [
                    {"_index": "a", "_type": "t", "_id": "1", "_source": {"n": 1}},
                    {"_index": "a", "_type": "t", "_id": "2", "_source": {"n": 2}}
                ]
            }
        }"#;
        let page = decode_page(body, Step::Continue).unwrap();

        assert_eq!(page.scroll_id, "next");
        assert_eq!(page.total, Some(3));
        let ids: Vec<&str> = page.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(page.documents[1].body(), br#"{"n": 2}"#);
    }

    #[test]
    fn reads_tracked_total_object() {
        let body = br#"{"_scroll_id":"s","hits":{"total":{"value":12,"relation":"eq"},"hits":[]}}"#;
        let page = decode_page(body, Step::Continue).unwrap();
        assert_eq!(page.total, Some(12));
        assert!(page.documents.is_empty());
    }

    #[test]
    fn open_without_hits_is_not_an_error() {
        let page = decode_page(br#"{"_scroll_id":"s"}"#, Step::Open).unwrap();
        assert_eq!(page.total, None);
        assert!(page.documents.is_empty());
    }

    #[test]
    fn missing_scroll_id_is_a_decode_error() {
        let recorder = std::sync::Arc::new(Recorder {
            urls: Mutex::new(Vec::new()),
            reply: r#"{"hits":{"hits":[]}}"#,
        });
        let client = SearchClient::new(&source(), Box::new(recorder.clone()));

        let err = client.next_page("abc").unwrap_err();
        assert!(matches!(err, DumpError::Decode { .. }), "{err}");
        assert_eq!(recorder.urls.lock().unwrap().len(), 1);
    }

    #[test]
    fn continuation_without_hits_is_a_decode_error() {
        for reply in [
            r#"{"_scroll_id":"s2"}"#,
            r#"{"_scroll_id":"s2","hits":{"total":5}}"#,
        ] {
            let recorder = std::sync::Arc::new(Recorder {
                urls: Mutex::new(Vec::new()),
                reply,
            });
            let client = SearchClient::new(&source(), Box::new(recorder));

            match client.next_page("s1") {
                Err(DumpError::Decode { url, message }) => {
                    assert!(url.ends_with("scroll_id=s1"), "{url}");
                    assert!(message.contains("hits.hits"), "{message}");
                }
                other => panic!("unexpected result for {reply}: {other:?}"),
            }
        }
    }

    #[test]
    fn open_without_hits_array_is_accepted() {
        let recorder = std::sync::Arc::new(Recorder {
            urls: Mutex::new(Vec::new()),
            reply: r#"{"_scroll_id":"s0","hits":{"total":5}}"#,
        });
        let client = SearchClient::new(&source(), Box::new(recorder));

        let page = client.open_scroll("logs").unwrap();
        assert_eq!(page.scroll_id, "s0");
        assert_eq!(page.total, Some(5));
        assert!(page.documents.is_empty());
    }

    #[test]
    fn transport_failure_keeps_url() {
        struct Down;
        impl Transport for Down {
            fn get(&self, _url: &str) -> Result<Vec<u8>> {
                anyhow::bail!("connection refused")
            }
        }

        let client = SearchClient::new(&source(), Box::new(Down));
        match client.open_scroll("a") {
            Err(DumpError::Transport { url, message }) => {
                assert!(url.ends_with("/a/_search?scroll=90s&size=250&search_type=scan"));
                assert!(message.contains("connection refused"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
