use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use anyhow::{Context, Result};
use tempfile::Builder;
use tracing::debug;

use crate::document::Document;
use crate::format::FormatFn;

/// Where dumped documents end up.
///
/// Implementations are shared by every pipeline worker, so `process` takes `&self`.
pub trait Destination: Send + Sync {
    fn process(&self, doc: Document) -> io::Result<()>;

    /// Flushes and releases whatever the destination holds open. Called once, after the dump.
    fn close(&self) -> io::Result<()>;
}

fn poisoned(what: &str) -> io::Error {
    io::Error::other(format!("{what} lock poisoned"))
}

/// Appends every record to one stream, in the order `process` is called.
///
/// Records are written whole under a mutex, but there is no routing: documents of all indexes
/// interleave in the stream.
pub struct StreamDestination<W: Write + Send> {
    writer: Mutex<BufWriter<W>>,
    format: FormatFn,
}

impl<W: Write + Send> StreamDestination<W> {
    pub fn new(writer: W, format: FormatFn) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
            format,
        }
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, BufWriter<W>>> {
        self.writer.lock().map_err(|_| poisoned("stream writer"))
    }
}

impl StreamDestination<io::Stdout> {
    pub fn stdout(format: FormatFn) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> Destination for StreamDestination<W> {
    fn process(&self, doc: Document) -> io::Result<()> {
        let record = (self.format)(&doc);
        self.lock()?.write_all(&record)
    }

    fn close(&self) -> io::Result<()> {
        self.lock()?.flush()
    }
}

/// A single output file. Same guarantees as [`StreamDestination`].
pub struct FileDestination {
    path: PathBuf,
    stream: StreamDestination<File>,
}

impl FileDestination {
    pub fn create(path: &Path, format: FormatFn) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            stream: StreamDestination::new(file, format),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Destination for FileDestination {
    fn process(&self, doc: Document) -> io::Result<()> {
        self.stream.process(doc)
    }

    fn close(&self) -> io::Result<()> {
        let mut writer = self.stream.lock()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }
}

/// Writes each index to its own files under a directory, rotating every `chunk_size`
/// documents (`0` keeps a single file per index).
///
/// The index map is behind a reader/writer lock: lookups share it, only the first document of
/// an index takes it exclusively. Each index then has its own mutex, so writers of different
/// indexes never wait on each other and records of one index are never torn.
pub struct Folder {
    dir: PathBuf,
    prefix: String,
    chunk_size: usize,
    format: FormatFn,
    state: RwLock<FolderState>,
}

#[derive(Default)]
struct FolderState {
    sinks: HashMap<String, Arc<Mutex<IndexSink>>>,
    closed: bool,
}

struct IndexSink {
    index: String,
    writer: Option<BufWriter<File>>,
    // documents in the current chunk
    written: usize,
    files: Vec<PathBuf>,
}

impl Folder {
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        chunk_size: usize,
        format: FormatFn,
    ) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;

        Ok(Self {
            dir,
            prefix: prefix.into(),
            chunk_size,
            format,
            state: RwLock::new(FolderState::default()),
        })
    }

    /// Files written so far, per index, in rotation order.
    pub fn files(&self) -> BTreeMap<String, Vec<PathBuf>> {
        let Ok(state) = self.state.read() else {
            return BTreeMap::new();
        };

        state
            .sinks
            .iter()
            .filter_map(|(index, sink)| {
                let sink = sink.lock().ok()?;
                Some((index.clone(), sink.files.clone()))
            })
            .collect()
    }

    fn sink_for(&self, index: &str) -> io::Result<Arc<Mutex<IndexSink>>> {
        {
            let state = self.state.read().map_err(|_| poisoned("folder"))?;
            if state.closed {
                return Err(closed_error());
            }
            if let Some(sink) = state.sinks.get(index) {
                return Ok(Arc::clone(sink));
            }
        }

        let mut state = self.state.write().map_err(|_| poisoned("folder"))?;
        if state.closed {
            return Err(closed_error());
        }
        // Another worker may have registered the index between the two locks.
        let sink = state
            .sinks
            .entry(index.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IndexSink {
                    index: index.to_string(),
                    writer: None,
                    written: 0,
                    files: Vec::new(),
                }))
            });
        Ok(Arc::clone(sink))
    }

    fn open_chunk(&self, sink: &mut IndexSink) -> io::Result<()> {
        if let Some(mut previous) = sink.writer.take() {
            previous.flush()?;
        }

        let prefix = format!(
            "{}{}-{:05}-",
            self.prefix,
            sink.index,
            sink.files.len()
        );
        let (file, path) = Builder::new()
            .prefix(&prefix)
            .suffix(".json")
            .tempfile_in(&self.dir)?
            .keep()
            .map_err(|err| err.error)?;

        debug!(index = %sink.index, path = %path.display(), "opened output chunk");
        sink.writer = Some(BufWriter::new(file));
        sink.written = 0;
        sink.files.push(path);
        Ok(())
    }
}

fn closed_error() -> io::Error {
    io::Error::other("folder destination already closed")
}

impl Destination for Folder {
    fn process(&self, doc: Document) -> io::Result<()> {
        let sink = self.sink_for(&doc.index)?;
        let mut sink = sink.lock().map_err(|_| poisoned("index writer"))?;

        let rotate = self.chunk_size > 0 && sink.written >= self.chunk_size;
        if sink.writer.is_none() || rotate {
            self.open_chunk(&mut sink)?;
        }

        let record = (self.format)(&doc);
        match sink.writer.as_mut() {
            Some(writer) => writer.write_all(&record)?,
            None => return Err(io::Error::other("index writer missing after open")),
        }
        sink.written += 1;
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let mut state = self.state.write().map_err(|_| poisoned("folder"))?;
        state.closed = true;

        let mut first_err = None;
        for (index, sink) in &state.sinks {
            let mut sink = match sink.lock() {
                Ok(sink) => sink,
                Err(_) => {
                    first_err.get_or_insert(poisoned(&format!("index writer for '{index}'")));
                    continue;
                }
            };
            if let Some(mut writer) = sink.writer.take() {
                if let Err(err) = writer.flush() {
                    first_err.get_or_insert(err);
                }
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
