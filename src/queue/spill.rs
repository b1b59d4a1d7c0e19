use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

/// I/O or serialization failure in a spill store.
///
/// Fatal for the owning queue instance: there is no silent in-memory
/// fallback, since that would break the bounded-memory guarantee.
#[derive(Debug)]
pub enum SpillError {
    Io(std::io::Error),
    Serde(serde_json::Error),
}

impl std::fmt::Display for SpillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpillError::Io(e) => write!(f, "spill store io error: {}", e),
            SpillError::Serde(e) => write!(f, "spill store codec error: {}", e),
        }
    }
}

impl std::error::Error for SpillError {}

impl From<std::io::Error> for SpillError {
    fn from(e: std::io::Error) -> Self {
        SpillError::Io(e)
    }
}

impl From<serde_json::Error> for SpillError {
    fn from(e: serde_json::Error) -> Self {
        SpillError::Serde(e)
    }
}

/// Append/read overflow storage used by `BoundedOverflowQueue`.
///
/// Elements come back from `next` in the order they were appended. The
/// store only ever holds the overflow tail of a queue, so it is created and
/// drained many times over the life of a crawl; implementations must not
/// leak resources across those cycles.
pub trait SpillStore<T> {
    fn append(&mut self, element: &T) -> Result<(), SpillError>;

    /// Next element in append order, or `None` when the store is drained.
    fn next(&mut self) -> Result<Option<T>, SpillError>;

    fn clear(&mut self);
}

/// Spill store backed by a self-deleting temp file of newline-delimited
/// json records.
///
/// The file is created lazily on first append and unlinked as soon as the
/// store drains, so repeated overflow/drain cycles never accumulate file
/// handles.
pub struct TempfileSpillStore<T> {
    file: Option<SpillFile>,
    _marker: std::marker::PhantomData<T>,
}

struct SpillFile {
    tmp: NamedTempFile,
    reader: BufReader<File>,
    pending: usize,
}

impl<T> TempfileSpillStore<T> {
    pub fn new() -> Self {
        Self {
            file: None,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for TempfileSpillStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SpillStore<T> for TempfileSpillStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn append(&mut self, element: &T) -> Result<(), SpillError> {
        if self.file.is_none() {
            let tmp = NamedTempFile::new()?;
            // Independent read cursor on the same inode; the write cursor
            // stays at the end of file.
            let reader = BufReader::new(tmp.reopen()?);
            self.file = Some(SpillFile {
                tmp,
                reader,
                pending: 0,
            });
        }
        let file = self.file.as_mut().unwrap();

        let mut line = serde_json::to_string(element)?;
        line.push('\n');
        file.tmp.as_file_mut().write_all(line.as_bytes())?;
        file.pending += 1;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<T>, SpillError> {
        let file = match self.file.as_mut() {
            Some(f) if f.pending > 0 => f,
            _ => return Ok(None),
        };

        let mut line = String::new();
        file.reader.read_line(&mut line)?;
        let element: T = serde_json::from_str(line.trim_end())?;
        file.pending -= 1;

        if file.pending == 0 {
            // Drained: drop the temp file now rather than at queue
            // destruction, so churning queues don't hold descriptors.
            self.file = None;
        }
        Ok(Some(element))
    }

    fn clear(&mut self) {
        self.file = None;
    }
}

/// In-memory spill store for tests. Never fails.
pub struct VecSpillStore<T> {
    elements: VecDeque<T>,
}

impl<T> VecSpillStore<T> {
    pub fn new() -> Self {
        Self {
            elements: VecDeque::new(),
        }
    }
}

impl<T> Default for VecSpillStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SpillStore<T> for VecSpillStore<T> {
    fn append(&mut self, element: &T) -> Result<(), SpillError> {
        self.elements.push_back(element.clone());
        Ok(())
    }

    fn next(&mut self) -> Result<Option<T>, SpillError> {
        Ok(self.elements.pop_front())
    }

    fn clear(&mut self) {
        self.elements.clear();
    }
}
