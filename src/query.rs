//! The three query modes over a set of files

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

use crate::{read_header, Error, Header, Value};

/// A `key=value` filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Error)]
#[error("expected KEY=VALUE, got {0:?}")]
pub struct InvalidFilter(String);

impl FromStr for Filter {
    type Err = InvalidFilter;

    /// Split on the first `=`; the value may itself contain `=`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (key, value) = s.split_once('=').ok_or_else(|| InvalidFilter(s.to_string()))?;
        Ok(Self {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Whether a header key contains `pattern`, as given or uppercased
pub fn key_matches(key: &str, pattern: &str) -> bool {
    key.contains(pattern) || key.contains(&pattern.to_uppercase())
}

/// Where headers come from
pub trait HeaderSource {
    fn header(&self, path: &Path) -> Result<Header, Error>;
}

/// Decoded headers read from HDF5 files on disk
#[derive(Debug, Default, Clone, Copy)]
pub struct Hdf5Headers;

impl HeaderSource for Hdf5Headers {
    fn header(&self, path: &Path) -> Result<Header, Error> {
        read_header(path, true)
    }
}

/// Headers held in memory, keyed by path
impl HeaderSource for HashMap<PathBuf, Header> {
    fn header(&self, path: &Path) -> Result<Header, Error> {
        self.get(path)
            .cloned()
            .ok_or_else(|| Error::Io(std::io::ErrorKind::NotFound.into()))
    }
}

fn header_of(source: &impl HeaderSource, path: &Path) -> Result<Header, Error> {
    source.header(path).map_err(|e| Error::File {
        path: path.to_path_buf(),
        source: Box::new(e),
    })
}

/// The absolute paths of the files with an entry that matches `filter`
///
/// A file is listed once, however many of its entries match.
pub fn filter_files(
    files: &[PathBuf],
    filter: &Filter,
    source: &impl HeaderSource,
) -> Result<Vec<PathBuf>, Error> {
    let mut matches = Vec::new();
    for path in files {
        let header = header_of(source, path)?;
        let hit = header.entries().find(|(key, value)| {
            key_matches(key, &filter.key) && value.contains_text(&filter.value)
        });
        if let Some((key, _)) = hit {
            debug!(path = %path.display(), key, "filter matched");
            matches.push(absolute(path)?);
        }
    }
    Ok(matches)
}

/// `path` made absolute, with `.` and `..` resolved without touching the file system
fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    let mut normalized = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            component => normalized.push(component),
        }
    }
    Ok(normalized)
}

/// The whole header of the first file, if there is one
pub fn full_header(files: &[PathBuf], source: &impl HeaderSource) -> Result<Option<Header>, Error> {
    files.first().map(|path| header_of(source, path)).transpose()
}

/// The values of every key matching any of `keywords`, for every file
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    /// Sorted and distinct
    pub keys: Vec<String>,
    pub rows: Vec<ComparisonRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonRow {
    pub file_name: String,
    /// One per key; `None` where the file lacks the key
    pub values: Vec<Option<Value>>,
}

impl Comparison {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

pub fn compare_keywords(
    files: &[PathBuf],
    keywords: &[String],
    source: &impl HeaderSource,
) -> Result<Comparison, Error> {
    let headers = files
        .iter()
        .map(|path| header_of(source, path))
        .collect::<Result<Vec<_>, _>>()?;

    let keys = headers
        .iter()
        .flat_map(Header::keys)
        .filter(|key| keywords.iter().any(|keyword| key_matches(key, keyword)))
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    debug!(?keys, "matched keys");

    let rows = headers
        .iter()
        .map(|header| ComparisonRow {
            file_name: base_name(header.path()),
            values: keys.iter().map(|key| header.get(key).cloned()).collect(),
        })
        .collect();

    Ok(Comparison { keys, rows })
}

pub(crate) fn base_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or(path.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// Which query a run performs
#[derive(Debug, Clone, PartialEq)]
pub enum Mode {
    Filter(Filter),
    FullHeader,
    Compare(Vec<String>),
}

/// The outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Matches(Vec<PathBuf>),
    Header(Header),
    Comparison(Comparison),
    NoFiles,
}

pub fn run(mode: &Mode, files: &[PathBuf], source: &impl HeaderSource) -> Result<Report, Error> {
    debug!(?mode, files = files.len(), "running query");
    Ok(match mode {
        Mode::Filter(filter) => Report::Matches(filter_files(files, filter, source)?),
        Mode::Compare(keywords) => Report::Comparison(compare_keywords(files, keywords, source)?),
        Mode::FullHeader => match full_header(files, source)? {
            Some(header) => Report::Header(header),
            None => Report::NoFiles,
        },
    })
}
