//! The attribute header of a data file

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Error, Hdf5File, Value};

/// Name of the top-level group whose attributes form a file's header
pub const HEADER_GROUP: &str = "header";

/// Every attribute of a file's header group, in name order
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    path: PathBuf,
    entries: BTreeMap<String, Value>,
}

impl Header {
    pub fn new(path: PathBuf, entries: BTreeMap<String, Value>) -> Self {
        Self { path, entries }
    }

    /// The file this header was read from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read the header of the file at `path`
///
/// With `decode`, byte strings are decoded to text where possible; see [`Value::decoded`].
pub fn read_header<P: AsRef<Path>>(path: P, decode: bool) -> Result<Header, Error> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading header");
    let file = Hdf5File::open(path)?;
    let mut entries = file.group_attributes(HEADER_GROUP)?;
    if decode {
        entries = entries
            .into_iter()
            .map(|(key, value)| (key, value.decoded()))
            .collect();
    }
    Ok(Header::new(path.to_path_buf(), entries))
}

/// Read a single header entry; a missing key is `None`
pub fn read_header_entry<P: AsRef<Path>>(
    path: P,
    key: &str,
    decode: bool,
) -> Result<Option<Value>, Error> {
    let path = path.as_ref();
    debug!(path = %path.display(), key, "reading header entry");
    let value = Hdf5File::open(path)?.attribute(HEADER_GROUP, key)?;
    Ok(if decode { value.map(Value::decoded) } else { value })
}
