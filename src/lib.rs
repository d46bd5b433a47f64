//! Read the attribute headers of HDF5 files, and query them from the command line
//!
//! The HDF5 side is a pure-Rust, read-only decoder that only implements what it takes to walk
//! from the root group to a named group and decode that group's attributes. Datasets are never
//! read.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;

use tracing::{debug, trace};

pub mod cli;
mod dense;
mod error;
pub mod header;
pub mod output;
mod parse;
pub mod query;
pub mod value;

pub use error::Error;
pub use header::{read_header, read_header_entry, Header, HEADER_GROUP};
pub use value::Value;

use parse::header::{DataType, DatatypeClass, LinkTarget, Message};
use parse::{Sizes, UNDEFINED_ADDRESS};

/// An opened HDF5 file
#[derive(Debug)]
pub struct Hdf5File {
    map: memmap::Mmap,
    superblock: parse::Superblock,
}

impl Hdf5File {
    /// Open an HDF5 file
    ///
    /// This function memory-maps the file read-only and decodes its superblock. Everything else
    /// is decoded on demand. The mapping is released when the `Hdf5File` is dropped.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = std::fs::File::open(path)?;
        let map = unsafe { memmap::Mmap::map(&file)? };
        let superblock = find_superblock(&map)?;
        let end_of_file = superblock
            .base_address
            .checked_add(superblock.end_of_file_address);
        if end_of_file.map_or(true, |end| end > map.len() as u64) {
            return Err(Error::Parse(String::from("file is truncated")));
        }
        debug!(
            version = superblock.version,
            offset_size = superblock.sizes.offset,
            length_size = superblock.sizes.length,
            "decoded superblock"
        );
        Ok(Self { map, superblock })
    }

    /// Decode every attribute attached to the object at `group_path`
    ///
    /// The path is relative to the root group, with `/` separating nested names.
    pub fn group_attributes(&self, group_path: &str) -> Result<BTreeMap<String, Value>, Error> {
        let address = self.find_object(group_path)?;
        let messages = self.object_messages(address)?;
        let mut attributes = BTreeMap::new();
        for attribute in self.attributes(messages)? {
            let value = self.value(&attribute)?;
            attributes.insert(attribute.name, value);
        }
        Ok(attributes)
    }

    /// Decode a single attribute, if the object at `group_path` has one by that name
    pub fn attribute(&self, group_path: &str, name: &str) -> Result<Option<Value>, Error> {
        Ok(self.group_attributes(group_path)?.remove(name))
    }

    pub(crate) fn sizes(&self) -> Sizes {
        self.superblock.sizes
    }

    /// The file contents from a file address to the end of the file
    pub(crate) fn bytes_at(&self, address: u64) -> Result<&[u8], Error> {
        if address == UNDEFINED_ADDRESS {
            return Err(Error::Parse(String::from("dereferenced an undefined address")));
        }
        self.superblock
            .base_address
            .checked_add(address)
            .and_then(|start| self.map.get(start as usize..))
            .ok_or(Error::OutOfBounds(address))
    }

    fn find_object(&self, path: &str) -> Result<u64, Error> {
        let mut address = self.superblock.root_object_header_address;
        for name in path.split('/').filter(|name| !name.is_empty()) {
            let messages = self.object_messages(address)?;
            let links = self.links(&messages)?;
            address = *links
                .get(name)
                .ok_or_else(|| Error::MissingGroup(path.to_string()))?;
        }
        Ok(address)
    }

    /// Collect the header messages of an object, following continuation blocks
    fn object_messages(&self, address: u64) -> Result<Vec<Message>, Error> {
        let sizes = self.sizes();
        let (remaining, object_header) = parse::object_header(self.bytes_at(address)?)?;
        let first_chunk = truncate(remaining, object_header.chunk_size)?;

        let mut messages = Vec::new();
        let mut chunks = VecDeque::from(vec![first_chunk]);
        let mut visited = HashSet::new();
        let prefix_size = object_header.message_prefix_size();
        while let Some(mut remaining) = chunks.pop_front() {
            // Anything shorter than a message prefix is the gap before the checksum
            while remaining.len() >= prefix_size {
                let (remaining_after_parse, raw) = parse::raw_message(remaining, &object_header)?;
                remaining = remaining_after_parse;
                match parse::header_message(&raw, sizes)?.1 {
                    Message::ObjectHeaderContinuation(continuation) => {
                        if !visited.insert(continuation.offset) {
                            return Err(Error::Parse(String::from(
                                "object header continuations form a cycle",
                            )));
                        }
                        let block = truncate(self.bytes_at(continuation.offset)?, continuation.length)?;
                        let block = if object_header.version == 1 {
                            block
                        } else {
                            parse::continuation_chunk(block)?.1
                        };
                        chunks.push_back(block);
                    }
                    Message::Other(kind) => trace!(kind, "skipping header message"),
                    message => messages.push(message),
                }
            }
        }
        Ok(messages)
    }

    /// Names and object header addresses of the hard links of a group
    fn links(&self, messages: &[Message]) -> Result<BTreeMap<String, u64>, Error> {
        let sizes = self.sizes();
        let mut links = BTreeMap::new();
        let mut add = |link: parse::header::Link| match link.target {
            LinkTarget::Hard(address) => {
                links.insert(link.name, address);
            }
            target => debug!(name = %link.name, ?target, "ignoring non-hard link"),
        };

        for message in messages {
            match message {
                Message::SymbolTable(table) => {
                    let heap = parse::local_heap(self.bytes_at(table.local_heap_address)?, sizes)?.1;
                    let names = truncate(
                        self.bytes_at(heap.address_of_data_segment)?,
                        heap.data_segment_size,
                    )?;
                    let mut entries = Vec::new();
                    self.symbol_table_entries(table.btree_address, &mut entries)?;
                    for entry in entries {
                        let name = names
                            .get(entry.link_name_offset as usize..)
                            .map(parse::c_string)
                            .ok_or(Error::OutOfBounds(entry.link_name_offset))?;
                        add(parse::header::Link {
                            name,
                            target: LinkTarget::Hard(entry.object_header_address),
                        });
                    }
                }
                Message::Link(link) => add(link.clone()),
                Message::LinkInfo(storage) if storage.fractal_heap_address != UNDEFINED_ADDRESS => {
                    let heap = dense::FractalHeap::read(self, storage.fractal_heap_address)?;
                    for record in dense::btree_records(
                        self,
                        storage.name_index_address,
                        dense::LINK_NAME_RECORDS,
                    )? {
                        // Name hash, then the heap ID
                        let id = record.get(4..11).ok_or_else(|| {
                            Error::Parse(String::from("short link name index record"))
                        })?;
                        add(parse::link(heap.object(self, id)?, sizes)?.1);
                    }
                }
                _ => {}
            }
        }
        Ok(links)
    }

    fn symbol_table_entries(
        &self,
        btree_address: u64,
        entries: &mut Vec<parse::SymbolTableEntry>,
    ) -> Result<(), Error> {
        let sizes = self.sizes();
        let node = parse::group_node(self.bytes_at(btree_address)?, sizes)?.1;
        for child in node.children {
            if node.node_level > 0 {
                self.symbol_table_entries(child, entries)?;
            } else {
                entries.extend(parse::symbol_table(self.bytes_at(child)?, sizes)?.1.entries);
            }
        }
        Ok(())
    }

    fn attributes(&self, messages: Vec<Message>) -> Result<Vec<parse::header::Attribute>, Error> {
        let sizes = self.sizes();
        let mut attributes = Vec::new();
        for message in messages {
            match message {
                Message::Attribute(attribute) => attributes.push(attribute),
                Message::AttributeInfo(storage)
                    if storage.fractal_heap_address != UNDEFINED_ADDRESS =>
                {
                    let heap = dense::FractalHeap::read(self, storage.fractal_heap_address)?;
                    for record in dense::btree_records(
                        self,
                        storage.name_index_address,
                        dense::ATTRIBUTE_NAME_RECORDS,
                    )? {
                        let id = record.get(..8).ok_or_else(|| {
                            Error::Parse(String::from("short attribute name index record"))
                        })?;
                        attributes.push(parse::attribute(heap.object(self, id)?, sizes)?.1);
                    }
                }
                _ => {}
            }
        }
        Ok(attributes)
    }

    fn value(&self, attribute: &parse::header::Attribute) -> Result<Value, Error> {
        let elements = self.elements(&attribute.datatype, &attribute.data)?;
        if attribute.dataspace.is_scalar() {
            if let [element] = elements.as_slice() {
                return Ok(element.clone());
            }
        }
        Ok(Value::Array(elements))
    }

    fn elements(&self, datatype: &DataType, data: &[u8]) -> Result<Vec<Value>, Error> {
        let size = datatype.size as usize;
        if size == 0 {
            return Ok(Vec::new());
        }
        data.chunks_exact(size)
            .map(|element| self.element(datatype, element))
            .collect()
    }

    fn element(&self, datatype: &DataType, bytes: &[u8]) -> Result<Value, Error> {
        Ok(match &datatype.class {
            DatatypeClass::FixedPoint { signed, big_endian } => {
                value::integer(bytes, *signed, *big_endian)
            }
            DatatypeClass::FloatingPoint { big_endian } => value::float(bytes, *big_endian),
            DatatypeClass::String { padding } => Value::Bytes(value::unpad(bytes, *padding)),
            DatatypeClass::Enumerated { base, members } => value::enumeration(base, members, bytes),
            DatatypeClass::VariableLength { string: true, .. } => {
                let text = value::unpad(self.global_heap_object(bytes)?, 0);
                Value::Text(String::from_utf8_lossy(&text).into_owned())
            }
            DatatypeClass::VariableLength {
                string: false,
                base,
            } => Value::Array(self.elements(base, self.global_heap_object(bytes)?)?),
            DatatypeClass::Array { base, .. } => Value::Array(self.elements(base, bytes)?),
            DatatypeClass::Time
            | DatatypeClass::Bitfield
            | DatatypeClass::Opaque
            | DatatypeClass::Compound
            | DatatypeClass::Reference => Value::Opaque(bytes.to_vec()),
        })
    }

    /// Resolve a variable-length element to the bytes it refers to
    fn global_heap_object(&self, element: &[u8]) -> Result<&[u8], Error> {
        let sizes = self.sizes();
        let id = parse::global_heap_id(element, sizes)?.1;
        if id.length == 0 {
            return Ok(&[]);
        }
        let collection = self.bytes_at(id.collection_address)?;
        Ok(parse::global_heap_nth_item(collection, sizes, id.index)?.1)
    }
}

/// The first `len` bytes
fn truncate(bytes: &[u8], len: u64) -> Result<&[u8], Error> {
    bytes
        .get(..len as usize)
        .ok_or_else(|| Error::Parse(String::from("block runs past the end of the file")))
}

/// The superblock is at offset zero, or after a user block at 512, 1024, 2048, ...
fn find_superblock(contents: &[u8]) -> Result<parse::Superblock, Error> {
    let mut offset = 0;
    while offset < contents.len() {
        if contents[offset..].starts_with(parse::SIGNATURE) {
            return Ok(parse::superblock(&contents[offset..])?.1);
        }
        offset = if offset == 0 { 512 } else { offset * 2 };
    }
    Err(Error::Parse(String::from("no HDF5 signature found")))
}
