use nom::bytes::streaming::{tag, take};
use nom::error::{context, ErrorKind, ParseError, VerboseError};
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u24, le_u32, le_u64, le_u8};

pub type Result<'a, O> = std::result::Result<(&'a [u8], O), nom::Err<VerboseError<&'a [u8]>>>;

pub const SIGNATURE: &[u8] = b"\x89\x48\x44\x46\x0d\x0a\x1a\x0a";

/// Addresses with every bit set are "undefined" in HDF5, whatever their width
pub const UNDEFINED_ADDRESS: u64 = u64::MAX;

/// Widths of file addresses and lengths, as declared by the superblock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sizes {
    pub offset: u8,
    pub length: u8,
}

pub fn le_uint(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
}

pub fn length<'a>(size: u8) -> impl Fn(&'a [u8]) -> Result<'a, u64> {
    move |input: &'a [u8]| {
        let (input, bytes) = take(size)(input)?;
        Ok((input, le_uint(bytes)))
    }
}

pub fn address<'a>(size: u8) -> impl Fn(&'a [u8]) -> Result<'a, u64> {
    move |input: &'a [u8]| {
        let (input, bytes) = take(size)(input)?;
        if bytes.iter().all(|b| *b == 0xFF) {
            Ok((input, UNDEFINED_ADDRESS))
        } else {
            Ok((input, le_uint(bytes)))
        }
    }
}

/// Bail out of a parser with a reason that ends up in the error trace
pub fn fail<'a, O>(input: &'a [u8], reason: &'static str) -> Result<'a, O> {
    Err(nom::Err::Failure(VerboseError::add_context(
        input,
        reason,
        VerboseError::from_error_kind(input, ErrorKind::Verify),
    )))
}

/// Read a NUL-terminated name, or the whole slice if there is no terminator
pub fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

pub fn pad8<T>(t: T) -> usize
where
    usize: From<T>,
{
    let t = usize::from(t);
    if t % 8 == 0 {
        t
    } else {
        t + (8 - (t % 8))
    }
}

#[derive(Debug)]
pub struct Superblock {
    pub version: u8,
    pub sizes: Sizes,
    pub base_address: u64,
    pub end_of_file_address: u64,
    pub root_object_header_address: u64,
}

pub fn superblock(input: &[u8]) -> Result<Superblock> {
    context("superblock", |input| {
        let (input, _) = tag(SIGNATURE)(input)?;
        let (input, version) = le_u8(input)?;
        match version {
            0 | 1 => superblock_v0(input, version),
            2 | 3 => superblock_v2(input, version),
            _ => fail(input, "unsupported superblock version"),
        }
    })(input)
}

fn superblock_v0(input: &[u8], version: u8) -> Result<Superblock> {
    let (input, _free_space_storage_version) = le_u8(input)?;
    let (input, _root_group_symbol_table_entry_version) = le_u8(input)?;
    let (input, _) = tag([0])(input)?;
    let (input, _shared_header_message_format_version) = le_u8(input)?;
    let (input, offset) = le_u8(input)?;
    let (input, length) = le_u8(input)?;
    let (input, _) = tag([0])(input)?;
    let (input, _group_leaf_node_k) = le_u16(input)?;
    let (input, _group_internal_node_k) = le_u16(input)?;
    let (input, _file_consistency_flags) = le_u32(input)?;
    let (input, _) = if version == 1 {
        // Indexed storage internal node K and two reserved bytes
        take(4usize)(input)?
    } else {
        (input, &input[..0])
    };
    let sizes = Sizes { offset, length };
    let (input, base_address) = address(offset)(input)?;
    let (input, _address_of_file_free_space_info) = address(offset)(input)?;
    let (input, end_of_file_address) = address(offset)(input)?;
    let (input, _driver_information_block_address) = address(offset)(input)?;
    let (input, root_group_symbol_table_entry) = symbol_table_entry(input, sizes)?;

    Ok((
        input,
        Superblock {
            version,
            sizes,
            base_address,
            end_of_file_address,
            root_object_header_address: root_group_symbol_table_entry.object_header_address,
        },
    ))
}

fn superblock_v2(input: &[u8], version: u8) -> Result<Superblock> {
    let (input, offset) = le_u8(input)?;
    let (input, length) = le_u8(input)?;
    let (input, _file_consistency_flags) = le_u8(input)?;
    let (input, base_address) = address(offset)(input)?;
    let (input, _superblock_extension_address) = address(offset)(input)?;
    let (input, end_of_file_address) = address(offset)(input)?;
    let (input, root_object_header_address) = address(offset)(input)?;
    let (input, _checksum) = le_u32(input)?;

    Ok((
        input,
        Superblock {
            version,
            sizes: Sizes { offset, length },
            base_address,
            end_of_file_address,
            root_object_header_address,
        },
    ))
}

#[derive(Debug)]
pub struct SymbolTable {
    pub entries: Vec<SymbolTableEntry>,
}

pub fn symbol_table(input: &[u8], sizes: Sizes) -> Result<SymbolTable> {
    context("symbol table", |input| {
        let (input, _) = tag(b"SNOD")(input)?;
        let (input, _version) = tag([1])(input)?;
        let (input, _) = tag([0])(input)?;
        let (input, number_of_symbols) = le_u16(input)?;
        let (input, entries) = count(
            |i| symbol_table_entry(i, sizes),
            number_of_symbols as usize,
        )(input)?;
        Ok((input, SymbolTable { entries }))
    })(input)
}

#[derive(Debug, Clone)]
pub struct SymbolTableEntry {
    pub link_name_offset: u64,
    pub object_header_address: u64,
}

pub fn symbol_table_entry(input: &[u8], sizes: Sizes) -> Result<SymbolTableEntry> {
    context("symbol table entry", |input| {
        let (input, (link_name_offset, object_header_address, _cache_type, _, _scratch_pad)) =
            nom::sequence::tuple((
                length(sizes.offset),
                address(sizes.offset),
                le_u32,
                tag([0, 0, 0, 0]),
                take(16usize),
            ))(input)?;

        Ok((
            input,
            SymbolTableEntry {
                link_name_offset,
                object_header_address,
            },
        ))
    })(input)
}

/// A version 1 B-tree node of a group; children are symbol table nodes at level 0
#[derive(Debug)]
pub struct GroupNode {
    pub node_level: u8,
    pub children: Vec<u64>,
}

pub fn group_node(input: &[u8], sizes: Sizes) -> Result<GroupNode> {
    context("group B-tree node", |input| {
        let (input, _) = tag(b"TREE")(input)?;
        let (input, _) = tag([0])(input)?; // We only support group nodes
        let (input, node_level) = le_u8(input)?;
        let (input, entries_used) = le_u16(input)?;
        let (input, _address_of_left_sibling) = address(sizes.offset)(input)?;
        let (input, _address_of_right_sibling) = address(sizes.offset)(input)?;
        let (input, entries) = count(
            nom::sequence::pair(length(sizes.length), address(sizes.offset)),
            entries_used as usize,
        )(input)?;

        Ok((
            input,
            GroupNode {
                node_level,
                children: entries.into_iter().map(|(_key, child)| child).collect(),
            },
        ))
    })(input)
}

#[derive(Debug)]
pub struct LocalHeap {
    pub data_segment_size: u64,
    pub address_of_data_segment: u64,
}

pub fn local_heap(input: &[u8], sizes: Sizes) -> Result<LocalHeap> {
    context("local heap", |input| {
        let (input, _) = tag(b"HEAP")(input)?;
        let (input, _version) = tag([0])(input)?;
        let (input, _) = tag([0, 0, 0])(input)?;
        let (input, data_segment_size) = length(sizes.length)(input)?;
        let (input, _offset_to_head_of_freelist) = length(sizes.length)(input)?;
        let (input, address_of_data_segment) = address(sizes.offset)(input)?;

        Ok((
            input,
            LocalHeap {
                data_segment_size,
                address_of_data_segment,
            },
        ))
    })(input)
}

/// The fixed part of an object header, up to the first message
#[derive(Debug, Clone, Copy)]
pub struct ObjectHeader {
    pub version: u8,
    pub flags: u8,
    pub chunk_size: u64,
}

impl ObjectHeader {
    fn tracks_creation_order(&self) -> bool {
        self.version == 2 && self.flags & 0b0000_0100 != 0
    }

    /// Bytes taken by the type/size/flags prefix of every message
    pub fn message_prefix_size(&self) -> usize {
        match (self.version, self.tracks_creation_order()) {
            (1, _) => 8,
            (_, true) => 6,
            (_, false) => 4,
        }
    }
}

pub fn object_header(input: &[u8]) -> Result<ObjectHeader> {
    if input.starts_with(b"OHDR") {
        context("object header", object_header_v2)(input)
    } else {
        context("object header", object_header_v1)(input)
    }
}

fn object_header_v1(input: &[u8]) -> Result<ObjectHeader> {
    let (input, _) = tag([1])(input)?;
    let (input, _) = tag([0])(input)?;
    let (input, _total_number_of_header_messages) = le_u16(input)?;
    let (input, _object_reference_count) = le_u32(input)?;
    let (input, object_header_size) = le_u32(input)?;
    // Messages start 8-byte aligned
    let (input, _) = take(4usize)(input)?;
    Ok((
        input,
        ObjectHeader {
            version: 1,
            flags: 0,
            chunk_size: u64::from(object_header_size),
        },
    ))
}

fn object_header_v2(input: &[u8]) -> Result<ObjectHeader> {
    let (input, _) = tag(b"OHDR")(input)?;
    let (input, _) = tag([2])(input)?;
    let (input, flags) = le_u8(input)?;
    let (input, _) = if flags & 0b0010_0000 != 0 {
        // Access, modification, change and birth times
        take(16usize)(input)?
    } else {
        (input, &input[..0])
    };
    let (input, _) = if flags & 0b0001_0000 != 0 {
        // Attribute phase change values
        take(4usize)(input)?
    } else {
        (input, &input[..0])
    };
    let (input, chunk_size) = length(1 << (flags & 0b11))(input)?;
    Ok((
        input,
        ObjectHeader {
            version: 2,
            flags,
            chunk_size,
        },
    ))
}

/// The messages inside a version 2 continuation block, without signature and checksum
pub fn continuation_chunk(input: &[u8]) -> Result<&[u8]> {
    context("object header continuation block", |input| {
        let (input, _) = tag(b"OCHK")(input)?;
        without_checksum(input)
    })(input)
}

fn without_checksum(input: &[u8]) -> Result<&[u8]> {
    match input.len().checked_sub(4) {
        Some(len) => take(len)(input),
        None => fail(input, "block shorter than its checksum"),
    }
}

/// A header message whose body has not been decoded yet
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    pub kind: u16,
    pub flags: u8,
    pub body: &'a [u8],
}

impl RawMessage<'_> {
    pub fn is_shared(&self) -> bool {
        self.flags & 0b10 != 0
    }
}

pub fn raw_message<'a>(input: &'a [u8], header: &ObjectHeader) -> Result<'a, RawMessage<'a>> {
    context("header message", |input| {
        let (input, kind, size, flags) = if header.version == 1 {
            let (input, kind) = le_u16(input)?;
            let (input, size) = le_u16(input)?;
            let (input, flags) = le_u8(input)?;
            let (input, _) = take(3usize)(input)?;
            (input, kind, size, flags)
        } else {
            let (input, kind) = le_u8(input)?;
            let (input, size) = le_u16(input)?;
            let (input, flags) = le_u8(input)?;
            let (input, _) = if header.tracks_creation_order() {
                take(2usize)(input)?
            } else {
                (input, &input[..0])
            };
            (input, u16::from(kind), size, flags)
        };
        let (input, body) = take(size)(input)?;
        Ok((input, RawMessage { kind, flags, body }))
    })(input)
}

pub mod header {
    /// How many elements an attribute holds
    #[derive(Debug, Clone, PartialEq)]
    pub struct Dataspace {
        pub dimensions: Vec<u64>,
        pub null: bool,
    }

    impl Dataspace {
        pub fn is_scalar(&self) -> bool {
            !self.null && self.dimensions.is_empty()
        }

        pub fn element_count(&self) -> u64 {
            if self.null {
                0
            } else {
                self.dimensions.iter().product()
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum DatatypeClass {
        FixedPoint {
            signed: bool,
            big_endian: bool,
        },
        FloatingPoint {
            big_endian: bool,
        },
        Time,
        String {
            padding: u8,
        },
        Bitfield,
        Opaque,
        Compound,
        Reference,
        Enumerated {
            base: Box<DataType>,
            members: Vec<(String, Vec<u8>)>,
        },
        VariableLength {
            string: bool,
            base: Box<DataType>,
        },
        Array {
            dimensions: Vec<u32>,
            base: Box<DataType>,
        },
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct DataType {
        pub version: u8,
        pub class: DatatypeClass,
        pub size: u32,
    }

    #[derive(Debug, Clone)]
    pub struct Attribute {
        pub name: String,
        pub datatype: DataType,
        pub dataspace: Dataspace,
        pub data: Vec<u8>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub enum LinkTarget {
        Hard(u64),
        Soft(String),
        External,
    }

    #[derive(Debug, Clone)]
    pub struct Link {
        pub name: String,
        pub target: LinkTarget,
    }

    /// Where the dense (fractal heap) storage of links or attributes lives
    #[derive(Debug, Clone)]
    pub struct DenseStorage {
        pub fractal_heap_address: u64,
        pub name_index_address: u64,
    }

    #[derive(Debug, Clone)]
    pub struct ObjectHeaderContinuation {
        pub offset: u64,
        pub length: u64,
    }

    #[derive(Debug, Clone)]
    pub struct SymbolTable {
        pub btree_address: u64,
        pub local_heap_address: u64,
    }

    #[derive(Debug, Clone)]
    pub enum Message {
        Attribute(Attribute),
        AttributeInfo(DenseStorage),
        Link(Link),
        LinkInfo(DenseStorage),
        ObjectHeaderContinuation(ObjectHeaderContinuation),
        SymbolTable(SymbolTable),
        /// Anything this crate has no use for
        Other(u16),
    }
}

pub fn datatype(input: &[u8]) -> Result<header::DataType> {
    use header::DatatypeClass::*;
    context("datatype", |input| {
        let (input, class_and_version) = le_u8(input)?;
        let (input, class_bitfields) = le_u24(input)?;
        let (input, size) = le_u32(input)?;

        let version = class_and_version >> 4;
        let raw_class = class_and_version & 0b0000_1111;
        let big_endian = class_bitfields & 1 != 0;
        let (input, class) = match raw_class {
            0 => {
                let (input, _) = take(4usize)(input)?; // bit offset and precision
                let signed = class_bitfields & 0b1000 != 0;
                (input, FixedPoint { signed, big_endian })
            }
            1 => {
                let (input, _) = take(12usize)(input)?;
                (input, FloatingPoint { big_endian })
            }
            2 => {
                let (input, _) = take(2usize)(input)?;
                (input, Time)
            }
            3 => {
                let padding = (class_bitfields & 0b1111) as u8;
                (input, header::DatatypeClass::String { padding })
            }
            4 => {
                let (input, _) = take(4usize)(input)?;
                (input, Bitfield)
            }
            5 => {
                let (input, _) = take(class_bitfields & 0xFF)(input)?;
                (input, Opaque)
            }
            // Member descriptions are not needed to show compound data as opaque bytes
            6 => (&input[input.len()..], Compound),
            7 => (input, Reference),
            8 => {
                let (input, base) = datatype(input)?;
                let (input, members) =
                    enumeration_members(input, version, class_bitfields & 0xFFFF, base.size)?;
                (
                    input,
                    Enumerated {
                        base: Box::new(base),
                        members,
                    },
                )
            }
            9 => {
                let (input, base) = datatype(input)?;
                let string = class_bitfields & 0b1111 == 1;
                (
                    input,
                    VariableLength {
                        string,
                        base: Box::new(base),
                    },
                )
            }
            10 => {
                let (input, rank) = le_u8(input)?;
                let (input, _) = if version < 3 {
                    take(3usize)(input)?
                } else {
                    (input, &input[..0])
                };
                let (input, dimensions) = count(le_u32, rank as usize)(input)?;
                let (input, _) = if version < 3 {
                    // Permutation indices, never used by the library
                    take(4 * rank as usize)(input)?
                } else {
                    (input, &input[..0])
                };
                let (input, base) = datatype(input)?;
                (
                    input,
                    Array {
                        dimensions,
                        base: Box::new(base),
                    },
                )
            }
            _ => return fail(input, "invalid datatype class"),
        };

        Ok((
            input,
            header::DataType {
                version,
                class,
                size,
            },
        ))
    })(input)
}

fn enumeration_members(
    input: &[u8],
    version: u8,
    number_of_members: u32,
    base_size: u32,
) -> Result<Vec<(String, Vec<u8>)>> {
    let mut input = input;
    let mut names = Vec::with_capacity(number_of_members as usize);
    for _ in 0..number_of_members {
        let end = match input.iter().position(|b| *b == 0) {
            Some(end) => end,
            None => return fail(input, "unterminated enumeration member name"),
        };
        names.push(String::from_utf8_lossy(&input[..end]).into_owned());
        let consumed = if version < 3 { pad8(end + 1) } else { end + 1 };
        input = take(consumed)(input)?.0;
    }
    let (input, values) = count(take(base_size), number_of_members as usize)(input)?;
    Ok((
        input,
        names
            .into_iter()
            .zip(values.into_iter().map(<[u8]>::to_vec))
            .collect(),
    ))
}

pub fn dataspace(input: &[u8], sizes: Sizes) -> Result<header::Dataspace> {
    context("dataspace", |input| {
        let (input, version) = le_u8(input)?;
        let (input, dimensionality) = le_u8(input)?;
        let (input, flags) = le_u8(input)?;
        let (input, null) = match version {
            1 => {
                // Reserved byte and the unused bytes of version 1
                let (input, _) = take(5usize)(input)?;
                (input, false)
            }
            2 => {
                let (input, ty) = le_u8(input)?;
                (input, ty == 2)
            }
            _ => return fail(input, "unsupported dataspace version"),
        };
        let (input, dimensions) = count(length(sizes.length), dimensionality as usize)(input)?;
        let (input, _max_dimensions) = if flags & 1 != 0 {
            count(length(sizes.length), dimensionality as usize)(input)?
        } else {
            (input, Vec::new())
        };

        Ok((input, header::Dataspace { dimensions, null }))
    })(input)
}

pub fn attribute(input: &[u8], sizes: Sizes) -> Result<header::Attribute> {
    context("attribute", |input| {
        let (input, version) = le_u8(input)?;
        let (input, flags) = le_u8(input)?;
        let (input, name_size) = le_u16(input)?;
        let (input, datatype_size) = le_u16(input)?;
        let (input, dataspace_size) = le_u16(input)?;
        if !(1..=3).contains(&version) {
            return fail(input, "unsupported attribute message version");
        }
        if version > 1 && flags & 0b11 != 0 {
            return fail(input, "shared attribute datatypes are not supported");
        }
        let (input, _encoding) = if version == 3 {
            le_u8(input)?
        } else {
            (input, 0)
        };
        let padded = |size: u16| if version == 1 { pad8(size) } else { usize::from(size) };

        let (input, name) = take(padded(name_size))(input)?;
        let name = c_string(name);

        let (input, raw_datatype) = take(padded(datatype_size))(input)?;
        let (_, datatype) = datatype(&raw_datatype[..usize::from(datatype_size)])?;

        let (input, raw_dataspace) = take(padded(dataspace_size))(input)?;
        let (_, dataspace) = dataspace(raw_dataspace, sizes)?;

        let data_len = dataspace.element_count() * u64::from(datatype.size);
        let (input, data) = take(data_len as usize)(input)?;

        Ok((
            input,
            header::Attribute {
                name,
                datatype,
                dataspace,
                data: data.to_vec(),
            },
        ))
    })(input)
}

pub fn link(input: &[u8], sizes: Sizes) -> Result<header::Link> {
    use header::LinkTarget;
    context("link", |input| {
        let (input, _) = tag([1])(input)?;
        let (input, flags) = le_u8(input)?;
        let (input, link_type) = if flags & 0b1000 != 0 {
            le_u8(input)?
        } else {
            (input, 0)
        };
        let (input, _creation_order) = if flags & 0b0100 != 0 {
            le_u64(input)?
        } else {
            (input, 0)
        };
        let (input, _character_set) = if flags & 0b1_0000 != 0 {
            le_u8(input)?
        } else {
            (input, 0)
        };
        let (input, name_length) = length(1 << (flags & 0b11))(input)?;
        let (input, name) = take(name_length as usize)(input)?;
        let name = String::from_utf8_lossy(name).into_owned();

        let (input, target) = match link_type {
            0 => {
                let (input, address) = address(sizes.offset)(input)?;
                (input, LinkTarget::Hard(address))
            }
            1 => {
                let (input, len) = le_u16(input)?;
                let (input, path) = take(len)(input)?;
                (input, LinkTarget::Soft(String::from_utf8_lossy(path).into_owned()))
            }
            _ => {
                let (input, len) = le_u16(input)?;
                let (input, _) = take(len)(input)?;
                (input, LinkTarget::External)
            }
        };

        Ok((input, header::Link { name, target }))
    })(input)
}

pub fn link_info(input: &[u8], sizes: Sizes) -> Result<header::DenseStorage> {
    context("link info", |input| {
        let (input, _) = tag([0])(input)?;
        let (input, flags) = le_u8(input)?;
        let (input, _maximum_creation_index) = if flags & 1 != 0 {
            le_u64(input)?
        } else {
            (input, 0)
        };
        dense_storage(input, sizes)
    })(input)
}

pub fn attribute_info(input: &[u8], sizes: Sizes) -> Result<header::DenseStorage> {
    context("attribute info", |input| {
        let (input, _) = tag([0])(input)?;
        let (input, flags) = le_u8(input)?;
        let (input, _maximum_creation_index) = if flags & 1 != 0 {
            le_u16(input)?
        } else {
            (input, 0)
        };
        dense_storage(input, sizes)
    })(input)
}

// The creation order index that may follow is not needed
fn dense_storage(input: &[u8], sizes: Sizes) -> Result<header::DenseStorage> {
    let (input, fractal_heap_address) = address(sizes.offset)(input)?;
    let (input, name_index_address) = address(sizes.offset)(input)?;
    Ok((
        input,
        header::DenseStorage {
            fractal_heap_address,
            name_index_address,
        },
    ))
}

pub fn object_header_continuation(
    input: &[u8],
    sizes: Sizes,
) -> Result<header::ObjectHeaderContinuation> {
    context("object header continuation", |input| {
        let (input, (offset, length)) =
            nom::sequence::tuple((address(sizes.offset), length(sizes.length)))(input)?;
        Ok((input, header::ObjectHeaderContinuation { length, offset }))
    })(input)
}

pub fn symbol_table_message(input: &[u8], sizes: Sizes) -> Result<header::SymbolTable> {
    context("symbol table message", |input| {
        let (input, btree_address) = address(sizes.offset)(input)?;
        let (input, local_heap_address) = address(sizes.offset)(input)?;

        Ok((
            input,
            header::SymbolTable {
                btree_address,
                local_heap_address,
            },
        ))
    })(input)
}

pub fn header_message<'a>(raw: &RawMessage<'a>, sizes: Sizes) -> Result<'a, header::Message> {
    use header::Message;
    use nom::combinator::map;
    let input = raw.body;
    match raw.kind {
        // These are hex because the docs use hex
        0x2 => map(|i| link_info(i, sizes), Message::LinkInfo)(input),
        0x6 => map(|i| link(i, sizes), Message::Link)(input),
        0xC if raw.is_shared() => fail(input, "shared attribute messages are not supported"),
        0xC => map(|i| attribute(i, sizes), Message::Attribute)(input),
        0x10 => map(
            |i| object_header_continuation(i, sizes),
            Message::ObjectHeaderContinuation,
        )(input),
        0x11 => map(|i| symbol_table_message(i, sizes), Message::SymbolTable)(input),
        0x15 => map(|i| attribute_info(i, sizes), Message::AttributeInfo)(input),
        kind => Ok((input, Message::Other(kind))),
    }
}

/// The reference stored in a variable-length element: a global heap object
#[derive(Debug, Clone, Copy)]
pub struct GlobalHeapId {
    pub length: u32,
    pub collection_address: u64,
    pub index: u32,
}

pub fn global_heap_id(input: &[u8], sizes: Sizes) -> Result<GlobalHeapId> {
    context("variable-length reference", |input| {
        let (input, length) = le_u32(input)?;
        let (input, collection_address) = address(sizes.offset)(input)?;
        let (input, index) = le_u32(input)?;
        Ok((
            input,
            GlobalHeapId {
                length,
                collection_address,
                index,
            },
        ))
    })(input)
}

pub fn global_heap_nth_item(input: &[u8], sizes: Sizes, desired_index: u32) -> Result<&[u8]> {
    context("global heap", |input| {
        let (input, _) = tag(b"GCOL")(input)?;
        let (input, _) = tag([1])(input)?; // Only version 1 exists
        let (input, _) = tag([0, 0, 0])(input)?; // Reserved zero bytes
        let (input, collection_size) = length(sizes.length)(input)?;
        let header_size = 8 + u64::from(sizes.length);
        let (_, mut objects) = take(collection_size.saturating_sub(header_size) as usize)(input)?;

        loop {
            // Parse the heap object and check if it's what we are looking for
            let (rest, heap_object_index) = le_u16(objects)?;
            if heap_object_index == 0 {
                // Object 0 is the free space at the end of the collection
                return fail(rest, "global heap object not found");
            }
            let (rest, _reference_count) = le_u16(rest)?;
            let (rest, _) = take(4usize)(rest)?;
            let (rest, object_size) = length(sizes.length)(rest)?;
            let (_, object_data) = take(object_size as usize)(rest)?;
            if u32::from(heap_object_index) == desired_index {
                break Ok((rest, object_data));
            }
            let (rest, _) = take(pad8(object_size as usize))(rest)?;
            objects = rest;
        }
    })(input)
}
