//! A minimal HDF5 writer for test files with a header group, in two layouts:
//!
//! * classic: superblock 0, symbol table groups, version 1 object headers
//! * latest: superblock 2, link messages, version 2 object headers, dense attribute storage
//!
//! Checksums are left zero.
#![allow(dead_code)]

use hdf_header::Value;

const SIGNATURE: &[u8] = b"\x89HDF\r\n\x1a\n";
const UNDEFINED: u64 = u64::MAX;

/// An attribute value, and how it is stored
#[derive(Debug, Clone)]
pub enum Attr {
    /// Fixed-length, null-padded
    Text(&'static str),
    /// Variable-length, in the global heap
    VlenText(&'static str),
    Int(i64),
    Float(f64),
    Float32(f32),
    /// An h5py-style FALSE/TRUE enumeration
    Bool(bool),
    /// A one-dimensional dataspace
    Ints(Vec<i32>),
}

impl Attr {
    /// The value a decoded read returns
    pub fn expected(&self) -> Value {
        match self {
            Attr::Text(s) | Attr::VlenText(s) => Value::Text(s.to_string()),
            Attr::Int(n) => Value::Int(*n),
            Attr::Float(x) => Value::Float(*x),
            Attr::Float32(x) => Value::Float32(*x),
            Attr::Bool(b) => Value::Bool(*b),
            Attr::Ints(ns) => Value::Array(ns.iter().map(|n| Value::Int(i64::from(*n))).collect()),
        }
    }
}

/// Lay out blocks back to back; `build` is called once to size them and once to fill in addresses
///
/// `at(i)` is the address of block `i`, and `at(blocks.len())` the end of the file.
fn assemble(build: impl Fn(&dyn Fn(usize) -> u64) -> Vec<Vec<u8>>) -> Vec<u8> {
    let mut starts = vec![0];
    for block in build(&|_| 0) {
        starts.push(starts[starts.len() - 1] + block.len() as u64);
    }
    build(&|i| starts[i]).concat()
}

fn pad8(bytes: &mut Vec<u8>) {
    while bytes.len() % 8 != 0 {
        bytes.push(0);
    }
}

fn fixed_point(size: u32, signed: bool) -> Vec<u8> {
    let mut datatype = vec![0x10, if signed { 0x08 } else { 0 }, 0, 0];
    datatype.extend(size.to_le_bytes());
    datatype.extend(0u16.to_le_bytes());
    datatype.extend((size as u16 * 8).to_le_bytes());
    datatype
}

fn float64() -> Vec<u8> {
    let mut datatype = vec![0x11, 0x20, 63, 0];
    datatype.extend(8u32.to_le_bytes());
    datatype.extend(0u16.to_le_bytes());
    datatype.extend(64u16.to_le_bytes());
    datatype.extend([52, 11, 0, 52]);
    datatype.extend(1023u32.to_le_bytes());
    datatype
}

fn float32() -> Vec<u8> {
    let mut datatype = vec![0x11, 0x20, 31, 0];
    datatype.extend(4u32.to_le_bytes());
    datatype.extend(0u16.to_le_bytes());
    datatype.extend(32u16.to_le_bytes());
    datatype.extend([23, 8, 0, 23]);
    datatype.extend(127u32.to_le_bytes());
    datatype
}

struct Encoded {
    datatype: Vec<u8>,
    /// `None` for a scalar dataspace
    dimensions: Option<Vec<u64>>,
    data: Vec<u8>,
}

/// Encode an attribute; variable-length strings get the next index in the global heap
fn encode(attr: &Attr, global_heap: u64, next_index: &mut u32) -> Encoded {
    let scalar = |datatype, data| Encoded {
        datatype,
        dimensions: None,
        data,
    };
    match attr {
        Attr::Text(s) => {
            let mut datatype = vec![0x13, 0x01, 0, 0];
            datatype.extend((s.len() as u32).to_le_bytes());
            scalar(datatype, s.as_bytes().to_vec())
        }
        Attr::VlenText(s) => {
            let mut datatype = vec![0x19, 0x01, 0, 0];
            datatype.extend(16u32.to_le_bytes());
            datatype.extend(fixed_point(1, false));
            let mut data = (s.len() as u32).to_le_bytes().to_vec();
            data.extend(global_heap.to_le_bytes());
            data.extend(next_index.to_le_bytes());
            *next_index += 1;
            scalar(datatype, data)
        }
        Attr::Int(n) => scalar(fixed_point(8, true), n.to_le_bytes().to_vec()),
        Attr::Float(x) => scalar(float64(), x.to_le_bytes().to_vec()),
        Attr::Float32(x) => scalar(float32(), x.to_le_bytes().to_vec()),
        Attr::Bool(b) => {
            let mut datatype = vec![0x18, 2, 0, 0];
            datatype.extend(1u32.to_le_bytes());
            datatype.extend(fixed_point(1, true));
            datatype.extend(b"FALSE\0\0\0");
            datatype.extend(b"TRUE\0\0\0\0");
            datatype.extend([0, 1]);
            scalar(datatype, vec![u8::from(*b)])
        }
        Attr::Ints(ns) => Encoded {
            datatype: fixed_point(4, true),
            dimensions: Some(vec![ns.len() as u64]),
            data: ns.iter().flat_map(|n| n.to_le_bytes()).collect(),
        },
    }
}

fn dataspace(version: u8, dimensions: &Option<Vec<u64>>) -> Vec<u8> {
    let dimensions = dimensions.as_deref().unwrap_or(&[]);
    let rank = dimensions.len() as u8;
    let mut dataspace = if version == 1 {
        vec![1, rank, 0, 0, 0, 0, 0, 0]
    } else {
        vec![2, rank, 0, if rank == 0 { 0 } else { 1 }]
    };
    for dimension in dimensions {
        dataspace.extend(dimension.to_le_bytes());
    }
    dataspace
}

/// An attribute message body: version 1 pads every part to 8 bytes, version 3 adds an encoding
fn attribute_message(version: u8, name: &str, encoded: &Encoded) -> Vec<u8> {
    let mut name = name.as_bytes().to_vec();
    name.push(0);
    let dataspace = dataspace(if version == 1 { 1 } else { 2 }, &encoded.dimensions);

    let mut body = vec![version, 0];
    body.extend((name.len() as u16).to_le_bytes());
    body.extend((encoded.datatype.len() as u16).to_le_bytes());
    body.extend((dataspace.len() as u16).to_le_bytes());
    if version == 3 {
        body.push(0);
    }
    for part in [&name, &encoded.datatype, &dataspace] {
        body.extend(part);
        if version == 1 {
            pad8(&mut body);
        }
    }
    body.extend(&encoded.data);
    body
}

fn global_heap(attributes: &[(&str, Attr)]) -> Vec<u8> {
    let mut objects: Vec<u8> = Vec::new();
    let mut index = 1u16;
    for (_, attr) in attributes {
        if let Attr::VlenText(s) = attr {
            objects.extend(index.to_le_bytes());
            objects.extend(1u16.to_le_bytes());
            objects.extend([0; 4]);
            objects.extend((s.len() as u64).to_le_bytes());
            objects.extend(s.as_bytes());
            pad8(&mut objects);
            index += 1;
        }
    }
    // Free space, object 0
    objects.extend([0; 16]);

    let mut collection = b"GCOL\x01\0\0\0".to_vec();
    collection.extend((16 + objects.len() as u64).to_le_bytes());
    collection.extend(objects);
    collection
}

fn symbol_table_entry(link_name_offset: u64, object_header: u64) -> Vec<u8> {
    let mut entry = link_name_offset.to_le_bytes().to_vec();
    entry.extend(object_header.to_le_bytes());
    entry.extend([0; 8]);
    entry.extend([0; 16]);
    entry
}

fn message_v1(kind: u16, mut body: Vec<u8>) -> Vec<u8> {
    pad8(&mut body);
    let mut message = kind.to_le_bytes().to_vec();
    message.extend((body.len() as u16).to_le_bytes());
    message.extend([0; 4]);
    message.extend(body);
    message
}

fn object_header_v1(messages: &[Vec<u8>]) -> Vec<u8> {
    let mut header = vec![1, 0];
    header.extend((messages.len() as u16).to_le_bytes());
    let messages = messages.concat();
    header.extend(1u32.to_le_bytes());
    header.extend((messages.len() as u32).to_le_bytes());
    header.extend([0; 4]);
    header.extend(messages);
    header
}

fn message_v2(kind: u8, body: Vec<u8>) -> Vec<u8> {
    let mut message = vec![kind];
    message.extend((body.len() as u16).to_le_bytes());
    message.push(0);
    message.extend(body);
    message
}

fn object_header_v2(messages: &[Vec<u8>]) -> Vec<u8> {
    let messages = messages.concat();
    // Flags: four-byte chunk size
    let mut header = b"OHDR\x02\x02".to_vec();
    header.extend((messages.len() as u32).to_le_bytes());
    header.extend(messages);
    header.extend([0; 4]);
    header
}

fn addresses(addresses: &[u64]) -> Vec<u8> {
    addresses.iter().flat_map(|a| a.to_le_bytes()).collect()
}

/// A file whose group `group` holds `attributes`, the way HDF5 1.8 writes it by default
///
/// The group's attribute messages are split between its object header and a continuation block.
pub fn classic(group: &str, attributes: &[(&str, Attr)]) -> Vec<u8> {
    const GLOBAL_HEAP: usize = 1;
    const ROOT: usize = 2;
    const LOCAL_HEAP: usize = 3;
    const TREE: usize = 4;
    const SYMBOL_NODE: usize = 5;
    const GROUP: usize = 6;
    const CONTINUATION: usize = 7;
    const END: usize = 8;

    assemble(|at| {
        let mut next_index = 1;
        let messages = attributes
            .iter()
            .map(|(name, attr)| {
                let encoded = encode(attr, at(GLOBAL_HEAP), &mut next_index);
                message_v1(0xC, attribute_message(1, name, &encoded))
            })
            .collect::<Vec<_>>();
        let (first, rest) = messages.split_at((messages.len() + 1) / 2);
        let continuation = rest.concat();
        let mut group_messages = first.to_vec();
        group_messages.push(message_v1(
            0x10,
            addresses(&[at(CONTINUATION), continuation.len() as u64]),
        ));

        let mut superblock = SIGNATURE.to_vec();
        superblock.extend([0, 0, 0, 0, 0, 8, 8, 0]);
        superblock.extend(4u16.to_le_bytes());
        superblock.extend(16u16.to_le_bytes());
        superblock.extend(0u32.to_le_bytes());
        superblock.extend(addresses(&[0, UNDEFINED, at(END), UNDEFINED]));
        superblock.extend(symbol_table_entry(0, at(ROOT)));

        // Names start at offset 8; offset 0 is the empty name
        let mut names = vec![0; 8];
        names.extend(group.as_bytes());
        names.push(0);
        pad8(&mut names);
        let mut local_heap = b"HEAP\0\0\0\0".to_vec();
        local_heap.extend(addresses(&[names.len() as u64, UNDEFINED, at(LOCAL_HEAP) + 32]));
        local_heap.extend(names);

        let mut tree = b"TREE\0\0".to_vec();
        tree.extend(1u16.to_le_bytes());
        tree.extend(addresses(&[UNDEFINED, UNDEFINED, 0, at(SYMBOL_NODE), 8]));

        let mut symbol_node = b"SNOD\x01\0".to_vec();
        symbol_node.extend(1u16.to_le_bytes());
        symbol_node.extend(symbol_table_entry(8, at(GROUP)));

        vec![
            superblock,
            global_heap(attributes),
            object_header_v1(&[message_v1(0x11, addresses(&[at(TREE), at(LOCAL_HEAP)]))]),
            local_heap,
            tree,
            symbol_node,
            object_header_v1(&group_messages),
            continuation,
        ]
    })
}

/// Move a classic file behind a 512 byte user block
pub fn with_user_block(mut file: Vec<u8>) -> Vec<u8> {
    // Base address of a version 0 superblock
    file[24..32].copy_from_slice(&512u64.to_le_bytes());
    let mut moved = vec![0; 512];
    moved.extend(file);
    moved
}

/// Geometry of the dense attribute storage written by [`latest_with`]
#[derive(Debug, Clone, Copy)]
pub struct Dense {
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    pub table_width: u16,
    /// Size of every B-tree node
    pub node_size: u32,
}

impl Dense {
    /// One direct heap block and one B-tree leaf for any realistic header
    pub const ROOMY: Dense = Dense {
        starting_block_size: 4096,
        max_direct_block_size: 65536,
        table_width: 4,
        node_size: 512,
    };

    /// Blocks of 512 bytes and nodes of 6 records, so a few dozen attributes spread over a root
    /// indirect block and a B-tree of depth 1
    pub const CRAMPED: Dense = Dense {
        starting_block_size: 512,
        max_direct_block_size: 512,
        table_width: 4,
        node_size: 128,
    };

    /// Size of the `k`th direct block of the root indirect block
    fn block_size(&self, k: usize) -> u64 {
        let row = k / usize::from(self.table_width);
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size << (row - 1)
        }
    }

    fn max_direct_rows(&self) -> usize {
        (self.max_direct_block_size.trailing_zeros() - self.starting_block_size.trailing_zeros() + 2)
            as usize
    }

    fn leaf_capacity(&self) -> usize {
        (self.node_size as usize - 10) / RECORD_SIZE
    }

    /// Records of a depth 1 root, with one-byte child record counts
    fn internal_capacity(&self) -> usize {
        let pointer_size = 8 + 1;
        (self.node_size as usize - 10 - pointer_size) / (RECORD_SIZE + pointer_size)
    }
}

/// Signature, version, heap header address and 4-byte block offset
const DIRECT_BLOCK_HEADER_SIZE: usize = 17;
/// Heap ID, message flags, creation order and name hash
const RECORD_SIZE: usize = 17;

/// Pack heap objects into direct blocks; returns the heap offset of every object and the
/// contents of every block after its header
fn pack(objects: &[Vec<u8>], dense: &Dense) -> (Vec<u64>, Vec<Vec<u8>>) {
    let mut offsets = Vec::new();
    let mut blocks: Vec<Vec<u8>> = vec![Vec::new()];
    let mut block_offset = 0;
    for object in objects {
        let k = blocks.len() - 1;
        if DIRECT_BLOCK_HEADER_SIZE + blocks[k].len() + object.len() > dense.block_size(k) as usize {
            block_offset += dense.block_size(k);
            blocks.push(Vec::new());
        }
        let k = blocks.len() - 1;
        assert!(
            DIRECT_BLOCK_HEADER_SIZE + object.len() <= dense.block_size(k) as usize,
            "attribute does not fit in a heap block"
        );
        offsets.push(block_offset + (DIRECT_BLOCK_HEADER_SIZE + blocks[k].len()) as u64);
        blocks[k].extend(object);
    }
    (offsets, blocks)
}

/// Split records into leaves and the separating records of a depth 1 root
///
/// Every leaf but the last gives up its final record to the root.
fn split(records: &[Vec<u8>], dense: &Dense) -> (Vec<Vec<Vec<u8>>>, Vec<Vec<u8>>) {
    let mut leaves = Vec::new();
    let mut separators = Vec::new();
    let chunks = records.chunks(dense.leaf_capacity()).collect::<Vec<_>>();
    for (i, chunk) in chunks.iter().enumerate() {
        if i + 1 < chunks.len() {
            let (last, leaf) = chunk.split_last().unwrap();
            leaves.push(leaf.to_vec());
            separators.push(last.clone());
        } else {
            leaves.push(chunk.to_vec());
        }
    }
    assert!(
        separators.len() <= dense.internal_capacity(),
        "too many attributes for a B-tree of depth 1"
    );
    (leaves, separators)
}

fn btree_node(signature: &[u8], records: &[Vec<u8>], children: &[(u64, usize)]) -> Vec<u8> {
    let mut node = signature.to_vec();
    node.extend([0, 8]);
    node.extend(records.concat());
    for (address, records) in children {
        node.extend(address.to_le_bytes());
        node.push(*records as u8);
    }
    node.extend([0; 4]);
    node
}

/// A file whose group `group` holds `attributes`, the way HDF5 writes it with the latest format
pub fn latest(group: &str, attributes: &[(&str, Attr)]) -> Vec<u8> {
    latest_with(group, attributes, Dense::ROOMY)
}

/// Like [`latest`], with the dense storage laid out by `dense`
///
/// The group's attribute info message sits in an `OCHK` continuation block, and every attribute
/// is in dense storage. The fractal heap has a single direct block as its root when every
/// attribute fits into one, and a root indirect block otherwise. The name index is a single leaf
/// when it can be, and a root internal node over leaves otherwise.
pub fn latest_with(group: &str, attributes: &[(&str, Attr)], dense: Dense) -> Vec<u8> {
    const GLOBAL_HEAP: usize = 1;
    const ROOT: usize = 2;
    const GROUP: usize = 3;
    const CONTINUATION: usize = 4;
    const FRACTAL_HEAP: usize = 5;
    const HEAP_ROOT: usize = 6;

    assemble(|at| {
        let mut next_index = 1;
        let objects = attributes
            .iter()
            .map(|(name, attr)| {
                let encoded = encode(attr, at(GLOBAL_HEAP), &mut next_index);
                attribute_message(3, name, &encoded)
            })
            .collect::<Vec<_>>();
        let (offsets, blocks) = pack(&objects, &dense);
        let width = usize::from(dense.table_width);
        let indirect = blocks.len() > 1;
        let first_direct = HEAP_ROOT + usize::from(indirect);
        let btree = first_direct + if indirect { blocks.len() } else { 1 };

        let records = objects
            .iter()
            .zip(&offsets)
            .enumerate()
            .map(|(i, (object, offset))| {
                // Managed heap ID: flags, 4-byte offset, 2-byte length, padding
                let mut record = vec![0];
                record.extend((*offset as u32).to_le_bytes());
                record.extend((object.len() as u16).to_le_bytes());
                record.push(0);
                // Message flags, creation order, name hash
                record.push(0);
                record.extend((i as u32).to_le_bytes());
                record.extend((i as u32).to_le_bytes());
                record
            })
            .collect::<Vec<_>>();
        let deep = records.len() > dense.leaf_capacity();
        let (leaves, separators) = if deep {
            split(&records, &dense)
        } else {
            (vec![records.clone()], Vec::new())
        };
        let first_leaf = btree + 1 + usize::from(deep);
        let end = first_leaf + leaves.len();

        let mut superblock = SIGNATURE.to_vec();
        superblock.extend([2, 8, 8, 0]);
        superblock.extend(addresses(&[0, UNDEFINED, at(end), at(ROOT)]));
        superblock.extend([0; 4]);

        let link_info = message_v2(0x2, [vec![0, 0], addresses(&[UNDEFINED, UNDEFINED])].concat());
        let group_info = message_v2(0xA, vec![0, 0]);
        let mut link = vec![1, 0, group.len() as u8];
        link.extend(group.as_bytes());
        link.extend(at(GROUP).to_le_bytes());
        let root = object_header_v2(&[link_info.clone(), group_info.clone(), message_v2(0x6, link)]);

        let attribute_info = message_v2(
            0x15,
            [vec![0, 0], addresses(&[at(FRACTAL_HEAP), at(btree)])].concat(),
        );
        let mut continuation = b"OCHK".to_vec();
        continuation.extend(attribute_info);
        continuation.extend([0; 4]);
        let group_header = object_header_v2(&[
            link_info,
            group_info,
            message_v2(0x10, addresses(&[at(CONTINUATION), continuation.len() as u64])),
        ]);

        let rows = if indirect {
            let rows = (blocks.len() + width - 1) / width;
            assert!(rows <= dense.max_direct_rows(), "too many attributes for the heap");
            rows
        } else {
            0
        };
        let mut fractal_heap = b"FRHP\0".to_vec();
        fractal_heap.extend(8u16.to_le_bytes());
        fractal_heap.extend(0u16.to_le_bytes());
        fractal_heap.push(0);
        fractal_heap.extend((dense.starting_block_size as u32).to_le_bytes());
        fractal_heap.extend(addresses(&[0, UNDEFINED, 0, UNDEFINED]));
        fractal_heap.extend([0; 64]);
        fractal_heap.extend(dense.table_width.to_le_bytes());
        fractal_heap.extend(addresses(&[dense.starting_block_size, dense.max_direct_block_size]));
        fractal_heap.extend(32u16.to_le_bytes());
        fractal_heap.extend(1u16.to_le_bytes());
        fractal_heap.extend(at(HEAP_ROOT).to_le_bytes());
        fractal_heap.extend((rows as u16).to_le_bytes());
        fractal_heap.extend([0; 4]);

        let mut heap_blocks = Vec::new();
        if indirect {
            let mut root_block = b"FHIB\0".to_vec();
            root_block.extend(at(FRACTAL_HEAP).to_le_bytes());
            root_block.extend(0u32.to_le_bytes());
            for k in 0..rows * width {
                let child = if k < blocks.len() { at(first_direct + k) } else { UNDEFINED };
                root_block.extend(child.to_le_bytes());
            }
            root_block.extend([0; 4]);
            heap_blocks.push(root_block);
        }
        let mut block_offset = 0;
        for (k, contents) in blocks.iter().enumerate() {
            let mut direct_block = b"FHDB\0".to_vec();
            direct_block.extend(at(FRACTAL_HEAP).to_le_bytes());
            direct_block.extend((block_offset as u32).to_le_bytes());
            direct_block.extend(contents);
            heap_blocks.push(direct_block);
            block_offset += dense.block_size(k);
        }

        let count = records.len();
        let mut btree_header = b"BTHD\0\x08".to_vec();
        btree_header.extend(dense.node_size.to_le_bytes());
        btree_header.extend((RECORD_SIZE as u16).to_le_bytes());
        btree_header.extend(u16::from(deep).to_le_bytes());
        btree_header.extend([100, 40]);
        let root_node = if count == 0 { UNDEFINED } else { at(btree + 1) };
        btree_header.extend(root_node.to_le_bytes());
        let root_records = if deep { separators.len() } else { count };
        btree_header.extend((root_records as u16).to_le_bytes());
        btree_header.extend((count as u64).to_le_bytes());
        btree_header.extend([0; 4]);

        let mut nodes = Vec::new();
        if deep {
            let children = leaves
                .iter()
                .enumerate()
                .map(|(i, leaf)| (at(first_leaf + i), leaf.len()))
                .collect::<Vec<_>>();
            nodes.push(btree_node(b"BTIN", &separators, &children));
        }
        for leaf in &leaves {
            nodes.push(btree_node(b"BTLF", leaf, &[]));
        }

        let mut file = vec![
            superblock,
            global_heap(attributes),
            root,
            group_header,
            continuation,
            fractal_heap,
        ];
        file.extend(heap_blocks);
        file.push(btree_header);
        file.extend(nodes);
        file
    })
}

/// Enough attributes to fill several heap blocks and B-tree leaves of [`Dense::CRAMPED`]
pub fn many_attributes() -> Vec<(String, Attr)> {
    (0..26)
        .map(|i| {
            let attr = match i % 4 {
                0 => Attr::Int(i),
                1 => Attr::Float(f64::from(i as u32) / 4.0),
                2 => Attr::Text("MAROON-X"),
                _ => Attr::VlenText("GJ 1214"),
            };
            (format!("MAROONX KEYWORD {:02}", i), attr)
        })
        .collect()
}

/// Attributes the way the instrument pipeline writes them
pub fn sample_attributes() -> Vec<(&'static str, Attr)> {
    vec![
        ("MAROONX TELESCOPE TARGETNAME", Attr::Text("GJ 1214")),
        ("MAROONX TELESCOPE OBSERVER", Attr::VlenText("Seifahrt")),
        ("MAROONX DETECTOR GAIN", Attr::Int(2)),
        ("EXPTIME", Attr::Float(300.0)),
        ("MAROONX POINTING GUIDING", Attr::Bool(true)),
        ("MAROONX CCD BINNING", Attr::Ints(vec![1, 1])),
        ("MAROONX TELESCOPE SETUP", Attr::VlenText("blue arm = on")),
    ]
}
