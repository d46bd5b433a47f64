//! Dense storage of links and attributes: fractal heaps indexed by version 2 B-trees
//!
//! Objects live in the managed space of a fractal heap; the B-tree records carry the heap IDs.
//! Only what is needed to enumerate every record and fetch its heap object is decoded.

use nom::bytes::streaming::{tag, take};
use nom::error::context;
use nom::multi::count;
use nom::number::streaming::{le_u16, le_u32, le_u8};

use crate::parse::{address, le_uint, length, Result, Sizes, UNDEFINED_ADDRESS};
use crate::{Error, Hdf5File};

#[derive(Debug)]
pub struct FractalHeap {
    pub io_filter_length: u16,
    pub max_managed_object_size: u32,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// In bits
    pub max_heap_size: u16,
    pub root_block_address: u64,
    pub root_indirect_rows: u16,
}

pub fn fractal_heap_header(input: &[u8], sizes: Sizes) -> Result<FractalHeap> {
    context("fractal heap header", |input| {
        let (input, _) = tag(b"FRHP")(input)?;
        let (input, _) = tag([0])(input)?;
        let (input, _heap_id_length) = le_u16(input)?;
        let (input, io_filter_length) = le_u16(input)?;
        let (input, _flags) = le_u8(input)?;
        let (input, max_managed_object_size) = le_u32(input)?;
        let (input, _next_huge_object_id) = length(sizes.length)(input)?;
        let (input, _huge_object_btree_address) = address(sizes.offset)(input)?;
        let (input, _free_space) = length(sizes.length)(input)?;
        let (input, _free_space_manager_address) = address(sizes.offset)(input)?;
        // Managed space, allocated space, allocation iterator, then the counts and sizes of
        // managed, huge and tiny objects
        let (input, _) = count(length(sizes.length), 8)(input)?;
        let (input, table_width) = le_u16(input)?;
        let (input, starting_block_size) = length(sizes.length)(input)?;
        let (input, max_direct_block_size) = length(sizes.length)(input)?;
        let (input, max_heap_size) = le_u16(input)?;
        let (input, _starting_rows) = le_u16(input)?;
        let (input, root_block_address) = address(sizes.offset)(input)?;
        let (input, root_indirect_rows) = le_u16(input)?;

        Ok((
            input,
            FractalHeap {
                io_filter_length,
                max_managed_object_size,
                table_width,
                starting_block_size,
                max_direct_block_size,
                max_heap_size,
                root_block_address,
                root_indirect_rows,
            },
        ))
    })(input)
}

/// The child block addresses of an indirect block, row by row
#[derive(Debug)]
struct IndirectBlock {
    direct: Vec<u64>,
    indirect: Vec<u64>,
}

fn indirect_block<'a>(
    input: &'a [u8],
    sizes: Sizes,
    heap: &FractalHeap,
    rows: usize,
) -> Result<'a, IndirectBlock> {
    context("fractal heap indirect block", |input| {
        let width = usize::from(heap.table_width);
        let direct_rows = rows.min(heap.max_direct_rows());
        let (input, _) = tag(b"FHIB")(input)?;
        let (input, _version) = le_u8(input)?;
        let (input, _heap_header_address) = address(sizes.offset)(input)?;
        let (input, _block_offset) = take(heap.offset_size())(input)?;
        let (input, direct) = count(address(sizes.offset), direct_rows * width)(input)?;
        let (input, indirect) =
            count(address(sizes.offset), (rows - direct_rows) * width)(input)?;
        Ok((input, IndirectBlock { direct, indirect }))
    })(input)
}

fn log2(n: u64) -> u32 {
    63u32.saturating_sub(n.leading_zeros())
}

/// Bytes needed to encode values up to `n`
fn encoded_size(n: u64) -> u8 {
    (log2(n) / 8 + 1) as u8
}

impl FractalHeap {
    pub fn read(file: &Hdf5File, address: u64) -> std::result::Result<Self, Error> {
        let heap = fractal_heap_header(file.bytes_at(address)?, file.sizes())?.1;
        if heap.io_filter_length > 0 {
            return Err(Error::Unsupported(String::from("filtered fractal heaps")));
        }
        if heap.table_width == 0 || !heap.starting_block_size.is_power_of_two() {
            return Err(Error::Parse(String::from("invalid fractal heap doubling table")));
        }
        Ok(heap)
    }

    /// Width of heap offsets, in managed object IDs and block headers
    fn offset_size(&self) -> usize {
        (usize::from(self.max_heap_size) + 7) / 8
    }

    /// Width of object lengths in managed object IDs
    fn length_size(&self) -> usize {
        let max_direct_size = ((log2(self.max_direct_block_size) + 7) / 8) as u8;
        let max_managed_size = encoded_size(u64::from(self.max_managed_object_size));
        usize::from(max_direct_size.min(max_managed_size))
    }

    fn max_direct_rows(&self) -> usize {
        (log2(self.max_direct_block_size) - log2(self.starting_block_size) + 2) as usize
    }

    fn row_block_size(&self, row: usize) -> u64 {
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size << (row - 1)
        }
    }

    /// Rows of a child indirect block covering `block_size` bytes of the heap
    fn child_rows(&self, block_size: u64) -> usize {
        let first_row_bits = log2(self.starting_block_size) + log2(u64::from(self.table_width));
        (log2(block_size) + 1).saturating_sub(first_row_bits) as usize
    }

    /// Fetch the object a heap ID refers to
    pub fn object<'a>(
        &self,
        file: &'a Hdf5File,
        id: &'a [u8],
    ) -> std::result::Result<&'a [u8], Error> {
        let truncated = || Error::Parse(String::from("truncated fractal heap ID"));
        let flags = *id.first().ok_or_else(truncated)?;
        if flags >> 6 != 0 {
            return Err(Error::Unsupported(String::from("fractal heap ID version")));
        }
        match (flags >> 4) & 0b11 {
            0 => {
                let offset_end = 1 + self.offset_size();
                let offset = le_uint(id.get(1..offset_end).ok_or_else(truncated)?);
                let length_end = offset_end + self.length_size();
                let len = le_uint(id.get(offset_end..length_end).ok_or_else(truncated)?);
                let object = file.bytes_at(self.managed_object_address(file, offset)?)?;
                object
                    .get(..len as usize)
                    .ok_or_else(|| Error::Parse(String::from("heap object runs past the file")))
            }
            1 => Err(Error::Unsupported(String::from("huge fractal heap objects"))),
            2 => {
                let len = usize::from(flags & 0x0F) + 1;
                id.get(1..1 + len).ok_or_else(truncated)
            }
            _ => Err(Error::Parse(String::from("invalid fractal heap ID type"))),
        }
    }

    /// Walk the doubling table down to the direct block holding `offset`
    fn managed_object_address(
        &self,
        file: &Hdf5File,
        offset: u64,
    ) -> std::result::Result<u64, Error> {
        if self.root_indirect_rows == 0 {
            // The root is a direct block starting at heap offset zero
            return Ok(self.root_block_address + offset);
        }

        let width = usize::from(self.table_width);
        let max_direct_rows = self.max_direct_rows();
        let mut block_address = self.root_block_address;
        let mut rows = usize::from(self.root_indirect_rows);
        let mut block_offset = 0u64;

        'descend: loop {
            let (_, block) = indirect_block(file.bytes_at(block_address)?, file.sizes(), self, rows)?;
            let mut entry_offset = block_offset;
            for row in 0..rows {
                let size = self.row_block_size(row);
                for column in 0..width {
                    if offset < entry_offset + size {
                        let child = if row < max_direct_rows {
                            block.direct[row * width + column]
                        } else {
                            block.indirect[(row - max_direct_rows) * width + column]
                        };
                        if child == UNDEFINED_ADDRESS {
                            return Err(Error::Parse(String::from(
                                "heap offset points into an unallocated block",
                            )));
                        }
                        if row < max_direct_rows {
                            return Ok(child + (offset - entry_offset));
                        }
                        block_address = child;
                        block_offset = entry_offset;
                        rows = self.child_rows(size);
                        continue 'descend;
                    }
                    entry_offset += size;
                }
            }
            return Err(Error::Parse(String::from("heap offset beyond the managed space")));
        }
    }
}

#[derive(Debug)]
pub struct BtreeHeader {
    pub record_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    pub depth: u16,
    pub root_node_address: u64,
    pub root_records: u16,
    pub total_records: u64,
}

pub fn btree_header(input: &[u8], sizes: Sizes) -> Result<BtreeHeader> {
    context("v2 B-tree header", |input| {
        let (input, _) = tag(b"BTHD")(input)?;
        let (input, _) = tag([0])(input)?;
        let (input, record_type) = le_u8(input)?;
        let (input, node_size) = le_u32(input)?;
        let (input, record_size) = le_u16(input)?;
        let (input, depth) = le_u16(input)?;
        let (input, _split_percent) = le_u8(input)?;
        let (input, _merge_percent) = le_u8(input)?;
        let (input, root_node_address) = address(sizes.offset)(input)?;
        let (input, root_records) = le_u16(input)?;
        let (input, total_records) = length(sizes.length)(input)?;
        Ok((
            input,
            BtreeHeader {
                record_type,
                node_size,
                record_size,
                depth,
                root_node_address,
                root_records,
                total_records,
            },
        ))
    })(input)
}

/// Signature, version, type and checksum of every v2 B-tree node
const NODE_PREFIX_SIZE: u64 = 10;

/// Widths of the record counts stored next to each child pointer of internal nodes
#[derive(Debug)]
struct NodeLayout {
    /// Indexed by depth
    max_records: Vec<u64>,
    records_size: u8,
    /// Indexed by depth; zero for leaves, which store no totals
    total_records_size: Vec<u8>,
}

impl NodeLayout {
    fn new(header: &BtreeHeader, sizes: Sizes) -> Self {
        let node_size = u64::from(header.node_size);
        let record_size = u64::from(header.record_size);
        let leaf_records = node_size.saturating_sub(NODE_PREFIX_SIZE) / record_size.max(1);
        let records_size = encoded_size(leaf_records);

        let mut max_records = vec![leaf_records];
        let mut max_total = vec![leaf_records];
        let mut total_records_size = vec![0];
        for depth in 1..=usize::from(header.depth) {
            let pointer_size = u64::from(sizes.offset)
                + u64::from(records_size)
                + if depth > 1 {
                    u64::from(total_records_size[depth - 1])
                } else {
                    0
                };
            let node_records = node_size.saturating_sub(NODE_PREFIX_SIZE + pointer_size)
                / (record_size + pointer_size);
            let total = (node_records + 1) * max_total[depth - 1] + node_records;
            max_records.push(node_records);
            max_total.push(total);
            total_records_size.push(encoded_size(total));
        }

        Self {
            max_records,
            records_size,
            total_records_size,
        }
    }
}

#[derive(Debug)]
struct ChildPointer {
    address: u64,
    records: u64,
}

fn leaf_node(input: &[u8], record_size: u16, records: u64) -> Result<Vec<&[u8]>> {
    context("v2 B-tree leaf node", |input| {
        let (input, _) = tag(b"BTLF")(input)?;
        let (input, _version) = le_u8(input)?;
        let (input, _record_type) = le_u8(input)?;
        count(take(record_size), records as usize)(input)
    })(input)
}

fn internal_node<'a>(
    input: &'a [u8],
    header: &BtreeHeader,
    layout: &NodeLayout,
    sizes: Sizes,
    records: u64,
    depth: u16,
) -> Result<'a, (Vec<&'a [u8]>, Vec<ChildPointer>)> {
    context("v2 B-tree internal node", |input| {
        let (input, _) = tag(b"BTIN")(input)?;
        let (input, _version) = le_u8(input)?;
        let (input, _record_type) = le_u8(input)?;
        let (input, node_records) = count(take(header.record_size), records as usize)(input)?;
        let total_size = if depth > 1 {
            layout.total_records_size[usize::from(depth) - 1]
        } else {
            0
        };
        let (input, children) = count(
            |input| {
                let (input, address) = address(sizes.offset)(input)?;
                let (input, records) = length(layout.records_size)(input)?;
                let (input, _total_records) = length(total_size)(input)?;
                Ok((input, ChildPointer { address, records }))
            },
            records as usize + 1,
        )(input)?;
        Ok((input, (node_records, children)))
    })(input)
}

/// Record type of the name index of densely stored links
pub const LINK_NAME_RECORDS: u8 = 5;
/// Record type of the name index of densely stored attributes
pub const ATTRIBUTE_NAME_RECORDS: u8 = 8;

/// Every record of a version 2 B-tree of `record_type` records, in key order
pub fn btree_records(
    file: &Hdf5File,
    address: u64,
    record_type: u8,
) -> std::result::Result<Vec<&[u8]>, Error> {
    let sizes = file.sizes();
    let header = btree_header(file.bytes_at(address)?, sizes)?.1;
    if header.record_type != record_type {
        return Err(Error::Parse(format!(
            "expected a B-tree of type {} records, found type {}",
            record_type, header.record_type
        )));
    }
    let mut records = Vec::new();
    if header.root_node_address == UNDEFINED_ADDRESS || header.root_records == 0 {
        return Ok(records);
    }
    let layout = NodeLayout::new(&header, sizes);
    collect_records(
        file,
        &header,
        &layout,
        header.root_node_address,
        u64::from(header.root_records),
        header.depth,
        &mut records,
    )?;
    if records.len() as u64 != header.total_records {
        return Err(Error::Parse(format!(
            "B-tree holds {} records, its header claims {}",
            records.len(),
            header.total_records
        )));
    }
    Ok(records)
}

fn collect_records<'a>(
    file: &'a Hdf5File,
    header: &BtreeHeader,
    layout: &NodeLayout,
    address: u64,
    records: u64,
    depth: u16,
    out: &mut Vec<&'a [u8]>,
) -> std::result::Result<(), Error> {
    let max_records = layout
        .max_records
        .get(usize::from(depth))
        .copied()
        .unwrap_or_default();
    if records > max_records {
        return Err(Error::Parse(format!(
            "B-tree node claims {} records, at most {} fit",
            records, max_records
        )));
    }
    let input = file.bytes_at(address)?;
    if depth == 0 {
        out.extend(leaf_node(input, header.record_size, records)?.1);
        return Ok(());
    }

    let (node_records, children) =
        internal_node(input, header, layout, file.sizes(), records, depth)?.1;
    for (i, child) in children.iter().enumerate() {
        collect_records(file, header, layout, child.address, child.records, depth - 1, out)?;
        if let Some(record) = node_records.get(i) {
            out.push(record);
        }
    }
    Ok(())
}
