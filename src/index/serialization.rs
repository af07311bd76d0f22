//! Byte layouts of MkTab pages
//!
//! All integers and distances are little-endian.
//!
//! Leaf entry: `object_id:4 | parent_distance:8 | k_max:4 | knn_bound:8 * k_max`
//!
//! Directory entry: `object_id:4 | parent_distance:8 | child:4 |
//! covering_radius:8 | k_max:4 | knn_bound:8 * k_max`
//!
//! Node page: `kind:1 (0 = directory, 1 = leaf) | entry_count:4 | node_id:4`
//! followed by the entries.
//!
//! Header page: `magic:4 | version:4 | page_size:4 | k_max:4 | node_count:4 |
//! object_count:4 | name_len:2 | distance name`

use crate::mtree::{
    DirectoryEntry, LeafEntry, MkTabEntry, MkTabError, MkTabNode, MkTabResult, NODE_HEADER_SIZE,
};
use crate::relation::ObjectId;

use super::TreeHeader;

/// Magic bytes at the start of page 0
pub const MAGIC: [u8; 4] = *b"MKTB";

/// Current file format version
pub const VERSION: u32 = 1;

/// Encoded routing object of the root entry, which has none
const NO_OBJECT: u32 = ObjectId::RESERVED.0;

const LEAF_KIND: u8 = 1;
const DIRECTORY_KIND: u8 = 0;

/// Bounds-checked little-endian reader over a page
struct ByteReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take(&mut self, len: usize) -> MkTabResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                MkTabError::Deserialization(format!(
                    "need {len} bytes at offset {}, page has {}",
                    self.offset,
                    self.buf.len()
                ))
            })?;
        let bytes = &self.buf[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn array<const N: usize>(&mut self) -> MkTabResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> MkTabResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> MkTabResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> MkTabResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn f64(&mut self) -> MkTabResult<f64> {
        Ok(f64::from_le_bytes(self.array()?))
    }
}

fn to_u32(value: usize, what: &str) -> MkTabResult<u32> {
    u32::try_from(value)
        .map_err(|_| MkTabError::InvalidArgument(format!("{what} {value} does not fit in 4 bytes")))
}

fn object_id(id: ObjectId) -> MkTabResult<u32> {
    if id.is_reserved() {
        return Err(MkTabError::InvalidArgument(format!(
            "object id {} is reserved",
            id.as_u32()
        )));
    }
    Ok(id.as_u32())
}

/// Encoded size of one entry
pub fn entry_size(entry: &MkTabEntry) -> usize {
    let fixed = match entry {
        MkTabEntry::Leaf(_) => 4 + 8 + 4,
        MkTabEntry::Directory(_) => 4 + 8 + 4 + 8 + 4,
    };
    fixed + entry.knn_bound().len() * 8
}

/// Encoded size of a node page before padding
pub fn node_size(node: &MkTabNode) -> usize {
    NODE_HEADER_SIZE + node.entries.iter().map(entry_size).sum::<usize>()
}

fn serialize_bound(bound: &[f64], buf: &mut Vec<u8>) -> MkTabResult<()> {
    buf.extend_from_slice(&to_u32(bound.len(), "k_max")?.to_le_bytes());
    for value in bound {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    Ok(())
}

fn deserialize_bound(reader: &mut ByteReader<'_>) -> MkTabResult<Vec<f64>> {
    let k_max = reader.u32()? as usize;
    if k_max.saturating_mul(8) > reader.remaining() {
        return Err(MkTabError::Deserialization(format!(
            "entry claims {k_max} bounds, more than the page holds"
        )));
    }
    (0..k_max).map(|_| reader.f64()).collect()
}

/// Append the encoding of `entry` to `buf`
pub fn serialize_entry(entry: &MkTabEntry, buf: &mut Vec<u8>) -> MkTabResult<()> {
    match entry {
        MkTabEntry::Leaf(leaf) => {
            buf.extend_from_slice(&object_id(leaf.object_id)?.to_le_bytes());
            buf.extend_from_slice(&leaf.parent_distance.to_le_bytes());
            serialize_bound(&leaf.knn_bound, buf)
        }
        MkTabEntry::Directory(dir) => {
            let routing = match dir.routing_object {
                Some(id) => object_id(id)?,
                None => NO_OBJECT,
            };
            buf.extend_from_slice(&routing.to_le_bytes());
            buf.extend_from_slice(&dir.parent_distance.to_le_bytes());
            buf.extend_from_slice(&to_u32(dir.child, "node id")?.to_le_bytes());
            buf.extend_from_slice(&dir.covering_radius.to_le_bytes());
            serialize_bound(&dir.knn_bound, buf)
        }
    }
}

fn deserialize_entry(reader: &mut ByteReader<'_>, is_leaf: bool) -> MkTabResult<MkTabEntry> {
    let object = reader.u32()?;
    let parent_distance = reader.f64()?;

    if is_leaf {
        let knn_bound = deserialize_bound(reader)?;
        Ok(MkTabEntry::Leaf(LeafEntry {
            object_id: ObjectId(object),
            parent_distance,
            knn_bound,
        }))
    } else {
        let child = reader.u32()? as usize;
        let covering_radius = reader.f64()?;
        let knn_bound = deserialize_bound(reader)?;
        Ok(MkTabEntry::Directory(DirectoryEntry {
            routing_object: (object != NO_OBJECT).then_some(ObjectId(object)),
            parent_distance,
            child,
            covering_radius,
            knn_bound,
        }))
    }
}

/// Encode a node, without padding to the page size
pub fn serialize_node(node: &MkTabNode) -> MkTabResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(node_size(node));
    buf.push(if node.is_leaf { LEAF_KIND } else { DIRECTORY_KIND });
    buf.extend_from_slice(&to_u32(node.len(), "entry count")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(node.id, "node id")?.to_le_bytes());

    for entry in &node.entries {
        if entry.is_leaf() != node.is_leaf {
            return Err(MkTabError::IntegrityViolation(format!(
                "node {} mixes leaf and directory entries",
                node.id
            )));
        }
        serialize_entry(entry, &mut buf)?;
    }
    Ok(buf)
}

/// Decode a node page; trailing padding is ignored
pub fn deserialize_node(buf: &[u8]) -> MkTabResult<MkTabNode> {
    let mut reader = ByteReader::new(buf);

    let is_leaf = match reader.u8()? {
        LEAF_KIND => true,
        DIRECTORY_KIND => false,
        kind => {
            return Err(MkTabError::Deserialization(format!(
                "unknown node kind {kind}"
            )));
        }
    };
    let count = reader.u32()? as usize;
    let id = reader.u32()? as usize;

    let mut node = if is_leaf {
        MkTabNode::new_leaf(id)
    } else {
        MkTabNode::new_directory(id)
    };
    for _ in 0..count {
        node.entries.push(deserialize_entry(&mut reader, is_leaf)?);
    }
    Ok(node)
}

/// Encode the tree header, without padding to the page size
pub fn serialize_header(header: &TreeHeader) -> MkTabResult<Vec<u8>> {
    let name = header.distance.as_bytes();
    let name_len = u16::try_from(name.len()).map_err(|_| {
        MkTabError::InvalidArgument(format!(
            "distance name of {} bytes is too long",
            name.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(26 + name.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&to_u32(header.page_size, "page size")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(header.k_max, "k_max")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(header.node_count, "node count")?.to_le_bytes());
    buf.extend_from_slice(&to_u32(header.object_count, "object count")?.to_le_bytes());
    buf.extend_from_slice(&name_len.to_le_bytes());
    buf.extend_from_slice(name);
    Ok(buf)
}

pub fn deserialize_header(buf: &[u8]) -> MkTabResult<TreeHeader> {
    let mut reader = ByteReader::new(buf);

    if reader.array::<4>()? != MAGIC {
        return Err(MkTabError::InvalidMagic);
    }
    let version = reader.u32()?;
    if version != VERSION {
        return Err(MkTabError::UnsupportedVersion(version));
    }

    let page_size = reader.u32()? as usize;
    let k_max = reader.u32()? as usize;
    let node_count = reader.u32()? as usize;
    let object_count = reader.u32()? as usize;
    let name_len = reader.u16()? as usize;
    let distance = String::from_utf8(reader.take(name_len)?.to_vec())
        .map_err(|e| MkTabError::Deserialization(format!("distance name: {e}")))?;

    Ok(TreeHeader {
        page_size,
        k_max,
        node_count,
        object_count,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mtree::{ROOT_NODE_ID, directory_entry_size, leaf_entry_size};

    fn sample_leaf() -> MkTabNode {
        let mut node = MkTabNode::new_leaf(7);
        let mut entry = LeafEntry::new(ObjectId(3), vec![0.5, 1.25, f64::INFINITY]);
        entry.parent_distance = 2.75;
        node.add_entry(entry.into());
        node.add_entry(LeafEntry::new(ObjectId(4), vec![0.0, 0.0, 1.0]).into());
        node
    }

    #[test]
    fn test_entry_sizes_match_capacity_planner() {
        let leaf = MkTabEntry::from(LeafEntry::new(ObjectId(1), vec![0.0; 5]));
        let dir = MkTabEntry::from(DirectoryEntry::new(ObjectId(1), 0.0, 2, 0.0, 5));

        let mut buf = Vec::new();
        serialize_entry(&leaf, &mut buf).unwrap();
        assert_eq!(buf.len(), leaf_entry_size(5));
        assert_eq!(entry_size(&leaf), leaf_entry_size(5));

        buf.clear();
        serialize_entry(&dir, &mut buf).unwrap();
        assert_eq!(buf.len(), directory_entry_size(5));
    }

    #[test]
    fn test_leaf_entry_layout() {
        let mut entry = LeafEntry::new(ObjectId(0x0102_0304), vec![1.0]);
        entry.parent_distance = 2.0;
        let mut buf = Vec::new();
        serialize_entry(&entry.into(), &mut buf).unwrap();

        assert_eq!(&buf[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[4..12], &2.0f64.to_le_bytes());
        assert_eq!(&buf[12..16], &1u32.to_le_bytes());
        assert_eq!(&buf[16..24], &1.0f64.to_le_bytes());
    }

    #[test]
    fn test_leaf_node_roundtrip_with_padding() {
        let node = sample_leaf();
        let mut page = serialize_node(&node).unwrap();
        assert_eq!(page.len(), node_size(&node));
        page.resize(4096, 0);

        assert_eq!(deserialize_node(&page).unwrap(), node);
    }

    #[test]
    fn test_directory_node_roundtrip() {
        let mut node = MkTabNode::new_directory(0);
        let mut entry = DirectoryEntry::new(ObjectId(9), 1.5, 12, 3.25, 2);
        entry.knn_bound = vec![0.75, 4.0];
        node.add_entry(entry.into());

        let page = serialize_node(&node).unwrap();
        assert_eq!(deserialize_node(&page).unwrap(), node);
    }

    #[test]
    fn test_root_entry_has_no_object_on_disk() {
        let root = MkTabEntry::from(DirectoryEntry::root(0, 1));
        let mut buf = Vec::new();
        serialize_entry(&root, &mut buf).unwrap();
        assert_eq!(&buf[0..4], &u32::MAX.to_le_bytes());

        let decoded = deserialize_entry(&mut ByteReader::new(&buf), false).unwrap();
        assert_eq!(decoded.routing_object(), None);
    }

    #[test]
    fn test_nodes_roundtrip_for_any_k_max() {
        for k_max in [1, 2, 5, 16, 50] {
            let bound: Vec<f64> = (0..k_max).map(|k| k as f64 * 0.5).collect();

            let mut leaf = MkTabNode::new_leaf(3);
            for id in 0..4 {
                let mut entry = LeafEntry::new(ObjectId(id), bound.clone());
                entry.parent_distance = f64::from(id) + 0.125;
                leaf.add_entry(entry.into());
            }
            let page = serialize_node(&leaf).unwrap();
            assert_eq!(page.len(), NODE_HEADER_SIZE + 4 * leaf_entry_size(k_max));
            assert_eq!(deserialize_node(&page).unwrap(), leaf);

            let mut dir = MkTabNode::new_directory(ROOT_NODE_ID);
            for child in 1..3 {
                let mut entry = DirectoryEntry::new(ObjectId(child), 0.0, child as usize, 2.5, k_max);
                entry.knn_bound.clone_from(&bound);
                dir.add_entry(entry.into());
            }
            let page = serialize_node(&dir).unwrap();
            assert_eq!(page.len(), NODE_HEADER_SIZE + 2 * directory_entry_size(k_max));
            assert_eq!(deserialize_node(&page).unwrap(), dir);
        }
    }

    #[test]
    fn test_reserved_object_id_is_not_encoded() {
        let mut buf = Vec::new();
        let leaf = MkTabEntry::from(LeafEntry::new(ObjectId::RESERVED, vec![1.0]));
        assert!(matches!(
            serialize_entry(&leaf, &mut buf),
            Err(MkTabError::InvalidArgument(_))
        ));

        let dir = MkTabEntry::from(DirectoryEntry::new(ObjectId::RESERVED, 0.0, 1, 0.0, 1));
        assert!(matches!(
            serialize_entry(&dir, &mut buf),
            Err(MkTabError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_truncated_node_is_an_error() {
        let page = serialize_node(&sample_leaf()).unwrap();
        let result = deserialize_node(&page[..page.len() - 3]);
        assert!(matches!(result, Err(MkTabError::Deserialization(_))));
    }

    #[test]
    fn test_unknown_node_kind() {
        let mut page = serialize_node(&sample_leaf()).unwrap();
        page[0] = 7;
        assert!(matches!(
            deserialize_node(&page),
            Err(MkTabError::Deserialization(_))
        ));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = TreeHeader {
            page_size: 4096,
            k_max: 10,
            node_count: 42,
            object_count: 1000,
            distance: "euclidean".to_string(),
        };
        let mut page = serialize_header(&header).unwrap();
        assert_eq!(&page[0..4], b"MKTB");
        page.resize(4096, 0);

        assert_eq!(deserialize_header(&page).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_magic_and_version() {
        let header = TreeHeader {
            page_size: 512,
            k_max: 2,
            node_count: 1,
            object_count: 0,
            distance: "absolute".to_string(),
        };
        let page = serialize_header(&header).unwrap();

        let mut bad_magic = page.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            deserialize_header(&bad_magic),
            Err(MkTabError::InvalidMagic)
        ));

        let mut bad_version = page;
        bad_version[4..8].copy_from_slice(&9u32.to_le_bytes());
        assert!(matches!(
            deserialize_header(&bad_version),
            Err(MkTabError::UnsupportedVersion(9))
        ));
    }
}
