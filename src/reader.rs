//! The public entry point: locates the metadata section, builds the tree
//! and data-section views, and exposes `lookup`/`within` over them.

use std::path::Path;

use tracing::{debug, warn};

use crate::address::{Address, AddressFamily, Network};
use crate::decoder::Cursor;
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::schema::{materialize_dynamic, materialize_struct, Options, Schema};
use crate::source::MappedSource;
use crate::tree::{NodeKind, TreeReader};
use crate::value::Value;
use crate::within::Within;

/// The marker sequence that precedes the metadata map, searched for from
/// the end of the file (the spec allows trailing bytes after the last
/// occurrence, so only the last match is authoritative).
const METADATA_MARKER: &[u8] = b"\xab\xcd\xefMaxMind.com";

/// How far from the end of the file to search for the metadata marker.
/// Real `.mmdb` metadata maps are a few hundred bytes; this bounds a
/// pathological search over a huge, non-mmdb file passed in by mistake.
const METADATA_SEARCH_WINDOW: usize = 128 * 1024;

/// A parsed MaxMind DB file, ready for `lookup` and `within` queries.
///
/// Holds the backing byte source (mapped or heap-owned) alongside the
/// parsed metadata and the byte ranges of the tree and data sections
/// computed from it.
pub struct Reader {
    source: MappedSource,
    metadata: OwnedMetadata,
    metadata_start: usize,
    tree_len: usize,
    data_section_offset: usize,
    ipv4_start: u32,
}

/// `Metadata` borrows from the backing buffer; we keep that buffer alive
/// in `source` for as long as `Reader` lives, so re-deriving a `Metadata<'_>`
/// view on demand from `source.as_bytes()` is always sound. We store only
/// the fields needed outside of borrow-checked accessors, plus the already
/// located `metadata_start` offset, so `metadata()` never has to re-search
/// for the marker.
struct OwnedMetadata {
    node_count: u32,
    record_size: u16,
}

impl Reader {
    /// Open the file, reading it fully into a heap buffer bounded by
    /// `max_size` bytes (0 means unbounded).
    pub fn open<P: AsRef<Path>>(path: P, max_size: u64) -> Result<Self> {
        let source = MappedSource::open(path.as_ref(), max_size)?;
        Self::from_source(source)
    }

    /// Memory-map the file read-only.
    pub fn mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = MappedSource::mmap(path.as_ref())?;
        Self::from_source(source)
    }

    fn from_source(source: MappedSource) -> Result<Self> {
        let bytes = source.as_bytes();
        let marker_pos = find_metadata_marker(bytes)?;
        let metadata_start = marker_pos + METADATA_MARKER.len();

        let mut cursor = Cursor::new(bytes, metadata_start);
        let metadata = Metadata::decode(&mut cursor)?;

        if metadata.binary_format_major_version == 0 {
            // A major version of 0 never occurs in a well-formed metadata
            // map; it means the marker search landed on the wrong bytes.
            return Err(Error::MetadataStartNotFound);
        }
        if metadata.binary_format_major_version != 2 {
            warn!(
                version = metadata.binary_format_major_version,
                "unexpected binary_format_major_version, expected 2"
            );
        }

        let bytes_per_node = match metadata.record_size {
            24 => 6,
            28 => 7,
            32 => 8,
            other => return Err(Error::UnknownRecordSize(other)),
        };
        let tree_len = metadata.node_count as usize * bytes_per_node;
        let data_section_offset = tree_len + 16;
        if data_section_offset > bytes.len() {
            return Err(Error::CorruptedTree {
                offset: data_section_offset,
                file_size: bytes.len(),
            });
        }

        let tree = TreeReader::new(&bytes[..tree_len], metadata.node_count, metadata.record_size)?;
        let ipv4_start = if metadata.ip_version == 6 {
            tree.ipv4_start()?
        } else {
            0
        };

        debug!(
            node_count = metadata.node_count,
            record_size = metadata.record_size,
            data_section_offset,
            "opened mmdb reader"
        );

        Ok(Reader {
            source,
            metadata: OwnedMetadata {
                node_count: metadata.node_count,
                record_size: metadata.record_size,
            },
            metadata_start,
            tree_len,
            data_section_offset,
            ipv4_start,
        })
    }

    /// The parsed metadata map. Re-decodes from the already-located offset
    /// on every call rather than caching a borrowed `Metadata<'_>` on
    /// `Reader` itself, since the two would otherwise need conflicting
    /// lifetime parameters.
    pub fn metadata(&self) -> Result<Metadata<'_>> {
        let mut cursor = Cursor::new(self.source.as_bytes(), self.metadata_start);
        Metadata::decode(&mut cursor)
    }

    fn tree(&self) -> Result<TreeReader<'_>> {
        let bytes = self.source.as_bytes();
        TreeReader::new(&bytes[..self.tree_len], self.metadata.node_count, self.metadata.record_size)
    }

    fn data(&self) -> &[u8] {
        &self.source.as_bytes()[self.data_section_offset..]
    }

    /// Look up the record for `address`, materializing it as `T`.
    ///
    /// Returns `Ok(None)` when the tree has no record for this address
    /// (not an error: most of the address space is unassigned in any real
    /// database). Returns `Err` for a malformed tree or a record that
    /// doesn't match `T`'s declared shape.
    pub fn lookup<'a, T: Schema<'a>>(
        &'a self,
        address: &Address,
        options: &Options,
    ) -> Result<Option<T>> {
        let tree = self.tree()?;
        let start = match address.family() {
            AddressFamily::V4 => self.ipv4_start,
            AddressFamily::V6 => 0,
        };
        let (kind, _bits) = tree.find_address(address, start)?;
        match kind {
            NodeKind::Empty | NodeKind::Node(_) => Ok(None),
            NodeKind::Record(offset) => {
                let mut cursor = Cursor::new(self.data(), offset);
                Ok(Some(materialize_struct(&mut cursor, options)?))
            }
        }
    }

    /// Look up the record for `address` without a declared schema,
    /// returning the dynamic value shape.
    pub fn lookup_dynamic<'a>(
        &'a self,
        address: &Address,
        options: &Options,
    ) -> Result<Option<Value<'a>>> {
        let tree = self.tree()?;
        let start = match address.family() {
            AddressFamily::V4 => self.ipv4_start,
            AddressFamily::V6 => 0,
        };
        let (kind, _bits) = tree.find_address(address, start)?;
        match kind {
            NodeKind::Empty | NodeKind::Node(_) => Ok(None),
            NodeKind::Record(offset) => {
                let mut cursor = Cursor::new(self.data(), offset);
                Ok(Some(materialize_dynamic(&mut cursor, options)?))
            }
        }
    }

    /// Enumerate every sub-network of `network` that carries a record,
    /// materializing each as `T`.
    pub fn within<'a, 'o, T: Schema<'a> + Clone>(
        &'a self,
        network: Network,
        options: Options<'o>,
    ) -> Result<Within<'a, 'o, T>> {
        let tree = self.tree()?;
        Within::new(
            self.data(),
            tree,
            self.ipv4_start,
            network,
            options,
            materialize_struct::<T>,
        )
    }

    /// Enumerate every sub-network of `network` that carries a record,
    /// materializing each as the dynamic value shape.
    pub fn within_dynamic<'a, 'o>(
        &'a self,
        network: Network,
        options: Options<'o>,
    ) -> Result<Within<'a, 'o, Value<'a>>> {
        let tree = self.tree()?;
        Within::new(
            self.data(),
            tree,
            self.ipv4_start,
            network,
            options,
            materialize_dynamic,
        )
    }
}

fn find_metadata_marker(bytes: &[u8]) -> Result<usize> {
    let search_start = bytes.len().saturating_sub(METADATA_SEARCH_WINDOW);
    let window = &bytes[search_start..];
    window
        .windows(METADATA_MARKER.len())
        .rposition(|w| w == METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(Error::MetadataStartNotFound)
}
