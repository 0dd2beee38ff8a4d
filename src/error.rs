//! Error types for the MaxMind DB reader

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("path is not a file: {0}")]
    NotFile(String),

    #[error("file is empty: {0}")]
    FileEmpty(String),

    #[error("file exceeds requested max_size: {0}")]
    FileTooLarge(String),

    #[error("metadata start marker not found")]
    MetadataStartNotFound,

    #[error("data section offset {offset} exceeds file size {file_size}")]
    CorruptedTree { offset: usize, file_size: usize },

    #[error("tree descent exhausted {bit_count} bits without a record or empty marker")]
    InvalidTreeNode { bit_count: u8 },

    #[error("unsupported record_size {0} (expected 24, 28, or 32)")]
    UnknownRecordSize(u16),

    #[error("prefix length {prefix_len} exceeds address width {bit_count}")]
    InvalidPrefixLen { prefix_len: u8, bit_count: u8 },

    #[error("invalid network string {input:?}: {reason}")]
    InvalidNetworkString { input: String, reason: &'static str },

    #[error("expected a map at the top level of the record, found {found}")]
    ExpectedStructType { found: &'static str },

    #[error("expected a string value, found {found}")]
    ExpectedString { found: &'static str },

    #[error("expected a double value, found {found}")]
    ExpectedDouble { found: &'static str },

    #[error("expected a u16 value, found {found}")]
    ExpectedU16 { found: &'static str },

    #[error("expected a u32 value, found {found}")]
    ExpectedU32 { found: &'static str },

    #[error("expected an i32 value, found {found}")]
    ExpectedI32 { found: &'static str },

    #[error("expected a u64 value, found {found}")]
    ExpectedU64 { found: &'static str },

    #[error("expected a u128 value, found {found}")]
    ExpectedU128 { found: &'static str },

    #[error("expected a bool value, found {found}")]
    ExpectedBool { found: &'static str },

    #[error("expected a float value, found {found}")]
    ExpectedFloat { found: &'static str },

    #[error("expected a map value, found {found}")]
    ExpectedMap { found: &'static str },

    #[error("expected an array value, found {found}")]
    ExpectedArray { found: &'static str },

    #[error("unsupported field type (extended byte {ext})")]
    UnsupportedFieldType { ext: u8 },

    #[error("integer size {size} exceeds target width {max} bytes")]
    InvalidIntegerSize { size: usize, max: usize },

    #[error("invalid bool payload size {0} (expected 0 or 1)")]
    InvalidBoolSize(usize),

    #[error("invalid double payload size {0} (expected 8)")]
    InvalidDoubleSize(usize),

    #[error("invalid float payload size {0} (expected 4)")]
    InvalidFloatSize(usize),

    #[error("a pointer resolved to another pointer, which is not permitted")]
    PointerToPointer,

    #[error("pointer target {target} lies outside the data section (size {data_section_size})")]
    PointerOutOfBounds {
        target: usize,
        data_section_size: usize,
    },

    #[error("metadata is missing required field {0}")]
    MissingMetadataField(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;
