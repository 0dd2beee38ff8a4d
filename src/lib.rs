//! A reader for the MaxMind DB (`.mmdb`) binary format: IP-to-record
//! lookup over a bit-trie search tree and a self-describing data section,
//! materialized into either a caller-declared schema or a dynamic value.

pub mod address;
pub mod decoder;
pub mod error;
pub mod metadata;
pub mod reader;
pub mod schema;
pub mod tree;
pub mod value;
pub mod within;

pub use address::{Address, AddressFamily, Network};
pub use error::{Error, Result};
pub use metadata::Metadata;
pub use reader::Reader;
pub use schema::{FieldValue, Options, Schema};
pub use value::{OrderedMap, Value};
pub use within::Within;
