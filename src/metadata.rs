//! The file's parsed metadata record, decoded once at `open`/`mmap` time.

use crate::decoder::{Cursor, FieldKind};
use crate::error::{Error, Result};
use crate::value::{OrderedMap, Value};

/// Fixed set of fields decoded from the tail of the file, immediately
/// following the metadata start marker.
#[derive(Debug, Clone)]
pub struct Metadata<'a> {
    pub binary_format_major_version: u16,
    pub binary_format_minor_version: u16,
    pub build_epoch: u64,
    pub database_type: &'a str,
    pub description: Option<OrderedMap<'a, &'a str>>,
    pub ip_version: u16,
    pub languages: Option<Vec<&'a str>>,
    pub node_count: u32,
    pub record_size: u16,
}

impl<'a> Metadata<'a> {
    /// Decode a `Metadata` map starting at the cursor's current position
    /// (immediately after the metadata start marker).
    pub fn decode(cursor: &mut Cursor<'a>) -> Result<Self> {
        let (kind, low5) = cursor.read_control()?;
        if kind != FieldKind::Map {
            return Err(Error::ExpectedStructType { found: "non-map metadata" });
        }
        let size = cursor.read_payload_size(kind, low5)?;

        let mut binary_format_major_version = None;
        let mut binary_format_minor_version = None;
        let mut build_epoch = None;
        let mut database_type = None;
        let mut description = None;
        let mut ip_version = None;
        let mut languages = None;
        let mut node_count = None;
        let mut record_size = None;

        for _ in 0..size {
            let key_value = crate::decoder::decode_value(cursor)?;
            let key = key_value.as_str().ok_or(Error::ExpectedString {
                found: key_value.type_name(),
            })?;
            let value = crate::decoder::decode_value(cursor)?;
            match key {
                "binary_format_major_version" => {
                    binary_format_major_version = Some(expect_u16(value)?)
                }
                "binary_format_minor_version" => {
                    binary_format_minor_version = Some(expect_u16(value)?)
                }
                "build_epoch" => build_epoch = Some(expect_u64(value)?),
                "database_type" => database_type = Some(expect_str(value)?),
                "description" => description = Some(expect_string_map(value)?),
                "ip_version" => ip_version = Some(expect_u16(value)?),
                "languages" => languages = Some(expect_string_array(value)?),
                "node_count" => node_count = Some(expect_u32(value)?),
                "record_size" => record_size = Some(expect_u16(value)?),
                _ => {}
            }
        }

        Ok(Metadata {
            binary_format_major_version: binary_format_major_version
                .ok_or(Error::MissingMetadataField("binary_format_major_version"))?,
            binary_format_minor_version: binary_format_minor_version
                .ok_or(Error::MissingMetadataField("binary_format_minor_version"))?,
            build_epoch: build_epoch.ok_or(Error::MissingMetadataField("build_epoch"))?,
            database_type: database_type.ok_or(Error::MissingMetadataField("database_type"))?,
            description,
            ip_version: ip_version.ok_or(Error::MissingMetadataField("ip_version"))?,
            languages,
            node_count: node_count.ok_or(Error::MissingMetadataField("node_count"))?,
            record_size: record_size.ok_or(Error::MissingMetadataField("record_size"))?,
        })
    }

    /// The ISO language tags this database carries descriptions for, if any.
    pub fn languages(&self) -> &[&'a str] {
        self.languages.as_deref().unwrap_or(&[])
    }

    /// The database's human-readable description for one language tag, if
    /// the metadata carries a `description` map and the tag is present.
    pub fn description(&self, lang: &str) -> Option<&'a str> {
        self.description.as_ref()?.get(lang).copied()
    }

    pub fn bit_count(&self) -> u8 {
        match self.ip_version {
            4 => 32,
            _ => 128,
        }
    }
}

fn expect_u16(v: Value) -> Result<u16> {
    match v {
        Value::U16(n) => Ok(n),
        other => Err(Error::ExpectedU16 { found: other.type_name() }),
    }
}

fn expect_u32(v: Value) -> Result<u32> {
    match v {
        Value::U32(n) => Ok(n),
        other => Err(Error::ExpectedU32 { found: other.type_name() }),
    }
}

fn expect_u64(v: Value) -> Result<u64> {
    match v {
        Value::U64(n) => Ok(n),
        other => Err(Error::ExpectedU64 { found: other.type_name() }),
    }
}

fn expect_str<'a>(v: Value<'a>) -> Result<&'a str> {
    match v {
        Value::String(s) => Ok(s),
        other => Err(Error::ExpectedString { found: other.type_name() }),
    }
}

fn expect_string_map<'a>(v: Value<'a>) -> Result<OrderedMap<'a, &'a str>> {
    match v {
        Value::Map(m) => {
            let mut out = OrderedMap::with_capacity(m.len());
            for (k, v) in m.iter() {
                out.push(*k, expect_str(v.clone())?);
            }
            Ok(out)
        }
        other => Err(Error::ExpectedMap { found: other.type_name() }),
    }
}

fn expect_string_array<'a>(v: Value<'a>) -> Result<Vec<&'a str>> {
    match v {
        Value::Array(items) => items.into_iter().map(expect_str).collect(),
        other => Err(Error::ExpectedArray { found: other.type_name() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_metadata_bytes() -> Vec<u8> {
        let mut out = vec![0b111_00000u8 | 7];
        push_str_kv(&mut out, "binary_format_major_version", &[0b101_00001u8, 2]);
        push_str_kv(&mut out, "binary_format_minor_version", &[0b101_00000u8]);
        push_str_kv(&mut out, "build_epoch", &[
            0b000_01000u8, 2, 0, 0, 0, 0, 0x65, 0x4a, 0x2b, 0x00,
        ]);
        push_str_kv(&mut out, "database_type", &str_value("Test"));
        push_str_kv(&mut out, "ip_version", &[0b101_00001u8, 6]);
        push_str_kv(&mut out, "node_count", &[0b110_00001u8, 10]);
        push_str_kv(&mut out, "record_size", &[0b101_00001u8, 24]);
        out
    }

    fn push_str_kv(out: &mut Vec<u8>, key: &str, value: &[u8]) {
        out.push(0b010_00000u8 | key.len() as u8);
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(value);
    }

    fn str_value(s: &str) -> Vec<u8> {
        let mut v = vec![0b010_00000u8 | s.len() as u8];
        v.extend_from_slice(s.as_bytes());
        v
    }

    #[test]
    fn decodes_required_fields() {
        let data = build_metadata_bytes();
        let mut cursor = Cursor::new(&data, 0);
        let metadata = Metadata::decode(&mut cursor).unwrap();
        assert_eq!(metadata.binary_format_major_version, 2);
        assert_eq!(metadata.binary_format_minor_version, 0);
        assert_eq!(metadata.database_type, "Test");
        assert_eq!(metadata.ip_version, 6);
        assert_eq!(metadata.node_count, 10);
        assert_eq!(metadata.record_size, 24);
        assert_eq!(metadata.bit_count(), 128);
    }

    #[test]
    fn missing_field_errors() {
        let mut out = vec![0b111_00000u8 | 1];
        push_str_kv(&mut out, "ip_version", &[0b101_00001u8, 4]);
        let mut cursor = Cursor::new(&out, 0);
        let err = Metadata::decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::MissingMetadataField(_)));
    }
}
