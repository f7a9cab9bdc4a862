use std::cmp::Ordering;
use std::fmt;

use bytes::{Buf, BufMut, BytesMut};

use crate::common::{PagodaError, Result};

use super::KeyComparator;

/// Types an index key column may have. Every type has a fixed width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// 32-bit signed integer: 4 bytes, little-endian
    Integer,
    /// 64-bit signed integer: 8 bytes, little-endian
    BigInt,
    /// 32-bit floating point: 4 bytes, IEEE 754
    Float,
    /// Fixed-length string: exactly n bytes, zero-padded
    Char(u16),
}

impl KeyType {
    pub fn width(&self) -> usize {
        match self {
            KeyType::Integer | KeyType::Float => 4,
            KeyType::BigInt => 8,
            KeyType::Char(n) => *n as usize,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Integer => write!(f, "INTEGER"),
            KeyType::BigInt => write!(f, "BIGINT"),
            KeyType::Float => write!(f, "FLOAT"),
            KeyType::Char(n) => write!(f, "CHAR({})", n),
        }
    }
}

/// One column value of a row, as handed to the index.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Integer(i32),
    BigInt(i64),
    Float(f32),
    Char(String),
}

impl KeyValue {
    fn matches(&self, key_type: KeyType) -> bool {
        matches!(
            (self, key_type),
            (KeyValue::Integer(_), KeyType::Integer)
                | (KeyValue::BigInt(_), KeyType::BigInt)
                | (KeyValue::Float(_), KeyType::Float)
                | (KeyValue::Char(_), KeyType::Char(_))
        )
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Integer(v) => write!(f, "{}", v),
            KeyValue::BigInt(v) => write!(f, "{}", v),
            KeyValue::Float(v) => write!(f, "{}", v),
            KeyValue::Char(s) => write!(f, "'{}'", s),
        }
    }
}

/// A named key column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: String,
    pub key_type: KeyType,
}

impl KeyColumn {
    pub fn new(name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            name: name.into(),
            key_type,
        }
    }
}

/// Binds an index to its key columns: serializes row values into the fixed
/// size key stored in tree pages and orders serialized keys column by column.
#[derive(Debug, Clone)]
pub struct KeySchema {
    columns: Vec<KeyColumn>,
    key_size: usize,
}

impl KeySchema {
    /// Creates a schema whose key size is the sum of the column widths.
    pub fn new(columns: Vec<KeyColumn>) -> Result<Self> {
        let key_size = columns.iter().map(|c| c.key_type.width()).sum();
        Self::with_key_size(columns, key_size)
    }

    /// Creates a schema with an explicit key size. The bytes past the last
    /// column are zero padding and never compared.
    pub fn with_key_size(columns: Vec<KeyColumn>, key_size: usize) -> Result<Self> {
        if columns.is_empty() {
            return Err(PagodaError::InvalidConfig(
                "an index key needs at least one column".to_string(),
            ));
        }
        let needed: usize = columns.iter().map(|c| c.key_type.width()).sum();
        if needed == 0 || key_size < needed {
            return Err(PagodaError::InvalidConfig(format!(
                "key size {} cannot hold columns of {} bytes",
                key_size, needed
            )));
        }
        Ok(Self { columns, key_size })
    }

    /// Single `INTEGER` column schema.
    pub fn integer() -> Self {
        Self {
            columns: vec![KeyColumn::new("key", KeyType::Integer)],
            key_size: KeyType::Integer.width(),
        }
    }

    pub fn columns(&self) -> &[KeyColumn] {
        &self.columns
    }

    /// Serializes a row's key column values into a key of `key_size` bytes.
    pub fn serialize(&self, values: &[KeyValue]) -> Result<Vec<u8>> {
        if values.len() != self.columns.len() {
            return Err(PagodaError::KeyEncoding(format!(
                "expected {} key values, got {}",
                self.columns.len(),
                values.len()
            )));
        }

        let mut buf = BytesMut::with_capacity(self.key_size);
        for (value, column) in values.iter().zip(&self.columns) {
            if !value.matches(column.key_type) {
                return Err(PagodaError::KeyEncoding(format!(
                    "column '{}' is {}, got {}",
                    column.name, column.key_type, value
                )));
            }
            match value {
                KeyValue::Integer(v) => buf.put_i32_le(*v),
                KeyValue::BigInt(v) => buf.put_i64_le(*v),
                KeyValue::Float(v) => buf.put_f32_le(*v),
                KeyValue::Char(s) => {
                    let width = column.key_type.width();
                    if s.len() > width {
                        return Err(PagodaError::KeyEncoding(format!(
                            "value for column '{}' is {} bytes, limit is {}",
                            column.name,
                            s.len(),
                            width
                        )));
                    }
                    buf.put_slice(s.as_bytes());
                    buf.put_bytes(0, width - s.len());
                }
            }
        }
        buf.resize(self.key_size, 0);
        Ok(buf.to_vec())
    }

    /// Serializes a single `INTEGER` key.
    pub fn integer_key(&self, value: i32) -> Result<Vec<u8>> {
        self.serialize(&[KeyValue::Integer(value)])
    }

    /// Decodes a serialized key back into column values.
    pub fn deserialize(&self, key: &[u8]) -> Result<Vec<KeyValue>> {
        if key.len() != self.key_size {
            return Err(PagodaError::KeySizeMismatch {
                expected: self.key_size,
                actual: key.len(),
            });
        }

        let mut buf = key;
        let mut values = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = match column.key_type {
                KeyType::Integer => KeyValue::Integer(buf.get_i32_le()),
                KeyType::BigInt => KeyValue::BigInt(buf.get_i64_le()),
                KeyType::Float => KeyValue::Float(buf.get_f32_le()),
                KeyType::Char(n) => {
                    let raw = &buf[..n as usize];
                    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                    let s = std::str::from_utf8(&raw[..end])
                        .map_err(|e| PagodaError::KeyEncoding(e.to_string()))?
                        .to_string();
                    buf.advance(n as usize);
                    KeyValue::Char(s)
                }
            };
            values.push(value);
        }
        Ok(values)
    }
}

fn compare_column(key_type: KeyType, a: &[u8], b: &[u8]) -> Ordering {
    match key_type {
        KeyType::Integer => (&a[..]).get_i32_le().cmp(&(&b[..]).get_i32_le()),
        KeyType::BigInt => (&a[..]).get_i64_le().cmp(&(&b[..]).get_i64_le()),
        KeyType::Float => (&a[..]).get_f32_le().total_cmp(&(&b[..]).get_f32_le()),
        KeyType::Char(_) => a.cmp(b),
    }
}

impl KeyComparator for KeySchema {
    fn key_size(&self) -> usize {
        self.key_size
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        let mut offset = 0;
        for column in &self.columns {
            let width = column.key_type.width();
            let ord = compare_column(
                column.key_type,
                &a[offset..offset + width],
                &b[offset..offset + width],
            );
            if ord != Ordering::Equal {
                return ord;
            }
            offset += width;
        }
        Ordering::Equal
    }

    fn format_key(&self, key: &[u8]) -> String {
        match self.deserialize(key) {
            Ok(values) => values
                .iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(","),
            Err(_) => format!("<{} bytes>", key.len()),
        }
    }
}
