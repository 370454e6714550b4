//! Typed values and the binary codec shared by table files, heap pages, and
//! the WAL. All numeric fields are little-endian.
//!
//! Table file header:
//!
//!   magic:     5 bytes "GODB1"
//!   numCols:   u16
//!   per column:
//!     nameLen: u16
//!     name:    nameLen bytes (UTF-8)
//!     type:    u8
//!
//! Value encoding: one type tag byte, then the payload:
//!
//!   Int:    i64
//!   Float:  f64 (IEEE-754 bits)
//!   String: u32 length + bytes
//!   Bool:   1 byte (0 or 1)
//!   Null:   no payload
//!
//! A row is the column-ordered concatenation of its values; decoding needs
//! the column count supplied by the caller.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

use crate::error::{Result, StorageError};

pub const TABLE_MAGIC: &[u8; 5] = b"GODB1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Float,
    String,
    Bool,
    Null,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        match self {
            DataType::Int => 0,
            DataType::Float => 1,
            DataType::String => 2,
            DataType::Bool => 3,
            DataType::Null => 4,
        }
    }

    pub fn from_u8(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(DataType::Int),
            1 => Ok(DataType::Float),
            2 => Ok(DataType::String),
            3 => Ok(DataType::Bool),
            4 => Ok(DataType::Null),
            other => Err(StorageError::corruption(format!(
                "unknown value type tag {other}"
            ))),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int => "INT",
            DataType::Float => "FLOAT",
            DataType::String => "STRING",
            DataType::Bool => "BOOL",
            DataType::Null => "NULL",
        };
        write!(f, "{name}")
    }
}

/// One cell of a row. The tag always matches one `DataType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int(_) => DataType::Int,
            Value::Float(_) => DataType::Float,
            Value::String(_) => DataType::String,
            Value::Bool(_) => DataType::Bool,
            Value::Null => DataType::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encoded size in bytes, tag included.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Value::Int(_) => 8,
            Value::Float(_) => 8,
            Value::String(s) => 4 + s.len(),
            Value::Bool(_) => 1,
            Value::Null => 0,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.put_u8(self.data_type().as_u8());
        match self {
            Value::Int(v) => buf.put_i64_le(*v),
            Value::Float(v) => buf.put_f64_le(*v),
            Value::String(s) => {
                buf.put_u32_le(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Value::Bool(b) => buf.put_u8(u8::from(*b)),
            Value::Null => {}
        }
    }

    pub fn decode(buf: &mut &[u8]) -> Result<Value> {
        need(buf, 1, "value tag")?;
        let ty = DataType::from_u8(buf.get_u8())?;
        match ty {
            DataType::Int => {
                need(buf, 8, "int payload")?;
                Ok(Value::Int(buf.get_i64_le()))
            }
            DataType::Float => {
                need(buf, 8, "float payload")?;
                Ok(Value::Float(buf.get_f64_le()))
            }
            DataType::String => {
                need(buf, 4, "string length")?;
                let len = buf.get_u32_le() as usize;
                if buf.remaining() < len {
                    return Err(StorageError::corruption(
                        "string length exceeds buffer",
                    ));
                }
                let mut bytes = vec![0u8; len];
                buf.copy_to_slice(&mut bytes);
                let s = String::from_utf8(bytes).map_err(|_| {
                    StorageError::corruption("string payload is not valid UTF-8")
                })?;
                Ok(Value::String(s))
            }
            DataType::Bool => {
                need(buf, 1, "bool payload")?;
                Ok(Value::Bool(buf.get_u8() != 0))
            }
            DataType::Null => Ok(Value::Null),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Null => write!(f, "NULL"),
        }
    }
}

/// One record: a value per column, in schema order.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub ty: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Column {
            name: name.into(),
            ty,
        }
    }
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(StorageError::corruption(format!("truncated row: {what}")));
    }
    Ok(())
}

pub fn encode_row(row: &Row) -> Vec<u8> {
    let mut buf = Vec::with_capacity(row.iter().map(Value::encoded_len).sum());
    for v in row {
        v.encode(&mut buf);
    }
    buf
}

/// Decodes exactly `num_cols` values from `buf`, advancing it. Running out of
/// bytes mid-row is corruption; the caller decides when a stream is cleanly
/// exhausted before asking for another row.
pub fn decode_row(buf: &mut &[u8], num_cols: usize) -> Result<Row> {
    let mut row = Row::with_capacity(num_cols);
    for _ in 0..num_cols {
        row.push(Value::decode(buf)?);
    }
    Ok(row)
}

/// Total size in bytes of the table header for `cols`, used to locate the
/// page region without re-seeking.
pub fn table_header_len(cols: &[Column]) -> u64 {
    let mut len = TABLE_MAGIC.len() as u64 + 2;
    for c in cols {
        len += 2 + c.name.len() as u64 + 1;
    }
    len
}

pub fn write_table_header(w: &mut impl Write, cols: &[Column]) -> Result<()> {
    if cols.len() > usize::from(u16::MAX) {
        return Err(StorageError::SchemaMismatch(format!(
            "too many columns: {}",
            cols.len()
        )));
    }

    let mut buf: Vec<u8> = Vec::with_capacity(table_header_len(cols) as usize);
    buf.put_slice(TABLE_MAGIC);
    buf.put_u16_le(cols.len() as u16);
    for c in cols {
        if c.name.len() > usize::from(u16::MAX) {
            return Err(StorageError::SchemaMismatch(format!(
                "column name too long: {:?}",
                c.name
            )));
        }
        buf.put_u16_le(c.name.len() as u16);
        buf.put_slice(c.name.as_bytes());
        buf.put_u8(c.ty.as_u8());
    }

    w.write_all(&buf)?;
    Ok(())
}

pub fn read_table_header(r: &mut impl Read) -> Result<Vec<Column>> {
    let mut magic = [0u8; 5];
    r.read_exact(&mut magic)?;
    if &magic != TABLE_MAGIC {
        return Err(StorageError::corruption("invalid table file magic"));
    }

    let num_cols = read_u16_le(r)?;
    let mut cols = Vec::with_capacity(num_cols as usize);
    for _ in 0..num_cols {
        let name_len = read_u16_le(r)?;
        let mut name = vec![0u8; name_len as usize];
        r.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| StorageError::corruption("column name is not valid UTF-8"))?;

        let mut ty = [0u8; 1];
        r.read_exact(&mut ty)?;
        cols.push(Column::new(name, DataType::from_u8(ty[0])?));
    }

    Ok(cols)
}

fn read_u16_le(r: &mut impl Read) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn sample_row() -> Row {
        vec![
            Value::Int(-42),
            Value::Float(3.25),
            Value::String("hello".to_string()),
            Value::Bool(true),
            Value::Null,
        ]
    }

    #[test]
    fn row_round_trip_preserves_every_type() {
        let row = sample_row();
        let bytes = encode_row(&row);
        let mut cursor = bytes.as_slice();
        let decoded = decode_row(&mut cursor, row.len()).unwrap();
        assert_eq!(decoded, row);
        assert!(cursor.is_empty());
    }

    #[test]
    fn random_rows_round_trip() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let mut row = Row::new();
            for _ in 0..rng.gen_range(1..8) {
                row.push(match rng.gen_range(0..5) {
                    0 => Value::Int(rng.gen()),
                    1 => Value::Float(rng.gen::<i32>() as f64 / 16.0),
                    2 => {
                        let len = rng.gen_range(0..32);
                        Value::String((0..len).map(|_| rng.gen_range('a'..='z')).collect())
                    }
                    3 => Value::Bool(rng.gen()),
                    _ => Value::Null,
                });
            }
            let bytes = encode_row(&row);
            let decoded = decode_row(&mut bytes.as_slice(), row.len()).unwrap();
            assert_eq!(decoded, row);
        }
    }

    #[test]
    fn truncated_row_is_corruption() {
        let row = vec![Value::Int(1), Value::String("abcdef".to_string())];
        let bytes = encode_row(&row);
        let mut cursor = &bytes[..bytes.len() - 3];
        let err = decode_row(&mut cursor, row.len()).unwrap_err();
        assert!(err.is_corruption(), "unexpected error: {err}");
    }

    #[test]
    fn unknown_type_tag_is_corruption() {
        let bytes = [9u8];
        let err = Value::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn string_length_beyond_buffer_is_corruption() {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.put_u8(DataType::String.as_u8());
        bytes.put_u32_le(1000);
        bytes.put_slice(b"short");
        let err = Value::decode(&mut bytes.as_slice()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn header_round_trip() {
        let cols = vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::String),
            Column::new("active", DataType::Bool),
        ];
        let mut buf = Vec::new();
        write_table_header(&mut buf, &cols).unwrap();
        assert_eq!(buf.len() as u64, table_header_len(&cols));
        assert_eq!(&buf[..5], TABLE_MAGIC);

        let decoded = read_table_header(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, cols);
    }

    #[test]
    fn header_with_bad_magic_is_rejected() {
        let err = read_table_header(&mut &b"NOTDB\x00\x00"[..]).unwrap_err();
        assert!(err.is_corruption());
    }
}
