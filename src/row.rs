//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`ColumnInfo`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
use bytes::{Buf, Bytes};
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error, sync::Arc};

use crate::{
    common::ByteStr,
    ext::BytesExt,
    postgres::{
        Oid, ProtocolError,
        backend::{DataRow, RowDescription},
    },
};

/// Descriptor of a single field within a [`RowDescription`] message.
#[derive(Debug)]
pub struct ColumnInfo {
    /// The field name.
    pub field_name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero
    pub table_oid: u32,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub attribute_len: u16,
    /// The object ID of the field's data type.
    pub data_type: Oid,
    /// The data type size (see pg_type.typlen).
    /// Note that negative values denote variable-width types.
    pub data_type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod).
    /// The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field.
    /// Currently will be zero (text) or one (binary).
    /// In a RowDescription returned from the statement variant of Describe,
    /// the format code is not yet known and will always be zero.
    pub format_code: u16,
}

impl ColumnInfo {
    fn decode(body: &mut Bytes) -> Result<Self, ProtocolError> {
        let field_name = body.get_nul_bytestr()?;
        if body.remaining() < 18 {
            return Err(ProtocolError::Truncated);
        }
        Ok(Self {
            field_name,
            table_oid: body.get_u32(),
            attribute_len: body.get_u16(),
            data_type: body.get_u32(),
            data_type_size: body.get_i16(),
            type_modifier: body.get_i32(),
            format_code: body.get_u16(),
        })
    }
}

/// Decode all field descriptors of a [`RowDescription`].
pub fn decode_columns(rd: &RowDescription) -> Result<Vec<ColumnInfo>, ProtocolError> {
    let mut body = rd.body.clone();
    let mut cols = Vec::with_capacity(rd.field_len as usize);
    for _ in 0..rd.field_len {
        cols.push(ColumnInfo::decode(&mut body)?);
    }
    Ok(cols)
}

/// A single decoded row, pairing a [`DataRow`] body with its descriptors.
#[derive(Debug)]
pub struct Row {
    cols: Arc<[ColumnInfo]>,
    values: Vec<Option<Bytes>>,
}

impl Row {
    /// Split the column values of `dr` against the given descriptors.
    pub fn new(cols: Arc<[ColumnInfo]>, mut dr: DataRow) -> Result<Self, ProtocolError> {
        if usize::from(dr.column_len) != cols.len() {
            return Err(ProtocolError::unexpected_phase(DataRow::MSGTYPE, "row description missmatch"));
        }

        let mut values = Vec::with_capacity(cols.len());
        for _ in 0..dr.column_len {
            if dr.body.remaining() < 4 {
                return Err(ProtocolError::Truncated);
            }
            let len = dr.body.get_i32();
            // -1 indicates a NULL column value, no value bytes follow
            if len == -1 {
                values.push(None);
                continue;
            }
            if dr.body.remaining() < len as usize {
                return Err(ProtocolError::Truncated);
            }
            values.push(Some(dr.body.split_to(len as usize)));
        }

        Ok(Self { cols, values })
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Returns the number of columns in the row.
    pub fn len(&self) -> usize {
        self.cols.len()
    }

    /// Try get and decode column by index or name.
    pub fn try_get<I: Index, D: Decode>(&self, idx: I) -> Result<D, DecodeError> {
        let Some(at) = idx.position(&self.cols) else {
            return Err(DecodeError::ColumnNotFound(idx.name()));
        };
        D::decode(Column::new(&self.cols[at], self.values[at].clone()))
    }
}

/// Postgres column.
#[derive(Debug)]
pub struct Column {
    oid: Oid,
    name: ByteStr,
    value: Option<Bytes>,
}

impl Column {
    pub(crate) fn new(info: &ColumnInfo, value: Option<Bytes>) -> Self {
        Self {
            oid: info.data_type,
            name: info.field_name.clone(),
            value,
        }
    }

    /// Returns column [`Oid`].
    pub const fn oid(&self) -> Oid {
        self.oid
    }

    /// Returns column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when the value is sql `NULL`.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Extract the inner bytes as slice, empty for `NULL`.
    pub fn as_slice(&self) -> &[u8] {
        self.value.as_deref().unwrap_or_default()
    }

    /// Consume self into the inner [`Bytes`].
    ///
    /// Returns [`DecodeError::UnexpectedNull`] for sql `NULL`.
    pub fn into_value(self) -> Result<Bytes, DecodeError> {
        self.value.ok_or(DecodeError::UnexpectedNull)
    }

    /// Decode value from self.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be constructed from a binary [`Column`] value.
pub trait Decode: Sized {
    fn decode(column: Column) -> Result<Self, DecodeError>;
}

impl Decode for Column {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        Ok(column)
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        match column.is_null() {
            true => Ok(None),
            false => T::decode(column).map(Some),
        }
    }
}

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    fn position(&self, cols: &[ColumnInfo]) -> Option<usize>;

    fn name(self) -> Cow<'static, str>;
}

impl Index for usize {
    fn position(&self, cols: &[ColumnInfo]) -> Option<usize> {
        cols.get(*self).is_some().then_some(*self)
    }

    fn name(self) -> Cow<'static, str> {
        String::from(itoa::Buffer::new().format(self)).into()
    }
}

impl Index for &str {
    fn position(&self, cols: &[ColumnInfo]) -> Option<usize> {
        cols.iter().position(|e| e.field_name == *self)
    }

    fn name(self) -> Cow<'static, str> {
        String::from(self).into()
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static, str>),
    /// Oid requested missmatch.
    OidMissmatch,
    /// Sql `NULL` decoded into a non `Option` type.
    UnexpectedNull,
    /// Value bytes shorter than the type requires.
    Truncated,
    /// Value bytes outside the domain of the requested type.
    OutOfRange,
    #[cfg(feature = "json")]
    Json(serde_json::Error),
    #[cfg(feature = "uuid")]
    Uuid(uuid::Error),
}

impl std::error::Error for DecodeError { }

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Failed to decode value, ")?;
        match self {
            DecodeError::Utf8(e) => write!(f, "{e}"),
            DecodeError::ColumnNotFound(name) => write!(f, "column not found: {name}"),
            DecodeError::OidMissmatch => write!(f, "data type missmatch"),
            DecodeError::UnexpectedNull => write!(f, "unexpected null"),
            DecodeError::Truncated => write!(f, "value too short"),
            DecodeError::OutOfRange => write!(f, "value out of range"),
            #[cfg(feature = "json")]
            DecodeError::Json(e) => write!(f, "{e}"),
            #[cfg(feature = "uuid")]
            DecodeError::Uuid(e) => write!(f, "{e}"),
        }
    }
}

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));

#[cfg(feature = "json")]
from!(<serde_json::Error>e => Self::Json(e));
#[cfg(feature = "uuid")]
from!(<uuid::Error>e => Self::Uuid(e));

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::backend::BackendProtocol;
    use bytes::BufMut;

    fn row_description(fields: &[(&str, Oid)]) -> RowDescription {
        let mut buf = Vec::new();
        buf.put_u16(fields.len() as u16);
        for (name, oid) in fields {
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
            buf.put_u32(0);
            buf.put_u16(0);
            buf.put_u32(*oid);
            buf.put_i16(-1);
            buf.put_i32(-1);
            buf.put_u16(1);
        }
        RowDescription::decode(b'T', buf.into()).unwrap()
    }

    fn data_row(values: &[Option<&[u8]>]) -> DataRow {
        let mut buf = Vec::new();
        buf.put_u16(values.len() as u16);
        for value in values {
            match value {
                Some(v) => {
                    buf.put_i32(v.len() as i32);
                    buf.extend_from_slice(v);
                }
                None => buf.put_i32(-1),
            }
        }
        DataRow::decode(b'D', buf.into()).unwrap()
    }

    #[test]
    fn decode_by_index_and_name() {
        let rd = row_description(&[("id", 23), ("name", 25)]);
        let cols: Arc<[ColumnInfo]> = decode_columns(&rd).unwrap().into();

        let row = Row::new(cols, data_row(&[Some(&7i32.to_be_bytes()), Some(b"foo")])).unwrap();

        let id: i32 = row.try_get(0).unwrap();
        let name: String = row.try_get("name").unwrap();
        assert_eq!(id, 7);
        assert_eq!(name, "foo");
    }

    #[test]
    fn null_column() {
        let rd = row_description(&[("id", 23)]);
        let cols: Arc<[ColumnInfo]> = decode_columns(&rd).unwrap().into();
        let row = Row::new(cols, data_row(&[None])).unwrap();

        let id: Option<i32> = row.try_get(0).unwrap();
        assert_eq!(id, None);

        let err = row.try_get::<_, i32>(0).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedNull));
    }

    #[test]
    fn column_count_missmatch() {
        let rd = row_description(&[("id", 23)]);
        let cols: Arc<[ColumnInfo]> = decode_columns(&rd).unwrap().into();
        assert!(Row::new(cols, data_row(&[None, None])).is_err());
    }

    #[test]
    fn missing_column() {
        let rd = row_description(&[("id", 23)]);
        let cols: Arc<[ColumnInfo]> = decode_columns(&rd).unwrap().into();
        let row = Row::new(cols, data_row(&[Some(&1i32.to_be_bytes())])).unwrap();

        let err = row.try_get::<_, i32>("nope").unwrap_err();
        assert!(matches!(err, DecodeError::ColumnNotFound(_)));
    }
}
