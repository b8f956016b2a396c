//! Binary value codecs for std and external types.
//!
//! Implementation of [`Decode`][d] and [`Encode`][e] for:
//!
//! - std integers, floats, [`bool`], [`String`] and byte containers
//! - [`PgNumeric`] and [`PgInterval`] wire representations
//! - [`serde`]'s [`Deserialize`][sd] and [`Serialize`][ss] via [`Json`], requires `json` feature
//! - [`time`][::time]'s [`Date`][td], [`PrimitiveDateTime`][tp] and [`UtcDateTime`][tu], requires `time` feature
//! - [`uuid`]'s [`Uuid`][uu], requires `uuid` feature
//!
//! All codecs read and write the postgres *binary* format: integers and
//! floats in network byte order, the rest per-type as the backend send
//! functions define them.
//!
//! [d]: crate::Decode
//! [e]: crate::Encode
//! [sd]: serde::Deserialize
//! [ss]: serde::Serialize
//! [td]: ::time::Date
//! [tp]: ::time::PrimitiveDateTime
//! [tu]: ::time::UtcDateTime
//! [uu]: ::uuid::Uuid

mod numeric;
pub use numeric::{PgNumeric, PgNumericSign};

mod interval;
pub use interval::PgInterval;

#[cfg(feature = "json")]
mod json;
#[cfg(feature = "json")]
pub use json::Json;

#[cfg(feature = "time")]
mod time;

#[cfg(feature = "uuid")]
mod uuid;

use crate::{
    postgres::PgType,
    row::{Column, Decode, DecodeError},
};

macro_rules! decode_be {
    ($($ty:ty),*) => {$(
        impl Decode for $ty {
            fn decode(column: Column) -> Result<Self, DecodeError> {
                if column.oid() != Self::OID {
                    return Err(DecodeError::OidMissmatch);
                }
                let value = column.into_value()?;
                let Ok(be) = <[u8; size_of::<$ty>()]>::try_from(&value[..]) else {
                    return Err(DecodeError::Truncated);
                };
                Ok(<$ty>::from_be_bytes(be))
            }
        }
    )*};
}

decode_be!(i16, i32, i64, f32, f64);

impl Decode for bool {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        match column.into_value()?.first() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(DecodeError::OutOfRange),
        }
    }
}

impl Decode for i8 {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        match column.into_value()?.first() {
            Some(b) => Ok(*b as i8),
            None => Err(DecodeError::Truncated),
        }
    }
}

/// text, varchar and bpchar all transmit raw utf8
const TEXT_OIDS: &[crate::postgres::Oid] = &[25, 1042, 1043];

impl Decode for String {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if !TEXT_OIDS.contains(&column.oid()) {
            return Err(DecodeError::OidMissmatch);
        }
        Ok(String::from_utf8(column.into_value()?.into())?)
    }
}

impl Decode for Vec<u8> {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        Ok(column.into_value()?.into())
    }
}

impl Decode for bytes::Bytes {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        column.into_value()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::row::ColumnInfo;
    use bytes::Bytes;

    pub(super) fn column(oid: crate::postgres::Oid, value: Option<&[u8]>) -> Column {
        let info = ColumnInfo {
            field_name: "c".into(),
            table_oid: 0,
            attribute_len: 0,
            data_type: oid,
            data_type_size: -1,
            type_modifier: -1,
            format_code: 1,
        };
        Column::new(&info, value.map(Bytes::copy_from_slice))
    }

    #[test]
    fn int_value() {
        let v: i64 = i64::decode(column(20, Some(&(-2i64).to_be_bytes()))).unwrap();
        assert_eq!(v, -2);
    }

    #[test]
    fn oid_missmatch() {
        let err = i32::decode(column(20, Some(&7i32.to_be_bytes()))).unwrap_err();
        assert!(matches!(err, DecodeError::OidMissmatch));
    }

    #[test]
    fn short_value() {
        let err = i32::decode(column(23, Some(&[1, 2]))).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[test]
    fn bool_value() {
        assert!(bool::decode(column(16, Some(&[1]))).unwrap());
        assert!(!bool::decode(column(16, Some(&[0]))).unwrap());
        assert!(bool::decode(column(16, Some(&[2]))).is_err());
    }

    #[test]
    fn text_value() {
        let v = String::decode(column(25, Some(b"hello"))).unwrap();
        assert_eq!(v, "hello");
        // varchar shares the representation
        let v = String::decode(column(1043, Some(b"world"))).unwrap();
        assert_eq!(v, "world");
    }

    #[test]
    fn bytea_value() {
        let v = Vec::<u8>::decode(column(17, Some(&[0xde, 0xad]))).unwrap();
        assert_eq!(v, [0xde, 0xad]);
    }
}
