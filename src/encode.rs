//! Binary encoding of sql parameter values.
use bytes::Bytes;

use crate::{
    ext::UsizeExt,
    postgres::{Oid, PgType},
    value::ValueRef,
};

/// Value that can be encoded to be bound to a sql parameter.
pub trait Encode<'q> {
    fn encode(self) -> Encoded<'q>;
}

/// Postgres encoded parameter value in binary format.
#[derive(Debug)]
pub struct Encoded<'q> {
    value: ValueRef<'q>,
    is_null: bool,
    oid: Oid,
}

impl<'q> Encoded<'q> {
    /// Encoded value backed by owned bytes.
    pub fn owned(value: impl Into<Vec<u8>>, oid: Oid) -> Encoded<'static> {
        Encoded { value: ValueRef::Bytes(Bytes::from(value.into())), is_null: false, oid }
    }

    /// Encoded value borrowing from the caller.
    pub fn slice(value: &'q [u8], oid: Oid) -> Encoded<'q> {
        Encoded { value: ValueRef::Slice(value), is_null: false, oid }
    }

    /// Encoded value small enough to store without indirection.
    pub(crate) fn inline(value: &[u8], oid: Oid) -> Encoded<'static> {
        Encoded { value: ValueRef::inline(value), is_null: false, oid }
    }

    /// The sql `NULL` for given type.
    pub fn null(oid: Oid) -> Encoded<'static> {
        Encoded { value: ValueRef::inline(&[]), is_null: true, oid }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn as_slice(&self) -> &[u8] {
        self.value.as_slice()
    }

    /// The length of the parameter value as the `Bind` message wants it.
    ///
    /// As a special case, -1 indicates a NULL parameter value.
    /// No value bytes follow in the NULL case.
    pub(crate) fn size(&self) -> i32 {
        match self.is_null {
            true => -1,
            false => self.value.len().to_u32() as i32,
        }
    }
}

macro_rules! encode_inline {
    ($($ty:ty),*) => {$(
        impl Encode<'static> for $ty {
            fn encode(self) -> Encoded<'static> {
                Encoded::inline(&self.to_be_bytes(), Self::OID)
            }
        }
    )*};
}

encode_inline!(i16, i32, i64, f32, f64);

impl Encode<'static> for bool {
    fn encode(self) -> Encoded<'static> {
        Encoded::inline(&[self as u8], Self::OID)
    }
}

impl Encode<'static> for i8 {
    fn encode(self) -> Encoded<'static> {
        Encoded::inline(&[self as u8], Self::OID)
    }
}

impl<'a> Encode<'a> for &'a str {
    fn encode(self) -> Encoded<'a> {
        Encoded::slice(self.as_bytes(), str::OID)
    }
}

impl Encode<'static> for String {
    fn encode(self) -> Encoded<'static> {
        Encoded::owned(self.into_bytes(), Self::OID)
    }
}

impl<'a> Encode<'a> for &'a [u8] {
    fn encode(self) -> Encoded<'a> {
        Encoded::slice(self, <[u8]>::OID)
    }
}

impl Encode<'static> for Vec<u8> {
    fn encode(self) -> Encoded<'static> {
        Encoded::owned(self, Self::OID)
    }
}

impl<'q, T: Encode<'q> + PgType> Encode<'q> for Option<T> {
    fn encode(self) -> Encoded<'q> {
        match self {
            Some(value) => value.encode(),
            None => Encoded::null(T::OID),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn integer_big_endian() {
        let enc = 0x0102_0304_i32.encode();
        assert_eq!(enc.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(enc.size(), 4);
        assert_eq!(enc.oid(), 23);
    }

    #[test]
    fn bool_single_byte() {
        assert_eq!(true.encode().as_slice(), &[1]);
        assert_eq!(false.encode().as_slice(), &[0]);
    }

    #[test]
    fn null_has_negative_size() {
        let enc = Option::<i64>::None.encode();
        assert!(enc.is_null());
        assert_eq!(enc.size(), -1);
        assert_eq!(enc.oid(), 20);
    }
}
