use bytes::Buf;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    encode::{Encode, Encoded},
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError},
};

/// json, transmitted as the raw utf8 text
const JSON: Oid = 114;

/// Decode and Encode postgres json value.
///
/// Decoding accepts both `json` and `jsonb` columns. Encoding always
/// produces `jsonb`, which carries a leading version byte on the wire.
///
/// # Panics
///
/// Note that when performing [`Encode`], if [`Serialize`] implementation decide
/// to fail, it will panics.
#[derive(Debug)]
pub struct Json<T>(pub T);

impl<T> PgType for Json<T> {
    /// jsonb, Binary JSON
    const OID: Oid = 3802;
}

impl<T> Decode for Json<T>
where
    T: DeserializeOwned,
{
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let oid = column.oid();
        let mut value = column.into_value()?;
        match oid {
            JSON => {}
            Self::OID => {
                // jsonb leads with its storage version
                if value.first() != Some(&1) {
                    return Err(DecodeError::OutOfRange);
                }
                value.advance(1);
            }
            _ => return Err(DecodeError::OidMissmatch),
        }
        Ok(Self(serde_json::from_slice(&value)?))
    }
}

impl<T: Serialize> Encode<'static> for Json<T> {
    fn encode(self) -> Encoded<'static> {
        let mut buf = vec![1u8];
        serde_json::to_writer(&mut buf, &self.0).unwrap();
        Encoded::owned(buf, Self::OID)
    }
}

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::column;

    #[test]
    fn jsonb_version_byte() {
        let encoded = Json(vec![1, 2, 3]).encode();
        assert_eq!(encoded.as_slice(), b"\x01[1,2,3]");

        let Json(back): Json<Vec<i32>> =
            Json::decode(column(3802, Some(encoded.as_slice()))).unwrap();
        assert_eq!(back, [1, 2, 3]);
    }

    #[test]
    fn plain_json_is_raw_text() {
        let Json(back): Json<Vec<i32>> = Json::decode(column(114, Some(b"[4,5]"))).unwrap();
        assert_eq!(back, [4, 5]);
    }

    #[test]
    fn unknown_jsonb_version() {
        let err = Json::<Vec<i32>>::decode(column(3802, Some(b"\x02[]"))).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange));
    }
}
