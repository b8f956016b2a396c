use uuid::Uuid;

use crate::{
    encode::{Encode, Encoded},
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError},
};

impl PgType for Uuid {
    /// uuid
    const OID: Oid = 2950;
}

impl Decode for Uuid {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        // 16 bytes in network order
        Ok(Uuid::from_slice(&column.into_value()?)?)
    }
}

impl Encode<'static> for Uuid {
    fn encode(self) -> Encoded<'static> {
        Encoded::inline(self.as_bytes(), Self::OID)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::column;

    #[test]
    fn uuid_network_order() {
        let id = Uuid::from_u128(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        let encoded = id.encode();
        assert_eq!(
            encoded.as_slice(),
            &[0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
              0x88, 0x99, 0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff],
        );

        let back = Uuid::decode(column(2950, Some(encoded.as_slice()))).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn short_uuid_is_rejected() {
        assert!(Uuid::decode(column(2950, Some(&[0; 4]))).is_err());
    }
}
