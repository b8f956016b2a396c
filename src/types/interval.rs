use bytes::{Buf, BufMut};

use crate::{
    encode::{Encode, Encoded},
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError},
};

/// Wire representation of the postgres `interval` type.
///
/// Months and days are carried separately from the microsecond part because
/// their length in absolute time depends on the date they are applied to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PgInterval {
    pub microseconds: i64,
    pub days: i32,
    pub months: i32,
}

impl PgType for PgInterval {
    /// interval
    const OID: Oid = 1186;
}

impl Decode for PgInterval {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        let mut value = column.into_value()?;
        if value.remaining() < 16 {
            return Err(DecodeError::Truncated);
        }
        Ok(Self {
            microseconds: value.get_i64(),
            days: value.get_i32(),
            months: value.get_i32(),
        })
    }
}

impl Encode<'static> for PgInterval {
    fn encode(self) -> Encoded<'static> {
        let mut buf = [0u8; 16];
        {
            let mut slot = &mut buf[..];
            slot.put_i64(self.microseconds);
            slot.put_i32(self.days);
            slot.put_i32(self.months);
        }
        Encoded::inline(&buf, Self::OID)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::column;

    #[test]
    fn interval_layout() {
        let interval = PgInterval { microseconds: 1_500_000, days: 2, months: -1 };
        let encoded = interval.encode();

        let mut expect = Vec::new();
        expect.put_i64(1_500_000);
        expect.put_i32(2);
        expect.put_i32(-1);
        assert_eq!(encoded.as_slice(), &expect[..]);

        let decoded = PgInterval::decode(column(1186, Some(encoded.as_slice()))).unwrap();
        assert_eq!(decoded, interval);
    }
}
