use time::{Date, Duration, PrimitiveDateTime, UtcDateTime, macros::{datetime, utc_datetime}};

use crate::{
    encode::{Encode, Encoded},
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError},
};

// Binary temporal values count from the postgres epoch, not the unix one.
const PG_EPOCH_DATE: Date = time::macros::date!(2000-01-01);
const PG_EPOCH_DATETIME: PrimitiveDateTime = datetime!(2000-01-01 0:00);
const PG_EPOCH_UTC: UtcDateTime = utc_datetime!(2000-01-01 0:00);

impl PgType for Date {
    /// date
    const OID: Oid = 1082;
}

impl PgType for PrimitiveDateTime {
    /// timestamp without time zone
    const OID: Oid = 1114;
}

impl PgType for UtcDateTime {
    /// timestamp with time zone
    const OID: Oid = 1184;
}

impl Decode for Date {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let days: i32 = decode_be(column, Self::OID)?;
        PG_EPOCH_DATE
            .checked_add(Duration::days(days as i64))
            .ok_or(DecodeError::OutOfRange)
    }
}

impl Decode for PrimitiveDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let micros: i64 = decode_be(column, Self::OID)?;
        PG_EPOCH_DATETIME
            .checked_add(Duration::microseconds(micros))
            .ok_or(DecodeError::OutOfRange)
    }
}

impl Decode for UtcDateTime {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        let micros: i64 = decode_be(column, Self::OID)?;
        PG_EPOCH_UTC
            .checked_add(Duration::microseconds(micros))
            .ok_or(DecodeError::OutOfRange)
    }
}

impl Encode<'static> for Date {
    fn encode(self) -> Encoded<'static> {
        let days = (self - PG_EPOCH_DATE).whole_days() as i32;
        Encoded::inline(&days.to_be_bytes(), Self::OID)
    }
}

impl Encode<'static> for PrimitiveDateTime {
    fn encode(self) -> Encoded<'static> {
        let micros = (self - PG_EPOCH_DATETIME).whole_microseconds() as i64;
        Encoded::inline(&micros.to_be_bytes(), Self::OID)
    }
}

impl Encode<'static> for UtcDateTime {
    fn encode(self) -> Encoded<'static> {
        let micros = (self - PG_EPOCH_UTC).whole_microseconds() as i64;
        Encoded::inline(&micros.to_be_bytes(), Self::OID)
    }
}

/// Shared fixed-width big endian read with oid check.
fn decode_be<T, const N: usize>(column: Column, oid: Oid) -> Result<T, DecodeError>
where
    T: FromBeBytes<N>,
{
    if column.oid() != oid {
        return Err(DecodeError::OidMissmatch);
    }
    let value = column.into_value()?;
    let Ok(be) = <[u8; N]>::try_from(&value[..]) else {
        return Err(DecodeError::Truncated);
    };
    Ok(T::from_be_bytes(be))
}

trait FromBeBytes<const N: usize>: Sized {
    fn from_be_bytes(be: [u8; N]) -> Self;
}

impl FromBeBytes<4> for i32 {
    fn from_be_bytes(be: [u8; 4]) -> Self {
        i32::from_be_bytes(be)
    }
}

impl FromBeBytes<8> for i64 {
    fn from_be_bytes(be: [u8; 8]) -> Self {
        i64::from_be_bytes(be)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::column;

    #[test]
    fn date_offsets() {
        assert_eq!(PG_EPOCH_DATE.encode().as_slice(), &0i32.to_be_bytes());
        assert_eq!(
            time::macros::date!(2000-01-02).encode().as_slice(),
            &1i32.to_be_bytes(),
        );
        assert_eq!(
            time::macros::date!(1999-12-31).encode().as_slice(),
            &(-1i32).to_be_bytes(),
        );

        let d = Date::decode(column(1082, Some(&31i32.to_be_bytes()))).unwrap();
        assert_eq!(d, time::macros::date!(2000-02-01));
    }

    #[test]
    fn timestamp_microseconds() {
        let ts = datetime!(2000-01-01 0:00:01.5);
        assert_eq!(ts.encode().as_slice(), &1_500_000i64.to_be_bytes());

        let decoded =
            PrimitiveDateTime::decode(column(1114, Some(&1_500_000i64.to_be_bytes()))).unwrap();
        assert_eq!(decoded, ts);
    }

    #[test]
    fn timestamptz_microseconds() {
        let ts = utc_datetime!(1999-12-31 23:59:59);
        assert_eq!(ts.encode().as_slice(), &(-1_000_000i64).to_be_bytes());

        let decoded =
            UtcDateTime::decode(column(1184, Some(&(-1_000_000i64).to_be_bytes()))).unwrap();
        assert_eq!(decoded, ts);
    }
}
