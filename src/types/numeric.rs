use bytes::{Buf, BufMut};

use crate::{
    encode::{Encode, Encoded},
    ext::UsizeExt,
    postgres::{Oid, PgType},
    row::{Column, Decode, DecodeError},
};

/// Wire representation of the postgres `numeric` type.
///
/// The value is a sequence of base-10000 digit groups:
///
/// ```text
/// ndigits (u16) | weight (i16) | sign (u16) | dscale (u16) | digits (u16 * ndigits)
/// ```
///
/// `weight` is the base-10000 exponent of the first digit group, `dscale`
/// the number of decimal digits shown after the point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgNumeric {
    pub weight: i16,
    pub sign: PgNumericSign,
    pub scale: u16,
    /// Base-10000 digit groups, most significant first. Each is in `0..10000`.
    pub digits: Vec<i16>,
}

/// Sign word of a [`PgNumeric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PgNumericSign {
    Positive,
    Negative,
    NaN,
}

impl PgNumericSign {
    const POSITIVE: u16 = 0x0000;
    const NEGATIVE: u16 = 0x4000;
    const NAN: u16 = 0xC000;

    fn word(self) -> u16 {
        match self {
            Self::Positive => Self::POSITIVE,
            Self::Negative => Self::NEGATIVE,
            Self::NaN => Self::NAN,
        }
    }
}

impl PgType for PgNumeric {
    /// numeric
    const OID: Oid = 1700;
}

impl Decode for PgNumeric {
    fn decode(column: Column) -> Result<Self, DecodeError> {
        if column.oid() != Self::OID {
            return Err(DecodeError::OidMissmatch);
        }
        let mut value = column.into_value()?;
        if value.remaining() < 8 {
            return Err(DecodeError::Truncated);
        }

        let ndigits = value.get_u16() as usize;
        let weight = value.get_i16();
        let sign = match value.get_u16() {
            PgNumericSign::POSITIVE => PgNumericSign::Positive,
            PgNumericSign::NEGATIVE => PgNumericSign::Negative,
            PgNumericSign::NAN => PgNumericSign::NaN,
            _ => return Err(DecodeError::OutOfRange),
        };
        let scale = value.get_u16();

        if value.remaining() < ndigits * 2 {
            return Err(DecodeError::Truncated);
        }
        let mut digits = Vec::with_capacity(ndigits);
        for _ in 0..ndigits {
            digits.push(value.get_i16());
        }

        Ok(Self { weight, sign, scale, digits })
    }
}

impl Encode<'static> for PgNumeric {
    fn encode(self) -> Encoded<'static> {
        let mut buf = Vec::with_capacity(8 + self.digits.len() * 2);
        buf.put_u16(self.digits.len().to_u16());
        buf.put_i16(self.weight);
        buf.put_u16(self.sign.word());
        buf.put_u16(self.scale);
        for digit in self.digits {
            buf.put_i16(digit);
        }
        Encoded::owned(buf, Self::OID)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::test::column;

    #[test]
    fn numeric_roundtrip() {
        // 123.45 = [1, 2345] at weight 0, scale 2
        let numeric = PgNumeric {
            weight: 0,
            sign: PgNumericSign::Negative,
            scale: 2,
            digits: vec![1, 2345],
        };

        let encoded = numeric.clone().encode();
        assert_eq!(encoded.oid(), 1700);
        assert_eq!(
            encoded.as_slice(),
            &[0, 2, 0, 0, 0x40, 0, 0, 2, 0, 1, 0x09, 0x29],
        );

        let decoded = PgNumeric::decode(column(1700, Some(encoded.as_slice()))).unwrap();
        assert_eq!(decoded, numeric);
    }

    #[test]
    fn nan_header() {
        let nan = PgNumeric { weight: 0, sign: PgNumericSign::NaN, scale: 0, digits: vec![] };
        let encoded = nan.clone().encode();
        assert_eq!(encoded.as_slice(), &[0, 0, 0, 0, 0xC0, 0, 0, 0]);

        let decoded = PgNumeric::decode(column(1700, Some(encoded.as_slice()))).unwrap();
        assert_eq!(decoded, nan);
    }

    #[test]
    fn bad_sign_word() {
        let err = PgNumeric::decode(column(1700, Some(&[0, 0, 0, 0, 0x80, 0, 0, 0]))).unwrap_err();
        assert!(matches!(err, DecodeError::OutOfRange));
    }
}
