
/// Postgres object identifier.
pub type Oid = u32;

/// A rust type with a corresponding postgres data type.
pub trait PgType {
    const OID: Oid;
}

impl PgType for () {
    const OID: Oid = 0;
}

impl PgType for bool {
    /// boolean
    const OID: Oid = 16;
}

impl PgType for i8 {
    /// "char", single byte internal type
    const OID: Oid = 18;
}

impl PgType for i16 {
    /// int2
    const OID: Oid = 21;
}

impl PgType for i32 {
    /// int4
    const OID: Oid = 23;
}

impl PgType for i64 {
    /// int8
    const OID: Oid = 20;
}

impl PgType for f32 {
    /// float4
    const OID: Oid = 700;
}

impl PgType for f64 {
    /// float8
    const OID: Oid = 701;
}

impl PgType for str {
    /// text
    const OID: Oid = 25;
}

impl PgType for String {
    /// text
    const OID: Oid = 25;
}

impl PgType for [u8] {
    /// bytea
    const OID: Oid = 17;
}

impl PgType for Vec<u8> {
    /// bytea
    const OID: Oid = 17;
}

impl PgType for bytes::Bytes {
    /// bytea
    const OID: Oid = 17;
}
