//! Line-protocol encoding.
//!
//! `measurement,tag=value,... field=value,... <unix_ns>`. String fields are
//! quoted, booleans and numerics bare; decimals that happen to be
//! integer-valued keep their plain rendering (the trailing-`.0` rule is a
//! book-checksum concern, not a telemetry one).

use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub enum FieldValue {
    U64(u64),
    I64(i64),
    F64(f64),
    Bool(bool),
    Str(String),
    Decimal(Decimal),
}

#[derive(Debug, Clone)]
pub struct Measurement {
    pub name: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
}

impl Measurement {
    /// Encode one line. Returns `None` for a field-less measurement, which
    /// the protocol does not admit.
    pub fn encode(&self, timestamp_ns: i64, out: &mut String) -> bool {
        use std::fmt::Write;

        if self.fields.is_empty() {
            return false;
        }

        out.push_str(&self.name);
        for (key, value) in &self.tags {
            let _ = write!(out, ",{}={}", key, value);
        }

        for (index, (key, value)) in self.fields.iter().enumerate() {
            out.push(if index == 0 { ' ' } else { ',' });
            out.push_str(key);
            out.push('=');
            match value {
                FieldValue::U64(v) => {
                    let _ = write!(out, "{}", v);
                }
                FieldValue::I64(v) => {
                    let _ = write!(out, "{}", v);
                }
                FieldValue::F64(v) => {
                    let _ = write!(out, "{}", v);
                }
                FieldValue::Bool(v) => {
                    let _ = write!(out, "{}", v);
                }
                FieldValue::Str(v) => {
                    let _ = write!(out, "\"{}\"", v);
                }
                FieldValue::Decimal(v) => {
                    let _ = write!(out, "{}", v.normalize());
                }
            }
        }

        let _ = write!(out, " {}", timestamp_ns);
        true
    }
}
