//! Dynamically typed bind/result values.
//!
//! Every user-supplied value reaches the database as a [`Value`] bound to a
//! placeholder; values are never spliced into SQL text.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

/// A single bind parameter or result cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", from = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view; numeric text is parsed, floats are truncated.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) => Some(*f as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Float view; numeric text (e.g. a DECIMAL aggregate) is parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(j) => write!(f, "{j}"),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Bytes(b) => serde_json::Value::from(b),
            Value::Json(j) => j,
            Value::Timestamp(ts) => serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
        }
    }
}

// Bytes and timestamps come back as JSON arrays / text.
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Json(other),
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Value {
                fn from(v: $t) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v.naive_utc())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Conversion from a result cell into a Rust type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, String>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_i64()
            .ok_or_else(|| format!("expected integer, got {value:?}"))
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, String> {
        let v = i64::from_value(value)?;
        i32::try_from(v).map_err(|e| e.to_string())
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_f64()
            .ok_or_else(|| format!("expected number, got {value:?}"))
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, String> {
        value
            .as_bool()
            .ok_or_else(|| format!("expected boolean, got {value:?}"))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Err("expected text, got NULL".to_string()),
            Value::Text(s) => Ok(s.clone()),
            other => Ok(other.to_string()),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Text(s) => NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
                .map_err(|e| e.to_string()),
            other => Err(format!("expected timestamp, got {other:?}")),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self, String> {
        Ok(value.clone().into())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

fn is_integer_type(ty: &Type) -> bool {
    *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8
}

fn is_text_type(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME || *ty == Type::UNKNOWN
}

fn mismatch(what: &str, ty: &Type) -> BoxError {
    format!("cannot bind {what} to a parameter of type {ty}; add an explicit cast").into()
}

fn int_to_sql(v: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::INT2 {
        i16::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT4 {
        i32::try_from(v)?.to_sql(ty, out)
    } else if *ty == Type::INT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        (v as f64).to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        numeric_to_sql(&v.to_string(), out)
    } else if *ty == Type::BOOL {
        (v != 0).to_sql(ty, out)
    } else if is_text_type(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("an integer", ty))
    }
}

fn float_to_sql(v: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::FLOAT4 {
        (v as f32).to_sql(ty, out)
    } else if *ty == Type::FLOAT8 {
        v.to_sql(ty, out)
    } else if *ty == Type::NUMERIC {
        if !v.is_finite() {
            return Err(format!("cannot bind {v} to a NUMERIC parameter").into());
        }
        numeric_to_sql(&v.to_string(), out)
    } else if is_text_type(ty) {
        v.to_string().to_sql(ty, out)
    } else {
        Err(mismatch("a float", ty))
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_text_type(ty) || *ty == Type::BYTEA {
        s.to_sql(ty, out)
    } else if is_integer_type(ty) {
        int_to_sql(s.trim().parse::<i64>()?, ty, out)
    } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
        float_to_sql(s.trim().parse::<f64>()?, ty, out)
    } else if *ty == Type::NUMERIC {
        numeric_to_sql(s.trim(), out)
    } else if *ty == Type::BOOL {
        matches!(s.trim(), "1" | "t" | "true" | "TRUE").to_sql(ty, out)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
    } else if *ty == Type::DATE {
        match NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
            Ok(date) => date.to_sql(ty, out),
            Err(_) => timestamp_to_sql(NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)?, ty, out),
        }
    } else if *ty == Type::TIMESTAMP || *ty == Type::TIMESTAMPTZ {
        timestamp_to_sql(NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)?, ty, out)
    } else {
        Err(mismatch("text", ty))
    }
}

fn timestamp_to_sql(ts: NaiveDateTime, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if *ty == Type::TIMESTAMP {
        ts.to_sql(ty, out)
    } else if *ty == Type::TIMESTAMPTZ {
        DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc).to_sql(ty, out)
    } else if *ty == Type::DATE {
        ts.date().to_sql(ty, out)
    } else if is_text_type(ty) {
        ts.format(TIMESTAMP_FORMAT).to_string().to_sql(ty, out)
    } else {
        Err(mismatch("a timestamp", ty))
    }
}

/// Binary NUMERIC from a plain decimal literal such as `-12.050`.
///
/// Layout: ndigits, weight, sign, dscale, then base-10000 digits, all
/// big-endian 16-bit.
fn numeric_to_sql(literal: &str, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let (negative, unsigned) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let is_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty()) || !is_digits(int_part) || !is_digits(frac_part) {
        return Err(format!("invalid NUMERIC literal: {literal:?}").into());
    }
    let dscale = u16::try_from(frac_part.len())?;

    let int_part = int_part.trim_start_matches('0');
    let int_pad = (4 - int_part.len() % 4) % 4;
    let frac_pad = (4 - frac_part.len() % 4) % 4;
    let padded: Vec<u8> = std::iter::repeat_n(b'0', int_pad)
        .chain(int_part.bytes())
        .chain(frac_part.bytes())
        .chain(std::iter::repeat_n(b'0', frac_pad))
        .collect();
    let mut digits: Vec<i16> = padded
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect();
    let mut weight = i16::try_from((int_part.len() + int_pad) / 4)? - 1;

    let leading = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading);
    weight -= i16::try_from(leading)?;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        weight = 0;
    }

    out.extend_from_slice(&i16::try_from(digits.len())?.to_be_bytes());
    out.extend_from_slice(&weight.to_be_bytes());
    let sign: u16 = if negative && !digits.is_empty() { 0x4000 } else { 0 };
    out.extend_from_slice(&sign.to_be_bytes());
    out.extend_from_slice(&dscale.to_be_bytes());
    for digit in digits {
        out.extend_from_slice(&digit.to_be_bytes());
    }
    Ok(IsNull::No)
}

/// A NUMERIC result cell rendered as its exact decimal text.
pub(crate) struct NumericText(pub(crate) String);

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        numeric_from_sql(raw).map(NumericText)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

fn numeric_from_sql(raw: &[u8]) -> Result<String, BoxError> {
    let word = |i: usize| -> Result<u16, BoxError> {
        raw.get(i * 2..i * 2 + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| BoxError::from("truncated NUMERIC value"))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let dscale = usize::from(word(3)?);
    match sign {
        0xC000 => return Ok("NaN".to_string()),
        0xD000 => return Ok("Infinity".to_string()),
        0xF000 => return Ok("-Infinity".to_string()),
        _ => {}
    }
    let digits = (0..ndigits).map(|i| word(4 + i)).collect::<Result<Vec<_>, _>>()?;
    let digit = |idx: i32| usize::try_from(idx).ok().and_then(|i| digits.get(i)).copied().unwrap_or(0);

    let mut int = String::new();
    for idx in 0..=weight {
        int.push_str(&format!("{:04}", digit(idx)));
    }
    let int = int.trim_start_matches('0');

    let mut text = String::new();
    if sign == 0x4000 {
        text.push('-');
    }
    text.push_str(if int.is_empty() { "0" } else { int });
    if dscale > 0 {
        let mut frac = String::new();
        for group in 1..=dscale.div_ceil(4) {
            frac.push_str(&format!("{:04}", digit(weight + group as i32)));
        }
        frac.truncate(dscale);
        text.push('.');
        text.push_str(&frac);
    }
    Ok(text)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => {
                if *ty == Type::BOOL {
                    b.to_sql(ty, out)
                } else if is_integer_type(ty) {
                    int_to_sql(i64::from(*b), ty, out)
                } else if is_text_type(ty) {
                    b.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch("a boolean", ty))
                }
            }
            Value::Int(i) => int_to_sql(*i, ty, out),
            Value::Float(f) => float_to_sql(*f, ty, out),
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Bytes(b) => {
                if *ty == Type::BYTEA {
                    b.as_slice().to_sql(ty, out)
                } else {
                    Err(mismatch("bytes", ty))
                }
            }
            Value::Json(j) => {
                if *ty == Type::JSON || *ty == Type::JSONB {
                    j.to_sql(ty, out)
                } else if is_text_type(ty) {
                    j.to_string().to_sql(ty, out)
                } else {
                    Err(mismatch("JSON", ty))
                }
            }
            Value::Timestamp(ts) => timestamp_to_sql(*ts, ty, out),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_views_parse_text() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from("2.5").as_f64(), Some(2.5));
        assert_eq!(Value::Null.as_i64(), None);
    }

    #[test]
    fn option_maps_to_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some(3)), Value::Int(3));
    }

    #[test]
    fn json_conversion_keeps_scalars() {
        let v: Value = serde_json::json!(7).into();
        assert_eq!(v, Value::Int(7));
        let v: Value = serde_json::json!({"a": 1}).into();
        assert!(matches!(v, Value::Json(_)));
        let back: serde_json::Value = Value::Text("x".into()).into();
        assert_eq!(back, serde_json::json!("x"));
    }

    #[test]
    fn from_value_option() {
        let none: Option<i64> = FromValue::from_value(&Value::Null).unwrap();
        assert_eq!(none, None);
        let some: Option<String> = FromValue::from_value(&Value::from("hi")).unwrap();
        assert_eq!(some.as_deref(), Some("hi"));
    }

    #[test]
    fn int_binds_to_narrow_integer_columns() {
        let mut buf = BytesMut::new();
        let res = Value::Int(7).to_sql(&Type::INT4, &mut buf).unwrap();
        assert!(matches!(res, IsNull::No));
        assert_eq!(buf.len(), 4);

        let mut buf = BytesMut::new();
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT2, &mut buf).is_err());
    }

    fn numeric(value: Value) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.to_sql(&Type::NUMERIC, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn numbers_bind_to_numeric_columns() {
        // ndigits=1 weight=0 sign=+ dscale=0 digits=[5]
        assert_eq!(numeric(Value::Int(5)), vec![0, 1, 0, 0, 0, 0, 0, 0, 0, 5]);
        // 162.5 -> [162, 5000], dscale 1
        assert_eq!(
            numeric(Value::Float(162.5)),
            vec![0, 2, 0, 0, 0, 0, 0, 1, 0, 162, 0x13, 0x88]
        );
        // -12345 -> [1, 2345], weight 1, negative
        assert_eq!(
            numeric(Value::Int(-12345)),
            vec![0, 2, 0, 1, 0x40, 0, 0, 0, 0, 1, 0x09, 0x29]
        );
        // 0.0001 -> [1], weight -1, dscale 4
        assert_eq!(numeric(Value::from("0.0001")), vec![0, 1, 0xff, 0xff, 0, 0, 0, 4, 0, 1]);
        assert_eq!(numeric(Value::Int(0)), vec![0, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(numeric(Value::from("20000")), vec![0, 1, 0, 1, 0, 0, 0, 0, 0, 2]);

        let mut buf = BytesMut::new();
        assert!(Value::from("12abc").to_sql(&Type::NUMERIC, &mut buf).is_err());
        assert!(Value::Float(f64::NAN).to_sql(&Type::NUMERIC, &mut buf).is_err());
    }

    #[test]
    fn numeric_cells_read_back_exactly() {
        for literal in ["5", "0", "162.5", "-12345", "0.0001", "20000", "1.50", "99999999.99"] {
            let mut buf = BytesMut::new();
            numeric_to_sql(literal, &mut buf).unwrap();
            assert_eq!(numeric_from_sql(&buf).unwrap(), literal);
        }
        assert_eq!(numeric_from_sql(&[0, 0, 0, 0, 0xC0, 0, 0, 0]).unwrap(), "NaN");
        assert!(numeric_from_sql(&[0, 1, 0, 0]).is_err());
    }

    #[test]
    fn mismatched_types_are_rejected() {
        let mut buf = BytesMut::new();
        assert!(Value::Int(5).to_sql(&Type::OID, &mut buf).is_err());
        assert!(Value::Int(5).to_sql(&Type::TIMESTAMP, &mut buf).is_err());
        assert!(Value::from("hello").to_sql(&Type::OID, &mut buf).is_err());
        assert!(Value::Bytes(vec![1, 2]).to_sql(&Type::INT8, &mut buf).is_err());
        assert!(Value::Bool(true).to_sql(&Type::JSONB, &mut buf).is_err());
        assert!(buf.is_empty());

        Value::from("hello").to_sql(&Type::UNKNOWN, &mut buf).unwrap();
        assert_eq!(&buf[..], b"hello");

        let mut buf = BytesMut::new();
        Value::from("2026-10-19").to_sql(&Type::DATE, &mut buf).unwrap();
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn text_binds_to_integer_columns_by_parsing() {
        let mut buf = BytesMut::new();
        Value::from("12").to_sql(&Type::INT8, &mut buf).unwrap();
        assert_eq!(buf.len(), 8);
    }
}
