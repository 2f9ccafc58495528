use serde::{Deserialize, Serialize};

use crate::config::CodecConfig;
use crate::core::FXY;
use crate::core::tables::{DataType, TableLookup, ValueEncoding};
use crate::errors::{Error, Result};
use crate::structs::bit::BitBuffer;

/// A decoded or to-be-encoded element value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    Missing,
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Missing => write!(f, "MISSING"),
        }
    }
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::String(_) | Value::Missing => None,
        }
    }

    /// Integral view of a numeric value, rounded to nearest.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) => Some(v.round() as i64),
            Value::Double(v) => Some(v.round() as i64),
            Value::String(_) | Value::Missing => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

pub fn is_missing_f64(v: f64) -> bool {
    v.is_nan() || v == f64::MAX
}

pub fn is_missing_f32(v: f32) -> bool {
    v.is_nan() || v == f32::MAX
}

/// All-ones pattern of a field, `None` for unsupported widths.
pub fn missing_ivalue(nbits: u32) -> Option<u64> {
    match nbits {
        1..=63 => Some((1u64 << nbits) - 1),
        64 => Some(u64::MAX),
        _ => None,
    }
}

/// Smallest width whose all-ones pattern is strictly greater than `v`.
pub fn value_nbits(v: u64) -> u32 {
    let bits = 64 - v.leading_zeros();
    let ones = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    if v == ones { bits + 1 } else { bits }
}

/// Decodes a sign-bit integer; the all-ones pattern reads as -1.
pub fn cvt_ivalue(value: u64, nbits: u32) -> i64 {
    let Some(missing) = missing_ivalue(nbits) else {
        return 0;
    };
    if value == missing {
        return -1;
    }
    let signbit = 1u64 << (nbits - 1);
    if value & signbit != 0 {
        -((value % signbit) as i64)
    } else {
        value as i64
    }
}

/// Encodes `value` with the top bit of an `nbits` field as sign.
pub fn negative_ivalue(descriptor: FXY, value: i64, nbits: u32) -> Result<u64> {
    if nbits == 0 || nbits > 64 {
        return Err(Error::BitWidth(nbits));
    }
    let magnitude = value.unsigned_abs();
    let limit = 1u64 << (nbits - 1);
    if magnitude >= limit {
        return Err(Error::ValueOutOfRange {
            descriptor,
            value: value as f64,
            nbits,
        });
    }
    Ok(if value < 0 { magnitude | limit } else { magnitude })
}

/// Class 31 holds counts and indicators, which may use the all-ones pattern.
#[inline]
fn all_ones_is_value(descriptor: &FXY) -> bool {
    descriptor.f == 0 && descriptor.x == 31
}

impl ValueEncoding {
    pub fn missing(&self) -> Option<u64> {
        missing_ivalue(self.nbits)
    }

    pub fn is_missing_raw(&self, descriptor: &FXY, raw: u64) -> bool {
        !all_ones_is_value(descriptor) && Some(raw) == self.missing()
    }

    fn fit(&self, descriptor: FXY, scaled: i128, shown: f64) -> Result<u64> {
        let missing = self.missing().ok_or(Error::BitWidth(self.nbits))?;
        let ival = scaled - self.reference as i128;
        let limit = if all_ones_is_value(&descriptor) {
            missing as i128
        } else {
            missing as i128 - 1
        };
        if ival < 0 || ival > limit {
            return Err(Error::ValueOutOfRange {
                descriptor,
                value: shown,
                nbits: self.nbits,
            });
        }
        Ok(ival as u64)
    }

    /// `round(value * 10^scale) - reference`, checked against the width.
    pub fn encode_f64(&self, descriptor: FXY, value: f64) -> Result<u64> {
        if is_missing_f64(value) {
            return self.missing().ok_or(Error::BitWidth(self.nbits));
        }
        let scaled = (value * 10f64.powi(self.scale)).round();
        if !scaled.is_finite() {
            return Err(Error::ValueOutOfRange {
                descriptor,
                value,
                nbits: self.nbits,
            });
        }
        self.fit(descriptor, scaled as i128, value)
    }

    pub fn encode_f32(&self, descriptor: FXY, value: f32) -> Result<u64> {
        if is_missing_f32(value) {
            return self.missing().ok_or(Error::BitWidth(self.nbits));
        }
        self.encode_f64(descriptor, value as f64)
    }

    pub fn encode_i64(&self, descriptor: FXY, value: i64) -> Result<u64> {
        if self.scale == 0 {
            self.fit(descriptor, value as i128, value as f64)
        } else {
            self.encode_f64(descriptor, value as f64)
        }
    }

    /// `(raw + reference) / 10^scale`, `None` for the missing pattern.
    pub fn decode_f64(&self, descriptor: &FXY, raw: u64) -> Option<f64> {
        if self.is_missing_raw(descriptor, raw) {
            return None;
        }
        let unscaled = (raw as i128 + self.reference as i128) as f64;
        Some(if self.scale >= 0 {
            unscaled / 10f64.powi(self.scale)
        } else {
            unscaled * 10f64.powi(-self.scale)
        })
    }

    pub fn decode_f32(&self, descriptor: &FXY, raw: u64) -> Option<f32> {
        self.decode_f64(descriptor, raw).map(|v| v as f32)
    }
}

fn type_error(descriptor: FXY, enc: &ValueEncoding) -> Error {
    Error::ValueType {
        descriptor,
        data_type: enc.data_type,
    }
}

/// Writes one value in its table encoding.
pub fn put_value(
    buf: &mut BitBuffer,
    descriptor: FXY,
    enc: &ValueEncoding,
    value: &Value,
) -> Result<()> {
    match enc.data_type {
        DataType::Numeric | DataType::CodeTable | DataType::FlagTable => {
            let raw = match value {
                Value::Missing => enc.missing().ok_or(Error::BitWidth(enc.nbits))?,
                Value::Int(v) => enc.encode_i64(descriptor, *v)?,
                Value::Float(v) => enc.encode_f32(descriptor, *v)?,
                Value::Double(v) => enc.encode_f64(descriptor, *v)?,
                Value::String(_) => return Err(type_error(descriptor, enc)),
            };
            buf.put_bits(raw, enc.nbits)
        }
        DataType::String => {
            let enclen = (enc.nbits / 8) as usize;
            match value {
                Value::String(s) => buf.put_padstring(s.as_bytes(), enclen),
                Value::Missing => (0..enclen).try_for_each(|_| buf.put_bits(0xFF, 8)),
                _ => Err(type_error(descriptor, enc)),
            }
        }
        DataType::IeeeFloat => {
            let v = match value {
                Value::Missing => None,
                Value::String(_) => return Err(type_error(descriptor, enc)),
                other => other.as_f64(),
            };
            match (enc.nbits, v) {
                (32, Some(v)) => buf.put_bits((v as f32).to_bits() as u64, 32),
                (64, Some(v)) => buf.put_bits(v.to_bits(), 64),
                (32, None) => buf.put_bits(u32::MAX as u64, 32),
                (64, None) => buf.put_bits(u64::MAX, 64),
                (n, _) => Err(Error::BitWidth(n)),
            }
        }
        DataType::ChangeRefValue => {
            let raw = match value {
                Value::Missing => enc.missing().ok_or(Error::BitWidth(enc.nbits))?,
                Value::Int(v) => negative_ivalue(descriptor, *v, enc.nbits)?,
                _ => return Err(type_error(descriptor, enc)),
            };
            buf.put_bits(raw, enc.nbits)
        }
        _ => Err(type_error(descriptor, enc)),
    }
}

/// Reads one value in its table encoding.
pub fn get_value(
    buf: &mut BitBuffer,
    descriptor: FXY,
    enc: &ValueEncoding,
    config: &CodecConfig,
) -> Result<Value> {
    let value = match enc.data_type {
        DataType::Numeric => {
            let raw = buf.get_bits(enc.nbits)?;
            enc.decode_f64(&descriptor, raw)
                .map_or(Value::Missing, Value::Double)
        }
        DataType::CodeTable | DataType::FlagTable => {
            let raw = buf.get_bits(enc.nbits)?;
            if enc.is_missing_raw(&descriptor, raw) {
                Value::Missing
            } else {
                Value::Int(raw as i64)
            }
        }
        DataType::String => {
            let bytes = buf.get_string((enc.nbits / 8) as usize)?;
            if !bytes.is_empty() && bytes.iter().all(|b| *b == 0xFF) {
                Value::Missing
            } else {
                Value::String(decode_text(&bytes, config.trim_strings))
            }
        }
        DataType::IeeeFloat => match enc.nbits {
            32 => {
                let raw = buf.get_bits(32)? as u32;
                if raw == u32::MAX {
                    Value::Missing
                } else {
                    Value::Float(f32::from_bits(raw))
                }
            }
            64 => {
                let raw = buf.get_bits(64)?;
                if raw == u64::MAX {
                    Value::Missing
                } else {
                    Value::Double(f64::from_bits(raw))
                }
            }
            n => return Err(Error::BitWidth(n)),
        },
        DataType::ChangeRefValue => {
            let raw = buf.get_bits(enc.nbits)?;
            if Some(raw) == enc.missing() {
                Value::Missing
            } else {
                Value::Int(cvt_ivalue(raw, enc.nbits))
            }
        }
        _ => return Err(type_error(descriptor, enc)),
    };

    if config.debug {
        tracing::trace!("{} -> {}", descriptor, value);
    }
    Ok(value)
}

/// IA5 text; octets that are not UTF-8 are read as Windows-1252.
fn decode_text(bytes: &[u8], trim: bool) -> String {
    let text = match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
    };
    if trim {
        text.trim_end_matches(' ').to_string()
    } else {
        text
    }
}

/// Writes an element preceded by its associated field, if the encoding
/// declares one. A missing associated value is written as all ones.
pub fn put_element(
    buf: &mut BitBuffer,
    descriptor: FXY,
    enc: &ValueEncoding,
    value: &Value,
    associated: Option<u64>,
) -> Result<()> {
    if enc.af_nbits > 0 {
        let missing = missing_ivalue(enc.af_nbits).ok_or(Error::BitWidth(enc.af_nbits))?;
        buf.put_bits(associated.unwrap_or(missing), enc.af_nbits)?;
    }
    put_value(buf, descriptor, enc, value)
}

pub fn get_element(
    buf: &mut BitBuffer,
    descriptor: FXY,
    enc: &ValueEncoding,
    config: &CodecConfig,
) -> Result<(Option<u64>, Value)> {
    let associated = if enc.af_nbits > 0 {
        let raw = buf.get_bits(enc.af_nbits)?;
        (Some(raw) != missing_ivalue(enc.af_nbits)).then_some(raw)
    } else {
        None
    };
    Ok((associated, get_value(buf, descriptor, enc, config)?))
}

/// Encoding of a descriptor that carries data on its own: a Table B element
/// or a 2-05-YYY character literal.
pub fn element_encoding<T: TableLookup + ?Sized>(
    tables: &T,
    descriptor: &FXY,
) -> Result<ValueEncoding> {
    match descriptor.f {
        0 => tables.encoding(descriptor),
        2 if descriptor.x == 5 => Ok(ValueEncoding::new(
            DataType::String,
            0,
            0,
            8 * descriptor.y as u32,
        )),
        _ => Err(Error::ValueType {
            descriptor: *descriptor,
            data_type: DataType::for_descriptor(descriptor),
        }),
    }
}

/// Packs a flat list of element values.
pub fn encode_elements<T: TableLookup + ?Sized>(
    buf: &mut BitBuffer,
    tables: &T,
    elements: &[(FXY, Value)],
    config: &CodecConfig,
) -> Result<()> {
    for (descriptor, value) in elements {
        let enc = element_encoding(tables, descriptor)?;
        if enc.nbits > 64 && enc.data_type != DataType::String {
            return Err(config.abort(&format!(
                "{} is {} bits wide, at most 64 are supported",
                descriptor, enc.nbits
            )));
        }
        put_value(buf, *descriptor, &enc, value)?;
    }
    Ok(())
}

/// Unpacks values for a flat list of element descriptors.
pub fn decode_elements<T: TableLookup + ?Sized>(
    buf: &mut BitBuffer,
    tables: &T,
    descriptors: &[FXY],
    config: &CodecConfig,
) -> Result<Vec<Value>> {
    descriptors
        .iter()
        .map(|d| {
            let enc = element_encoding(tables, d)?;
            get_value(buf, *d, &enc, config)
        })
        .collect()
}
