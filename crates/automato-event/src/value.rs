use automato_frame::protocol::primitive;
use serde::Serialize;

use crate::conditional::Conditional;
use crate::error::{EventError, Result};

/// The 3-bit type tag stored in an event header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ValueType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    F32 = 4,
    F64 = 5,
    Bool = 6,
    Unset = 7,
}

impl ValueType {
    /// Decode the low three bits of a header byte.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0 => Self::I8,
            1 => Self::I16,
            2 => Self::I32,
            3 => Self::I64,
            4 => Self::F32,
            5 => Self::F64,
            6 => Self::Bool,
            _ => Self::Unset,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Encoded width of a value of this type.
    pub fn width(self) -> usize {
        match self {
            Self::I8 | Self::Bool => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
            Self::Unset => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Bool => "bool",
            Self::Unset => "unset",
        }
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-width scalar carrying its own type.
///
/// Used as command results and as the comparison operand of Main and If
/// events. The encoding is the little-endian bytes of the active variant.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum TaggedValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    #[default]
    Unset,
}

impl TaggedValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::I8(_) => ValueType::I8,
            Self::I16(_) => ValueType::I16,
            Self::I32(_) => ValueType::I32,
            Self::I64(_) => ValueType::I64,
            Self::F32(_) => ValueType::F32,
            Self::F64(_) => ValueType::F64,
            Self::Bool(_) => ValueType::Bool,
            Self::Unset => ValueType::Unset,
        }
    }

    pub fn width(&self) -> usize {
        self.value_type().width()
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Self::I8(_) | Self::I16(_) | Self::I32(_) | Self::I64(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::F32(_) | Self::F64(_))
    }

    /// Append the value's bytes to `dst`.
    pub fn encode(&self, dst: &mut Vec<u8>) {
        match *self {
            Self::I8(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::I16(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::I32(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::I64(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::F32(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::F64(v) => dst.extend_from_slice(&v.to_le_bytes()),
            Self::Bool(v) => dst.push(u8::from(v)),
            Self::Unset => {}
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width());
        self.encode(&mut out);
        out
    }

    /// Decode a value of type `ty` from the front of `src`.
    pub fn decode(ty: ValueType, src: &[u8]) -> Result<Self> {
        let width = ty.width();
        if src.len() < width {
            return Err(EventError::Truncated {
                needed: width,
                got: src.len(),
            });
        }
        let b = &src[..width];
        Ok(match ty {
            ValueType::I8 => Self::I8(i8::from_le_bytes([b[0]])),
            ValueType::I16 => Self::I16(i16::from_le_bytes([b[0], b[1]])),
            ValueType::I32 => Self::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::I64 => Self::I64(i64::from_le_bytes(array8(b))),
            ValueType::F32 => Self::F32(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            ValueType::F64 => Self::F64(f64::from_le_bytes(array8(b))),
            ValueType::Bool => Self::Bool(b[0] != 0),
            ValueType::Unset => Self::Unset,
        })
    }

    /// The protocol primitive tag used when this value is a command result.
    pub fn to_wire_tag(&self) -> u8 {
        match self {
            Self::I8(_) => primitive::I8,
            Self::I16(_) => primitive::I16,
            Self::I32(_) => primitive::I32,
            Self::I64(_) => primitive::I64,
            Self::F32(_) => primitive::F32,
            Self::F64(_) => primitive::F64,
            Self::Bool(_) => primitive::BOOL,
            Self::Unset => primitive::VOID,
        }
    }

    /// Inverse of [`TaggedValue::to_wire_tag`] followed by [`TaggedValue::encode`].
    ///
    /// Unsigned primitive tags have no tagged counterpart.
    pub fn from_wire(tag: u8, src: &[u8]) -> Result<Self> {
        let ty = match tag {
            primitive::I8 => ValueType::I8,
            primitive::I16 => ValueType::I16,
            primitive::I32 => ValueType::I32,
            primitive::I64 => ValueType::I64,
            primitive::F32 => ValueType::F32,
            primitive::F64 => ValueType::F64,
            primitive::BOOL => ValueType::Bool,
            primitive::VOID => ValueType::Unset,
            other => return Err(EventError::UnsupportedWireTag(other)),
        };
        Self::decode(ty, src)
    }

    /// Integral and boolean values widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Self::I8(v) => Some(v.into()),
            Self::I16(v) => Some(v.into()),
            Self::I32(v) => Some(v.into()),
            Self::I64(v) => Some(v),
            Self::Bool(v) => Some(v.into()),
            _ => None,
        }
    }

    /// Any set value widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::F32(v) => Some(v.into()),
            Self::F64(v) => Some(v),
            Self::Unset => None,
            // i64 to f64 can round; the comparison this feeds is approximate anyway.
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    /// Parse a literal into the narrowest value that holds it.
    ///
    /// `t…`/`f…`, `0` and `1` are booleans; a literal containing `.` is `f32`
    /// when `f32` reproduces it exactly and `f64` otherwise; integers take the
    /// smallest of `i8`/`i16`/`i32`/`i64`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let invalid = || EventError::InvalidLiteral(text.to_string());
        let first = text.chars().next().ok_or_else(invalid)?;

        if first == 't' || first == 'f' {
            return Ok(Self::Bool(first == 't'));
        }
        if text == "0" || text == "1" {
            return Ok(Self::Bool(text == "1"));
        }
        if !text.contains('.') {
            if let Ok(v) = text.parse::<i64>() {
                return Ok(if let Ok(v) = i8::try_from(v) {
                    Self::I8(v)
                } else if let Ok(v) = i16::try_from(v) {
                    Self::I16(v)
                } else if let Ok(v) = i32::try_from(v) {
                    Self::I32(v)
                } else {
                    Self::I64(v)
                });
            }
        }

        let wide: f64 = text.parse().map_err(|_| invalid())?;
        let narrow = wide as f32;
        if narrow.is_finite() && narrow.to_string().parse::<f64>() == Ok(wide) {
            Ok(Self::F32(narrow))
        } else {
            Ok(Self::F64(wide))
        }
    }
}

fn array8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

impl std::fmt::Display for TaggedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I8(v) => write!(f, "{v}"),
            Self::I16(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}"),
            Self::I64(v) => write!(f, "{v}"),
            Self::F32(v) => write!(f, "{v}"),
            Self::F64(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Unset => f.write_str("unset"),
        }
    }
}

/// Evaluate `lhs op rhs`.
///
/// Unset operands never match. Integral and boolean operands compare as
/// `i64`; anything involving a float compares as `f64`. Operands are always
/// taken in `(lhs, rhs)` order.
pub fn compare(op: Conditional, lhs: &TaggedValue, rhs: &TaggedValue) -> bool {
    if !lhs.is_set() || !rhs.is_set() {
        return false;
    }
    if let (Some(l), Some(r)) = (lhs.as_i64(), rhs.as_i64()) {
        return op.evaluate(l, r);
    }
    match (lhs.as_f64(), rhs.as_f64()) {
        (Some(l), Some(r)) => op.evaluate(l, r),
        _ => false,
    }
}
