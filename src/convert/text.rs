//! Text conversion - encoded, NUL-terminated native buffers
//!
//! Encoding writes into a buffer sized from the encoder's average bytes per
//! character plus four terminator bytes, doubling the capacity whenever the
//! next character does not fit. Four zero bytes always follow the encoded
//! text so any supported wide-character terminator is present.

use super::{ConversionContext, ConverterFlags, FromNativeConverter, ToNativeConverter};
use crate::error::{BindError, Result};
use crate::logging::log_buffer_grow;
use crate::types::{Annotation, AnnotationSet, ArrayValue, ElementType, LogicalType, Value};

/// Bytes reserved for the terminator
const TERMINATOR_BYTES: usize = 4;

/// Supported character encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    Ascii,
    Latin1,
}

impl Encoding {
    /// Parse an encoding label (case-insensitive, common aliases accepted)
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_uppercase();
        match normalized.as_str() {
            "UTF8" => Some(Self::Utf8),
            "UTF16LE" => Some(Self::Utf16Le),
            "UTF16BE" => Some(Self::Utf16Be),
            "UTF16" => Some(if cfg!(target_endian = "big") { Self::Utf16Be } else { Self::Utf16Le }),
            "UTF32LE" => Some(Self::Utf32Le),
            "UTF32BE" => Some(Self::Utf32Be),
            "UTF32" => Some(if cfg!(target_endian = "big") { Self::Utf32Be } else { Self::Utf32Le }),
            "ASCII" | "USASCII" => Some(Self::Ascii),
            "LATIN1" | "ISO88591" => Some(Self::Latin1),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Utf16Le => "UTF-16LE",
            Self::Utf16Be => "UTF-16BE",
            Self::Utf32Le => "UTF-32LE",
            Self::Utf32Be => "UTF-32BE",
            Self::Ascii => "US-ASCII",
            Self::Latin1 => "ISO-8859-1",
        }
    }

    /// Width of one code unit, which is also the terminator width
    pub const fn unit_size(self) -> usize {
        match self {
            Self::Utf8 | Self::Ascii | Self::Latin1 => 1,
            Self::Utf16Le | Self::Utf16Be => 2,
            Self::Utf32Le | Self::Utf32Be => 4,
        }
    }

    fn average_bytes_per_char(self) -> f32 {
        match self {
            Self::Utf8 => 1.1,
            Self::Ascii | Self::Latin1 => 1.0,
            Self::Utf16Le | Self::Utf16Be => 2.0,
            Self::Utf32Le | Self::Utf32Be => 4.0,
        }
    }

    /// Encode one character; `None` if it is unmappable
    fn encode_char(self, c: char, out: &mut [u8; 4]) -> Option<usize> {
        match self {
            Self::Utf8 => Some(c.encode_utf8(out).len()),
            Self::Ascii => {
                if c.is_ascii() {
                    out[0] = c as u8;
                    Some(1)
                } else {
                    None
                }
            }
            Self::Latin1 => {
                let code = c as u32;
                if code <= 0xFF {
                    out[0] = code as u8;
                    Some(1)
                } else {
                    None
                }
            }
            Self::Utf16Le | Self::Utf16Be => {
                let mut units = [0u16; 2];
                let units = c.encode_utf16(&mut units);
                for (i, unit) in units.iter().enumerate() {
                    let bytes = if self == Self::Utf16Le {
                        unit.to_le_bytes()
                    } else {
                        unit.to_be_bytes()
                    };
                    out[i * 2..i * 2 + 2].copy_from_slice(&bytes);
                }
                Some(units.len() * 2)
            }
            Self::Utf32Le => {
                out.copy_from_slice(&(c as u32).to_le_bytes());
                Some(4)
            }
            Self::Utf32Be => {
                out.copy_from_slice(&(c as u32).to_be_bytes());
                Some(4)
            }
        }
    }

    /// Encode text followed by a 4-byte zero terminator
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        let chars = text.chars().count();
        let mut capacity = (chars as f32 * self.average_bytes_per_char()) as usize + TERMINATOR_BYTES;
        let mut buf: Vec<u8> = Vec::with_capacity(capacity);
        let mut scratch = [0u8; 4];

        for c in text.chars() {
            let n = self.encode_char(c, &mut scratch).ok_or_else(|| {
                BindError::EncodingError(format!(
                    "character U+{:04X} is not representable in {}",
                    c as u32,
                    self.label()
                ))
            })?;
            // Output buffer full; expand and continue
            while buf.len() + n > capacity {
                capacity = grow(&mut buf, capacity);
            }
            buf.extend_from_slice(&scratch[..n]);
        }

        if capacity - buf.len() <= TERMINATOR_BYTES {
            capacity = grow(&mut buf, capacity);
        }
        debug_assert!(capacity - buf.len() > TERMINATOR_BYTES);
        buf.extend_from_slice(&[0u8; TERMINATOR_BYTES]);
        Ok(buf)
    }

    /// Decode bytes up to (not including) the first terminator unit
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        let unit = self.unit_size();
        let end = bytes
            .chunks_exact(unit)
            .position(|chunk| chunk.iter().all(|b| *b == 0))
            .map(|i| i * unit)
            .unwrap_or(bytes.len() - bytes.len() % unit);
        let body = &bytes[..end];

        let invalid = || BindError::EncodingError(format!("invalid {} sequence", self.label()));
        match self {
            Self::Utf8 => String::from_utf8(body.to_vec()).map_err(|_| invalid()),
            Self::Ascii => {
                if body.is_ascii() {
                    Ok(body.iter().map(|b| *b as char).collect())
                } else {
                    Err(invalid())
                }
            }
            Self::Latin1 => Ok(body.iter().map(|b| *b as char).collect()),
            Self::Utf16Le | Self::Utf16Be => {
                let units: Vec<u16> = body
                    .chunks_exact(2)
                    .map(|c| {
                        if self == Self::Utf16Le {
                            u16::from_le_bytes([c[0], c[1]])
                        } else {
                            u16::from_be_bytes([c[0], c[1]])
                        }
                    })
                    .collect();
                String::from_utf16(&units).map_err(|_| invalid())
            }
            Self::Utf32Le | Self::Utf32Be => body
                .chunks_exact(4)
                .map(|c| {
                    let raw = [c[0], c[1], c[2], c[3]];
                    let code = if self == Self::Utf32Le {
                        u32::from_le_bytes(raw)
                    } else {
                        u32::from_be_bytes(raw)
                    };
                    char::from_u32(code).ok_or_else(invalid)
                })
                .collect(),
        }
    }
}

fn grow(buf: &mut Vec<u8>, capacity: usize) -> usize {
    let next = capacity * 2;
    log_buffer_grow(capacity, next);
    buf.reserve(next - buf.len());
    next
}

fn resolve_encoding(ctx: &ConversionContext) -> Result<Encoding> {
    match ctx.annotations.encoding() {
        Some(label) => Encoding::from_label(label)
            .ok_or_else(|| BindError::UnsupportedType(format!("unknown encoding {}", label))),
        None => Ok(ctx.default_encoding),
    }
}

/// Text parameter to an encoded byte buffer
pub struct TextConverter {
    encoding: Encoding,
}

impl TextConverter {
    /// Converter for the encoding selected by the context
    pub fn for_context(ctx: &ConversionContext) -> Result<Self> {
        Ok(Self::new(resolve_encoding(ctx)?))
    }

    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

impl ToNativeConverter for TextConverter {
    fn to_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Text(text) => {
                let bytes = self.encoding.encode(text)?;
                Ok(Value::Array(ArrayValue::bytes(
                    bytes.into_iter().map(|b| b as i8).collect(),
                )))
            }
            other => Err(BindError::mismatch("text", other.kind_name())),
        }
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Array(ElementType::Byte)
    }

    fn native_annotations(&self) -> AnnotationSet {
        AnnotationSet::of([Annotation::In, Annotation::NulTerminate])
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}

/// Native string pointer to text
pub struct TextResultConverter {
    encoding: Encoding,
}

impl TextResultConverter {
    pub fn for_context(ctx: &ConversionContext) -> Result<Self> {
        Ok(Self::new(resolve_encoding(ctx)?))
    }

    pub fn new(encoding: Encoding) -> Self {
        Self { encoding }
    }

    /// Decode a terminated string at a native address
    ///
    /// # Safety
    /// `address` must point to readable memory holding a string terminated
    /// by one zero code unit of this encoding.
    pub unsafe fn read_terminated(&self, address: usize) -> Result<String> {
        let unit = self.encoding.unit_size();
        let mut len = 0usize;
        loop {
            let p = (address + len) as *const u8;
            let chunk = std::slice::from_raw_parts(p, unit);
            if chunk.iter().all(|b| *b == 0) {
                break;
            }
            len += unit;
        }
        let bytes = std::slice::from_raw_parts(address as *const u8, len);
        self.encoding.decode(bytes)
    }
}

impl FromNativeConverter for TextResultConverter {
    fn from_native(&self, value: &Value, _ctx: &ConversionContext) -> Result<Value> {
        let address = value
            .as_i64()
            .ok_or_else(|| BindError::mismatch("address", value.kind_name()))? as usize;
        if address == 0 {
            return Ok(Value::Null);
        }
        // SAFETY: declared text results are NUL-terminated native strings
        let text = unsafe { self.read_terminated(address)? };
        Ok(Value::text(&text))
    }

    fn native_type(&self) -> LogicalType {
        LogicalType::Address
    }

    fn flags(&self) -> ConverterFlags {
        ConverterFlags::SHARED
    }
}
