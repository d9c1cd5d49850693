//! Per-item vector file formats
//!
//! Every stored item is one file holding a flat array of D floats. Two
//! encodings are understood:
//!
//! ## `.npy` (NumPy array file)
//!
//! ```text
//! Offset   Size    Type        Description
//! ─────────────────────────────────────────────
//! 0x00     6       [u8; 6]     Magic: "\x93NUMPY"
//! 0x06     1       u8          Major version (1, 2 or 3)
//! 0x07     1       u8          Minor version
//! 0x08     2 | 4   u16 | u32   Header length (u16 for v1, u32 for v2/v3)
//! ...      H       ASCII       Python dict literal: descr, fortran_order, shape
//! ...      N*W     [f4 | f8]   Array data
//! ```
//!
//! Only float dtypes (`f4`, `f8`, either byte order) are accepted. The shape
//! may have any rank as long as at most one axis is longer than 1; the data is
//! read as a flat vector.
//!
//! ## `.f32` (raw)
//!
//! Headerless little-endian `f32` values, `4 * D` bytes.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic bytes opening every .npy file
pub const NPY_MAGIC: [u8; 6] = *b"\x93NUMPY";

/// Header blocks are padded so the array data starts on this boundary.
const NPY_ALIGNMENT: usize = 64;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("Invalid magic bytes: expected \\x93NUMPY")]
    InvalidMagic,

    #[error("Unsupported npy version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("Malformed npy header: {0}")]
    MalformedHeader(String),

    #[error("Unsupported dtype '{0}': expected a 4 or 8 byte float")]
    UnsupportedDtype(String),

    #[error("Unsupported array layout: {0}")]
    UnsupportedLayout(String),

    #[error("Truncated vector data: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// On-disk encoding of a single vector file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VectorFormat {
    #[default]
    Npy,
    RawF32,
}

impl VectorFormat {
    /// File extension (without the dot)
    pub fn extension(&self) -> &'static str {
        match self {
            VectorFormat::Npy => "npy",
            VectorFormat::RawF32 => "f32",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>, FormatError> {
        match self {
            VectorFormat::Npy => decode_npy(bytes),
            VectorFormat::RawF32 => decode_raw(bytes),
        }
    }

    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        match self {
            VectorFormat::Npy => encode_npy(vector),
            VectorFormat::RawF32 => vector.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    pub fn read<P: AsRef<Path>>(&self, path: P) -> Result<Vec<f32>, FormatError> {
        let bytes = std::fs::read(path)?;
        self.decode(&bytes)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P, vector: &[f32]) -> Result<(), FormatError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&self.encode(vector))?;
        writer.flush()?;
        Ok(())
    }
}

impl FromStr for VectorFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "npy" => Ok(VectorFormat::Npy),
            "f32" | "raw" => Ok(VectorFormat::RawF32),
            other => Err(format!("unknown vector format '{}' (expected npy or f32)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpyDtype {
    pub order: ByteOrder,
    /// Element width in bytes: 4 or 8
    pub width: usize,
}

impl NpyDtype {
    fn parse(descr: &str) -> Result<Self, FormatError> {
        let unsupported = || FormatError::UnsupportedDtype(descr.to_string());
        let mut chars = descr.chars();
        let order = match chars.next() {
            Some('<') | Some('|') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            Some('=') if cfg!(target_endian = "little") => ByteOrder::Little,
            Some('=') => ByteOrder::Big,
            _ => return Err(unsupported()),
        };
        let width = match chars.as_str() {
            "f4" => 4,
            "f8" => 8,
            _ => return Err(unsupported()),
        };
        Ok(Self { order, width })
    }
}

/// Parsed .npy preamble
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpyHeader {
    pub dtype: NpyDtype,
    pub fortran_order: bool,
    pub shape: Vec<usize>,
    /// Byte offset of the first array element
    pub data_offset: usize,
}

impl NpyHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < 10 {
            return Err(FormatError::Truncated {
                expected: 10,
                actual: bytes.len(),
            });
        }
        if bytes[0..6] != NPY_MAGIC {
            return Err(FormatError::InvalidMagic);
        }

        let (major, minor) = (bytes[6], bytes[7]);
        let (header_len, preamble) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(FormatError::Truncated {
                        expected: 12,
                        actual: bytes.len(),
                    });
                }
                let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                (len as usize, 12)
            }
            _ => return Err(FormatError::UnsupportedVersion(major, minor)),
        };

        let data_offset = preamble + header_len;
        if bytes.len() < data_offset {
            return Err(FormatError::Truncated {
                expected: data_offset,
                actual: bytes.len(),
            });
        }
        let dict = std::str::from_utf8(&bytes[preamble..data_offset])
            .map_err(|_| FormatError::MalformedHeader("header is not valid UTF-8".into()))?;

        let descr = dict_value(dict, "descr")?;
        let descr = descr.trim().trim_matches(|c| c == '\'' || c == '"');
        let dtype = NpyDtype::parse(descr)?;

        let fortran_order = match dict_value(dict, "fortran_order")?.trim() {
            "True" => true,
            "False" => false,
            other => {
                return Err(FormatError::MalformedHeader(format!(
                    "fortran_order must be True or False, got '{}'",
                    other
                )))
            }
        };

        let shape = parse_shape(dict_value(dict, "shape")?)?;

        Ok(Self {
            dtype,
            fortran_order,
            shape,
            data_offset,
        })
    }

    /// Number of elements described by `shape`
    pub fn element_count(&self) -> Result<usize, FormatError> {
        self.shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| {
                FormatError::MalformedHeader(format!("shape {:?} overflows", self.shape))
            })
    }
}

/// Slice out the value for `key` in a Python dict literal. Values never
/// contain top-level commas except inside the shape tuple, which is handled
/// by tracking parenthesis depth.
fn dict_value<'a>(dict: &'a str, key: &str) -> Result<&'a str, FormatError> {
    let missing = || FormatError::MalformedHeader(format!("missing '{}' entry", key));
    let quoted = [format!("'{}'", key), format!("\"{}\"", key)];
    let key_end = quoted
        .iter()
        .find_map(|k| dict.find(k.as_str()).map(|pos| pos + k.len()))
        .ok_or_else(missing)?;

    let rest = &dict[key_end..];
    let colon = rest.find(':').ok_or_else(missing)?;
    let value = &rest[colon + 1..];

    let mut depth = 0usize;
    for (i, c) in value.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' | '}' if depth == 0 => return Ok(value[..i].trim()),
            _ => {}
        }
    }
    Err(missing())
}

fn parse_shape(raw: &str) -> Result<Vec<usize>, FormatError> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| FormatError::MalformedHeader(format!("shape is not a tuple: '{}'", raw)))?;

    inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| FormatError::MalformedHeader(format!("bad shape dimension '{}'", s)))
        })
        .collect()
}

fn decode_npy(bytes: &[u8]) -> Result<Vec<f32>, FormatError> {
    let header = NpyHeader::parse(bytes)?;

    let long_axes = header.shape.iter().filter(|&&d| d > 1).count();
    if long_axes > 1 {
        return Err(FormatError::UnsupportedLayout(format!(
            "expected a single vector, got shape {:?}",
            header.shape
        )));
    }

    let count = header.element_count()?;
    let expected = count.checked_mul(header.dtype.width).ok_or_else(|| {
        FormatError::MalformedHeader(format!("shape {:?} overflows", header.shape))
    })?;
    let data = &bytes[header.data_offset..];
    if data.len() < expected {
        return Err(FormatError::Truncated {
            expected: header.data_offset.saturating_add(expected),
            actual: bytes.len(),
        });
    }
    let data = &data[..expected];

    let out = match (header.dtype.width, header.dtype.order) {
        (4, ByteOrder::Little) => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (4, ByteOrder::Big) => data
            .chunks_exact(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (_, order) => data
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                match order {
                    ByteOrder::Little => f64::from_le_bytes(buf) as f32,
                    ByteOrder::Big => f64::from_be_bytes(buf) as f32,
                }
            })
            .collect(),
    };
    Ok(out)
}

fn decode_raw(bytes: &[u8]) -> Result<Vec<f32>, FormatError> {
    if bytes.len() % 4 != 0 {
        return Err(FormatError::Truncated {
            expected: bytes.len().next_multiple_of(4),
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Encode as a version 1.0 `<f4` array of shape `(len,)`.
fn encode_npy(vector: &[f32]) -> Vec<u8> {
    let mut dict = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({},), }}",
        vector.len()
    );
    // Pad with spaces and terminate with a newline so the data is aligned.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (NPY_ALIGNMENT - unpadded % NPY_ALIGNMENT) % NPY_ALIGNMENT;
    dict.extend(std::iter::repeat(' ').take(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(10 + dict.len() + vector.len() * 4);
    out.extend_from_slice(&NPY_MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
