//! Level 5 MAT-file reader
//!
//! Only what is needed to pull one real numeric matrix out of a file: the
//! header, top-level data elements (plain or zlib-compressed), and the numeric
//! array sub-elements. Other variables are skipped without being decoded.

use super::format::{
    class_name, padded, type_size, Endian, FLAG_COMPLEX, HEADER_LEN, HEADER_TEXT_LEN, MI_COMPRESSED,
    MI_DOUBLE, MI_INT16, MI_INT32, MI_INT64, MI_INT8, MI_MATRIX, MI_SINGLE, MI_UINT16, MI_UINT32,
    MI_UINT64, MI_UINT8, MX_DOUBLE, MX_UINT64, VERSION_5, VERSION_73,
};
use crate::error::{Result, TfceError};
use flate2::read::ZlibDecoder;
use ndarray::{Array2, ShapeBuilder};
use std::io::Read;
use std::path::Path;

/// Read the variable `name` from the MAT-file at `path` as a 2-D `f64` array
///
/// # Errors
/// Returns error if the file cannot be read, is not a Level 5 MAT-file, does
/// not contain `name`, or `name` is not a real numeric 2-D array
pub fn read_variable(path: &Path, name: &str) -> Result<Array2<f64>> {
    let bytes = std::fs::read(path)?;
    tracing::debug!("read {} bytes from {}", bytes.len(), path.display());
    parse_variable(&bytes, name)
}

/// Find and decode `name` in an in-memory MAT-file
///
/// # Errors
/// See [`read_variable`]
pub fn parse_variable(bytes: &[u8], name: &str) -> Result<Array2<f64>> {
    let endian = parse_header(bytes)?;
    let mut cursor = Cursor::new(&bytes[HEADER_LEN..], endian);
    let mut seen: Vec<String> = Vec::new();

    while !cursor.is_empty() {
        let element = cursor.next_element()?;

        let inflated;
        let (data_type, body) = if element.data_type == MI_COMPRESSED {
            inflated = inflate(element.body)?;
            let inner = Cursor::new(&inflated, endian).next_element()?;
            (inner.data_type, inner.body)
        } else {
            (element.data_type, element.body)
        };

        if data_type != MI_MATRIX || body.is_empty() {
            continue;
        }

        let mut sub = Cursor::new(body, endian);
        let header = ArrayHeader::parse(&mut sub)?;
        tracing::debug!(
            "found variable '{}' ({}, dims {:?})",
            header.name,
            class_name(header.class),
            header.dims
        );
        if header.name != name {
            seen.push(header.name);
            continue;
        }
        return decode_numeric_array(&header, &mut sub);
    }

    Err(TfceError::MissingVariable {
        name: name.to_string(),
        available: if seen.is_empty() {
            "no variables".to_string()
        } else {
            seen.join(", ")
        },
    })
}

/// Validate the 128-byte header and return the file byte order
fn parse_header(bytes: &[u8]) -> Result<Endian> {
    if bytes.len() < HEADER_LEN {
        return Err(TfceError::MatFormat(format!(
            "file is {} bytes, too short for a MAT-file header",
            bytes.len()
        )));
    }
    let text = &bytes[..HEADER_TEXT_LEN];
    if !text.starts_with(b"MATLAB") {
        return Err(TfceError::MatFormat(
            "missing 'MATLAB' header text; not a Level 5 MAT-file".into(),
        ));
    }

    let endian = Endian::from_indicator([bytes[126], bytes[127]])?;
    match endian.u16([bytes[124], bytes[125]]) {
        VERSION_5 => Ok(endian),
        VERSION_73 => Err(TfceError::MatFormat(
            "MAT-file v7.3 (HDF5) is not supported; save with -v7 or -v6".into(),
        )),
        other => Err(TfceError::MatFormat(format!(
            "unsupported MAT-file version 0x{other:04x}"
        ))),
    }
}

fn inflate(body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ZlibDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| TfceError::MatFormat(format!("failed to decompress element: {e}")))?;
    Ok(out)
}

/// A tagged data element
struct Element<'a> {
    data_type: u32,
    body: &'a [u8],
}

/// Sequential reader over data elements
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8], endian: Endian) -> Self {
        Self {
            buf,
            pos: 0,
            endian,
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                TfceError::MatFormat(format!(
                    "truncated data element: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len().saturating_sub(self.pos)
                ))
            })?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn next_element(&mut self) -> Result<Element<'a>> {
        let tag = self.take(8)?;
        let first = self.endian.u32(bytes_of(&tag[..4]));

        // Small data element: byte count and type packed into one word
        let small_len = (first >> 16) as usize;
        if small_len != 0 {
            if small_len > 4 {
                return Err(TfceError::MatFormat(format!(
                    "small data element claims {small_len} bytes"
                )));
            }
            return Ok(Element {
                data_type: first & 0xffff,
                body: &tag[4..4 + small_len],
            });
        }

        let data_type = first;
        let nbytes = self.endian.u32(bytes_of(&tag[4..])) as usize;
        let body = self.take(nbytes)?;
        if data_type != MI_COMPRESSED {
            self.pos = (self.pos + padded(nbytes) - nbytes).min(self.buf.len());
        }
        Ok(Element { data_type, body })
    }
}

/// Array flags, dimensions and name of an `miMATRIX` element
#[derive(Debug)]
struct ArrayHeader {
    class: u8,
    complex: bool,
    dims: Vec<usize>,
    name: String,
}

impl ArrayHeader {
    #[allow(clippy::cast_possible_truncation)]
    fn parse(sub: &mut Cursor<'_>) -> Result<Self> {
        let endian = sub.endian;

        let flags = sub.next_element()?;
        if flags.data_type != MI_UINT32 || flags.body.len() < 8 {
            return Err(TfceError::MatFormat("malformed array flags".into()));
        }
        let word = endian.u32(bytes_of(&flags.body[..4]));

        let dims_el = sub.next_element()?;
        if dims_el.data_type != MI_INT32 || dims_el.body.len() % 4 != 0 {
            return Err(TfceError::MatFormat("malformed array dimensions".into()));
        }
        let dims = dims_el
            .body
            .chunks_exact(4)
            .map(|c| {
                #[allow(clippy::cast_possible_wrap)]
                let d = endian.u32(bytes_of(c)) as i32;
                usize::try_from(d)
                    .map_err(|_| TfceError::MatFormat(format!("negative dimension {d}")))
            })
            .collect::<Result<Vec<_>>>()?;

        let name_el = sub.next_element()?;
        if name_el.data_type != MI_INT8 && name_el.data_type != MI_UINT8 {
            return Err(TfceError::MatFormat("malformed array name".into()));
        }
        let name = String::from_utf8_lossy(name_el.body)
            .trim_end_matches('\0')
            .to_string();

        Ok(Self {
            class: (word & 0xff) as u8,
            complex: word & FLAG_COMPLEX != 0,
            dims,
            name,
        })
    }

    /// Rows and columns, allowing trailing singleton dimensions
    fn shape(&self) -> Result<(usize, usize)> {
        match self.dims.as_slice() {
            [rows, cols, rest @ ..] if rest.iter().all(|&d| d == 1) => Ok((*rows, *cols)),
            _ => Err(TfceError::InvalidData(format!(
                "variable '{}' has dimensions {:?}; expected a 2-D matrix",
                self.name, self.dims
            ))),
        }
    }
}

fn decode_numeric_array(header: &ArrayHeader, sub: &mut Cursor<'_>) -> Result<Array2<f64>> {
    if !(MX_DOUBLE..=MX_UINT64).contains(&header.class) {
        return Err(TfceError::InvalidData(format!(
            "variable '{}' has class {}; expected a real numeric array",
            header.name,
            class_name(header.class)
        )));
    }
    if header.complex {
        return Err(TfceError::InvalidData(format!(
            "variable '{}' is complex; expected real values",
            header.name
        )));
    }

    let (rows, cols) = header.shape()?;
    let count = rows * cols;
    let values = if count == 0 && sub.is_empty() {
        Vec::new()
    } else {
        let real = sub.next_element()?;
        decode_values(real.data_type, real.body, sub.endian)?
    };
    if values.len() != count {
        return Err(TfceError::MatFormat(format!(
            "variable '{}' holds {} values for a {rows}x{cols} array",
            header.name,
            values.len()
        )));
    }

    // MAT-files store arrays in column-major order
    Array2::from_shape_vec((rows, cols).f(), values)
        .map_err(|e| TfceError::MatFormat(format!("failed to shape '{}': {e}", header.name)))
}

/// Widen a numeric data element to `f64`
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn decode_values(data_type: u32, body: &[u8], endian: Endian) -> Result<Vec<f64>> {
    let size = type_size(data_type).ok_or_else(|| {
        TfceError::MatFormat(format!("data type {data_type} is not numeric"))
    })?;
    if body.len() % size != 0 {
        return Err(TfceError::MatFormat(format!(
            "{} bytes is not a whole number of {size}-byte values",
            body.len()
        )));
    }

    let values = body.chunks_exact(size).map(|c| match data_type {
        MI_INT8 => f64::from(c[0] as i8),
        MI_UINT8 => f64::from(c[0]),
        MI_INT16 => f64::from(endian.u16(bytes_of(c)) as i16),
        MI_UINT16 => f64::from(endian.u16(bytes_of(c))),
        MI_INT32 => f64::from(endian.u32(bytes_of(c)) as i32),
        MI_UINT32 => f64::from(endian.u32(bytes_of(c))),
        MI_SINGLE => f64::from(f32::from_bits(endian.u32(bytes_of(c)))),
        MI_DOUBLE => f64::from_bits(endian.u64(bytes_of(c))),
        MI_INT64 => endian.u64(bytes_of(c)) as i64 as f64,
        MI_UINT64 => endian.u64(bytes_of(c)) as f64,
        _ => unreachable!("type_size accepted a non-numeric type"),
    });
    Ok(values.collect())
}

/// Copy a slice of known length into a fixed-size array
fn bytes_of<const N: usize>(c: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&c[..N]);
    out
}
