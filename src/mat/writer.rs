//! Level 5 MAT-file writer for double-precision matrices

use super::format::{
    padded, HEADER_TEXT_LEN, MI_COMPRESSED, MI_DOUBLE, MI_INT32, MI_INT8, MI_MATRIX, MI_UINT32,
    MX_DOUBLE, VERSION_5,
};
use crate::error::{Result, TfceError};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{ArrayView1, ArrayView2, Axis};
use std::io::Write;
use std::path::Path;

/// MATLAB's `namelengthmax`
const MAX_NAME_LEN: usize = 63;

/// Accumulates named variables and writes them as one little-endian MAT-file
#[derive(Debug, Default)]
pub struct MatWriter {
    compress: bool,
    names: Vec<String>,
    elements: Vec<Vec<u8>>,
}

impl MatWriter {
    /// `compress` wraps every variable in a zlib `miCOMPRESSED` element
    #[must_use]
    pub fn new(compress: bool) -> Self {
        Self {
            compress,
            ..Self::default()
        }
    }

    /// Add a 2-D double matrix under `name`
    ///
    /// # Errors
    /// Returns error if `name` is not a valid MATLAB identifier, is already
    /// used, or the matrix is too large for a MAT-file dimension
    pub fn add_matrix(&mut self, name: &str, data: ArrayView2<'_, f64>) -> Result<()> {
        validate_name(name)?;
        if self.names.iter().any(|n| n == name) {
            return Err(TfceError::Config(format!(
                "variable '{name}' added twice"
            )));
        }

        let (rows, cols) = data.dim();
        // Iterating the transpose visits values in column-major order
        let element = encode_matrix(name, rows, cols, data.t().iter().copied())?;
        let element = if self.compress {
            compress_element(&element)?
        } else {
            element
        };

        self.names.push(name.to_string());
        self.elements.push(element);
        Ok(())
    }

    /// Add a vector as an `n x 1` column
    ///
    /// # Errors
    /// See [`MatWriter::add_matrix`]
    pub fn add_column(&mut self, name: &str, values: ArrayView1<'_, f64>) -> Result<()> {
        self.add_matrix(name, values.insert_axis(Axis(1)))
    }

    /// Serialize header and all variables
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = header();
        for element in &self.elements {
            out.extend_from_slice(element);
        }
        out
    }

    /// Create or overwrite `path` with the serialized file
    ///
    /// # Errors
    /// Returns error if the file cannot be written
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes();
        std::fs::write(path, &bytes)?;
        tracing::debug!(
            "wrote {} bytes ({} variables) to {}",
            bytes.len(),
            self.names.len(),
            path.display()
        );
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= MAX_NAME_LEN;
    if valid {
        Ok(())
    } else {
        Err(TfceError::Config(format!(
            "'{name}' is not a valid MATLAB variable name"
        )))
    }
}

fn header() -> Vec<u8> {
    let text = format!(
        "MATLAB 5.0 MAT-file, Platform: {}, Created on: {}",
        std::env::consts::OS,
        chrono::Local::now().format("%a %b %e %H:%M:%S %Y")
    );
    let mut out = text.into_bytes();
    out.resize(HEADER_TEXT_LEN, b' ');
    // No subsystem data
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&VERSION_5.to_le_bytes());
    out.extend_from_slice(b"IM");
    out
}

fn put_tag(out: &mut Vec<u8>, data_type: u32, nbytes: usize) -> Result<()> {
    let nbytes = u32::try_from(nbytes)
        .map_err(|_| TfceError::Config(format!("data element of {nbytes} bytes is too large")))?;
    out.extend_from_slice(&data_type.to_le_bytes());
    out.extend_from_slice(&nbytes.to_le_bytes());
    Ok(())
}

fn pad(out: &mut Vec<u8>) {
    out.resize(padded(out.len()), 0);
}

fn encode_matrix(
    name: &str,
    rows: usize,
    cols: usize,
    values: impl ExactSizeIterator<Item = f64>,
) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(64 + values.len() * 8);

    put_tag(&mut body, MI_UINT32, 8)?;
    body.extend_from_slice(&u32::from(MX_DOUBLE).to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());

    put_tag(&mut body, MI_INT32, 8)?;
    for dim in [rows, cols] {
        let dim = i32::try_from(dim)
            .map_err(|_| TfceError::Config(format!("dimension {dim} is too large")))?;
        body.extend_from_slice(&dim.to_le_bytes());
    }

    if name.len() <= 4 {
        // Small data element: length in the upper half of the type word
        #[allow(clippy::cast_possible_truncation)]
        let word = ((name.len() as u32) << 16) | MI_INT8;
        body.extend_from_slice(&word.to_le_bytes());
        body.extend_from_slice(name.as_bytes());
    } else {
        put_tag(&mut body, MI_INT8, name.len())?;
        body.extend_from_slice(name.as_bytes());
    }
    pad(&mut body);

    put_tag(&mut body, MI_DOUBLE, values.len() * 8)?;
    for v in values {
        body.extend_from_slice(&v.to_le_bytes());
    }

    let mut element = Vec::with_capacity(body.len() + 8);
    put_tag(&mut element, MI_MATRIX, body.len())?;
    element.extend(body);
    Ok(element)
}

fn compress_element(element: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(element)?;
    let compressed = encoder.finish()?;

    let mut out = Vec::with_capacity(compressed.len() + 8);
    put_tag(&mut out, MI_COMPRESSED, compressed.len())?;
    out.extend(compressed);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mat::format::HEADER_LEN;
    use crate::mat::reader::{parse_variable, read_variable};
    use ndarray::{array, Array1};
    use tempfile::TempDir;

    #[test]
    fn test_header_layout() {
        let bytes = MatWriter::new(false).to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert!(bytes.starts_with(b"MATLAB 5.0 MAT-file"));
        assert_eq!(&bytes[124..126], &[0x00u8, 0x01]);
        assert_eq!(&bytes[126..128], b"IM");
    }

    #[test]
    fn test_column_vector_shape() {
        let pv = array![0.5, 0.25, 1.0];
        let mut writer = MatWriter::new(false);
        writer.add_column("cluster_pv", pv.view()).expect("add");

        let back = parse_variable(&writer.to_bytes(), "cluster_pv").expect("parse");
        assert_eq!(back.dim(), (3, 1));
        assert_eq!(back.column(0).to_owned(), pv);
    }

    #[test]
    fn test_matrix_column_major() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let mut writer = MatWriter::new(false);
        writer.add_matrix("m", m.view()).expect("add");
        let bytes = writer.to_bytes();

        // First stored value after the 8-byte real tag is m[0,0], then m[1,0]
        let data_start = bytes.len() - 6 * 8;
        let second = f64::from_le_bytes(bytes[data_start + 8..data_start + 16].try_into().expect("8"));
        assert_eq!(second, 4.0);

        assert_eq!(parse_variable(&bytes, "m").expect("parse"), m);
    }

    #[test]
    fn test_compressed_round_trip() {
        let values: Array1<f64> = (0..100).map(|i| f64::from(i) / 7.0).collect();
        let mut writer = MatWriter::new(true);
        writer.add_column("H0", values.view()).expect("add");
        writer
            .add_matrix("T_obs", array![[1.0, -2.0]].view())
            .expect("add");

        let bytes = writer.to_bytes();
        let back = parse_variable(&bytes, "H0").expect("parse");
        assert_eq!(back.column(0).to_owned(), values);
        let t = parse_variable(&bytes, "T_obs").expect("parse");
        assert_eq!(t, array![[1.0, -2.0]]);
    }

    #[test]
    fn test_empty_column() {
        let empty: Array1<f64> = Array1::zeros(0);
        let mut writer = MatWriter::new(false);
        writer.add_column("cluster_pv", empty.view()).expect("add");

        let back = parse_variable(&writer.to_bytes(), "cluster_pv").expect("parse");
        assert_eq!(back.dim(), (0, 1));
    }

    #[test]
    fn test_rejects_bad_names() {
        let v = array![1.0];
        let mut writer = MatWriter::new(false);
        assert!(writer.add_column("", v.view()).is_err());
        assert!(writer.add_column("1abc", v.view()).is_err());
        assert!(writer.add_column("has space", v.view()).is_err());
        assert!(writer.add_column(&"x".repeat(64), v.view()).is_err());

        writer.add_column("ok_1", v.view()).expect("add");
        assert!(writer.add_column("ok_1", v.view()).is_err());
    }

    #[test]
    fn test_write_to_overwrites() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("out.mat");
        std::fs::write(&path, b"stale").expect("seed");

        let mut writer = MatWriter::new(false);
        writer.add_column("cluster_pv", array![0.1, 0.2].view()).expect("add");
        writer.write_to(&path).expect("write");

        let back = read_variable(&path, "cluster_pv").expect("read");
        assert_eq!(back, array![[0.1], [0.2]]);
    }

    #[test]
    fn test_unwritable_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("missing").join("out.mat");
        let writer = MatWriter::new(false);
        assert!(matches!(writer.write_to(&path), Err(TfceError::Io(_))));
    }
}
