//! Just enough of the NumPy `.npy` format to read float calibration arrays.

const MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    /// Values in C (row-major) order regardless of the on-disk layout.
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F64,
    F32,
}

impl Dtype {
    fn size(self) -> usize {
        match self {
            Dtype::F64 => 8,
            Dtype::F32 => 4,
        }
    }
}

#[derive(Debug, PartialEq)]
struct Header {
    dtype: Dtype,
    fortran_order: bool,
    shape: Vec<usize>,
}

pub fn parse(bytes: &[u8]) -> Result<NpyArray, String> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err("not an .npy array".to_string());
    }

    let major = bytes[6];
    let (header_len, header_start) = match major {
        1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
        2 | 3 => {
            if bytes.len() < 12 {
                return Err("truncated header".to_string());
            }
            let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
            (len as usize, 12)
        }
        v => return Err(format!("unsupported .npy version {}", v)),
    };

    let header_end = header_start + header_len;
    let header = bytes
        .get(header_start..header_end)
        .ok_or_else(|| "truncated header".to_string())?;
    let header = std::str::from_utf8(header).map_err(|_| "header is not text".to_string())?;
    let header = parse_header(header)?;

    let expected = header
        .shape
        .iter()
        .try_fold(header.dtype.size(), |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| "array too large".to_string())?;
    let payload = &bytes[header_end..];
    if payload.len() < expected {
        return Err(format!(
            "expected {} bytes of data, found {}",
            expected,
            payload.len()
        ));
    }

    let mut data: Vec<f64> = match header.dtype {
        Dtype::F64 => payload[..expected]
            .chunks_exact(8)
            .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect(),
        Dtype::F32 => payload[..expected]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect(),
    };

    if header.fortran_order && header.shape.len() == 2 {
        let (rows, cols) = (header.shape[0], header.shape[1]);
        let column_major = data;
        data = (0..rows * cols)
            .map(|i| column_major[(i % cols) * rows + i / cols])
            .collect();
    }

    Ok(NpyArray {
        shape: header.shape,
        data,
    })
}

// {'descr': '<f8', 'fortran_order': False, 'shape': (3, 3), }
fn parse_header(header: &str) -> Result<Header, String> {
    let descr = value_after(header, "'descr'")?;
    let descr = descr
        .trim_start()
        .strip_prefix('\'')
        .and_then(|s| s.split('\'').next())
        .ok_or_else(|| "malformed descr".to_string())?;
    let dtype = match descr {
        "<f8" | "f8" => Dtype::F64,
        "<f4" | "f4" => Dtype::F32,
        other => return Err(format!("unsupported dtype {}", other)),
    };

    let fortran_order = value_after(header, "'fortran_order'")?
        .trim_start()
        .starts_with("True");

    let shape = value_after(header, "'shape'")?;
    let shape = shape
        .trim_start()
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| "malformed shape".to_string())?;
    let shape = shape
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|_| format!("bad dimension '{}'", s)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Header {
        dtype,
        fortran_order,
        shape,
    })
}

fn value_after<'a>(header: &'a str, key: &str) -> Result<&'a str, String> {
    let start = header
        .find(key)
        .ok_or_else(|| format!("header has no {}", key))?;
    let rest = &header[start + key.len()..];
    rest.trim_start()
        .strip_prefix(':')
        .ok_or_else(|| format!("malformed {}", key))
}

/// Serializes a little-endian f64 array, C order. Used to write test fixtures.
#[cfg(test)]
pub fn encode_f64(shape: &[usize], data: &[f64]) -> Vec<u8> {
    let shape = match shape {
        [n] => format!("({},)", n),
        dims => format!(
            "({})",
            dims.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut header = format!("{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}", shape);
    while (10 + header.len() + 1) % 64 != 0 {
        header.push(' ');
    }
    header.push('\n');

    let mut bytes = MAGIC.to_vec();
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for value in data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_c_order_f64() {
        let bytes = encode_f64(&[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let array = parse(&bytes).unwrap();
        assert_eq!(array.shape, vec![2, 3]);
        assert_eq!(array.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn parses_one_dimensional_shape() {
        let bytes = encode_f64(&[5], &[0.1, 0.2, 0.0, 0.0, -0.3]);
        let array = parse(&bytes).unwrap();
        assert_eq!(array.shape, vec![5]);
        assert_eq!(array.data.len(), 5);
    }

    #[test]
    fn reorders_fortran_arrays() {
        let mut bytes = encode_f64(&[2, 3], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        let header_end = 10 + u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        let header = String::from_utf8(bytes[10..header_end].to_vec())
            .unwrap()
            .replace("False", "True ");
        bytes.splice(10..header_end, header.into_bytes());

        let array = parse(&bytes).unwrap();
        assert_eq!(array.data, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn header_with_f4() {
        let dict = "{'descr': '<f4', 'fortran_order': False, 'shape': (1, 5), }";
        let header = parse_header(dict).unwrap();
        assert_eq!(
            header,
            Header {
                dtype: Dtype::F32,
                fortran_order: false,
                shape: vec![1, 5]
            }
        );
    }

    #[test]
    fn rejects_integer_arrays() {
        let dict = "{'descr': '<i8', 'fortran_order': False, 'shape': (3,), }";
        let err = parse_header(dict).unwrap_err();
        assert!(err.contains("<i8"));
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let dim = 1usize << 32;
        let bytes = encode_f64(&[dim, dim, dim], &[]);
        assert_eq!(parse(&bytes), Err("array too large".to_string()));
    }

    #[test]
    fn rejects_truncated_data() {
        let mut bytes = encode_f64(&[3, 3], &[0.0; 9]);
        bytes.truncate(bytes.len() - 8);
        assert!(parse(&bytes).is_err());
    }
}
