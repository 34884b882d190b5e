use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;

mod npy;

#[derive(thiserror::Error, Debug)]
pub enum CalibrationLoadError {
    #[error("failed to read calibration {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported calibration file {} (expected .npz or .json)", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("calibration archive is unreadable: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("calibration archive has no '{0}' array")]
    MissingArray(String),
    #[error("calibration array '{name}' is malformed: {reason}")]
    MalformedArray { name: String, reason: String },
    #[error("camera matrix must have 9 values in a 3x3 layout, got shape {0:?}")]
    MatrixShape(Vec<usize>),
    #[error("expected at least 4 distortion coefficients, got {0}")]
    DistortionLength(usize),
    #[error("calibration contains a non-finite value")]
    NonFinite,
    #[error("calibration JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pinhole intrinsics and lens distortion of the capture camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraIntrinsics {
    pub matrix: [[f64; 3]; 3],
    pub distortion: Vec<f64>,
}

impl CameraIntrinsics {
    pub fn new(matrix: [[f64; 3]; 3], distortion: Vec<f64>) -> Result<Self, CalibrationLoadError> {
        if distortion.len() < 4 {
            return Err(CalibrationLoadError::DistortionLength(distortion.len()));
        }
        if !matrix.iter().flatten().chain(distortion.iter()).all(|v| v.is_finite()) {
            return Err(CalibrationLoadError::NonFinite);
        }

        Ok(Self { matrix, distortion })
    }

    fn from_flat(
        values: &[f64],
        shape: Vec<usize>,
        distortion: Vec<f64>,
    ) -> Result<Self, CalibrationLoadError> {
        let matrix = match values {
            [a, b, c, d, e, f, g, h, i] => [[*a, *b, *c], [*d, *e, *f], [*g, *h, *i]],
            _ => return Err(CalibrationLoadError::MatrixShape(shape)),
        };
        Self::new(matrix, distortion)
    }

    pub fn focal_length(&self) -> (f64, f64) {
        (self.matrix[0][0], self.matrix[1][1])
    }

    pub fn principal_point(&self) -> (f64, f64) {
        (self.matrix[0][2], self.matrix[1][2])
    }
}

/// Loads intrinsics from a NumPy `.npz` (arrays `mtx` and `dist`) or a JSON
/// file (`intrinsic_matrix` and `dist_coeffs`).
pub fn load<P: AsRef<Path>>(path: P) -> Result<CameraIntrinsics, CalibrationLoadError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let intrinsics = match extension.as_deref() {
        Some("npz") => load_npz(path)?,
        Some("json") => load_json(path)?,
        _ => {
            return Err(CalibrationLoadError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
        }
    };

    let (fx, fy) = intrinsics.focal_length();
    let (cx, cy) = intrinsics.principal_point();
    log::info!(
        "Loaded calibration from {} (fx {:.1}, fy {:.1}, cx {:.1}, cy {:.1}, {} distortion coefficients)",
        path.display(),
        fx,
        fy,
        cx,
        cy,
        intrinsics.distortion.len()
    );

    Ok(intrinsics)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CalibrationLoadError + '_ {
    move |source| CalibrationLoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn load_npz(path: &Path) -> Result<CameraIntrinsics, CalibrationLoadError> {
    let file = File::open(path).map_err(io_error(path))?;
    let mut archive = zip::ZipArchive::new(file)?;

    let mut read_array = |name: &str| -> Result<npy::NpyArray, CalibrationLoadError> {
        let member = format!("{name}.npy");
        if !archive.file_names().any(|n| n == member) {
            return Err(CalibrationLoadError::MissingArray(name.to_string()));
        }
        let mut entry = archive.by_name(&member)?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).map_err(io_error(path))?;

        npy::parse(&bytes).map_err(|reason| CalibrationLoadError::MalformedArray {
            name: name.to_string(),
            reason,
        })
    };

    let matrix = read_array("mtx")?;
    let distortion = read_array("dist")?;

    if matrix.shape != [3, 3] {
        return Err(CalibrationLoadError::MatrixShape(matrix.shape));
    }
    CameraIntrinsics::from_flat(&matrix.data, matrix.shape.clone(), distortion.data)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MatrixJson {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

#[derive(Deserialize)]
struct CalibrationJson {
    intrinsic_matrix: MatrixJson,
    dist_coeffs: DistortionJson,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DistortionJson {
    Flat(Vec<f64>),
    Nested(Vec<Vec<f64>>),
}

fn load_json(path: &Path) -> Result<CameraIntrinsics, CalibrationLoadError> {
    let content = fs::read_to_string(path).map_err(io_error(path))?;
    parse_json(&content)
}

fn parse_json(content: &str) -> Result<CameraIntrinsics, CalibrationLoadError> {
    let calibration: CalibrationJson = serde_json::from_str(content)?;

    let (values, shape) = match calibration.intrinsic_matrix {
        MatrixJson::Flat(values) => {
            let shape = vec![values.len()];
            (values, shape)
        }
        MatrixJson::Nested(rows) => {
            let shape = vec![rows.len(), rows.first().map_or(0, Vec::len)];
            if rows.iter().any(|row| row.len() != 3) {
                return Err(CalibrationLoadError::MatrixShape(shape));
            }
            (rows.into_iter().flatten().collect(), shape)
        }
    };

    let distortion = match calibration.dist_coeffs {
        DistortionJson::Flat(values) => values,
        DistortionJson::Nested(rows) => rows.into_iter().flatten().collect(),
    };

    CameraIntrinsics::from_flat(&values, shape, distortion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const MATRIX: [f64; 9] = [800.0, 0.0, 320.0, 0.0, 810.0, 240.0, 0.0, 0.0, 1.0];
    const DIST: [f64; 5] = [0.1, -0.25, 0.001, 0.002, 0.05];

    fn write_npz(path: &Path, arrays: &[(&str, &[usize], &[f64])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, shape, data) in arrays {
            zip.start_file(format!("{name}.npy"), options).unwrap();
            zip.write_all(&npy::encode_f64(shape, data)).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn loads_npz() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Camera.npz");
        write_npz(
            &path,
            &[
                ("mtx", &[3, 3][..], &MATRIX[..]),
                ("dist", &[1, 5][..], &DIST[..]),
                ("rvecs", &[1, 3][..], &[0.0, 0.0, 0.0][..]),
            ],
        );

        let intrinsics = load(&path).unwrap();
        assert_eq!(intrinsics.matrix[0], [800.0, 0.0, 320.0]);
        assert_eq!(intrinsics.matrix[1][1], 810.0);
        assert_eq!(intrinsics.distortion, DIST.to_vec());
        assert_eq!(intrinsics.principal_point(), (320.0, 240.0));
    }

    #[test]
    fn npz_without_dist_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Camera.npz");
        write_npz(&path, &[("mtx", &[3, 3][..], &MATRIX[..])]);

        assert!(matches!(
            load(&path),
            Err(CalibrationLoadError::MissingArray(name)) if name == "dist"
        ));
    }

    #[test]
    fn npz_matrix_must_be_square() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Camera.npz");
        write_npz(
            &path,
            &[
                ("mtx", &[1, 9][..], &MATRIX[..]),
                ("dist", &[5][..], &DIST[..]),
            ],
        );

        assert!(matches!(
            load(&path),
            Err(CalibrationLoadError::MatrixShape(shape)) if shape == vec![1, 9]
        ));
    }

    #[test]
    fn loads_flat_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(
            &path,
            r#"{
                "intrinsic_matrix": [800.0, 0.0, 320.0, 0.0, 810.0, 240.0, 0.0, 0.0, 1.0],
                "dist_coeffs": [0.1, -0.25, 0.001, 0.002, 0.05],
                "reprojection_error": 0.21
            }"#,
        )
        .unwrap();

        let intrinsics = load(&path).unwrap();
        assert_eq!(intrinsics.focal_length(), (800.0, 810.0));
        assert_eq!(intrinsics.distortion.len(), 5);
    }

    #[test]
    fn loads_nested_json() {
        let intrinsics = parse_json(
            r#"{
                "intrinsic_matrix": [[800.0, 0.0, 320.0], [0.0, 810.0, 240.0], [0.0, 0.0, 1.0]],
                "dist_coeffs": [[0.1, -0.25, 0.001, 0.002, 0.05]]
            }"#,
        )
        .unwrap();
        assert_eq!(intrinsics.matrix[2], [0.0, 0.0, 1.0]);
        assert_eq!(intrinsics.distortion.len(), 5);
    }

    #[test]
    fn short_distortion_is_rejected() {
        let json = r#"{ "intrinsic_matrix": [1, 0, 0, 0, 1, 0, 0, 0, 1], "dist_coeffs": [0.1] }"#;
        let err = parse_json(json).unwrap_err();
        assert!(matches!(err, CalibrationLoadError::DistortionLength(1)));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(matches!(
            load("Camera.yaml"),
            Err(CalibrationLoadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load(dir.path().join("nope.npz")),
            Err(CalibrationLoadError::Io { .. })
        ));
    }
}
