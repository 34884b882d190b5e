use glam::{DMat3, DMat4, DVec3, Mat4};

use crate::marker::MarkerObservation;

/// Row-major 4x4 matrix, the layout the pose math is written in.
pub type RowMajor4 = [[f64; 4]; 4];

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AxisScaleError {
    #[error("axis scale component {axis} must be non-zero")]
    Zero { axis: char },
    #[error("axis scale component {axis} must be finite, got {value}")]
    NonFinite { axis: char, value: f64 },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SignMaskError {
    #[error("sign mask entry ({row}, {col}) must be 1 or -1, got {value}")]
    NotASign { row: usize, col: usize, value: f64 },
}

/// Per-axis divisors applied to a marker's translation before it is used as the
/// model-view translation.
///
/// They are tuned per asset and rig, so the only validation is that dividing by
/// them is well defined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisScale(DVec3);

impl AxisScale {
    pub fn new(x: f64, y: f64, z: f64) -> Result<Self, AxisScaleError> {
        for (axis, value) in [('x', x), ('y', y), ('z', z)] {
            if !value.is_finite() {
                return Err(AxisScaleError::NonFinite { axis, value });
            }
            if value == 0.0 {
                return Err(AxisScaleError::Zero { axis });
            }
        }

        Ok(Self(DVec3::new(x, y, z)))
    }

    pub fn from_array(values: [f64; 3]) -> Result<Self, AxisScaleError> {
        Self::new(values[0], values[1], values[2])
    }

    pub fn as_dvec3(&self) -> DVec3 {
        self.0
    }
}

/// Element-wise sign pattern reconciling OpenCV's camera axes (x right, y down,
/// z forward) with the renderer's (x right, y up, z backward).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignMask(RowMajor4);

impl SignMask {
    /// The mask tuned on the reference rig: rows 1 and 2 flipped.
    pub const TUNED: SignMask = SignMask([
        [1.0, 1.0, 1.0, 1.0],
        [-1.0, -1.0, -1.0, -1.0],
        [-1.0, -1.0, -1.0, -1.0],
        [1.0, 1.0, 1.0, 1.0],
    ]);

    pub fn new(rows: RowMajor4) -> Result<Self, SignMaskError> {
        for (row, values) in rows.iter().enumerate() {
            for (col, &value) in values.iter().enumerate() {
                if value != 1.0 && value != -1.0 {
                    return Err(SignMaskError::NotASign { row, col, value });
                }
            }
        }

        Ok(Self(rows))
    }

    pub fn rows(&self) -> &RowMajor4 {
        &self.0
    }

    pub fn apply(&self, matrix: &RowMajor4) -> RowMajor4 {
        let mut out = *matrix;
        for (out_row, mask_row) in out.iter_mut().zip(self.0.iter()) {
            for (value, sign) in out_row.iter_mut().zip(mask_row.iter()) {
                *value *= sign;
            }
        }
        out
    }
}

impl Default for SignMask {
    fn default() -> Self {
        Self::TUNED
    }
}

/// A marker's model-view matrix, stored column-major so it can be handed to the
/// GPU as is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform(DMat4);

impl ViewTransform {
    pub const IDENTITY: ViewTransform = ViewTransform(DMat4::IDENTITY);

    pub fn from_row_major(rows: &RowMajor4) -> Self {
        // glam reads the arrays as columns, which yields the transpose.
        Self(DMat4::from_cols_array_2d(rows).transpose())
    }

    pub fn matrix(&self) -> DMat4 {
        self.0
    }

    pub fn to_cols_array(&self) -> [f64; 16] {
        self.0.to_cols_array()
    }

    pub fn as_mat4(&self) -> Mat4 {
        self.0.as_mat4()
    }

    pub fn translation(&self) -> DVec3 {
        self.0.w_axis.truncate()
    }

    pub fn is_finite(&self) -> bool {
        self.0.is_finite()
    }
}

/// Exponential map from a rotation vector to a rotation matrix.
pub fn rodrigues(rotation_vector: [f64; 3]) -> DMat3 {
    let rotation_vector = DVec3::from_array(rotation_vector);
    let theta = rotation_vector.length();

    if theta < 1e-12 {
        return DMat3::IDENTITY;
    }

    DMat3::from_axis_angle(rotation_vector / theta, theta)
}

/// `[R | t / scale]` with a `(0, 0, 0, 1)` bottom row, row-major, before any
/// axis correction.
pub fn pose_rows(
    rotation_vector: [f64; 3],
    translation_vector: [f64; 3],
    axis_scale: &AxisScale,
) -> RowMajor4 {
    let rotation = rodrigues(rotation_vector);
    let translation = DVec3::from_array(translation_vector) / axis_scale.as_dvec3();

    let mut rows = [[0.0; 4]; 4];
    for (i, row) in rows.iter_mut().take(3).enumerate() {
        let r = rotation.row(i);
        *row = [r.x, r.y, r.z, translation[i]];
    }
    rows[3] = [0.0, 0.0, 0.0, 1.0];
    rows
}

#[derive(Debug, Clone, Default)]
pub struct PoseConverter {
    mask: SignMask,
}

impl PoseConverter {
    pub fn new(mask: SignMask) -> Self {
        Self { mask }
    }

    pub fn to_view_transform(
        &self,
        observation: &MarkerObservation,
        axis_scale: &AxisScale,
    ) -> ViewTransform {
        let rows = pose_rows(
            observation.rotation_vector,
            observation.translation_vector,
            axis_scale,
        );
        ViewTransform::from_row_major(&self.mask.apply(&rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn observation(rvec: [f64; 3], tvec: [f64; 3]) -> MarkerObservation {
        MarkerObservation {
            id: 0,
            centroid: (320.0, 240.0),
            rotation_vector: rvec,
            translation_vector: tvec,
        }
    }

    fn upper_left(m: &DMat4) -> DMat3 {
        DMat3::from_mat4(*m)
    }

    #[test]
    fn zero_axis_scale_is_rejected() {
        assert_eq!(
            AxisScale::new(160.0, 0.0, 140.0),
            Err(AxisScaleError::Zero { axis: 'y' })
        );
        assert!(matches!(
            AxisScale::new(f64::NAN, 1.0, 1.0),
            Err(AxisScaleError::NonFinite { axis: 'x', .. })
        ));
        assert!(AxisScale::new(-1.0, 2.0, 3.0).is_ok());
    }

    #[test]
    fn sign_mask_rejects_non_signs() {
        let mut rows = *SignMask::TUNED.rows();
        rows[2][1] = 0.0;
        assert_eq!(
            SignMask::new(rows),
            Err(SignMaskError::NotASign {
                row: 2,
                col: 1,
                value: 0.0
            })
        );
    }

    #[test]
    fn sign_mask_is_an_involution() {
        let scale = AxisScale::new(200.0, 300.0, 130.0).unwrap();
        let rows = pose_rows([0.3, -1.2, 0.7], [12.0, -40.0, 650.0], &scale);
        let mask = SignMask::default();
        assert_eq!(mask.apply(&mask.apply(&rows)), rows);
    }

    #[test]
    fn rotation_block_is_orthonormal() {
        let converter = PoseConverter::default();
        let scale = AxisScale::new(250.0, 250.0, 100.0).unwrap();
        let rotations = [
            [0.0, 0.0, 0.0],
            [0.1, 0.2, 0.3],
            [std::f64::consts::PI, 0.0, 0.0],
            [-2.5, 0.4, 1.9],
            [1e-9, 0.0, -1e-9],
        ];

        for rvec in rotations {
            let observation = observation(rvec, [10.0, 20.0, 500.0]);
            let transform = converter.to_view_transform(&observation, &scale);
            let r = upper_left(&transform.matrix());
            let should_be_identity = r.transpose() * r;
            for col in 0..3 {
                for row in 0..3 {
                    let expected = if row == col { 1.0 } else { 0.0 };
                    assert_relative_eq!(
                        should_be_identity.col(col)[row],
                        expected,
                        epsilon = 1e-9
                    );
                }
            }
            assert_relative_eq!(r.determinant(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn conversion_is_deterministic() {
        let converter = PoseConverter::default();
        let scale = AxisScale::new(160.0, 372.0, 140.0).unwrap();
        let obs = observation([0.4, -0.1, 2.2], [55.5, -12.25, 780.0]);

        let a = converter.to_view_transform(&obs, &scale);
        let b = converter.to_view_transform(&obs, &scale);
        assert_eq!(a.to_cols_array(), b.to_cols_array());
    }

    #[test]
    fn identity_pose_divides_translation_by_scale() {
        let scale = AxisScale::new(160.0, 372.0, 140.0).unwrap();
        let rows = pose_rows([0.0, 0.0, 0.0], [160.0, 372.0, 140.0], &scale);

        assert_eq!(
            rows,
            [
                [1.0, 0.0, 0.0, 1.0],
                [0.0, 1.0, 0.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
                [0.0, 0.0, 0.0, 1.0],
            ]
        );

        let transform = PoseConverter::default()
            .to_view_transform(&observation([0.0; 3], [160.0, 372.0, 140.0]), &scale);
        assert_eq!(transform.translation(), DVec3::new(1.0, -1.0, -1.0));
        assert_eq!(
            upper_left(&transform.matrix()),
            DMat3::from_diagonal(DVec3::new(1.0, -1.0, -1.0))
        );
    }

    #[test]
    fn output_is_column_major() {
        let scale = AxisScale::new(1.0, 1.0, 1.0).unwrap();
        let transform = PoseConverter::new(SignMask::new([[1.0; 4]; 4]).unwrap())
            .to_view_transform(&observation([0.0, 0.0, 0.0], [3.0, 4.0, 5.0]), &scale);

        let cols = transform.to_cols_array();
        assert_eq!(&cols[12..16], &[3.0, 4.0, 5.0, 1.0]);
        assert_eq!(cols[3], 0.0);
    }

    #[test]
    fn rodrigues_matches_quarter_turn() {
        let r = rodrigues([0.0, 0.0, std::f64::consts::FRAC_PI_2]);
        let x = r * DVec3::X;
        assert_relative_eq!(x.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(x.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(x.z, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn non_finite_pose_is_detectable() {
        let scale = AxisScale::new(1.0, 1.0, 1.0).unwrap();
        let transform = PoseConverter::default()
            .to_view_transform(&observation([f64::NAN, 0.0, 0.0], [0.0, 0.0, 1.0]), &scale);
        assert!(!transform.is_finite());
    }
}
