use anyhow::{bail, Context, Result};
use opencv::{
    calib3d,
    core::{Mat, Point2f, Point3f, Vector},
    objdetect::{
        self, ArucoDetector, DetectorParameters, Dictionary, PredefinedDictionaryType,
        RefineParameters,
    },
    prelude::*,
};

use crate::{
    calibration::CameraIntrinsics,
    config::DetectorConfig,
    frame::CameraFrame,
    marker::{centroid, MarkerDetector, MarkerObservation},
    vision::convert::{frame_to_gray, intrinsics_to_mats, mat_to_vec3},
};

pub fn parse_dictionary(name: &str) -> Result<Dictionary> {
    let dict_type = match name {
        "DICT_4X4_50" => PredefinedDictionaryType::DICT_4X4_50,
        "DICT_4X4_100" => PredefinedDictionaryType::DICT_4X4_100,
        "DICT_4X4_250" => PredefinedDictionaryType::DICT_4X4_250,
        "DICT_4X4_1000" => PredefinedDictionaryType::DICT_4X4_1000,
        "DICT_5X5_50" => PredefinedDictionaryType::DICT_5X5_50,
        "DICT_5X5_100" => PredefinedDictionaryType::DICT_5X5_100,
        "DICT_5X5_250" => PredefinedDictionaryType::DICT_5X5_250,
        "DICT_5X5_1000" => PredefinedDictionaryType::DICT_5X5_1000,
        "DICT_6X6_50" => PredefinedDictionaryType::DICT_6X6_50,
        "DICT_6X6_100" => PredefinedDictionaryType::DICT_6X6_100,
        "DICT_6X6_250" => PredefinedDictionaryType::DICT_6X6_250,
        "DICT_6X6_1000" => PredefinedDictionaryType::DICT_6X6_1000,
        "DICT_ARUCO_ORIGINAL" => PredefinedDictionaryType::DICT_ARUCO_ORIGINAL,
        _ => bail!("Unknown dictionary: {}", name),
    };
    objdetect::get_predefined_dictionary(dict_type).context("Failed to get predefined dictionary")
}

/// Corners of a square marker of side `length` centred on its origin, in the
/// order ArUco reports image corners.
fn marker_object_points(length: f32) -> Vector<Point3f> {
    let half = length / 2.0;
    Vector::from_iter([
        Point3f::new(-half, half, 0.0),
        Point3f::new(half, half, 0.0),
        Point3f::new(half, -half, 0.0),
        Point3f::new(-half, -half, 0.0),
    ])
}

pub struct ArucoMarkerDetector {
    detector: ArucoDetector,
    camera_matrix: Mat,
    dist_coeffs: Mat,
    object_points: Vector<Point3f>,
}

impl ArucoMarkerDetector {
    pub fn new(intrinsics: &CameraIntrinsics, config: &DetectorConfig) -> Result<Self> {
        let dictionary = parse_dictionary(&config.dictionary)?;
        let detector_params = DetectorParameters::default()?;
        let refine_params = RefineParameters::new(10.0, 3.0, true)?;
        let detector = ArucoDetector::new(&dictionary, &detector_params, refine_params)
            .context("Failed to create ArucoDetector")?;

        let (camera_matrix, dist_coeffs) = intrinsics_to_mats(intrinsics)?;

        log::info!(
            "Detecting {} markers, side length {}",
            config.dictionary,
            config.marker_length
        );

        Ok(Self {
            detector,
            camera_matrix,
            dist_coeffs,
            object_points: marker_object_points(config.marker_length),
        })
    }

    fn estimate_pose(&self, corners: &Vector<Point2f>) -> Result<Option<([f64; 3], [f64; 3])>> {
        let mut rvec = Mat::default();
        let mut tvec = Mat::default();

        let ok = calib3d::solve_pnp(
            &self.object_points,
            corners,
            &self.camera_matrix,
            &self.dist_coeffs,
            &mut rvec,
            &mut tvec,
            false,
            calib3d::SOLVEPNP_IPPE_SQUARE,
        )
        .context("solvePnP failed")?;

        if !ok {
            return Ok(None);
        }

        Ok(Some((mat_to_vec3(&rvec)?, mat_to_vec3(&tvec)?)))
    }
}

impl MarkerDetector for ArucoMarkerDetector {
    fn detect(&mut self, frame: &CameraFrame) -> Result<Vec<MarkerObservation>> {
        let gray = frame_to_gray(frame)?;

        let mut corners = Vector::<Vector<Point2f>>::new();
        let mut ids = Vector::<i32>::new();
        self.detector
            .detect_markers_def(&gray, &mut corners, &mut ids)
            .context("Marker detection failed")?;

        let mut observations = Vec::with_capacity(ids.len());
        for (id, marker_corners) in ids.iter().zip(corners.iter()) {
            if marker_corners.len() != 4 {
                continue;
            }

            let pose = match self.estimate_pose(&marker_corners) {
                Ok(Some(pose)) => pose,
                Ok(None) => {
                    log::debug!("No pose for marker {}", id);
                    continue;
                }
                Err(e) => {
                    log::debug!("Pose estimation failed for marker {}: {:#}", id, e);
                    continue;
                }
            };

            let points: [(f32, f32); 4] = [0, 1, 2, 3].map(|i| {
                let p = marker_corners.get(i).unwrap_or_default();
                (p.x, p.y)
            });

            observations.push(MarkerObservation {
                id,
                centroid: centroid(&points),
                rotation_vector: pose.0,
                translation_vector: pose.1,
            });
        }

        Ok(observations)
    }
}
