use anyhow::Result;
use opencv::{
    calib3d,
    core::{Mat, Point, Scalar},
    highgui, imgproc,
};

use crate::{
    calibration::CameraIntrinsics,
    frame::CameraFrame,
    marker::MarkerObservation,
    pipeline::FrameObserver,
    vision::convert::{frame_to_bgr, intrinsics_to_mats, vec3_to_mat},
};

/// Raw camera view with each detected marker's axes and id drawn on top.
pub struct OpenCvPreview {
    window_name: String,
    camera_matrix: Mat,
    dist_coeffs: Mat,
    axis_length: f32,
}

impl OpenCvPreview {
    pub fn new(
        window_name: impl Into<String>,
        intrinsics: &CameraIntrinsics,
        marker_length: f32,
    ) -> Result<Self> {
        let window_name = window_name.into();
        highgui::named_window(&window_name, highgui::WINDOW_AUTOSIZE)?;
        let (camera_matrix, dist_coeffs) = intrinsics_to_mats(intrinsics)?;

        Ok(Self {
            window_name,
            camera_matrix,
            dist_coeffs,
            axis_length: marker_length / 2.0,
        })
    }
}

impl FrameObserver for OpenCvPreview {
    fn show(&mut self, frame: &CameraFrame, observations: &[MarkerObservation]) -> Result<()> {
        let mut bgr = frame_to_bgr(frame)?;

        for observation in observations {
            let rvec = vec3_to_mat(&observation.rotation_vector)?;
            let tvec = vec3_to_mat(&observation.translation_vector)?;
            calib3d::draw_frame_axes_def(
                &mut bgr,
                &self.camera_matrix,
                &self.dist_coeffs,
                &rvec,
                &tvec,
                self.axis_length,
            )?;

            let (x, y) = observation.centroid;
            imgproc::put_text(
                &mut bgr,
                &observation.id.to_string(),
                Point::new(x as i32 + 8, y as i32 - 8),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.7,
                Scalar::new(0.0, 255.0, 0.0, 0.0),
                2,
                imgproc::LINE_8,
                false,
            )?;
        }

        highgui::imshow(&self.window_name, &bgr)?;
        highgui::wait_key(1)?;
        Ok(())
    }
}

impl Drop for OpenCvPreview {
    fn drop(&mut self) {
        let _ = highgui::destroy_window(&self.window_name);
    }
}
