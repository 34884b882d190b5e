use crate::frame::CameraFrame;

/// One fiducial seen in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerObservation {
    pub id: i32,
    /// Mean of the four detected corners, in pixels.
    pub centroid: (f32, f32),
    /// Exponential-map rotation, camera frame.
    pub rotation_vector: [f64; 3],
    /// Marker origin in camera coordinates, in the unit of the marker length.
    pub translation_vector: [f64; 3],
}

/// Turns a frame into marker observations.
///
/// An empty result means no markers were visible and is not an error.
pub trait MarkerDetector {
    fn detect(&mut self, frame: &CameraFrame) -> anyhow::Result<Vec<MarkerObservation>>;
}

pub fn centroid(corners: &[(f32, f32); 4]) -> (f32, f32) {
    let (sum_x, sum_y) = corners
        .iter()
        .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
    (sum_x / 4.0, sum_y / 4.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centroid_is_corner_mean() {
        let corners = [(10.0, 20.0), (30.0, 20.0), (30.0, 60.0), (10.0, 60.0)];
        assert_eq!(centroid(&corners), (20.0, 40.0));
    }
}
