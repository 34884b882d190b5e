use crate::compositor::{Compositor, DrawList};
use crate::frame::{CameraFrame, FrameAcquisitionError, FrameSource};
use crate::marker::{MarkerDetector, MarkerObservation};
use crate::registry::SceneRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Rendering,
}

pub enum FrameOutcome {
    /// No frame was ready, or acquisition failed.
    Skipped,
    Rendered {
        draw_list: DrawList,
        frame: CameraFrame,
        observations: Vec<MarkerObservation>,
    },
}

/// Receives every processed frame together with its detections, e.g. for a
/// diagnostic preview window.
pub trait FrameObserver {
    fn show(
        &mut self,
        frame: &CameraFrame,
        observations: &[MarkerObservation],
    ) -> anyhow::Result<()>;
}

/// Drives one capture → detect → compose cycle per call.
pub struct FramePipeline {
    state: LoopState,
    compositor: Compositor,
    frames_rendered: u64,
    frames_skipped: u64,
}

impl FramePipeline {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            state: LoopState::Idle,
            compositor,
            frames_rendered: 0,
            frames_skipped: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    pub fn step(
        &mut self,
        source: &mut dyn FrameSource,
        detector: &mut dyn MarkerDetector,
        registry: &SceneRegistry,
    ) -> FrameOutcome {
        let frame = match source.poll_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.frames_skipped += 1;
                return FrameOutcome::Skipped;
            }
            Err(FrameAcquisitionError::Empty) => {
                log::debug!("Camera returned an empty frame");
                self.frames_skipped += 1;
                return FrameOutcome::Skipped;
            }
            Err(err) => {
                log::warn!("Frame acquisition failed: {}", err);
                self.frames_skipped += 1;
                return FrameOutcome::Skipped;
            }
        };

        self.state = LoopState::Rendering;

        let observations = match detector.detect(&frame) {
            Ok(observations) => observations,
            Err(err) => {
                log::warn!("Marker detection failed on frame {}: {:#}", frame.index, err);
                Vec::new()
            }
        };
        log::trace!("Frame {}: {} markers", frame.index, observations.len());

        let draw_list = self
            .compositor
            .compose(Some(&frame), &observations, registry, frame.timestamp);

        self.frames_rendered += 1;
        self.state = LoopState::Idle;

        FrameOutcome::Rendered {
            draw_list,
            frame,
            observations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ModelStore;
    use crate::compositor::BackgroundQuad;
    use crate::model::Model;
    use crate::pose::{AxisScale, PoseConverter};
    use crate::registry::{MarkerBinding, ModelSchedule};
    use image::RgbaImage;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource {
        frames: VecDeque<Result<Option<CameraFrame>, FrameAcquisitionError>>,
    }

    impl FrameSource for ScriptedSource {
        fn poll_frame(&mut self) -> Result<Option<CameraFrame>, FrameAcquisitionError> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }
    }

    struct FixedDetector {
        result: Option<Vec<MarkerObservation>>,
    }

    impl MarkerDetector for FixedDetector {
        fn detect(&mut self, _frame: &CameraFrame) -> anyhow::Result<Vec<MarkerObservation>> {
            self.result
                .clone()
                .ok_or_else(|| anyhow::anyhow!("detector exploded"))
        }
    }

    fn frame(index: u64) -> CameraFrame {
        CameraFrame {
            image: RgbaImage::new(4, 4),
            index,
            timestamp: Duration::from_millis(index * 33),
        }
    }

    fn marker(id: i32) -> MarkerObservation {
        MarkerObservation {
            id,
            centroid: (2.0, 2.0),
            rotation_vector: [0.0, 0.0, 0.0],
            translation_vector: [0.0, 0.0, 300.0],
        }
    }

    fn registry() -> SceneRegistry {
        let mut store = ModelStore::new();
        let stone = store
            .insert("stone", Model::textured_quad("stone", RgbaImage::new(1, 1)))
            .unwrap();
        let mut registry = SceneRegistry::new();
        registry
            .insert(
                0,
                MarkerBinding {
                    schedule: ModelSchedule::Single(stone),
                    axis_scale: AxisScale::new(100.0, 100.0, 100.0).unwrap(),
                },
            )
            .unwrap();
        registry
    }

    fn pipeline() -> FramePipeline {
        FramePipeline::new(Compositor::new(PoseConverter::default(), BackgroundQuad::default()))
    }

    #[test]
    fn skips_when_no_frame_is_ready() {
        let mut source = ScriptedSource {
            frames: VecDeque::from([Ok(None), Err(FrameAcquisitionError::Empty)]),
        };
        let mut detector = FixedDetector {
            result: Some(vec![]),
        };
        let mut pipeline = pipeline();
        let registry = registry();

        assert!(matches!(
            pipeline.step(&mut source, &mut detector, &registry),
            FrameOutcome::Skipped
        ));
        assert!(matches!(
            pipeline.step(&mut source, &mut detector, &registry),
            FrameOutcome::Skipped
        ));
        assert_eq!(pipeline.frames_skipped(), 2);
        assert_eq!(pipeline.state(), LoopState::Idle);
    }

    #[test]
    fn renders_registered_markers() {
        let mut source = ScriptedSource {
            frames: VecDeque::from([Ok(Some(frame(1)))]),
        };
        let mut detector = FixedDetector {
            result: Some(vec![marker(0), marker(5)]),
        };
        let mut pipeline = pipeline();

        match pipeline.step(&mut source, &mut detector, &registry()) {
            FrameOutcome::Rendered {
                draw_list,
                frame,
                observations,
            } => {
                assert_eq!(frame.index, 1);
                assert_eq!(observations.len(), 2);
                assert_eq!(draw_list.model_draw_count(), 1);
                assert!(draw_list.background.is_some());
            }
            FrameOutcome::Skipped => panic!("frame should have been rendered"),
        }
        assert_eq!(pipeline.frames_rendered(), 1);
        assert_eq!(pipeline.state(), LoopState::Idle);
    }

    #[test]
    fn detection_failure_still_draws_background() {
        let mut source = ScriptedSource {
            frames: VecDeque::from([Ok(Some(frame(0)))]),
        };
        let mut detector = FixedDetector { result: None };

        match pipeline().step(&mut source, &mut detector, &registry()) {
            FrameOutcome::Rendered { draw_list, .. } => {
                assert!(draw_list.background.is_some());
                assert_eq!(draw_list.model_draw_count(), 0);
            }
            FrameOutcome::Skipped => panic!("frame should have been rendered"),
        }
    }

    #[test]
    fn device_error_is_not_fatal() {
        let mut source = ScriptedSource {
            frames: VecDeque::from([
                Err(FrameAcquisitionError::Device("unplugged".to_string())),
                Ok(Some(frame(2))),
            ]),
        };
        let mut detector = FixedDetector {
            result: Some(vec![]),
        };
        let mut pipeline = pipeline();
        let registry = registry();

        assert!(matches!(
            pipeline.step(&mut source, &mut detector, &registry),
            FrameOutcome::Skipped
        ));
        assert!(matches!(
            pipeline.step(&mut source, &mut detector, &registry),
            FrameOutcome::Rendered { .. }
        ));
    }
}
