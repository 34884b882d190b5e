use std::time::Duration;

use glam::{Mat4, Vec2, Vec3};
use image::RgbaImage;

use crate::assets::ModelId;
use crate::config::BackgroundConfig;
use crate::frame::CameraFrame;
use crate::marker::MarkerObservation;
use crate::pose::{PoseConverter, ViewTransform};
use crate::registry::{ModelSchedule, SceneRegistry};
use crate::sequence::SequenceTracker;

/// The video plane, placed far enough behind the models that it never
/// occludes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundQuad {
    pub depth: f32,
    pub half_width: f32,
    pub half_height: f32,
}

impl Default for BackgroundQuad {
    fn default() -> Self {
        Self {
            depth: 10.0,
            half_width: 6.0,
            half_height: 3.0,
        }
    }
}

impl From<BackgroundConfig> for BackgroundQuad {
    fn from(config: BackgroundConfig) -> Self {
        Self {
            depth: config.depth,
            half_width: config.half_width,
            half_height: config.half_height,
        }
    }
}

impl BackgroundQuad {
    /// Bottom-left, bottom-right, top-right, top-left, with texture
    /// coordinates whose origin is the bottom-left corner.
    pub fn corners(&self) -> [(Vec3, Vec2); 4] {
        let (w, h, z) = (self.half_width, self.half_height, -self.depth);
        [
            (Vec3::new(-w, -h, z), Vec2::new(0.0, 0.0)),
            (Vec3::new(w, -h, z), Vec2::new(1.0, 0.0)),
            (Vec3::new(w, h, z), Vec2::new(1.0, 1.0)),
            (Vec3::new(-w, h, z), Vec2::new(0.0, 1.0)),
        ]
    }
}

/// Frame rows in bottom-up order, so that texture row 0 lands on the bottom
/// edge of the quad.
pub fn prepare_background(frame: &CameraFrame) -> RgbaImage {
    image::imageops::flip_vertical(&frame.image)
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
    Background,
    PushTransform,
    LoadTransform(ViewTransform),
    DrawModel { marker_id: i32, model: ModelId },
    PopTransform,
}

/// A model instance with the model-view matrix that was current when it was
/// recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelDraw {
    pub marker_id: i32,
    pub model: ModelId,
    pub model_view: Mat4,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StackError {
    #[error("transform stack popped while empty")]
    Underflow,
    #[error("transform stack left at depth {0}")]
    Unbalanced(usize),
}

#[derive(Debug, Clone)]
pub struct TransformStack {
    current: Mat4,
    saved: Vec<Mat4>,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self {
            current: Mat4::IDENTITY,
            saved: Vec::new(),
        }
    }
}

impl TransformStack {
    pub fn push(&mut self) {
        self.saved.push(self.current);
    }

    pub fn pop(&mut self) -> Result<(), StackError> {
        self.current = self.saved.pop().ok_or(StackError::Underflow)?;
        Ok(())
    }

    pub fn load(&mut self, matrix: Mat4) {
        self.current = matrix;
    }

    pub fn current(&self) -> Mat4 {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }
}

/// Everything to draw for one frame, in order.
#[derive(Debug, Clone, Default)]
pub struct DrawList {
    pub background: Option<RgbaImage>,
    pub quad: BackgroundQuad,
    pub commands: Vec<DrawCommand>,
}

impl DrawList {
    pub fn model_draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::DrawModel { .. }))
            .count()
    }

    /// Replays the commands against a transform stack and returns the model
    /// draws with their final matrices.
    pub fn resolve(&self) -> Result<Vec<ModelDraw>, StackError> {
        let mut stack = TransformStack::default();
        let mut draws = Vec::with_capacity(self.model_draw_count());

        for command in &self.commands {
            match command {
                DrawCommand::Background => {}
                DrawCommand::PushTransform => stack.push(),
                DrawCommand::LoadTransform(transform) => stack.load(transform.as_mat4()),
                DrawCommand::DrawModel { marker_id, model } => draws.push(ModelDraw {
                    marker_id: *marker_id,
                    model: *model,
                    model_view: stack.current(),
                }),
                DrawCommand::PopTransform => stack.pop()?,
            }
        }

        match stack.depth() {
            0 => Ok(draws),
            depth => Err(StackError::Unbalanced(depth)),
        }
    }
}

pub struct Compositor {
    converter: PoseConverter,
    quad: BackgroundQuad,
    sequences: SequenceTracker,
}

impl Compositor {
    pub fn new(converter: PoseConverter, quad: BackgroundQuad) -> Self {
        Self {
            converter,
            quad,
            sequences: SequenceTracker::new(),
        }
    }

    pub fn compose(
        &mut self,
        frame: Option<&CameraFrame>,
        observations: &[MarkerObservation],
        registry: &SceneRegistry,
        now: Duration,
    ) -> DrawList {
        let mut draw_list = DrawList {
            background: frame.map(prepare_background),
            quad: self.quad,
            commands: Vec::with_capacity(1 + observations.len() * 4),
        };
        draw_list.commands.push(DrawCommand::Background);

        for observation in observations {
            let Some(binding) = registry.get(observation.id) else {
                log::trace!("Marker {} is not registered", observation.id);
                continue;
            };

            let transform = self
                .converter
                .to_view_transform(observation, &binding.axis_scale);
            if !transform.is_finite() {
                log::warn!("Skipping marker {}: non-finite pose", observation.id);
                continue;
            }

            let model = match &binding.schedule {
                ModelSchedule::Single(model) => *model,
                ModelSchedule::Sequence(sequence) => {
                    self.sequences.active_model(observation.id, sequence, now)
                }
            };

            draw_list.commands.extend([
                DrawCommand::PushTransform,
                DrawCommand::LoadTransform(transform),
                DrawCommand::DrawModel {
                    marker_id: observation.id,
                    model,
                },
                DrawCommand::PopTransform,
            ]);
        }

        draw_list
    }
}
