use std::collections::HashMap;
use std::time::Duration;

use crate::assets::{ModelId, ModelStore};
use crate::config::MarkerConfig;
use crate::pose::{AxisScale, AxisScaleError};
use crate::sequence::{Sequence, SequenceError, Stage};

#[derive(thiserror::Error, Debug)]
pub enum RegistrationError {
    #[error("marker {id}: {source}")]
    AxisScale { id: i32, source: AxisScaleError },
    #[error("marker {id}: {source}")]
    Sequence { id: i32, source: SequenceError },
    #[error("marker {id} refers to unknown model '{role}'")]
    UnknownModel { id: i32, role: String },
    #[error("marker {id}: stage {stage} has invalid duration {seconds}")]
    InvalidStageDuration { id: i32, stage: usize, seconds: f64 },
    #[error("marker {id}: invalid reset delay {seconds}")]
    InvalidResetDelay { id: i32, seconds: f64 },
    #[error("marker {0} is registered more than once")]
    DuplicateMarker(i32),
    #[error("marker {0} needs either `model` or `sequence`")]
    MissingDisplay(i32),
    #[error("marker {0} sets both `model` and `sequence`")]
    AmbiguousDisplay(i32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSchedule {
    Single(ModelId),
    Sequence(Sequence),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerBinding {
    pub schedule: ModelSchedule,
    pub axis_scale: AxisScale,
}

/// Marker id to what is drawn on it. Fixed after startup.
#[derive(Debug, Default)]
pub struct SceneRegistry {
    bindings: HashMap<i32, MarkerBinding>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: i32, binding: MarkerBinding) -> Result<(), RegistrationError> {
        if self.bindings.contains_key(&id) {
            return Err(RegistrationError::DuplicateMarker(id));
        }
        self.bindings.insert(id, binding);
        Ok(())
    }

    pub fn get(&self, id: i32) -> Option<&MarkerBinding> {
        self.bindings.get(&id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = i32> + '_ {
        self.bindings.keys().copied()
    }

    pub fn from_config(
        markers: &[MarkerConfig],
        models: &ModelStore,
    ) -> Result<Self, RegistrationError> {
        let mut registry = SceneRegistry::new();

        for marker in markers {
            let binding = binding_from_config(marker, models)?;
            registry.insert(marker.id, binding)?;
        }

        log::info!("Registered {} markers", registry.len());
        Ok(registry)
    }
}

fn binding_from_config(
    marker: &MarkerConfig,
    models: &ModelStore,
) -> Result<MarkerBinding, RegistrationError> {
    let id = marker.id;
    let axis_scale = AxisScale::from_array(marker.axis_scale)
        .map_err(|source| RegistrationError::AxisScale { id, source })?;

    let resolve = |role: &str| {
        models
            .by_role(role)
            .ok_or_else(|| RegistrationError::UnknownModel {
                id,
                role: role.to_string(),
            })
    };

    let schedule = match (&marker.model, &marker.sequence) {
        (Some(role), None) => ModelSchedule::Single(resolve(role)?),
        (None, Some(stages)) => {
            let stages = stages
                .iter()
                .enumerate()
                .map(|(stage, config)| {
                    let duration = Duration::try_from_secs_f64(config.seconds).map_err(|_| {
                        RegistrationError::InvalidStageDuration {
                            id,
                            stage,
                            seconds: config.seconds,
                        }
                    })?;
                    Ok(Stage {
                        model: resolve(&config.model)?,
                        duration,
                    })
                })
                .collect::<Result<Vec<_>, RegistrationError>>()?;

            let reset_after = Duration::try_from_secs_f64(marker.reset_after_seconds).map_err(|_| {
                RegistrationError::InvalidResetDelay {
                    id,
                    seconds: marker.reset_after_seconds,
                }
            })?;

            let sequence = Sequence::new(stages, marker.repeat, reset_after)
                .map_err(|source| RegistrationError::Sequence { id, source })?;
            ModelSchedule::Sequence(sequence)
        }
        (None, None) => return Err(RegistrationError::MissingDisplay(id)),
        (Some(_), Some(_)) => return Err(RegistrationError::AmbiguousDisplay(id)),
    };

    Ok(MarkerBinding { schedule, axis_scale })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, StageConfig};
    use crate::model::Model;
    use image::RgbaImage;

    fn store() -> ModelStore {
        let mut store = ModelStore::new();
        for role in ["stone-high", "pitcher-low", "pitcher-medium"] {
            store
                .insert(role, Model::textured_quad(role, RgbaImage::new(1, 1)))
                .unwrap();
        }
        store
    }

    fn single(id: i32, role: &str) -> MarkerConfig {
        MarkerConfig {
            id,
            axis_scale: [1.0, 1.0, 1.0],
            model: Some(role.to_string()),
            sequence: None,
            repeat: true,
            reset_after_seconds: 1.0,
        }
    }

    #[test]
    fn default_rig_registers() {
        let config = AppConfig::default();
        let store = store();
        let registry = SceneRegistry::from_config(&config.markers, &store).unwrap();

        assert_eq!(registry.len(), 2);
        let stone = registry.get(0).unwrap();
        assert_eq!(
            stone.schedule,
            ModelSchedule::Single(store.by_role("stone-high").unwrap())
        );
        assert_eq!(stone.axis_scale, AxisScale::new(200.0, 300.0, 130.0).unwrap());

        match &registry.get(2).unwrap().schedule {
            ModelSchedule::Sequence(sequence) => assert_eq!(sequence.stages().len(), 2),
            other => panic!("expected a sequence, got {other:?}"),
        }
        assert!(registry.get(1).is_none());

        let mut ids: Vec<i32> = registry.ids().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn unknown_model_is_rejected() {
        let err = SceneRegistry::from_config(&[single(4, "teapot")], &store()).unwrap_err();
        assert!(matches!(err, RegistrationError::UnknownModel { id: 4, .. }));
    }

    #[test]
    fn duplicate_marker_is_rejected() {
        let markers = [single(0, "stone-high"), single(0, "pitcher-low")];
        let err = SceneRegistry::from_config(&markers, &store()).unwrap_err();
        assert!(matches!(err, RegistrationError::DuplicateMarker(0)));
    }

    #[test]
    fn zero_axis_scale_is_rejected() {
        let mut marker = single(3, "stone-high");
        marker.axis_scale = [1.0, 0.0, 1.0];
        let err = SceneRegistry::from_config(&[marker], &store()).unwrap_err();
        assert!(matches!(err, RegistrationError::AxisScale { id: 3, .. }));
    }

    #[test]
    fn negative_stage_duration_is_rejected() {
        let mut marker = single(2, "stone-high");
        marker.model = None;
        marker.sequence = Some(vec![StageConfig {
            model: "pitcher-low".to_string(),
            seconds: -3.0,
        }]);
        let err = SceneRegistry::from_config(&[marker], &store()).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::InvalidStageDuration {
                id: 2,
                stage: 0,
                ..
            }
        ));
    }

    #[test]
    fn overlong_sequence_is_rejected() {
        let mut marker = single(2, "stone-high");
        marker.model = None;
        marker.sequence = Some(vec![
            StageConfig {
                model: "pitcher-low".to_string(),
                seconds: 1.0e19,
            },
            StageConfig {
                model: "pitcher-medium".to_string(),
                seconds: 1.0e19,
            },
        ]);
        let err = SceneRegistry::from_config(&[marker], &store()).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::Sequence {
                id: 2,
                source: SequenceError::TooLong
            }
        ));
    }

    #[test]
    fn marker_needs_exactly_one_display() {
        let mut marker = single(5, "stone-high");
        marker.model = None;
        assert!(matches!(
            SceneRegistry::from_config(&[marker.clone()], &store()),
            Err(RegistrationError::MissingDisplay(5))
        ));

        marker.model = Some("stone-high".to_string());
        marker.sequence = Some(vec![]);
        assert!(matches!(
            SceneRegistry::from_config(&[marker], &store()),
            Err(RegistrationError::AmbiguousDisplay(5))
        ));
    }
}
