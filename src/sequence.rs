use std::collections::HashMap;
use std::time::Duration;

use crate::assets::ModelId;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SequenceError {
    #[error("a sequence needs at least one stage")]
    Empty,
    #[error("stage {0} has a zero or negative duration")]
    ZeroStage(usize),
    #[error("stage durations add up to more than a Duration can hold")]
    TooLong,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub model: ModelId,
    pub duration: Duration,
}

/// Models shown one after another while a marker stays in view.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    stages: Vec<Stage>,
    repeat: bool,
    reset_after: Duration,
    total: Duration,
}

impl Sequence {
    pub fn new(
        stages: Vec<Stage>,
        repeat: bool,
        reset_after: Duration,
    ) -> Result<Self, SequenceError> {
        if stages.is_empty() {
            return Err(SequenceError::Empty);
        }
        if let Some(i) = stages.iter().position(|s| s.duration.is_zero()) {
            return Err(SequenceError::ZeroStage(i));
        }

        let total = stages
            .iter()
            .try_fold(Duration::ZERO, |total, s| total.checked_add(s.duration))
            .ok_or(SequenceError::TooLong)?;
        Ok(Self {
            stages,
            repeat,
            reset_after,
            total,
        })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn reset_after(&self) -> Duration {
        self.reset_after
    }

    /// Model to show `elapsed` after the marker first appeared. A sequence
    /// that does not repeat holds its last stage.
    pub fn model_at(&self, elapsed: Duration) -> ModelId {
        let mut t = if self.repeat {
            let nanos = elapsed.as_nanos() % self.total.as_nanos();
            Duration::new(
                (nanos / 1_000_000_000) as u64,
                (nanos % 1_000_000_000) as u32,
            )
        } else {
            elapsed
        };

        for stage in &self.stages {
            if t < stage.duration {
                return stage.model;
            }
            t -= stage.duration;
        }

        self.stages[self.stages.len() - 1].model
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeline {
    started_at: Duration,
    last_seen: Duration,
}

/// Per-marker clocks for sequences. A marker that disappears for longer than
/// its sequence's reset delay starts over from the first stage.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    timelines: HashMap<i32, Timeline>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_model(
        &mut self,
        marker_id: i32,
        sequence: &Sequence,
        now: Duration,
    ) -> ModelId {
        let timeline = self.timelines.entry(marker_id).or_insert(Timeline {
            started_at: now,
            last_seen: now,
        });

        let absent_for = now.saturating_sub(timeline.last_seen);
        if absent_for > sequence.reset_after() || now < timeline.started_at {
            log::debug!("Restarting sequence for marker {}", marker_id);
            timeline.started_at = now;
        }
        timeline.last_seen = now;

        sequence.model_at(now - timeline.started_at)
    }
}
