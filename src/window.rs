use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, StartCause, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::{
    config::{ProjectionConfig, WindowConfig},
    context::ArContext,
    frame::FrameSource,
    marker::MarkerDetector,
    pipeline::{FrameObserver, FrameOutcome, FramePipeline},
    rendering::{projection::Projection, renderer::Renderer},
};

/// Capture, detection and preview, handed to the window loop.
pub struct FrameInputs {
    pub source: Box<dyn FrameSource>,
    pub detector: Box<dyn MarkerDetector>,
    pub observer: Option<Box<dyn FrameObserver>>,
}

/// How long to sleep before polling the camera again when no frame was ready.
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    /// A frame was presented; presentation already waits for vsync.
    RedrawNow,
    /// Nothing was presented, so nothing blocked. Sleep until the deadline.
    WaitUntil(Instant),
}

impl Pacing {
    fn after_step(rendered: bool, now: Instant) -> Self {
        if rendered {
            Pacing::RedrawNow
        } else {
            Pacing::WaitUntil(now + FRAME_POLL_INTERVAL)
        }
    }
}

struct App {
    window_config: WindowConfig,
    projection: Projection,
    context: ArContext,
    pipeline: FramePipeline,
    inputs: FrameInputs,
    renderer: Option<Renderer>,
    startup_error: Option<anyhow::Error>,
}

impl App {
    fn create_renderer(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<Renderer> {
        let window_attributes = Window::default_attributes()
            .with_title(self.window_config.title.clone())
            .with_inner_size(LogicalSize::new(
                self.window_config.width,
                self.window_config.height,
            ));
        let window = event_loop
            .create_window(window_attributes)
            .context("Failed to create window")?;

        let mut renderer = pollster::block_on(Renderer::new(Arc::new(window), self.projection))?;
        renderer.load_models(&self.context.models);
        Ok(renderer)
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let outcome = self.pipeline.step(
            self.inputs.source.as_mut(),
            self.inputs.detector.as_mut(),
            &self.context.registry,
        );

        let rendered = matches!(outcome, FrameOutcome::Rendered { .. });
        match Pacing::after_step(rendered, Instant::now()) {
            Pacing::RedrawNow => renderer.window.request_redraw(),
            Pacing::WaitUntil(deadline) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(deadline))
            }
        }

        let FrameOutcome::Rendered {
            draw_list,
            frame,
            observations,
        } = outcome
        else {
            return;
        };

        if let Some(observer) = self.inputs.observer.as_mut() {
            if let Err(e) = observer.show(&frame, &observations) {
                log::warn!("Preview failed, disabling it: {:#}", e);
                self.inputs.observer = None;
            }
        }

        match renderer.render(&draw_list) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                renderer.resize(renderer.size);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Out of memory");
                event_loop.exit();
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Timeout");
            }
            Err(other) => {
                log::error!("Unexpected error: {:?}", other);
            }
        }
    }
}

impl ApplicationHandler for App {
    fn new_events(&mut self, event_loop: &ActiveEventLoop, cause: StartCause) {
        if let StartCause::ResumeTimeReached { .. } = cause {
            event_loop.set_control_flow(ControlFlow::Wait);
            if let Some(renderer) = &self.renderer {
                renderer.window.request_redraw();
            }
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }

        match self.create_renderer(event_loop) {
            Ok(renderer) => {
                renderer.window.request_redraw();
                self.renderer = Some(renderer);
            }
            Err(e) => {
                self.startup_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.resize(new_size);
                }
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => (),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!(
            "Rendered {} frames, skipped {} polls",
            self.pipeline.frames_rendered(),
            self.pipeline.frames_skipped()
        );
    }
}

pub fn run(
    window_config: WindowConfig,
    projection: ProjectionConfig,
    context: ArContext,
    inputs: FrameInputs,
) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;

    let mut app = App {
        window_config,
        projection: Projection::from(projection),
        pipeline: FramePipeline::new(context.compositor()),
        context,
        inputs,
        renderer: None,
        startup_error: None,
    };
    event_loop.run_app(&mut app)?;

    match app.startup_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
