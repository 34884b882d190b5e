use std::{
    borrow::Cow,
    path::{Path, PathBuf},
    sync::{
        mpsc::{self, channel},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use id_arena::{Arena, Id};
use notify_debouncer_mini::{
    new_debouncer_opt, notify::*, DebounceEventResult, DebouncedEventKind, Debouncer,
};
use pollster::block_on;
use wgpu::{PollType, RenderPipeline};

/// Shaders in this folder override the copies compiled into the binary and
/// are recompiled whenever they change on disk.
pub const SHADER_OVERRIDE_FOLDER: &str = "assets/shaders";

type PipelineFactory = Box<
    dyn Sync
        + Send
        + Fn(&wgpu::Device, &ShaderDefinition, &str) -> anyhow::Result<wgpu::RenderPipeline>,
>;

#[derive(Debug, Clone)]
pub(crate) struct ShaderDefinition {
    pub name: &'static str,
    /// File name inside the override folder.
    pub path: &'static str,
    pub builtin: &'static str,
}

impl ShaderDefinition {
    /// On-disk source when the override folder has one, the embedded copy otherwise.
    fn source(&self, folder: Option<&Path>) -> anyhow::Result<Cow<'static, str>> {
        let Some(path) = folder.map(|folder| folder.join(self.path)) else {
            return Ok(Cow::Borrowed(self.builtin));
        };

        if !path.is_file() {
            return Ok(Cow::Borrowed(self.builtin));
        }

        std::fs::read_to_string(&path)
            .map(Cow::Owned)
            .with_context(|| format!("Failed to read shader file {}", path.display()))
    }
}

struct ShaderEntry {
    pipeline_id: PipelineId,
    def: ShaderDefinition,
    factory: PipelineFactory,
}

pub type PipelineId = Id<CompiledPipeline>;

#[derive(Default)]
pub struct CompiledPipeline(Option<wgpu::RenderPipeline>);

#[derive(Default)]
pub struct PipelineCacheBuilder {
    shaders: Arena<ShaderEntry>,
    pipelines: Arena<CompiledPipeline>,
}

impl PipelineCacheBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_shader(
        &mut self,
        def: ShaderDefinition,
        factory: PipelineFactory,
    ) -> PipelineId {
        let pipeline_id = self.pipelines.alloc(CompiledPipeline::default());
        self.shaders.alloc(ShaderEntry {
            pipeline_id,
            def,
            factory,
        });
        pipeline_id
    }
}

pub struct PipelineCache {
    pipelines: Arena<CompiledPipeline>,
}

impl PipelineCache {
    pub fn get(&self, id: PipelineId) -> Option<&RenderPipeline> {
        self.pipelines.get(id).and_then(|entry| entry.0.as_ref())
    }

    fn replace(&mut self, id: PipelineId, pipeline: RenderPipeline) {
        if let Some(entry) = self.pipelines.get_mut(id) {
            entry.0 = Some(pipeline);
        }
    }
}

type ReloadedPipeline = (&'static str, PipelineId, wgpu::RenderPipeline);

/// Owns every render pipeline. Pipelines are compiled up front; when the
/// override folder exists it is watched and edited shaders are swapped in
/// at the start of the next frame.
pub(crate) struct ShaderLoader {
    pub cache: PipelineCache,
    reloads: Option<(mpsc::Receiver<ReloadedPipeline>, Debouncer<RecommendedWatcher>)>,
}

impl ShaderLoader {
    pub fn new(device: wgpu::Device, builder: PipelineCacheBuilder) -> anyhow::Result<Self> {
        let override_folder = Path::new(SHADER_OVERRIDE_FOLDER).canonicalize().ok();
        match &override_folder {
            Some(folder) => log::info!("Loading shaders from {}", folder.display()),
            None => log::debug!("No shader folder, using embedded shaders"),
        }

        let mut cache = PipelineCache {
            pipelines: builder.pipelines,
        };
        let shaders = Arc::new(builder.shaders);

        for (_, shader) in shaders.iter() {
            let pipeline = compile(&device, shader, override_folder.as_deref())
                .with_context(|| format!("Failed to compile shader: {}", shader.def.name))?;
            cache.replace(shader.pipeline_id, pipeline);
        }

        let reloads = match override_folder {
            Some(folder) => match watch(device, shaders, folder) {
                Ok(reloads) => Some(reloads),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {:#}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Self { cache, reloads })
    }

    pub(crate) fn load_pending_shaders(&mut self) {
        let Some((receiver, _)) = &self.reloads else {
            return;
        };

        while let Ok((name, pipeline_id, pipeline)) = receiver.try_recv() {
            log::info!("Shader reloaded: {}", name);
            self.cache.replace(pipeline_id, pipeline);
        }
    }
}

fn watch(
    device: wgpu::Device,
    shaders: Arc<Arena<ShaderEntry>>,
    folder: PathBuf,
) -> anyhow::Result<(mpsc::Receiver<ReloadedPipeline>, Debouncer<RecommendedWatcher>)> {
    let (sender, receiver) = channel();
    let compile_folder = folder.clone();

    let mut debouncer = new_debouncer_opt(
        notify_debouncer_mini::Config::default().with_timeout(Duration::from_millis(100)),
        move |res: DebounceEventResult| match res {
            Ok(events) => {
                for event in events {
                    if event.kind != DebouncedEventKind::Any {
                        continue;
                    }

                    let Some((_, entry)) = shaders
                        .iter()
                        .find(|(_, entry)| event.path.ends_with(entry.def.path))
                    else {
                        continue;
                    };

                    match compile(&device, entry, Some(&compile_folder)) {
                        Ok(pipeline) => {
                            if sender.send((entry.def.name, entry.pipeline_id, pipeline)).is_err() {
                                return;
                            }
                        }
                        Err(e) => log::error!("Failed to reload shader: {:?}", e),
                    }
                }
            }
            Err(e) => log::error!("Error debouncing shader changes: {}", e),
        },
    )
    .context("Failed to create shader watcher")?;

    debouncer
        .watcher()
        .watch(&folder, RecursiveMode::NonRecursive)
        .context("Failed to watch shader folder")?;

    Ok((receiver, debouncer))
}

fn compile(
    device: &wgpu::Device,
    shader: &ShaderEntry,
    folder: Option<&Path>,
) -> anyhow::Result<wgpu::RenderPipeline> {
    let source = shader.def.source(folder)?;

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let pipeline = (shader.factory)(device, &shader.def, &source);

    device
        .poll(PollType::Wait)
        .context("Failed to poll device after shader compilation.")?;

    if let Some(error) = block_on(device.pop_error_scope()) {
        anyhow::bail!("Shader compilation failed for {}: {}", shader.def.name, error);
    }

    pipeline
}
