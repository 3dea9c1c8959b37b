//! Feature extraction through a single wgpu compute dispatch.
//!
//! The device and pipeline are created once per process and shared. Each
//! model version gets a [`GpuSession`] holding its normalization buffers.
//! This path never falls back on its own: a missing adapter, a device error
//! or a non z-score normalization is returned to the caller.

use std::collections::HashMap;
use std::sync::{mpsc, Arc, OnceLock};

use forecast_config::{ModelConfig, FEATURE_COUNT};
use forecast_core::TailPoint;
use wgpu::util::DeviceExt;

use crate::backend::{ComputedFeatures, FeatureBackendKind, FeatureComputer};
use crate::cpu::{window_closes, ZscoreStats};
use crate::{ensure_finite, FeatureError, Features};

const FEATURES_SIZE: u64 = (FEATURE_COUNT * std::mem::size_of::<f32>()) as u64;

/// Uniform block of the feature kernel (16 bytes).
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FeatureParams {
    len: u32,
    epsilon: f32,
    _pad0: u32,
    _pad1: u32,
}

/// Device, queue and compiled feature pipeline.
pub struct GpuContext {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    adapter_name: String,
}

static GPU_CONTEXT: OnceLock<Result<Arc<GpuContext>, String>> = OnceLock::new();

/// Whether a GPU adapter and device could be acquired. Probed once.
pub fn is_gpu_supported() -> bool {
    GpuContext::shared().is_ok()
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

impl GpuContext {
    /// The process-wide context, created on first use.
    pub fn shared() -> Result<Arc<GpuContext>, FeatureError> {
        GPU_CONTEXT
            .get_or_init(|| match pollster::block_on(Self::new()) {
                Ok(ctx) => {
                    log::info!("GPU feature pipeline ready on {}", ctx.adapter_name);
                    Ok(Arc::new(ctx))
                }
                Err(e) => {
                    log::info!("GPU feature pipeline unavailable: {}", e);
                    Err(e)
                }
            })
            .clone()
            .map_err(FeatureError::GpuUnavailable)
    }

    async fn new() -> Result<Self, String> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| "no suitable GPU adapter".to_string())?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("forecast_features_device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::downlevel_defaults(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| format!("device request failed: {e}"))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Feature Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/features.wgsl").into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("feature_bind_group_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, false),
                uniform_entry(4),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Feature Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Feature Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("main"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            adapter_name,
        })
    }
}

/// Normalization buffers for one model version.
struct GpuSession {
    norm_mean: wgpu::Buffer,
    norm_std: wgpu::Buffer,
    params: wgpu::Buffer,
    /// Statistics the buffers were filled from.
    stats: ZscoreStats,
}

impl GpuSession {
    fn new(device: &wgpu::Device, model_ver: &str, stats: &ZscoreStats) -> Self {
        let norm_mean = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{model_ver} norm mean")),
            contents: bytemuck::cast_slice(&stats.mean),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let norm_std = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{model_ver} norm std")),
            contents: bytemuck::cast_slice(&stats.std),
            usage: wgpu::BufferUsages::STORAGE,
        });
        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Feature Params Buffer"),
            size: std::mem::size_of::<FeatureParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Self {
            norm_mean,
            norm_std,
            params,
            stats: *stats,
        }
    }
}

/// GPU feature pipeline with per-model-version sessions.
pub struct GpuFeatures {
    ctx: Arc<GpuContext>,
    sessions: HashMap<String, GpuSession>,
}

impl GpuFeatures {
    /// Acquire the shared GPU context.
    pub fn new() -> Result<Self, FeatureError> {
        Ok(Self {
            ctx: GpuContext::shared()?,
            sessions: HashMap::new(),
        })
    }

    /// Number of cached model sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Compute the feature vector for `tail` with one dispatch.
    pub fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<Features, FeatureError> {
        let closes = window_closes(tail, model)?;
        let stats = model
            .normalization
            .as_ref()
            .and_then(ZscoreStats::from_normalization)
            .ok_or(FeatureError::UnsupportedNormalization)?;

        let ctx = Arc::clone(&self.ctx);
        let device = &ctx.device;
        let stale = self
            .sessions
            .get(&model.model_ver)
            .is_some_and(|session| session.stats != stats);
        if stale {
            log::debug!("Normalization changed for {}, rebuilding GPU session", model.model_ver);
            self.sessions.remove(&model.model_ver);
        }
        let session = self
            .sessions
            .entry(model.model_ver.clone())
            .or_insert_with(|| {
                log::debug!("Creating GPU feature session for {}", model.model_ver);
                GpuSession::new(device, &model.model_ver, &stats)
            });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let features = dispatch(&ctx, session, &closes);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(FeatureError::Gpu(err.to_string()));
        }
        ensure_finite(features?)
    }
}

fn dispatch(ctx: &GpuContext, session: &GpuSession, closes: &[f32]) -> Result<Features, FeatureError> {
    let device = &ctx.device;
    let params = FeatureParams {
        len: closes.len() as u32,
        epsilon: session.stats.epsilon,
        _pad0: 0,
        _pad1: 0,
    };
    ctx.queue.write_buffer(&session.params, 0, bytemuck::bytes_of(&params));

    let closes_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("Closes Buffer"),
        contents: bytemuck::cast_slice(closes),
        usage: wgpu::BufferUsages::STORAGE,
    });
    let output = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Features Buffer"),
        size: FEATURES_SIZE,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Features Staging Buffer"),
        size: FEATURES_SIZE,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("feature_bind_group"),
        layout: &ctx.bind_group_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: closes_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: session.norm_mean.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: session.norm_std.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: output.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 4,
                resource: session.params.as_entire_binding(),
            },
        ],
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Feature Encoder"),
    });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Feature Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&ctx.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(1, 1, 1);
    }
    encoder.copy_buffer_to_buffer(&output, 0, &staging, 0, FEATURES_SIZE);
    ctx.queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(FeatureError::Gpu(format!("readback failed: {e}"))),
        Err(_) => return Err(FeatureError::Gpu("readback callback dropped".to_string())),
    }

    let mut features = [0.0f32; FEATURE_COUNT];
    {
        let data = slice.get_mapped_range();
        features.copy_from_slice(bytemuck::cast_slice::<u8, f32>(&data));
    }
    staging.unmap();
    Ok(features)
}

impl FeatureComputer for GpuFeatures {
    fn backend(&self) -> FeatureBackendKind {
        FeatureBackendKind::WebGpu
    }

    fn compute(&mut self, tail: &[TailPoint], model: &ModelConfig) -> Result<ComputedFeatures, FeatureError> {
        Ok(ComputedFeatures {
            features: GpuFeatures::compute(self, tail, model)?,
            backend: FeatureBackendKind::WebGpu,
        })
    }
}
