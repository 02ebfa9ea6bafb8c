// SPDX-License-Identifier: GPL-3.0-only

//! GPU mesh reduction processor
//!
//! Runs one reduction job as a sequence of compute dispatches over flat
//! buffers: mark referenced vertices, build the nested count hierarchy,
//! scan offsets (coarsest level on the CPU, the rest on the GPU), then
//! compact vertices and rewrite triangle indices into the pending output
//! generation. The control flow blocks at exactly two points per job:
//! after the counting passes, to read the coarsest counts back for the
//! sequential top-level scan, and at job completion before the results
//! are flagged for publishing.

use crate::config::ReducerConfig;
use crate::constants::{
    COARSE_STRIDE, RECORD_STRIDE, UNIFORM_SLOT_STRIDE, WORKGROUP_SIZE, expand_to_coarse,
    round_up_pow_2,
};
use crate::errors::{EngineResult, ExportError, GpuError};
use crate::gpu;
use crate::shaders::{compute_dispatch_size, read_buffer_async, wait_for_queue};
use crate::submesh::Submesh;
use std::sync::Arc;
use tracing::{debug, info};

use super::generation::{CurrentGeneration, GenerationStore};
use super::{COUNT_SCAN_WGSL, MARK_WGSL, REDUCE_WGSL};

/// Buffer families whose capacity is managed independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Per-submesh uniform slots
    Mesh,
    /// Mark/count/offset/input buffers sized by the job's vertex total
    Vertex,
    /// Input index storage sized by the job's triangle total
    Triangle,
}

/// Per-submesh uniform data, one 256-byte slot per submesh so dispatches
/// select their slot with a dynamic offset.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SubmeshParams {
    vertex_count: u32,
    triangle_count: u32,
    vertex_base: u32,
    triangle_base: u32,
    translation: [f32; 4],
}

/// Per-stage uniform data for the count/scan kernels
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LevelParams {
    num_groups: u32,
    group_size: u32,
    _pad: [u32; 2],
}

const SUBMESH_PARAMS_BINDING: Option<wgpu::BufferSize> =
    wgpu::BufferSize::new(std::mem::size_of::<SubmeshParams>() as u64);
const LEVEL_PARAMS_BINDING: Option<wgpu::BufferSize> =
    wgpu::BufferSize::new(std::mem::size_of::<LevelParams>() as u64);

// Fixed uniform slots of the count/scan stages, finest count level first
const STAGE_COUNT_4: u32 = 0;
const STAGE_COUNT_16: u32 = 1;
const STAGE_COUNT_64: u32 = 2;
const STAGE_COUNT_512: u32 = 3;
const STAGE_SCAN_COARSE: u32 = 4;
const STAGE_SCAN_512: u32 = 5;
const STAGE_SCAN_64: u32 = 6;
const STAGE_SCAN_16: u32 = 7;
const STAGE_SCAN_MARKS: u32 = 8;
const LEVEL_STAGES: u32 = 9;

/// Bridge buffers between the reduction stages, all sized by the vertex
/// capacity. Replaced wholesale when the capacity grows; contents never
/// survive a growth because the next pass rewrites everything.
struct BridgeBuffers {
    marks: wgpu::Buffer,
    counts_4: wgpu::Buffer,
    counts_16: wgpu::Buffer,
    counts_64: wgpu::Buffer,
    counts_512: wgpu::Buffer,
    counts_4096: wgpu::Buffer,
    offsets_4096: wgpu::Buffer,
    offsets_512: wgpu::Buffer,
    offsets_64: wgpu::Buffer,
    offsets_16: wgpu::Buffer,
    offsets_4: wgpu::Buffer,
    vertex_slots: wgpu::Buffer,
    counts_staging: wgpu::Buffer,
    input_positions: wgpu::Buffer,
    input_normals: wgpu::Buffer,
}

impl BridgeBuffers {
    fn new(device: &wgpu::Device, vertex_capacity: u32) -> Self {
        let storage = |label: &str, elements: u32, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: elements as u64 * 4,
                usage,
                mapped_at_creation: false,
            })
        };
        let plain = wgpu::BufferUsages::STORAGE;

        Self {
            marks: storage(
                "reduce_marks",
                vertex_capacity,
                plain | wgpu::BufferUsages::COPY_DST,
            ),
            counts_4: storage("reduce_counts_4", vertex_capacity >> 2, plain),
            counts_16: storage("reduce_counts_16", vertex_capacity >> 4, plain),
            counts_64: storage("reduce_counts_64", vertex_capacity >> 6, plain),
            counts_512: storage("reduce_counts_512", vertex_capacity >> 9, plain),
            counts_4096: storage(
                "reduce_counts_4096",
                vertex_capacity >> 12,
                plain | wgpu::BufferUsages::COPY_SRC,
            ),
            offsets_4096: storage(
                "reduce_offsets_4096",
                vertex_capacity >> 12,
                plain | wgpu::BufferUsages::COPY_DST,
            ),
            offsets_512: storage("reduce_offsets_512", vertex_capacity >> 9, plain),
            offsets_64: storage("reduce_offsets_64", vertex_capacity >> 6, plain),
            offsets_16: storage("reduce_offsets_16", vertex_capacity >> 4, plain),
            offsets_4: storage("reduce_offsets_4", vertex_capacity >> 2, plain),
            vertex_slots: storage("reduce_vertex_slots", vertex_capacity, plain),
            counts_staging: storage(
                "reduce_counts_staging",
                vertex_capacity >> 12,
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            ),
            input_positions: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("reduce_input_positions"),
                size: vertex_capacity as u64 * RECORD_STRIDE as u64,
                usage: plain | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
            input_normals: device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("reduce_input_normals"),
                size: vertex_capacity as u64 * RECORD_STRIDE as u64,
                usage: plain | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }),
        }
    }
}

/// GPU mesh reduction processor.
///
/// Owns the compute pipelines, the capacity-managed working buffers and
/// both output generations. One instance runs at most one job at a time;
/// callers serialize access (the engine holds it behind a mutex).
pub struct MeshReducer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    mark_pipeline: wgpu::ComputePipeline,
    count_pipeline: wgpu::ComputePipeline,
    scan_coarse_pipeline: wgpu::ComputePipeline,
    scan_level_pipeline: wgpu::ComputePipeline,
    scan_marks_pipeline: wgpu::ComputePipeline,
    reduce_pipeline: wgpu::ComputePipeline,

    count_scan_layout: wgpu::BindGroupLayout,
    mark_layout: wgpu::BindGroupLayout,
    reduce_layout: wgpu::BindGroupLayout,

    level_params: wgpu::Buffer,
    scratch: wgpu::Buffer,

    mesh_capacity: u32,
    vertex_capacity: u32,
    triangle_capacity: u32,
    submesh_params: wgpu::Buffer,
    bridge: BridgeBuffers,
    input_indices: wgpu::Buffer,

    generations: GenerationStore,
}

impl MeshReducer {
    /// Create a new GPU mesh reduction processor
    pub async fn new(config: ReducerConfig) -> Result<Self, GpuError> {
        info!("Initializing GPU mesh reduction processor");

        let (device, queue, gpu_info) = gpu::create_compute_device("mesh_reduce_gpu").await?;

        info!(
            adapter_name = %gpu_info.adapter_name,
            adapter_backend = ?gpu_info.backend,
            "GPU device created for mesh reduction"
        );

        let config = config.normalized();

        let count_scan_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("count_scan_shader"),
            source: wgpu::ShaderSource::Wgsl(COUNT_SCAN_WGSL.into()),
        });
        let mark_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mark_shader"),
            source: wgpu::ShaderSource::Wgsl(MARK_WGSL.into()),
        });
        let reduce_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("reduce_shader"),
            source: wgpu::ShaderSource::Wgsl(REDUCE_WGSL.into()),
        });

        let storage_entry = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_entry = |binding: u32, size: Option<wgpu::BufferSize>| {
            wgpu::BindGroupLayoutEntry {
                binding,
                visibility: wgpu::ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: size,
                },
                count: None,
            }
        };

        let count_scan_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("count_scan_bind_group_layout"),
                entries: &[
                    storage_entry(0, true),
                    storage_entry(1, true),
                    storage_entry(2, false),
                    storage_entry(3, false),
                    uniform_entry(4, LEVEL_PARAMS_BINDING),
                ],
            });
        let mark_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("mark_bind_group_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, false),
                uniform_entry(2, SUBMESH_PARAMS_BINDING),
            ],
        });
        let reduce_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("reduce_bind_group_layout"),
            entries: &[
                storage_entry(0, true),
                storage_entry(1, true),
                storage_entry(2, true),
                storage_entry(3, true),
                storage_entry(4, true),
                storage_entry(5, false),
                storage_entry(6, false),
                storage_entry(7, false),
                uniform_entry(8, SUBMESH_PARAMS_BINDING),
            ],
        });

        let pipeline = |label: &str,
                        layout: &wgpu::BindGroupLayout,
                        module: &wgpu::ShaderModule,
                        entry_point: &str| {
            let pipeline_layout =
                device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[layout],
                    push_constant_ranges: &[],
                });
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                module,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };

        let mark_pipeline = pipeline(
            "mark_vertices_pipeline",
            &mark_layout,
            &mark_shader,
            "mark_vertices",
        );
        let count_pipeline = pipeline(
            "count_groups_pipeline",
            &count_scan_layout,
            &count_scan_shader,
            "count_groups",
        );
        let scan_coarse_pipeline = pipeline(
            "scan_coarse_pipeline",
            &count_scan_layout,
            &count_scan_shader,
            "scan_coarse",
        );
        let scan_level_pipeline = pipeline(
            "scan_level_pipeline",
            &count_scan_layout,
            &count_scan_shader,
            "scan_level",
        );
        let scan_marks_pipeline = pipeline(
            "scan_marks_pipeline",
            &count_scan_layout,
            &count_scan_shader,
            "scan_marks",
        );
        let reduce_pipeline = pipeline(
            "reduce_submesh_pipeline",
            &reduce_layout,
            &reduce_shader,
            "reduce_submesh",
        );

        let level_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reduce_level_params"),
            size: LEVEL_STAGES as u64 * UNIFORM_SLOT_STRIDE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        // Placeholder read-write binding for stages with a single output
        let scratch = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reduce_scratch"),
            size: 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let submesh_params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reduce_submesh_params"),
            size: config.mesh_capacity as u64 * UNIFORM_SLOT_STRIDE as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bridge = BridgeBuffers::new(&device, config.vertex_capacity);
        let input_indices = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("reduce_input_indices"),
            size: config.triangle_capacity as u64 * 12,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let generations =
            GenerationStore::new(&device, config.vertex_capacity, config.triangle_capacity);

        Ok(Self {
            device,
            queue,
            mark_pipeline,
            count_pipeline,
            scan_coarse_pipeline,
            scan_level_pipeline,
            scan_marks_pipeline,
            reduce_pipeline,
            count_scan_layout,
            mark_layout,
            reduce_layout,
            level_params,
            scratch,
            mesh_capacity: config.mesh_capacity,
            vertex_capacity: config.vertex_capacity,
            triangle_capacity: config.triangle_capacity,
            submesh_params,
            bridge,
            input_indices,
            generations,
        })
    }

    /// Blocking constructor for embedders without an async runtime
    pub fn new_blocking(config: ReducerConfig) -> Result<Self, GpuError> {
        pollster::block_on(Self::new(config))
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<wgpu::Queue> {
        &self.queue
    }

    pub fn capacity(&self, kind: BufferKind) -> u32 {
        match kind {
            BufferKind::Mesh => self.mesh_capacity,
            BufferKind::Vertex => self.vertex_capacity,
            BufferKind::Triangle => self.triangle_capacity,
        }
    }

    /// Grow the backing allocation for `kind` to hold `required` elements.
    ///
    /// Capacities round up to the next power of two and never shrink.
    /// Contents are not preserved across growth; the immediately following
    /// pass rewrites everything, which is what makes that safe. Must not
    /// run while a job is in flight.
    pub fn ensure_capacity(&mut self, kind: BufferKind, required: u32) {
        match kind {
            BufferKind::Mesh => {
                let capacity = round_up_pow_2(required);
                if capacity <= self.mesh_capacity {
                    return;
                }
                debug!(capacity, "Growing submesh slot capacity");
                self.submesh_params = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("reduce_submesh_params"),
                    size: capacity as u64 * UNIFORM_SLOT_STRIDE as u64,
                    usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.mesh_capacity = capacity;
            }
            BufferKind::Vertex => {
                let capacity = round_up_pow_2(required.max(COARSE_STRIDE));
                if capacity <= self.vertex_capacity {
                    return;
                }
                debug!(capacity, "Growing vertex capacity");
                self.bridge = BridgeBuffers::new(&self.device, capacity);
                self.vertex_capacity = capacity;
            }
            BufferKind::Triangle => {
                let capacity = round_up_pow_2(required);
                if capacity <= self.triangle_capacity {
                    return;
                }
                debug!(capacity, "Growing triangle capacity");
                self.input_indices = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some("reduce_input_indices"),
                    size: capacity as u64 * 12,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                self.triangle_capacity = capacity;
            }
        }
    }

    /// Run one reduction job over `submeshes` into the pending generation.
    ///
    /// On success the pending generation holds the compacted mesh and its
    /// counts; nothing is visible to readers until [`Self::publish`].
    pub async fn reduce_meshes(&mut self, submeshes: &[Submesh]) -> EngineResult<()> {
        let vertex_counts: Vec<u32> = submeshes.iter().map(|s| s.vertex_count()).collect();
        let triangle_counts: Vec<u32> = submeshes.iter().map(|s| s.triangle_count()).collect();
        let total_vertices: u32 = vertex_counts.iter().sum();
        let total_triangles: u32 = triangle_counts.iter().sum();
        let expanded = expand_to_coarse(total_vertices);

        let shared_frame = submeshes
            .first()
            .map(|s| s.shared_frame())
            .unwrap_or(glam::Mat4::IDENTITY);

        debug!(
            submeshes = submeshes.len(),
            total_vertices, total_triangles, "Reducing submeshes"
        );

        if expanded == 0 {
            // Nothing references anything; publish an empty generation
            self.generations.set_pending_results(0, 0, shared_frame);
            return Ok(());
        }

        // Growth happens here, strictly before any dispatch of this job
        self.ensure_capacity(BufferKind::Mesh, submeshes.len() as u32);
        self.ensure_capacity(BufferKind::Vertex, total_vertices);
        self.ensure_capacity(BufferKind::Triangle, total_triangles);
        self.generations.ensure_pending_capacity(
            &self.device,
            self.vertex_capacity,
            round_up_pow_2(total_triangles),
        );

        // Upload concatenated inputs and the per-submesh uniform slots.
        // Positions and normals are padded to the uniform 16-byte record
        // stride the outputs use.
        let world_to_shared = shared_frame.inverse();
        let mut positions: Vec<[f32; 4]> = Vec::with_capacity(total_vertices as usize);
        let mut normals: Vec<[f32; 4]> = Vec::with_capacity(total_vertices as usize);
        let mut indices: Vec<u32> = Vec::with_capacity(total_triangles as usize * 3);
        let mut params_bytes =
            vec![0u8; submeshes.len() * UNIFORM_SLOT_STRIDE as usize];

        let mut vertex_base = 0u32;
        let mut triangle_base = 0u32;
        for (i, submesh) in submeshes.iter().enumerate() {
            let translation = submesh.translation_in(&world_to_shared);
            let params = SubmeshParams {
                vertex_count: vertex_counts[i],
                triangle_count: triangle_counts[i],
                vertex_base,
                triangle_base,
                translation: [translation.x, translation.y, translation.z, 0.0],
            };
            let slot = i * UNIFORM_SLOT_STRIDE as usize;
            params_bytes[slot..slot + std::mem::size_of::<SubmeshParams>()]
                .copy_from_slice(bytemuck::bytes_of(&params));

            positions.extend(submesh.positions().iter().map(|p| [p[0], p[1], p[2], 1.0]));
            normals.extend(submesh.normals().iter().map(|n| [n[0], n[1], n[2], 0.0]));
            indices.extend(submesh.indices().iter().flatten());

            vertex_base += vertex_counts[i];
            triangle_base += triangle_counts[i];
        }

        self.queue
            .write_buffer(&self.submesh_params, 0, &params_bytes);
        self.queue
            .write_buffer(&self.bridge.input_positions, 0, bytemuck::cast_slice(&positions));
        self.queue
            .write_buffer(&self.bridge.input_normals, 0, bytemuck::cast_slice(&normals));
        if !indices.is_empty() {
            self.queue
                .write_buffer(&self.input_indices, 0, bytemuck::cast_slice(&indices));
        }
        self.write_level_params(total_vertices, expanded);

        // Pass group 1: clear marks, mark references, build the count tree
        let mark_bind_group = self.mark_bind_group();
        let count_scan_bind_groups = self.count_scan_bind_groups();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh_reduce_encoder_1"),
            });
        encoder.clear_buffer(&self.bridge.marks, 0, Some(expanded as u64 * 4));
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("mark_and_count_pass"),
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.mark_pipeline);
            for (i, &triangle_count) in triangle_counts.iter().enumerate() {
                if triangle_count == 0 {
                    continue;
                }
                pass.set_bind_group(0, &mark_bind_group, &[i as u32 * UNIFORM_SLOT_STRIDE]);
                pass.dispatch_workgroups(
                    compute_dispatch_size(triangle_count, WORKGROUP_SIZE),
                    1,
                    1,
                );
            }

            pass.set_pipeline(&self.count_pipeline);
            for (stage, groups) in [
                (STAGE_COUNT_4, expanded >> 2),
                (STAGE_COUNT_16, expanded >> 4),
                (STAGE_COUNT_64, expanded >> 6),
                (STAGE_COUNT_512, expanded >> 9),
            ] {
                pass.set_bind_group(
                    0,
                    &count_scan_bind_groups[stage as usize],
                    &[stage * UNIFORM_SLOT_STRIDE],
                );
                pass.dispatch_workgroups(compute_dispatch_size(groups, WORKGROUP_SIZE), 1, 1);
            }

            pass.set_pipeline(&self.scan_coarse_pipeline);
            pass.set_bind_group(
                0,
                &count_scan_bind_groups[STAGE_SCAN_COARSE as usize],
                &[STAGE_SCAN_COARSE * UNIFORM_SLOT_STRIDE],
            );
            pass.dispatch_workgroups(
                compute_dispatch_size(expanded >> 12, WORKGROUP_SIZE),
                1,
                1,
            );
        }
        let coarse_bytes = (expanded >> 12) as u64 * 4;
        encoder.copy_buffer_to_buffer(
            &self.bridge.counts_4096,
            0,
            &self.bridge.counts_staging,
            0,
            coarse_bytes,
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        // Suspension point 1: the coarsest level is scanned sequentially
        // here because it has at most capacity/4096 entries
        let coarse_raw =
            read_buffer_async(&self.device, &self.bridge.counts_staging, coarse_bytes).await?;
        // pod_collect copies, so the byte readback's alignment is irrelevant
        let coarse_counts: Vec<u32> = bytemuck::pod_collect_to_vec(&coarse_raw);

        let mut coarse_offsets = Vec::with_capacity(coarse_counts.len());
        let mut running = 0u32;
        for &count in &coarse_counts {
            coarse_offsets.push(running);
            running += count;
        }
        let referenced_vertices = running;
        self.queue.write_buffer(
            &self.bridge.offsets_4096,
            0,
            bytemuck::cast_slice(&coarse_offsets),
        );

        // Pass group 2: refine offsets downward, then compact and rewrite
        let reduce_bind_group = self.reduce_bind_group();

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh_reduce_encoder_2"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("scan_and_reduce_pass"),
                timestamp_writes: None,
            });

            pass.set_pipeline(&self.scan_level_pipeline);
            for (stage, groups) in [
                (STAGE_SCAN_512, total_vertices.div_ceil(512)),
                (STAGE_SCAN_64, total_vertices.div_ceil(64)),
                (STAGE_SCAN_16, total_vertices.div_ceil(16)),
            ] {
                pass.set_bind_group(
                    0,
                    &count_scan_bind_groups[stage as usize],
                    &[stage * UNIFORM_SLOT_STRIDE],
                );
                pass.dispatch_workgroups(compute_dispatch_size(groups, WORKGROUP_SIZE), 1, 1);
            }

            pass.set_pipeline(&self.scan_marks_pipeline);
            pass.set_bind_group(
                0,
                &count_scan_bind_groups[STAGE_SCAN_MARKS as usize],
                &[STAGE_SCAN_MARKS * UNIFORM_SLOT_STRIDE],
            );
            pass.dispatch_workgroups(
                compute_dispatch_size(total_vertices.div_ceil(4), WORKGROUP_SIZE),
                1,
                1,
            );

            pass.set_pipeline(&self.reduce_pipeline);
            for i in 0..submeshes.len() {
                let lanes = vertex_counts[i].max(triangle_counts[i]);
                if lanes == 0 {
                    continue;
                }
                pass.set_bind_group(0, &reduce_bind_group, &[i as u32 * UNIFORM_SLOT_STRIDE]);
                pass.dispatch_workgroups(compute_dispatch_size(lanes, WORKGROUP_SIZE), 1, 1);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));

        // Suspension point 2: the pending generation must be fully written
        // before it can be flagged for publishing
        wait_for_queue(&self.device, &self.queue).await?;

        self.generations
            .set_pending_results(referenced_vertices, total_triangles, shared_frame);

        debug!(
            referenced_vertices,
            total_triangles, "Reduction job complete"
        );
        Ok(())
    }

    /// Swap the completed pending generation in as current. Exactly one
    /// publish per completed job; the caller owns that pairing.
    pub fn publish(&mut self) -> CurrentGeneration {
        self.generations.publish()
    }

    /// Snapshot of the published generation, if any exists yet
    pub fn current_generation(&self) -> Option<CurrentGeneration> {
        self.generations.snapshot()
    }

    /// Serialize the current generation: a 16-byte header (vertex,
    /// triangle and normal counts, reserved word) followed by the three
    /// 16-byte-stride sections read back from the GPU.
    pub async fn export_current(&self) -> EngineResult<Vec<u8>> {
        let generation = self
            .generations
            .snapshot()
            .ok_or(ExportError::NothingToExport)?;

        let vertex_bytes = generation.vertex_count as u64 * RECORD_STRIDE as u64;
        let triangle_bytes = generation.triangle_count as u64 * RECORD_STRIDE as u64;
        let total_bytes = vertex_bytes * 2 + triangle_bytes;

        let data = if total_bytes > 0 {
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("export_staging"),
                size: total_bytes,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });

            let mut encoder = self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("export_encoder"),
                });
            if vertex_bytes > 0 {
                encoder.copy_buffer_to_buffer(
                    &generation.vertex_buffer,
                    0,
                    &staging,
                    0,
                    vertex_bytes,
                );
                encoder.copy_buffer_to_buffer(
                    &generation.normal_buffer,
                    0,
                    &staging,
                    vertex_bytes + triangle_bytes,
                    vertex_bytes,
                );
            }
            if triangle_bytes > 0 {
                encoder.copy_buffer_to_buffer(
                    &generation.index_buffer,
                    0,
                    &staging,
                    vertex_bytes,
                    triangle_bytes,
                );
            }
            self.queue.submit(std::iter::once(encoder.finish()));

            read_buffer_async(&self.device, &staging, total_bytes).await?
        } else {
            Vec::new()
        };

        let vertex_bytes = vertex_bytes as usize;
        let triangle_bytes = triangle_bytes as usize;
        let blob = crate::export::encode(
            generation.vertex_count,
            generation.triangle_count,
            generation.vertex_count,
            &data[..vertex_bytes],
            &data[vertex_bytes..vertex_bytes + triangle_bytes],
            &data[vertex_bytes + triangle_bytes..],
        )?;
        Ok(blob)
    }

    fn write_level_params(&self, total_vertices: u32, expanded: u32) {
        let stages = [
            (STAGE_COUNT_4, expanded >> 2, 4),
            (STAGE_COUNT_16, expanded >> 4, 4),
            (STAGE_COUNT_64, expanded >> 6, 4),
            (STAGE_COUNT_512, expanded >> 9, 8),
            (STAGE_SCAN_COARSE, expanded >> 12, 8),
            (STAGE_SCAN_512, total_vertices.div_ceil(512), 8),
            (STAGE_SCAN_64, total_vertices.div_ceil(64), 4),
            (STAGE_SCAN_16, total_vertices.div_ceil(16), 4),
            (STAGE_SCAN_MARKS, total_vertices.div_ceil(4), 4),
        ];

        let mut bytes = vec![0u8; LEVEL_STAGES as usize * UNIFORM_SLOT_STRIDE as usize];
        for (stage, num_groups, group_size) in stages {
            let params = LevelParams {
                num_groups,
                group_size,
                _pad: [0; 2],
            };
            let slot = stage as usize * UNIFORM_SLOT_STRIDE as usize;
            bytes[slot..slot + std::mem::size_of::<LevelParams>()]
                .copy_from_slice(bytemuck::bytes_of(&params));
        }
        self.queue.write_buffer(&self.level_params, 0, &bytes);
    }

    fn mark_bind_group(&self) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("mark_bind_group"),
            layout: &self.mark_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.input_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.bridge.marks.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.submesh_params,
                        offset: 0,
                        size: SUBMESH_PARAMS_BINDING,
                    }),
                },
            ],
        })
    }

    /// One bind group per count/scan stage, indexed by stage constant
    fn count_scan_bind_groups(&self) -> Vec<wgpu::BindGroup> {
        let b = &self.bridge;
        // (a, b, c, d) per stage; see count_scan.wgsl for the roles
        let stage_buffers: [(&wgpu::Buffer, &wgpu::Buffer, &wgpu::Buffer, &wgpu::Buffer);
            LEVEL_STAGES as usize] = [
            (&b.marks, &b.marks, &b.counts_4, &self.scratch),
            (&b.counts_4, &b.counts_4, &b.counts_16, &self.scratch),
            (&b.counts_16, &b.counts_16, &b.counts_64, &self.scratch),
            (&b.counts_64, &b.counts_64, &b.counts_512, &self.scratch),
            (&b.counts_512, &b.counts_512, &b.counts_4096, &b.offsets_512),
            (&b.counts_64, &b.offsets_512, &b.offsets_64, &self.scratch),
            (&b.counts_16, &b.offsets_64, &b.offsets_16, &self.scratch),
            (&b.counts_4, &b.offsets_16, &b.offsets_4, &self.scratch),
            (&b.marks, &b.offsets_4, &b.vertex_slots, &b.offsets_4096),
        ];

        stage_buffers
            .iter()
            .enumerate()
            .map(|(stage, (a, pb, c, d))| {
                self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(&format!("count_scan_bind_group_{}", stage)),
                    layout: &self.count_scan_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: a.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: pb.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: c.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: d.as_entire_binding(),
                        },
                        wgpu::BindGroupEntry {
                            binding: 4,
                            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                                buffer: &self.level_params,
                                offset: 0,
                                size: LEVEL_PARAMS_BINDING,
                            }),
                        },
                    ],
                })
            })
            .collect()
    }

    fn reduce_bind_group(&self) -> wgpu::BindGroup {
        let pending = self.generations.pending();
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("reduce_bind_group"),
            layout: &self.reduce_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.input_indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: self.bridge.input_positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.bridge.input_normals.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: self.bridge.marks.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.bridge.vertex_slots.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: pending.indices.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: pending.positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 7,
                    resource: pending.normals.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 8,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.submesh_params,
                        offset: 0,
                        size: SUBMESH_PARAMS_BINDING,
                    }),
                },
            ],
        })
    }
}
