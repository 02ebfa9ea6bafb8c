// SPDX-License-Identifier: GPL-3.0-only

//! Output generations and the publish swap
//!
//! Exactly two generations of output buffers exist at all times: "current"
//! (read by consumers) and "pending" (written by the in-flight job). The
//! swap is an index flip plus a commit of the counts and shared transform
//! as one unit, so a reader can never pair vertices from one generation
//! with counts from another. wgpu buffers are refcounted handles, so a
//! snapshot taken before a swap stays valid for its holder afterwards.

use crate::constants::RECORD_STRIDE;
use glam::Mat4;
use tracing::debug;

/// One generation's backing buffers. Capacities are tracked per slot:
/// growth touches only the pending slot, never the one readers see.
pub struct GenerationSlot {
    pub positions: wgpu::Buffer,
    pub normals: wgpu::Buffer,
    pub indices: wgpu::Buffer,
    pub vertex_capacity: u32,
    pub triangle_capacity: u32,
}

impl GenerationSlot {
    fn new(device: &wgpu::Device, vertex_capacity: u32, triangle_capacity: u32) -> Self {
        let output = |label: &str, elements: u32| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: elements as u64 * RECORD_STRIDE as u64,
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_SRC
                    | wgpu::BufferUsages::VERTEX,
                mapped_at_creation: false,
            })
        };

        Self {
            positions: output("reduced_vertex_buffer", vertex_capacity),
            normals: output("reduced_normal_buffer", vertex_capacity),
            indices: output("reduced_index_buffer", triangle_capacity),
            vertex_capacity,
            triangle_capacity,
        }
    }
}

/// Snapshot of the published generation, handed to renderers/exporters.
/// Valid and internally consistent until the holder drops it, even if a
/// newer generation is published meanwhile.
#[derive(Clone)]
pub struct CurrentGeneration {
    pub vertex_buffer: wgpu::Buffer,
    pub normal_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub vertex_count: u32,
    pub triangle_count: u32,
    /// Places the reduced mesh (shared-frame coordinates) in world space
    pub mesh_to_world: Mat4,
}

/// Double-buffered generation store. The store is the only owner of the
/// swap; the reducer only ever writes through [`Self::pending`].
pub struct GenerationStore {
    slots: [GenerationSlot; 2],
    current: usize,
    published: bool,

    vertex_count: u32,
    triangle_count: u32,
    mesh_to_world: Mat4,

    pending_vertex_count: u32,
    pending_triangle_count: u32,
    pending_transform: Mat4,
}

impl GenerationStore {
    pub fn new(device: &wgpu::Device, vertex_capacity: u32, triangle_capacity: u32) -> Self {
        Self {
            slots: [
                GenerationSlot::new(device, vertex_capacity, triangle_capacity),
                GenerationSlot::new(device, vertex_capacity, triangle_capacity),
            ],
            current: 0,
            published: false,
            vertex_count: 0,
            triangle_count: 0,
            mesh_to_world: Mat4::IDENTITY,
            pending_vertex_count: 0,
            pending_triangle_count: 0,
            pending_transform: Mat4::IDENTITY,
        }
    }

    pub fn pending(&self) -> &GenerationSlot {
        &self.slots[self.current ^ 1]
    }

    fn current_slot(&self) -> &GenerationSlot {
        &self.slots[self.current]
    }

    /// Grow the pending slot's buffers if the next job needs more room.
    ///
    /// The current slot keeps its allocation until after the next swap, so
    /// readers of the published generation are never truncated. Must only
    /// be called between jobs.
    pub fn ensure_pending_capacity(
        &mut self,
        device: &wgpu::Device,
        vertex_capacity: u32,
        triangle_capacity: u32,
    ) {
        let pending = self.pending();
        if pending.vertex_capacity >= vertex_capacity
            && pending.triangle_capacity >= triangle_capacity
        {
            return;
        }

        let vertex_capacity = vertex_capacity.max(pending.vertex_capacity);
        let triangle_capacity = triangle_capacity.max(pending.triangle_capacity);
        debug!(
            vertex_capacity,
            triangle_capacity, "Reallocating pending generation buffers"
        );
        self.slots[self.current ^ 1] = GenerationSlot::new(device, vertex_capacity, triangle_capacity);
    }

    /// Record the results of a completed job. The data is not visible to
    /// readers until [`Self::publish`] runs.
    pub fn set_pending_results(&mut self, vertex_count: u32, triangle_count: u32, transform: Mat4) {
        self.pending_vertex_count = vertex_count;
        self.pending_triangle_count = triangle_count;
        self.pending_transform = transform;
    }

    /// Swap current and pending and commit the pending counts/transform,
    /// as one logical unit. Called exactly once per completed job.
    ///
    /// Returns the snapshot of the newly current generation. The buffers
    /// that became pending are free for the next job to overwrite.
    pub fn publish(&mut self) -> CurrentGeneration {
        self.current ^= 1;
        self.vertex_count = self.pending_vertex_count;
        self.triangle_count = self.pending_triangle_count;
        self.mesh_to_world = self.pending_transform;
        self.published = true;

        debug!(
            vertex_count = self.vertex_count,
            triangle_count = self.triangle_count,
            "Published mesh generation"
        );
        self.snapshot_unchecked()
    }

    /// Snapshot of the published generation, if any job has completed yet
    pub fn snapshot(&self) -> Option<CurrentGeneration> {
        if self.published {
            Some(self.snapshot_unchecked())
        } else {
            None
        }
    }

    fn snapshot_unchecked(&self) -> CurrentGeneration {
        let slot = self.current_slot();
        CurrentGeneration {
            vertex_buffer: slot.positions.clone(),
            normal_buffer: slot.normals.clone(),
            index_buffer: slot.indices.clone(),
            vertex_count: self.vertex_count,
            triangle_count: self.triangle_count,
            mesh_to_world: self.mesh_to_world,
        }
    }
}
