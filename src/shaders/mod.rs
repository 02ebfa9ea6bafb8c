// SPDX-License-Identifier: GPL-3.0-only

//! Shared GPU compute infrastructure
//!
//! Provides the plumbing common to the reduction pipelines:
//! - Dispatch-size arithmetic
//! - Async staging-buffer readback (map, poll, read, unmap)
//! - Queue-completion waits between dependent pass groups

pub mod reduce;

use crate::errors::GpuError;

/// Calculate compute shader dispatch size (workgroups needed)
///
/// Given an element count and workgroup size, returns the number of
/// workgroups needed to cover every element.
#[inline]
pub fn compute_dispatch_size(elements: u32, workgroup_size: u32) -> u32 {
    elements.div_ceil(workgroup_size)
}

/// Helper for async buffer readback (map, poll, read, unmap)
///
/// This is the common pattern used to read data back from GPU buffers to
/// CPU memory. Only the first `size` bytes are returned.
///
/// # Arguments
/// * `device` - The wgpu device for polling
/// * `buffer` - The buffer to read from (must be MAP_READ)
/// * `size` - Number of bytes to read from the start of the buffer
pub async fn read_buffer_async(
    device: &wgpu::Device,
    buffer: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, GpuError> {
    let slice = buffer.slice(..size);
    let (sender, receiver) = futures::channel::oneshot::channel();

    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.poll(wgpu::Maintain::Wait);

    receiver
        .await
        .map_err(|_| GpuError::BufferMap("mapping callback dropped".into()))?
        .map_err(|e| GpuError::BufferMap(format!("{:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();

    Ok(data)
}

/// Wait until all work submitted to the queue so far has completed.
///
/// Used at the two suspension points of a reduction job: before the CPU
/// scan of the coarsest counts, and before a finished job is flagged for
/// publishing.
pub async fn wait_for_queue(device: &wgpu::Device, queue: &wgpu::Queue) -> Result<(), GpuError> {
    let (sender, receiver) = futures::channel::oneshot::channel();
    queue.on_submitted_work_done(move || {
        let _ = sender.send(());
    });

    device.poll(wgpu::Maintain::Wait);

    receiver
        .await
        .map_err(|_| GpuError::BufferMap("completion callback dropped".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_dispatch_size() {
        assert_eq!(compute_dispatch_size(640, 64), 10);
        assert_eq!(compute_dispatch_size(641, 64), 11);
        assert_eq!(compute_dispatch_size(64, 64), 1);
        assert_eq!(compute_dispatch_size(1, 64), 1);
        assert_eq!(compute_dispatch_size(0, 64), 0);
    }
}
