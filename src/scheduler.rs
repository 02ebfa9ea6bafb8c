// SPDX-License-Identifier: GPL-3.0-only

//! Reduction cadence
//!
//! Decides, once per external tick, whether a new reduction pass should
//! start. A pass is due when enough ticks have elapsed for the current
//! thermal level and the observed submesh set differs from the one the
//! last pass consumed, compared by backing-storage identity.

use crate::constants::ThermalState;
use crate::submesh::Submesh;
use tracing::debug;

/// Tick-driven update scheduler.
///
/// Purely bookkeeping: the caller owns the busy/publish state machine and
/// only polls this when no job is in flight.
pub struct UpdateScheduler {
    tick_counter: u32,
    previous: Vec<Submesh>,
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateScheduler {
    pub fn new() -> Self {
        Self {
            // Saturated so the very first eligible frame triggers a pass
            tick_counter: u32::MAX - 1,
            previous: Vec::new(),
        }
    }

    /// Count one elapsed tick and decide whether a pass should start.
    ///
    /// Returns the submesh set to reduce, or `None` when nothing is due.
    /// On a trigger the counter resets and the set is remembered, so an
    /// identical set (same backing storage) never retriggers.
    pub fn poll(&mut self, submeshes: &[Submesh], thermal: ThermalState) -> Option<Vec<Submesh>> {
        self.tick_counter = self.tick_counter.saturating_add(1);

        let interval = thermal.update_interval();
        if interval == u32::MAX || self.tick_counter < interval {
            return None;
        }

        if submeshes.is_empty() {
            return None;
        }

        let unchanged = submeshes.len() == self.previous.len()
            && submeshes
                .iter()
                .zip(self.previous.iter())
                .all(|(a, b)| a.same_backing(b));
        if unchanged {
            return None;
        }

        debug!(
            submeshes = submeshes.len(),
            elapsed_ticks = self.tick_counter,
            thermal = ?thermal,
            "Starting mesh reduction pass"
        );

        self.tick_counter = 0;
        self.previous = submeshes.to_vec();
        Some(self.previous.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;
    use std::sync::Arc;

    fn patch(vertices: usize) -> Submesh {
        let positions: Arc<[[f32; 3]]> = vec![[0.0; 3]; vertices].into();
        let normals: Arc<[[f32; 3]]> = vec![[0.0, 1.0, 0.0]; vertices].into();
        let indices: Arc<[[u32; 3]]> = vec![[0, 1, 2]].into();
        Submesh::new(positions, normals, indices, Mat4::IDENTITY)
    }

    #[test]
    fn test_first_eligible_frame_triggers() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.poll(&[patch(4)], ThermalState::Nominal).is_some());
    }

    #[test]
    fn test_identical_set_never_retriggers() {
        let mut scheduler = UpdateScheduler::new();
        let set = vec![patch(4), patch(3)];
        assert!(scheduler.poll(&set, ThermalState::Nominal).is_some());

        for _ in 0..100 {
            assert!(scheduler.poll(&set, ThermalState::Nominal).is_none());
        }

        // Clones share backing storage, so they do not count as changes
        let clones: Vec<Submesh> = set.to_vec();
        assert!(scheduler.poll(&clones, ThermalState::Nominal).is_none());
    }

    #[test]
    fn test_replaced_storage_triggers_after_interval() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.poll(&[patch(4)], ThermalState::Nominal).is_some());

        let replaced = vec![patch(4)];
        for _ in 0..15 {
            assert!(scheduler.poll(&replaced, ThermalState::Nominal).is_none());
        }
        assert!(scheduler.poll(&replaced, ThermalState::Nominal).is_some());
    }

    #[test]
    fn test_thermal_interval_stretches_cadence() {
        let mut scheduler = UpdateScheduler::new();
        assert!(scheduler.poll(&[patch(4)], ThermalState::Fair).is_some());

        let replaced = vec![patch(4)];
        for _ in 0..33 {
            assert!(scheduler.poll(&replaced, ThermalState::Fair).is_none());
        }
        assert!(scheduler.poll(&replaced, ThermalState::Fair).is_some());
    }

    #[test]
    fn test_critical_suspends_updates() {
        let mut scheduler = UpdateScheduler::new();
        for _ in 0..10_000 {
            assert!(scheduler.poll(&[patch(4)], ThermalState::Critical).is_none());
        }
        // Cooling down makes the pending change eligible again
        assert!(scheduler.poll(&[patch(4)], ThermalState::Nominal).is_some());
    }

    #[test]
    fn test_empty_set_never_triggers() {
        let mut scheduler = UpdateScheduler::new();
        for _ in 0..100 {
            assert!(scheduler.poll(&[], ThermalState::Nominal).is_none());
        }
    }

    #[test]
    fn test_added_submesh_is_a_change() {
        let mut scheduler = UpdateScheduler::new();
        let first = patch(4);
        assert!(
            scheduler
                .poll(std::slice::from_ref(&first), ThermalState::Nominal)
                .is_some()
        );

        let mut grown = vec![first.clone(), patch(3)];
        for _ in 0..15 {
            assert!(scheduler.poll(&grown, ThermalState::Nominal).is_none());
        }
        let job = scheduler.poll(&grown, ThermalState::Nominal);
        assert_eq!(job.map(|j| j.len()), Some(2));

        // Dropping one afterwards is a change too
        grown.truncate(1);
        for _ in 0..15 {
            assert!(scheduler.poll(&grown, ThermalState::Nominal).is_none());
        }
        assert!(scheduler.poll(&grown, ThermalState::Nominal).is_some());
    }
}
