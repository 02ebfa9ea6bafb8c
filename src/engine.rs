// SPDX-License-Identifier: GPL-3.0-only

//! Frame-driven mesh reduction engine
//!
//! The engine is ticked once per frame with the current submesh set and
//! thermal state. When the scheduler triggers, a reduction job runs on a
//! background task against the pending generation while readers keep
//! using the current one. A completed job is published one tick later,
//! so in-flight consumers of the old generation get a full frame before
//! the swap.

use crate::config::ReducerConfig;
use crate::errors::EngineResult;
use crate::scheduler::UpdateScheduler;
use crate::shaders::reduce::{CurrentGeneration, MeshReducer};
use crate::submesh::FrameInput;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info};

struct EngineShared {
    reducer: tokio::sync::Mutex<MeshReducer>,
    reducing: AtomicBool,
    completed: AtomicBool,
    current: std::sync::Mutex<Option<CurrentGeneration>>,
}

impl EngineShared {
    fn current_slot(&self) -> std::sync::MutexGuard<'_, Option<CurrentGeneration>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Incremental GPU mesh reduction engine
pub struct ScanMeshEngine {
    scheduler: UpdateScheduler,
    shared: Arc<EngineShared>,
    completed_last_tick: bool,
}

impl ScanMeshEngine {
    /// Create the engine and its GPU processor
    pub async fn new(config: ReducerConfig) -> EngineResult<Self> {
        let reducer = MeshReducer::new(config).await?;
        info!("Mesh reduction engine ready");
        Ok(Self {
            scheduler: UpdateScheduler::new(),
            shared: Arc::new(EngineShared {
                reducer: tokio::sync::Mutex::new(reducer),
                reducing: AtomicBool::new(false),
                completed: AtomicBool::new(false),
                current: std::sync::Mutex::new(None),
            }),
            completed_last_tick: false,
        })
    }

    /// Advance the engine by one frame.
    ///
    /// Publishes a generation completed before the previous tick, then
    /// asks the scheduler whether this frame's submeshes warrant a new
    /// job and spawns one if so. At most one job is in flight.
    pub fn tick(&mut self, frame: &FrameInput) {
        if self.completed_last_tick {
            // The job task sets the completed flag while still holding
            // the processor lock, so a publish can race its release.
            // Contention just defers the publish to the next tick.
            if let Ok(mut reducer) = self.shared.reducer.try_lock() {
                let generation = reducer.publish();
                *self.shared.current_slot() = Some(generation);
                self.shared.completed.store(false, Ordering::Release);
                self.completed_last_tick = false;
            }
        } else if self.shared.completed.load(Ordering::Acquire) {
            self.completed_last_tick = true;
        }

        // A completed job owns the pending slot until it is published;
        // starting another job now would overwrite it
        if self.completed_last_tick || self.shared.completed.load(Ordering::Acquire) {
            return;
        }
        if self.shared.reducing.load(Ordering::Acquire) {
            return;
        }
        if let Some(submeshes) = self.scheduler.poll(&frame.submeshes, frame.thermal) {
            self.shared.reducing.store(true, Ordering::Release);
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                let mut reducer = shared.reducer.lock().await;
                match reducer.reduce_meshes(&submeshes).await {
                    Ok(()) => shared.completed.store(true, Ordering::Release),
                    Err(err) => error!(error = %err, "Mesh reduction job failed"),
                }
                shared.reducing.store(false, Ordering::Release);
            });
        }
    }

    /// Whether a reduction job is currently in flight
    pub fn is_reducing(&self) -> bool {
        self.shared.reducing.load(Ordering::Acquire)
    }

    /// Snapshot of the most recently published generation
    pub fn current(&self) -> Option<CurrentGeneration> {
        self.shared.current_slot().clone()
    }

    /// Serialize the current generation into the binary export format.
    ///
    /// Waits for any in-flight job to release the processor first.
    pub async fn export_data(&self) -> EngineResult<Vec<u8>> {
        let reducer = self.shared.reducer.lock().await;
        reducer.export_current().await
    }
}
