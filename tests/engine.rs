// SPDX-License-Identifier: GPL-3.0-only

//! Tick-driven engine tests against a real GPU device.
//!
//! Jobs run on spawned tasks, so these use the multi-thread runtime and
//! tick with short sleeps in between. Skipped when no adapter exists.

use glam::{Mat4, Vec3};
use scanmesh::config::ReducerConfig;
use scanmesh::constants::ThermalState;
use scanmesh::engine::ScanMeshEngine;
use scanmesh::export::ExportBlob;
use scanmesh::submesh::{FrameInput, Submesh};
use std::time::Duration;

fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn engine() -> Option<ScanMeshEngine> {
    init_logs();
    match ScanMeshEngine::new(ReducerConfig::default()).await {
        Ok(engine) => Some(engine),
        Err(e) => {
            eprintln!("Skipping test (no GPU): {}", e);
            None
        }
    }
}

fn frame(thermal: ThermalState) -> FrameInput {
    let positions: Vec<[f32; 3]> = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let normals = vec![[0.0, 0.0, 1.0]; 3];
    FrameInput {
        submeshes: vec![Submesh::new(
            positions.into(),
            normals.into(),
            vec![[0, 1, 2]].into(),
            Mat4::from_translation(Vec3::ZERO),
        )],
        thermal,
    }
}

/// Tick until a generation is published or the attempt limit runs out
async fn tick_until_published(engine: &mut ScanMeshEngine, frame: &FrameInput) -> bool {
    for _ in 0..500 {
        engine.tick(frame);
        if engine.current().is_some() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn publishes_a_generation_after_ticking() {
    let Some(mut engine) = engine().await else {
        return;
    };

    assert!(engine.current().is_none());
    assert!(tick_until_published(&mut engine, &frame(ThermalState::Nominal)).await);

    let generation = engine.current().unwrap();
    assert_eq!(generation.vertex_count, 3);
    assert_eq!(generation.triangle_count, 1);
    assert_eq!(generation.mesh_to_world, Mat4::IDENTITY);
}

#[tokio::test(flavor = "multi_thread")]
async fn critical_thermal_state_suspends_jobs() {
    let Some(mut engine) = engine().await else {
        return;
    };

    let hot = frame(ThermalState::Critical);
    for _ in 0..200 {
        engine.tick(&hot);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(engine.current().is_none());
    assert!(!engine.is_reducing());

    // Cooling down lets the pending change through
    assert!(tick_until_published(&mut engine, &frame(ThermalState::Nominal)).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn unchanged_submeshes_publish_exactly_once() {
    let Some(mut engine) = engine().await else {
        return;
    };

    let input = frame(ThermalState::Nominal);
    assert!(tick_until_published(&mut engine, &input).await);
    let first = engine.current().unwrap();

    // Same backing storage, so no further job should start
    for _ in 0..100 {
        engine.tick(&input);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(!engine.is_reducing());
    let second = engine.current().unwrap();
    assert_eq!(first.vertex_count, second.vertex_count);
    assert_eq!(second.vertex_count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn export_reflects_the_published_generation() {
    let Some(mut engine) = engine().await else {
        return;
    };

    assert!(engine.export_data().await.is_err());
    assert!(tick_until_published(&mut engine, &frame(ThermalState::Nominal)).await);

    let blob = engine.export_data().await.unwrap();
    let parsed = ExportBlob::parse(&blob).unwrap();
    assert_eq!(parsed.vertex_count, 3);
    assert_eq!(parsed.triangle_count, 1);
    assert_eq!(parsed.normal_count, 3);
    assert_eq!(parsed.vertices.len(), 3 * 16);
}
