//! Synthetic draw-stream replay.
//!
//! Drives a [`RayTracingScene`] with a deterministic stream of draws against the
//! headless recording device: static props drawn several times per frame, a few
//! skinned meshes streamed through reused buffers, and periodic buffer updates.
//! Scene and cache statistics are logged as it runs, and the run fails if any
//! device object outlives shutdown.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p tracehook-replay -- [OPTIONS]
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

use anyhow::{bail, Context};
use glam::{Mat4, Vec3};
use tracehook_core::{Material, MaterialKind, MaterialOverride, MaterialTable};
use tracehook_gpu::{
    CommandList, MemoryLocation, OwnedResource, ResourceDesc, ResourceHandle, ResourceUsage,
    RtDevice,
};
use tracehook_rt::{AttachmentSlot, AttachmentSource, ObservedDraw, RayTracingScene, RtConfig};
use tracehook_test::{indexed_geometry, RecordingDevice};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Material key the replay marks as glass.
const GLASS_KEY: u64 = 0x6c61_7373;
/// First buffer handle used by synthetic meshes, clear of device-created handles.
const MESH_HANDLE_BASE: u64 = 1 << 32;

struct Options {
    frames: u64,
    meshes: u64,
    copies: u32,
    skinned: u64,
    invalidate_every: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            frames: 240,
            meshes: 16,
            copies: 3,
            skinned: 2,
            invalidate_every: 60,
        }
    }
}

impl Options {
    fn parse() -> anyhow::Result<Option<Self>> {
        let mut options = Self::default();
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            let mut value = |name: &str| -> anyhow::Result<u64> {
                args.next()
                    .with_context(|| format!("{name} expects a value"))?
                    .parse()
                    .with_context(|| format!("invalid value for {name}"))
            };
            match arg.as_str() {
                "-h" | "--help" => return Ok(None),
                "--frames" => options.frames = value("--frames")?,
                "--meshes" => options.meshes = value("--meshes")?,
                "--copies" => options.copies = u32::try_from(value("--copies")?)?,
                "--skinned" => options.skinned = value("--skinned")?,
                "--invalidate-every" => options.invalidate_every = value("--invalidate-every")?,
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(Some(options))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(options) = Options::parse()? else {
        print_help();
        return Ok(());
    };

    let device = RecordingDevice::shared();
    let config = RtConfig::default()
        .with_eviction_threshold(30)
        .with_eviction_interval(Some(30))
        .with_materials(
            MaterialTable::new().with(GLASS_KEY, MaterialOverride::new(MaterialKind::Glass)),
        );
    let mut scene = RayTracingScene::new(device.clone(), config);
    let cmd = CommandList(1);

    // UV streams belong to the replay, not the scene.
    let uv_buffers = (0..options.meshes)
        .map(|_| -> anyhow::Result<OwnedResource> {
            let handle = device.create_resource(&ResourceDesc::buffer(
                "mesh_uvs",
                24 * 8,
                ResourceUsage::SHADER_RESOURCE,
                MemoryLocation::GpuOnly,
            ))?;
            Ok(OwnedResource::new(device.clone(), handle))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    info!(
        frames = options.frames,
        meshes = options.meshes,
        copies = options.copies,
        skinned = options.skinned,
        "replaying synthetic draw stream"
    );

    for frame in 0..options.frames {
        let view_projection = camera(frame);
        scene.on_frame_begin();

        if options.invalidate_every > 0 && frame > 0 && frame % options.invalidate_every == 0 {
            let mesh = frame / options.invalidate_every % options.meshes.max(1);
            scene.on_buffer_updated(vertex_buffer(mesh));
        }

        for (mesh, uvs) in (0..options.meshes).zip(&uv_buffers) {
            for copy in 0..options.copies {
                let world = prop_transform(mesh, copy, frame);
                let draw = prop_draw(mesh, uvs.handle(), view_projection * world);
                scene.on_draw_observed(cmd, &draw);
            }
        }
        for mesh in 0..options.skinned {
            let world = Mat4::from_translation(Vec3::new(mesh as f32 * 4.0, 0.0, -6.0));
            scene.on_draw_observed(cmd, &skinned_draw(mesh, frame, view_projection * world));
        }

        let stats = scene.build_scene(cmd, Some(view_projection));
        scene.on_frame_end();

        if frame % 30 == 0 {
            info!(
                frame,
                instances = stats.instances,
                skipped_stale = stats.skipped_stale,
                skipped_dynamic = stats.skipped_dynamic,
                tlas_built = stats.tlas_built,
                pending = scene.reclaim_queue().pending_count(),
                "frame"
            );
        }
    }

    let cache = scene.cache_stats();
    info!(
        entries = cache.entries,
        blas_builds = cache.blas_builds,
        blas_build_failures = cache.blas_build_failures,
        evictions = cache.evictions,
        "geometry cache"
    );

    scene.shutdown();
    drop(scene);
    drop(uv_buffers);

    let live = device.live_resource_count() + device.live_view_count();
    if live > 0 {
        bail!("{live} device objects outlived shutdown");
    }
    let invalid = device.invalid_destroys();
    if !invalid.is_empty() {
        bail!("{} invalid destroys: {invalid:?}", invalid.len());
    }
    info!(
        destroyed = device.destroyed_resources().len() + device.destroyed_views().len(),
        "all device objects released"
    );
    Ok(())
}

/// Camera slowly orbiting the origin.
fn camera(frame: u64) -> Mat4 {
    let angle = frame as f32 * 0.01;
    let eye = Vec3::new(angle.sin() * 30.0, 8.0, angle.cos() * 30.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 1000.0);
    proj * view
}

fn vertex_buffer(mesh: u64) -> ResourceHandle {
    ResourceHandle(MESH_HANDLE_BASE + mesh * 2)
}

fn prop_transform(mesh: u64, copy: u32, frame: u64) -> Mat4 {
    let x = (mesh % 4) as f32 * 5.0;
    let z = (mesh / 4) as f32 * 5.0;
    let bob = (frame as f32 * 0.05 + copy as f32).sin() * 0.25;
    Mat4::from_translation(Vec3::new(x + copy as f32 * 1.5, bob, z))
}

fn prop_draw(mesh: u64, uvs: ResourceHandle, object_to_clip: Mat4) -> ObservedDraw {
    let vb = vertex_buffer(mesh);
    let geometry = indexed_geometry(vb.0, vb.0 + 1, 0, 36);
    let material_key = (mesh % 5 == 4).then_some(GLASS_KEY);
    ObservedDraw::new(geometry, object_to_clip)
        .with_material(Material::default(), material_key)
        .with_attachment(AttachmentSource::structured(AttachmentSlot::Uv, uvs, 0, 24, 8))
}

fn skinned_draw(mesh: u64, frame: u64, object_to_clip: Mat4) -> ObservedDraw {
    let vb = MESH_HANDLE_BASE / 2 + mesh * 2;
    // Streamed through a ring, so the index range shifts every frame.
    let offset = (frame % 8) * 72;
    ObservedDraw::new(indexed_geometry(vb, vb + 1, offset, 36), object_to_clip).dynamic()
}

fn print_help() {
    eprintln!(
        "tracehook synthetic draw-stream replay

USAGE:
    cargo run -p tracehook-replay -- [OPTIONS]

OPTIONS:
    --frames <N>            Frames to replay (default: 240)
    --meshes <N>            Static meshes per frame (default: 16)
    --copies <N>            Draws of each static mesh per frame (default: 3)
    --skinned <N>           Dynamic meshes per frame (default: 2)
    --invalidate-every <N>  Report a buffer update every N frames, 0 disables (default: 60)
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
