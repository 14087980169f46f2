use std::sync::Arc;

use glam::{vec3, Mat4, Vec3};
use rand::Rng;
use render_sync::{
    frame::constants::MaterialConstants,
    graphics::{
        headless::{HeadlessDevice, Timeline},
        types::{PipelineId, TextureId},
    },
    logging::init_logging,
    Camera, ComponentDesc, EntityDesc, Gpu, Material, MeshDesc, Pipeline, RenderConfig, Renderer,
};

const OPAQUE: PipelineId = PipelineId::from_raw(1);
const FOLIAGE: PipelineId = PipelineId::from_raw(2);

fn main() -> render_sync::Result<()> {
    init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => RenderConfig::load(path)?,
        None => RenderConfig::default(),
    };

    let device = Arc::new(HeadlessDevice::new(Timeline::Immediate));
    let renderer = Renderer::new(Gpu::from_arc(device.clone()), config)?;

    renderer.set_default_pipeline(Pipeline::new(OPAQUE))?;
    renderer.register_pipeline(Pipeline::new(FOLIAGE).with_material_bundle())?;
    renderer.register_texture(TextureId::from_raw(1));

    let stone = renderer.register_material(Material {
        constants: MaterialConstants {
            roughness: 0.8,
            ..Default::default()
        },
        ..Default::default()
    })?;
    let leaves = renderer.register_material(Material::default())?;

    let cube = [Vec3::splat(-0.5), Vec3::splat(0.5)];
    let mut rng = rand::thread_rng();
    let mut spawned = Vec::new();

    for _ in 0..64 {
        let position = vec3(
            rng.gen_range(-40.0..40.0),
            rng.gen_range(-5.0..5.0),
            rng.gen_range(-40.0..40.0),
        );

        let desc = EntityDesc::new(Mat4::from_translation(position))
            .with_component(
                ComponentDesc::mesh(MeshDesc::new(OPAQUE, stone, 36).with_positions(&cube))
                    .with_child(
                        ComponentDesc::mesh(MeshDesc::new(FOLIAGE, leaves, 96).with_positions(&cube))
                            .with_local(Mat4::from_translation(Vec3::Y)),
                    ),
            )
            .with_cull_distance(60.0);

        spawned.push(renderer.spawn(desc)?);
    }

    let grass = renderer.spawn(EntityDesc::new(Mat4::IDENTITY).with_component(
        ComponentDesc::mesh(MeshDesc::new(FOLIAGE, leaves, 6).with_positions(&cube).instanced()),
    ))?;
    let grass_mesh = renderer.scene().world().entity(grass).map(|e| e.roots()[0]);

    if let Some(grass_mesh) = grass_mesh {
        let instances = renderer.instances(grass_mesh)?;
        renderer.jobs().spawn(move |_| {
            let mut rng = rand::thread_rng();

            for _ in 0..256 {
                let position = vec3(rng.gen_range(-30.0..30.0), 0.0, rng.gen_range(-30.0..30.0));
                instances.add(Mat4::from_translation(position));
            }
        });
    }

    let mut camera = Camera::look_at(vec3(0.0, 2.0, -50.0), Vec3::ZERO, 60f32.to_radians(), 16.0 / 9.0);

    for frame in 0..8 {
        let angle = frame as f32 * 0.25;
        camera.view = Mat4::look_at_lh(
            vec3(50.0 * angle.sin(), 2.0, -50.0 * angle.cos()),
            Vec3::ZERO,
            Vec3::Y,
        );

        if frame == 4 {
            for entity in spawned.drain(..32) {
                renderer.despawn(entity)?;
            }
        }

        renderer.begin_frame(&camera, 1.0 / 60.0)?;
        let stats = renderer.end_frame()?;

        tracing::info!(
            frame = stats.frame_index,
            fence = stats.fence_value,
            draws = stats.draws,
            culled = stats.culled_by_distance + stats.culled_by_frustum,
            instances = stats.instances_written,
            objects = stats.objects_copied,
            "frame done"
        );
    }

    renderer.scene().check_partition()?;
    renderer.shutdown()?;

    tracing::info!(
        submissions = device.submissions().len(),
        live_buffers = device.live_buffers(),
        "done"
    );

    Ok(())
}
