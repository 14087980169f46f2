//! End-to-end scenarios against the headless device.

use std::sync::Arc;

use glam::{vec3, Mat4, Vec3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use render_sync::{
    graphics::{
        headless::{HeadlessDevice, Timeline},
        types::{Command, PipelineId, TextureId, UiObjectId, ViewDesc},
    },
    Camera, ComponentDesc, EntityDesc, EntityId, Gpu, Material, MaterialId, MeshDesc, Pipeline,
    RenderConfig, Renderer,
};

const PIPELINE: PipelineId = PipelineId::from_raw(1);

fn setup(timeline: Timeline, config: RenderConfig) -> (Arc<HeadlessDevice>, Renderer, MaterialId) {
    let device = Arc::new(HeadlessDevice::new(timeline));
    let renderer = Renderer::new(Gpu::from_arc(device.clone()), config).unwrap();
    renderer.set_default_pipeline(Pipeline::new(PIPELINE)).unwrap();
    let material = renderer.register_material(Material::default()).unwrap();

    (device, renderer, material)
}

fn chunked(chunk: usize) -> RenderConfig {
    RenderConfig {
        object_chunk: chunk,
        worker_threads: 1,
        ..Default::default()
    }
}

fn mesh(material: MaterialId) -> ComponentDesc {
    ComponentDesc::mesh(
        MeshDesc::new(PIPELINE, material, 36).with_positions(&[Vec3::splat(-0.5), Vec3::splat(0.5)]),
    )
}

fn entity(z: f32, material: MaterialId, meshes: usize) -> EntityDesc {
    (0..meshes).fold(
        EntityDesc::new(Mat4::from_translation(vec3(0.0, 0.0, z))),
        |desc, _| desc.with_component(mesh(material)),
    )
}

fn camera() -> Camera {
    Camera::look_at(Vec3::ZERO, Vec3::Z, std::f32::consts::FRAC_PI_2, 1.0)
}

fn starts(renderer: &Renderer, entities: &[EntityId]) -> Vec<usize> {
    let scene = renderer.scene();
    entities
        .iter()
        .map(|id| scene.world().entity(*id).unwrap().start())
        .collect()
}

#[test]
fn spawn_grows_once_and_despawn_compacts() {
    let (device, renderer, material) = setup(Timeline::Immediate, chunked(4));
    let buffers = device.buffers_created();

    let entities: Vec<EntityId> = (0..5)
        .map(|i| renderer.spawn(entity(i as f32 + 2.0, material, 1)).unwrap())
        .collect();

    assert_eq!(starts(&renderer, &entities), vec![0, 1, 2, 3, 4]);
    {
        let scene = renderer.scene();
        // One object buffer per ring slot, recreated once.
        assert_eq!(device.buffers_created() - buffers, scene.ring().len());
        assert_eq!(scene.allocators().objects.capacity(), 8);
        for frame in scene.ring().frames() {
            assert_eq!(frame.objects().capacity(), 8);
        }
    }

    let buffers = device.buffers_created();
    renderer.despawn(entities[2]).unwrap();
    assert_eq!(device.buffers_created(), buffers);

    let survivors = [entities[0], entities[1], entities[3], entities[4]];
    assert_eq!(starts(&renderer, &survivors), vec![0, 1, 2, 3]);

    let scene = renderer.scene();
    assert_eq!(scene.allocators().objects.live(), 4);
    assert_eq!(scene.allocators().objects.capacity(), 8);
    scene.check_partition().unwrap();
}

#[test]
fn random_mutations_keep_the_partition() {
    let (_, renderer, material) = setup(Timeline::Immediate, chunked(3));
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut alive: Vec<EntityId> = Vec::new();

    for _ in 0..400 {
        match rng.gen_range(0..4) {
            0 | 1 => {
                let meshes = rng.gen_range(0..4);
                alive.push(renderer.spawn(entity(5.0, material, meshes)).unwrap());
            }
            2 if !alive.is_empty() => {
                let index = rng.gen_range(0..alive.len());
                renderer.despawn(alive.swap_remove(index)).unwrap();
            }
            3 if !alive.is_empty() => {
                let target = alive[rng.gen_range(0..alive.len())];
                let roots = renderer.scene().world().entity(target).unwrap().roots().to_vec();

                if roots.is_empty() || rng.gen_bool(0.5) {
                    renderer.add_mesh_slot(target, None, mesh(material)).unwrap();
                } else {
                    renderer
                        .remove_mesh_slot(target, roots[rng.gen_range(0..roots.len())])
                        .unwrap();
                }
            }
            _ => {}
        }

        let scene = renderer.scene();
        scene.check_partition().unwrap();

        let objects = &scene.allocators().objects;
        assert!(objects.capacity() >= objects.live());
        assert_eq!(objects.capacity() % objects.chunk(), 0);
    }
}

#[test]
fn frame_loop_round_trips_through_every_slot() {
    let (device, renderer, material) = setup(Timeline::Immediate, chunked(4));
    renderer.spawn(entity(5.0, material, 2)).unwrap();

    let mut fences = Vec::new();
    for _ in 0..7 {
        renderer.begin_frame(&camera(), 0.016).unwrap();
        fences.push(renderer.end_frame().unwrap().fence_value);
    }

    assert!(fences.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(device.blocked_waits(), 0);

    let scene = renderer.scene();
    assert_eq!(scene.frame_index(), 7);
    for (entity, _) in scene.world().entities() {
        for id in scene.world().component_ids(entity).unwrap() {
            assert_eq!(scene.world().component(id).unwrap().pending(), 0);
        }
    }
}

#[test]
fn reused_slot_waits_for_its_fence() {
    let (device, renderer, material) = setup(Timeline::Manual, chunked(4));
    renderer.spawn(entity(5.0, material, 1)).unwrap();

    std::thread::scope(|s| {
        let worker = s.spawn(|| {
            for _ in 0..4 {
                renderer.begin_frame(&camera(), 0.016).unwrap();
                renderer.end_frame().unwrap();
            }
        });

        // Retire only once something is parked, so every wait on a pending
        // value shows up in the count.
        let mut seen = 0;
        while !worker.is_finished() {
            let blocked = device.blocked_waits();
            if blocked > seen {
                seen = blocked;
                device.retire_all();
            }
            std::thread::yield_now();
        }
    });

    // The initial descriptor flush, then frame four reusing frame one's slot.
    assert_eq!(device.blocked_waits(), 2);
}

#[test]
fn dirty_counter_is_bounded_by_ring_length() {
    let config = RenderConfig {
        frames_in_flight: 2,
        ..chunked(4)
    };
    let (_, renderer, material) = setup(Timeline::Immediate, config);
    let id = renderer.spawn(entity(5.0, material, 1)).unwrap();
    let component = renderer.scene().world().entity(id).unwrap().roots()[0];

    renderer.mark_dirty(component).unwrap();
    renderer.mark_dirty(component).unwrap();
    assert_eq!(renderer.scene().world().component(component).unwrap().pending(), 2);

    let copied: Vec<usize> = (0..3)
        .map(|_| {
            renderer.begin_frame(&camera(), 0.016).unwrap();
            renderer.end_frame().unwrap().objects_copied
        })
        .collect();

    assert_eq!(copied, vec![1, 1, 0]);
}

#[test]
fn default_cull_distance_applies_to_new_entities() {
    let config = RenderConfig {
        default_cull_distance: Some(20.0),
        ..chunked(4)
    };
    let (_, renderer, material) = setup(Timeline::Immediate, config);

    renderer.spawn(entity(10.0, material, 1)).unwrap();
    renderer.spawn(entity(30.0, material, 1)).unwrap();
    renderer
        .spawn(entity(30.0, material, 1).with_cull_distance(50.0))
        .unwrap();

    renderer.begin_frame(&camera(), 0.016).unwrap();
    let stats = renderer.end_frame().unwrap();

    assert_eq!(stats.draws, 2);
    assert_eq!(stats.culled_by_distance, 1);
}

#[test]
fn descriptor_changes_are_batched_into_one_rebuild() {
    let (device, renderer, _) = setup(Timeline::Immediate, chunked(4));
    renderer.rebuild_descriptors().unwrap();
    let before = device.tables_created();

    for raw in 1..=3 {
        assert!(renderer.register_texture(TextureId::from_raw(raw)));
    }
    renderer.register_ui_object(UiObjectId::from_raw(1), true);
    renderer.register_ui_object(UiObjectId::from_raw(2), false);
    renderer.set_ui_visible(UiObjectId::from_raw(2), true);

    renderer.begin_frame(&camera(), 0.016).unwrap();
    renderer.end_frame().unwrap();
    renderer.begin_frame(&camera(), 0.016).unwrap();
    renderer.end_frame().unwrap();

    assert_eq!(device.tables_created(), before + 1);
    assert_eq!(device.live_tables(), 1);
}

#[test]
fn material_registered_mid_frame_never_binds_released_buffers() {
    let config = RenderConfig {
        material_chunk: 1,
        ..chunked(4)
    };
    let (device, renderer, material) = setup(Timeline::Immediate, config);
    renderer.spawn(entity(5.0, material, 1)).unwrap();

    renderer.begin_frame(&camera(), 0.016).unwrap();
    renderer.register_material(Material::default()).unwrap();
    renderer.end_frame().unwrap();

    let commands = device.take_submissions().pop().unwrap();
    let table = commands
        .iter()
        .find_map(|command| match command {
            Command::SetDescriptorTable(table) => Some(*table),
            _ => None,
        })
        .unwrap();

    let views = device.table_views(table).unwrap();
    let constants: Vec<_> = views
        .iter()
        .flatten()
        .filter_map(|view| match view {
            ViewDesc::Constant { buffer, .. } => Some(*buffer),
            _ => None,
        })
        .collect();

    assert_eq!(constants.len(), 2 * renderer.scene().ring().len());
    assert!(constants
        .iter()
        .all(|buffer| device.buffer_size(*buffer).is_some()));
}

#[test]
fn config_file_drives_the_renderer() {
    let config = RenderConfig::from_toml_str(
        r#"
        frames_in_flight = 2
        object_chunk = 2
        "#,
    )
    .unwrap();
    let (_, renderer, material) = setup(Timeline::Immediate, config);

    for z in 0..3 {
        renderer.spawn(entity(z as f32, material, 1)).unwrap();
    }

    let scene = renderer.scene();
    assert_eq!(scene.ring().len(), 2);
    assert_eq!(scene.allocators().objects.capacity(), 4);
}
