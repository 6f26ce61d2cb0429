//! End-to-end checks across packing, precompute and mask editing.
//!
//! Everything here runs on the CPU paths. The GPU smoke test returns early
//! on machines without an adapter.

use glam::{UVec3, Vec3};

use hearth_volume::ambient::{sphere_directions, AmbientOcclusionPrecomputer, CpuAmbientKernel};
use hearth_volume::config::{AmbientConfig, EraserConfig, FilterConfig, VolumeConfig};
use hearth_volume::eraser::{create_eraser, erase_start, undo_last_erasing, MASK_VISIBLE};
use hearth_volume::filter::{BilateralFilterEngine, CpuBilateralKernel};
use hearth_volume::gpu::GpuCapabilities;
use hearth_volume::volume::{
    arrange_texels, choose_addressing_mode, create_volume, linear_index, pack_volume,
    tile_forward, tile_inverse, voxel_count,
};
use hearth_volume::{AddressingMode, EraseOutcome, FrameCapture, RenderMode, VolumeRenderer};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn no_3d_caps() -> GpuCapabilities {
    GpuCapabilities {
        texture_3d: false,
        max_texture_dimension_2d: 2048,
        max_texture_dimension_3d: 0,
        float_render_targets: true,
    }
}

#[test]
fn tiled_packing_places_slices_in_the_atlas() {
    init_logging();
    let dims = UVec3::splat(8);
    let data: Vec<u8> = (0..voxel_count(dims)).map(|i| (i % 251) as u8).collect();
    let volume = create_volume(dims, data.clone(), Vec3::ONE, 1).unwrap();

    let mode = choose_addressing_mode(dims, &no_3d_caps()).unwrap();
    let AddressingMode::TiledAtlas(layout) = mode else {
        panic!("expected tiled atlas, got {:?}", mode);
    };
    assert_eq!(layout.tile_cols, 4);

    // Slice 7 sits in tile (3, 1)
    assert_eq!(tile_forward(&layout, 3, 3, 7), (3 * 8 + 3, 8 + 3));
    assert_eq!(tile_inverse(&layout, 27, 11), Some(UVec3::new(3, 3, 7)));

    let packed = pack_volume(&volume, mode, None, false).unwrap();
    let atlas = arrange_texels(&mode, dims, &packed.intensities);
    let (u, v) = tile_forward(&layout, 3, 3, 7);
    let texel = (v * layout.atlas_width + u) as usize;
    assert_eq!(atlas[texel], data[linear_index(dims, 3, 3, 7)]);
}

#[test]
fn erase_then_undo_restores_mask() {
    init_logging();
    const N: u32 = 32;
    let dims = UVec3::splat(N);
    let config = EraserConfig {
        radius: 3.0,
        depth: 5.0,
        ..EraserConfig::default()
    };
    let mut editor = create_eraser(vec![200; voxel_count(dims)], dims, &config).unwrap();

    // Rays along +x through the row (16, 16), hitting the near face
    let c = 16.5 / N as f32 - 0.5;
    let mut capture = FrameCapture {
        width: 2,
        height: 2,
        low_res: vec![0.5, 0.5, 0.5, 0.0],
        low_res_width: 1,
        low_res_height: 1,
        low_res_divisor: 2,
        ..FrameCapture::default()
    };
    for _ in 0..4 {
        capture.frontface.extend_from_slice(&[-0.5, c, c, 1.0]);
        capture.backface.extend_from_slice(&[0.5, c, c, 1.0]);
    }

    let outcome = erase_start(&mut editor, Some(&capture), 1, 1, 0.5, true);
    let EraseOutcome::Erased { voxels } = outcome else {
        panic!("expected an erase, got {:?}", outcome);
    };
    assert!(voxels > 0);
    assert_ne!(
        editor.mask.voxels[linear_index(dims, 0, 16, 16)],
        MASK_VISIBLE
    );
    assert_eq!(
        editor.mask.voxels[linear_index(dims, 20, 16, 16)],
        MASK_VISIBLE
    );

    assert_eq!(undo_last_erasing(&mut editor), Some(voxels));
    assert!(editor.mask.voxels.iter().all(|v| *v == MASK_VISIBLE));
    assert_eq!(undo_last_erasing(&mut editor), None);
}

#[test]
fn cpu_precompute_keeps_volume_shape() {
    init_logging();
    let dims = UVec3::new(12, 10, 9);
    let mut data = vec![10u8; voxel_count(dims)];
    for z in 3..6 {
        for y in 3..7 {
            for x in 4..8 {
                data[linear_index(dims, x, y, z)] = 230;
            }
        }
    }

    let filter = FilterConfig::default();
    let kernel = CpuBilateralKernel::new(&data, dims, &filter).unwrap();
    let mut engine = BilateralFilterEngine::new(kernel, &data, dims).unwrap();
    engine.run_to_end().unwrap();
    assert!(engine.is_finished());
    let filtered = engine.into_result();
    assert_eq!(filtered.len(), data.len());
    // Edge-preserving: the block interior stays bright, the far corner dark
    assert!(filtered[linear_index(dims, 5, 5, 4)] > 200);
    assert!(filtered[linear_index(dims, 0, 0, 0)] < 40);

    let ambient = AmbientConfig::default();
    let directions = sphere_directions(ambient.seed_solid, ambient.subdivisions);
    let kernel = CpuAmbientKernel::new(&filtered, dims, directions, 0.5, &ambient).unwrap();
    let occlusion = AmbientOcclusionPrecomputer::new(kernel, dims, 4)
        .compute()
        .unwrap();
    assert_eq!(occlusion.len(), data.len());
    // Right next to the block is darker than the far corner
    assert!(occlusion[linear_index(dims, 3, 5, 4)] < occlusion[linear_index(dims, 11, 9, 8)]);
}

#[test]
fn renderer_smoke_test() {
    init_logging();
    let gpu = match hearth_volume::request_headless_context() {
        Ok(gpu) => gpu,
        Err(e) => {
            log::warn!("Skipping GPU test: {}", e);
            return;
        }
    };

    let dims = UVec3::splat(16);
    let data = vec![180u8; voxel_count(dims)];
    let volume = create_volume(dims, data, Vec3::ONE, 1).unwrap();

    let mut config = VolumeConfig::default();
    config.renderer.viewport_width = 64;
    config.renderer.viewport_height = 48;
    let mut renderer =
        VolumeRenderer::new(gpu, wgpu::TextureFormat::Rgba8Unorm, config).unwrap();
    renderer.init_with_volume(&volume, None, None).unwrap();
    assert_eq!(renderer.generation(), 1);
    assert!(
        renderer.shader_failures().is_empty(),
        "{:?}",
        renderer.shader_failures()
    );
    assert!(renderer.is_ready());

    renderer.switch_to_iso_surface();
    assert_eq!(renderer.render_mode(), RenderMode::IsoSurface);

    let png = renderer.screenshot(32, 32).unwrap();
    assert_eq!(&png[1..4], b"PNG");

    // No ROI ids in this volume, so ROI color draws as raycast blend
    renderer.switch_to_roi_color();
    assert_eq!(renderer.render_mode(), RenderMode::RaycastBlend);
    let png = renderer.screenshot(32, 32).unwrap();
    assert_eq!(&png[1..4], b"PNG");
}
