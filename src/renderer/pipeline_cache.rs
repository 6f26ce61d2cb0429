//! Pipeline variants and their cache
//!
//! Each variant is one render pipeline compiled from a WGSL prelude of
//! `const` switches plus the pass body. The set a volume needs is built once
//! per load; mask and AO stay runtime uniform flags so toggling them never
//! recompiles.

use rustc_hash::FxHashMap;
use std::fmt::Write;

use super::render_data::{BoundsVertex, RenderMode};
use crate::gpu::build_checked;
use crate::gpu::shader_source::{
    volume_constants, voxel_accessor, BOUNDS_WGSL, COMPOSITE_WGSL, FULLSCREEN_WGSL, RAYCAST_WGSL,
    RENDER_UNIFORM_WGSL,
};
use crate::volume::AddressingMode;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineVariant {
    /// Exit points, back faces with depth >=
    Backface,
    /// Entry points on the cut plane, no depth test
    CutPlane,
    /// Entry points on front faces with depth <
    Frontface,
    /// Ray-march into the low-res float target
    LowRes(RenderMode),
    /// Ray-march straight into the output view
    FullRes(RenderMode),
    /// Upsample the low-res target into the output view
    Composite,
}

/// Everything one volume needs to draw in every mode
pub fn required_variants(has_roi: bool) -> Vec<PipelineVariant> {
    let mut variants = vec![
        PipelineVariant::Backface,
        PipelineVariant::CutPlane,
        PipelineVariant::Frontface,
        PipelineVariant::LowRes(RenderMode::IsoSurface),
        PipelineVariant::LowRes(RenderMode::MaxIntensity),
        PipelineVariant::Composite,
    ];
    if has_roi {
        variants.push(PipelineVariant::LowRes(RenderMode::RoiColor));
    } else {
        variants.push(PipelineVariant::LowRes(RenderMode::RaycastBlend));
        variants.push(PipelineVariant::FullRes(RenderMode::FullVolume));
    }
    variants
}

/// Numeric id of a mode inside the shaders
pub fn mode_id(mode: RenderMode) -> u32 {
    match mode {
        RenderMode::RaycastBlend => 0,
        RenderMode::IsoSurface => 1,
        RenderMode::MaxIntensity => 2,
        RenderMode::FullVolume => 3,
        RenderMode::RoiColor => 4,
    }
}

/// Check that `fn entry_point(` exists before handing the source to wgpu
pub fn validate_entry_point(source: &str, entry_point: &str) -> Result<(), String> {
    let pattern = format!("fn {}(", entry_point);
    if source.contains(&pattern) {
        Ok(())
    } else {
        Err(format!("entry point '{}' not found in shader", entry_point))
    }
}

/// WGSL for one variant
pub fn variant_source(variant: PipelineVariant, mode: &AddressingMode, dims: glam::UVec3) -> String {
    match variant {
        PipelineVariant::Backface | PipelineVariant::CutPlane | PipelineVariant::Frontface => {
            BOUNDS_WGSL.to_string()
        }
        PipelineVariant::LowRes(render_mode) | PipelineVariant::FullRes(render_mode) => {
            let full_res = matches!(variant, PipelineVariant::FullRes(_));
            let mut src = volume_constants(mode, dims);
            let _ = writeln!(src, "const RENDER_MODE: u32 = {}u;", mode_id(render_mode));
            let _ = writeln!(src, "const FULL_RES: bool = {};", full_res);
            src.push_str(&voxel_accessor(mode, "load_volume_texel", "volume_tex", 1, 0));
            src.push_str(&voxel_accessor(mode, "load_mask_texel", "mask_tex", 1, 1));
            src.push_str(&voxel_accessor(mode, "load_ambient_texel", "ambient_tex", 1, 2));
            src.push_str(&voxel_accessor(mode, "load_roi_texel", "roi_tex", 1, 5));
            src.push_str(FULLSCREEN_WGSL);
            src.push_str(RENDER_UNIFORM_WGSL);
            src.push_str(RAYCAST_WGSL);
            src
        }
        PipelineVariant::Composite => {
            let mut src = String::from(FULLSCREEN_WGSL);
            src.push_str(RENDER_UNIFORM_WGSL);
            src.push_str(COMPOSITE_WGSL);
            src
        }
    }
}

/// Bind group and pipeline layouts, fixed per addressing mode
pub struct RenderLayouts {
    pub bounds: wgpu::BindGroupLayout,
    pub uniforms: wgpu::BindGroupLayout,
    pub volume: wgpu::BindGroupLayout,
    pub targets: wgpu::BindGroupLayout,
    pub low_res: wgpu::BindGroupLayout,
    pub bounds_pipeline: wgpu::PipelineLayout,
    pub raycast_pipeline: wgpu::PipelineLayout,
    pub composite_pipeline: wgpu::PipelineLayout,
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

pub fn create_render_layouts(device: &wgpu::Device, mode: &AddressingMode) -> RenderLayouts {
    let voxel_dimension = match mode {
        AddressingMode::Native3d => wgpu::TextureViewDimension::D3,
        AddressingMode::TiledAtlas(_) => wgpu::TextureViewDimension::D2,
    };
    let flat = wgpu::TextureViewDimension::D2;

    let bounds = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Bounds Uniform Layout"),
        entries: &[uniform_entry(
            0,
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        )],
    });
    let uniforms = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Render Uniform Layout"),
        entries: &[uniform_entry(0, wgpu::ShaderStages::FRAGMENT)],
    });
    let volume = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Volume Layout"),
        entries: &[
            texture_entry(0, voxel_dimension),
            texture_entry(1, voxel_dimension),
            texture_entry(2, voxel_dimension),
            texture_entry(3, flat),
            texture_entry(4, flat),
            texture_entry(5, voxel_dimension),
        ],
    });
    let targets = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Entry Exit Layout"),
        entries: &[texture_entry(0, flat), texture_entry(1, flat)],
    });
    let low_res = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("Low Res Layout"),
        entries: &[texture_entry(0, flat)],
    });

    let bounds_pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Bounds Pipeline Layout"),
        bind_group_layouts: &[&bounds],
        push_constant_ranges: &[],
    });
    let raycast_pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Raycast Pipeline Layout"),
        bind_group_layouts: &[&uniforms, &volume, &targets],
        push_constant_ranges: &[],
    });
    let composite_pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Composite Pipeline Layout"),
        bind_group_layouts: &[&uniforms, &low_res],
        push_constant_ranges: &[],
    });

    RenderLayouts {
        bounds,
        uniforms,
        volume,
        targets,
        low_res,
        bounds_pipeline,
        raycast_pipeline,
        composite_pipeline,
    }
}

/// Formats the pipelines render into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFormats {
    /// Entry/exit and low-res targets
    pub float: wgpu::TextureFormat,
    /// Host view
    pub output: wgpu::TextureFormat,
}

const BOUNDS_VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];

fn bounds_vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<BoundsVertex>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &BOUNDS_VERTEX_ATTRIBUTES,
    }
}

/// Compile one variant inside an error scope
pub fn build_pipeline(
    device: &wgpu::Device,
    layouts: &RenderLayouts,
    formats: TargetFormats,
    variant: PipelineVariant,
    source: String,
) -> Result<wgpu::RenderPipeline, String> {
    let (vertex_entry, fragment_entry) = match variant {
        PipelineVariant::Backface => ("vs_bounds", "fs_backface"),
        PipelineVariant::CutPlane => ("vs_bounds", "fs_cut_plane"),
        PipelineVariant::Frontface => ("vs_bounds", "fs_frontface"),
        PipelineVariant::LowRes(_) | PipelineVariant::FullRes(_) => ("vs_fullscreen", "fs_raycast"),
        PipelineVariant::Composite => ("vs_fullscreen", "fs_composite"),
    };
    validate_entry_point(&source, vertex_entry)?;
    validate_entry_point(&source, fragment_entry)?;

    let box_buffers = [bounds_vertex_layout()];
    let (layout, buffers, cull_mode, depth, format): (_, &[wgpu::VertexBufferLayout], _, _, _) =
        match variant {
            PipelineVariant::Backface => (
                &layouts.bounds_pipeline,
                &box_buffers,
                Some(wgpu::Face::Front),
                Some((wgpu::CompareFunction::GreaterEqual, true)),
                formats.float,
            ),
            PipelineVariant::CutPlane => (
                &layouts.bounds_pipeline,
                &box_buffers,
                None,
                Some((wgpu::CompareFunction::Always, false)),
                formats.float,
            ),
            PipelineVariant::Frontface => (
                &layouts.bounds_pipeline,
                &box_buffers,
                Some(wgpu::Face::Back),
                Some((wgpu::CompareFunction::Less, true)),
                formats.float,
            ),
            PipelineVariant::LowRes(_) => (&layouts.raycast_pipeline, &[], None, None, formats.float),
            PipelineVariant::FullRes(_) => (&layouts.raycast_pipeline, &[], None, None, formats.output),
            PipelineVariant::Composite => (&layouts.composite_pipeline, &[], None, None, formats.output),
        };

    let label = format!("{:?}", variant);
    build_checked(device, &label, || {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: vertex_entry,
                buffers,
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: fragment_entry,
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode,
                ..Default::default()
            },
            depth_stencil: depth.map(|(compare, write)| wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: write,
                depth_compare: compare,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        })
    })
    .map_err(|e| e.to_string())
}

/// Compiled pipelines of one generation
#[derive(Default)]
pub struct PipelineCache {
    pipelines: FxHashMap<PipelineVariant, wgpu::RenderPipeline>,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, variant: PipelineVariant, pipeline: wgpu::RenderPipeline) {
        self.pipelines.insert(variant, pipeline);
    }

    pub fn get(&self, variant: PipelineVariant) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&variant)
    }

    pub fn clear(&mut self) {
        self.pipelines.clear();
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::render_operations::effective_mode;
    use crate::volume::tile_layout;
    use glam::UVec3;

    /// Pipelines one frame draws with, erase mode on
    fn frame_variants(mode: RenderMode) -> Vec<PipelineVariant> {
        let mut variants = vec![
            PipelineVariant::Backface,
            PipelineVariant::CutPlane,
            PipelineVariant::Frontface,
        ];
        if mode == RenderMode::FullVolume {
            variants.push(PipelineVariant::LowRes(RenderMode::RaycastBlend));
            variants.push(PipelineVariant::FullRes(RenderMode::FullVolume));
        } else {
            variants.push(PipelineVariant::LowRes(mode));
            variants.push(PipelineVariant::Composite);
        }
        variants
    }

    #[test]
    fn test_required_variants() {
        let plain = required_variants(false);
        assert_eq!(plain.len(), 8);
        assert!(plain.contains(&PipelineVariant::FullRes(RenderMode::FullVolume)));
        assert!(!plain.contains(&PipelineVariant::LowRes(RenderMode::RoiColor)));

        let roi = required_variants(true);
        assert_eq!(roi.len(), 7);
        assert!(roi.contains(&PipelineVariant::LowRes(RenderMode::RoiColor)));
        assert!(!roi.contains(&PipelineVariant::LowRes(RenderMode::RaycastBlend)));
    }

    #[test]
    fn test_every_requested_mode_has_its_pipelines() {
        let modes = [
            RenderMode::RaycastBlend,
            RenderMode::IsoSurface,
            RenderMode::MaxIntensity,
            RenderMode::FullVolume,
            RenderMode::RoiColor,
        ];
        for has_roi in [false, true] {
            let built = required_variants(has_roi);
            for requested in modes {
                let drawn = effective_mode(requested, has_roi);
                for variant in frame_variants(drawn) {
                    assert!(
                        built.contains(&variant),
                        "{:?} (roi={}) draws with {:?}, which is never built",
                        requested,
                        has_roi,
                        variant
                    );
                }
            }
        }
    }

    #[test]
    fn test_raycast_source_carries_variant_constants() {
        let layout = tile_layout(UVec3::new(8, 8, 8), 4096).unwrap();
        let mode = AddressingMode::TiledAtlas(layout);
        let src = variant_source(
            PipelineVariant::FullRes(RenderMode::FullVolume),
            &mode,
            UVec3::new(8, 8, 8),
        );
        assert!(src.contains("const RENDER_MODE: u32 = 3u;"));
        assert!(src.contains("const FULL_RES: bool = true;"));
        assert!(src.contains("var mask_tex: texture_2d<f32>"));
        assert!(validate_entry_point(&src, "fs_raycast").is_ok());
        assert!(validate_entry_point(&src, "vs_fullscreen").is_ok());
    }

    #[test]
    fn test_every_variant_has_its_entry_points() {
        let dims = UVec3::splat(4);
        for variant in required_variants(false).into_iter().chain(required_variants(true)) {
            let src = variant_source(variant, &AddressingMode::Native3d, dims);
            let entries: &[&str] = match variant {
                PipelineVariant::Backface => &["vs_bounds", "fs_backface"],
                PipelineVariant::CutPlane => &["vs_bounds", "fs_cut_plane"],
                PipelineVariant::Frontface => &["vs_bounds", "fs_frontface"],
                PipelineVariant::LowRes(_) | PipelineVariant::FullRes(_) => &["fs_raycast"],
                PipelineVariant::Composite => &["fs_composite"],
            };
            for entry in entries {
                assert!(validate_entry_point(&src, entry).is_ok(), "{:?} {}", variant, entry);
            }
        }
        assert!(validate_entry_point("fn main() {}", "fs_raycast").is_err());
    }
}
