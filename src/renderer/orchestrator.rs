//! Volume renderer
//!
//! `VolumeRenderer` is what the host talks to. It owns the GPU state in a
//! `RenderContext`, the CPU copy of every shader parameter, the transfer
//! function and the voxel eraser. Parameter changes only mark the scene for
//! one redraw; `render()` does the work.

use std::time::Instant;

use glam::{UVec3, Vec4};

use super::context::{
    create_transfer_texture, create_uniform_bind_groups, create_uniform_buffers,
    create_volume_bind_group, write_transfer_texture, RenderContext, VolumeBindings,
    VolumeResources,
};
use super::geometry::{create_bounds_geometry, BOX_INDICES, QUAD_INDICES};
use super::pipeline_cache::{
    build_pipeline, create_render_layouts, required_variants, variant_source, PipelineVariant,
    TargetFormats,
};
use super::readiness::ShaderFailure;
use super::render_data::{MouseState, RenderMode, RenderParams, RenderState};
use super::render_operations::{
    advance_render_state, bgra_to_rgba, build_bounds_uniform, build_render_uniform,
    create_render_params, cut_plane_quad, effective_mode, encode_png, object_bounds,
    opacity_barrier, orbit, screenshot_fov, state_after_erase, step_size_from_slider,
    update_orientation, z_cut_center, zoom,
};
use super::targets::{
    create_render_targets, create_target_bindings, float_target_format, RenderTargets,
    TargetBindings,
};
use crate::ambient::{sphere_directions, AmbientOcclusionPrecomputer, CpuAmbientKernel, GpuAmbientKernel};
use crate::config::VolumeConfig;
use crate::eraser::{
    create_eraser, create_mask, erase_start, reset_mask, set_depth, set_radius, take_dirty, undo_last_erasing,
    EraseOutcome, FrameCapture, VoxelMaskEditor, NO_MATERIAL,
};
use crate::error::{OptionExt, VolumeError, VolumeResult};
use crate::filter::{BilateralFilterEngine, CpuBilateralKernel, GpuBilateralKernel};
use crate::gpu::readback::{read_texture, read_texture_f32};
use crate::gpu::{choose_slice_backend, GpuContext, SliceBackend};
use crate::transfer::{
    band_array, bands_from_thresholds, create_transfer_function, update_from_handles,
    TransferFunction,
};
use crate::volume::{
    choose_addressing_mode, pack_volume, placeholder_voxel_texture,
    upload_mask_texture, upload_roi_lut, upload_volume_texture, upload_voxel_texture,
    virtual_box, write_mask_texture, write_roi_lut, write_voxel_texture, NonEmptyBox, RoiPalette,
    Volume, ROI_TABLE_SIZE,
};

/// Host-side scene drawn on top of the volume
pub trait OverlayScene {
    /// Record draws into `view`. Color and depth must be loaded, not cleared.
    fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        width: u32,
        height: u32,
    );
}

pub struct VolumeRenderer {
    ctx: RenderContext,
    config: VolumeConfig,
    params: RenderParams,
    transfer: TransferFunction,
    has_roi: bool,
    width: u32,
    height: u32,
    mouse: MouseState,
    eraser: Option<VoxelMaskEditor>,
    eraser_mode: bool,
    /// Set by the host when dragging should erase instead of orbit
    eraser_armed: bool,
    capture: Option<FrameCapture>,
    /// Keeps the capture of the frame a stroke started on
    capture_locked: bool,
    overlay: Option<Box<dyn OverlayScene>>,
}

impl VolumeRenderer {
    pub fn new(
        gpu: GpuContext,
        output_format: wgpu::TextureFormat,
        config: VolumeConfig,
    ) -> VolumeResult<Self> {
        config.check()?;
        let float_format = float_target_format(gpu.caps.float_render_targets);
        let params = create_render_params(&config.renderer);
        log::info!(
            "[VolumeRenderer] Created ({:?} output, {:?} targets)",
            output_format,
            float_format
        );
        Ok(Self {
            ctx: RenderContext::new(gpu, output_format, float_format),
            width: config.renderer.viewport_width,
            height: config.renderer.viewport_height,
            config,
            params,
            transfer: create_transfer_function(),
            has_roi: false,
            mouse: MouseState::default(),
            eraser: None,
            eraser_mode: false,
            eraser_armed: false,
            capture: None,
            capture_locked: false,
            overlay: None,
        })
    }

    // ========================================================================
    // VOLUME LIFECYCLE
    // ========================================================================

    /// Replace the volume. Every volume-dependent resource is rebuilt.
    pub fn init_with_volume(
        &mut self,
        volume: &Volume,
        non_empty: Option<NonEmptyBox>,
        palette: Option<RoiPalette>,
    ) -> VolumeResult<()> {
        let start = Instant::now();
        let generation = self.ctx.begin_reload();
        self.eraser = None;
        self.eraser_mode = false;
        self.eraser_armed = false;
        self.capture = None;
        self.capture_locked = false;

        let device = self.ctx.gpu.device.clone();
        let queue = self.ctx.gpu.queue.clone();
        let dims = volume.dims;

        let mode = choose_addressing_mode(dims, &self.ctx.gpu.caps)?;
        let packed = pack_volume(volume, mode, palette, self.config.renderer.seal_edge_slices)?;
        let has_roi = packed.roi_ids.is_some();

        let layouts = create_render_layouts(&device, &mode);
        let volume_texture = upload_volume_texture(&device, &queue, &packed)?;
        let mask = upload_mask_texture(&device, &queue, &packed, &create_mask(dims).voxels)?;
        let ambient = placeholder_voxel_texture(&device, &queue, "Ambient Placeholder", &mode, 255)?;
        let roi_ids = match &packed.roi_ids {
            Some(ids) => upload_voxel_texture(&device, &queue, "ROI Id Texture", mode, dims, ids)?,
            None => placeholder_voxel_texture(&device, &queue, "ROI Id Placeholder", &mode, 0)?,
        };
        let (roi_lut, roi_lut_view) = upload_roi_lut(&device, &queue, &packed);
        let (transfer, transfer_view) = create_transfer_texture(&device, &queue, &self.transfer.rgba);

        let (bounds_min, bounds_max) = object_bounds(non_empty);
        let geometry = create_bounds_geometry(&device, bounds_min, bounds_max);
        let (bounds_buffer, render_buffer) = create_uniform_buffers(&device);
        let (bounds_bind_group, uniform_bind_group) =
            create_uniform_bind_groups(&device, &layouts, &bounds_buffer, &render_buffer);
        let volume_bind_group = create_volume_bind_group(
            &device,
            &layouts,
            VolumeBindings {
                volume: &volume_texture.view,
                mask: &mask.view,
                ambient: &ambient.view,
                transfer: &transfer_view,
                roi_lut: &roi_lut_view,
                roi_ids: &roi_ids.view,
            },
        );

        // Pipelines report into the barrier of this generation only
        let variants = required_variants(has_roi);
        self.ctx.readiness.reset(generation, variants.len());
        let formats = TargetFormats {
            float: self.ctx.float_format,
            output: self.ctx.output_format,
        };
        for variant in variants {
            let source = variant_source(variant, &mode, dims);
            match build_pipeline(&device, &layouts, formats, variant, source) {
                Ok(pipeline) => {
                    if self.ctx.readiness.report(generation, variant, Ok(())) {
                        self.ctx.pipelines.insert(variant, pipeline);
                    }
                }
                Err(error) => {
                    self.ctx.readiness.report(generation, variant, Err(error));
                }
            }
        }

        self.ctx.resources = Some(VolumeResources {
            packed,
            layouts,
            volume: volume_texture,
            mask,
            ambient,
            ambient_ready: false,
            roi_ids,
            roi_lut,
            roi_lut_view,
            transfer,
            transfer_view,
            geometry,
            bounds_buffer,
            render_buffer,
            bounds_bind_group,
            uniform_bind_group,
            volume_bind_group,
        });

        self.has_roi = has_roi;
        self.params = RenderParams {
            box_virtual: virtual_box(volume.box_size),
            bounds_min,
            bounds_max,
            mask_enabled: false,
            ambient_enabled: false,
            ..create_render_params(&self.config.renderer)
        };
        self.allocate_targets();

        log::info!(
            "[VolumeRenderer] Volume {}x{}x{} ready in {:.1}ms (generation {}, roi={}, {} pipelines, {} failed)",
            dims.x,
            dims.y,
            dims.z,
            start.elapsed().as_secs_f64() * 1000.0,
            generation,
            has_roi,
            self.ctx.pipelines.len(),
            self.ctx.readiness.failures().len()
        );
        Ok(())
    }

    fn allocate_targets(&mut self) {
        self.ctx.bindings.take();
        self.ctx.targets.take();
        let Some(resources) = self.ctx.resources.as_ref() else {
            return;
        };
        let targets = create_render_targets(
            &self.ctx.gpu.device,
            self.width,
            self.height,
            self.config.renderer.low_res_divisor,
            self.ctx.float_format,
        );
        self.ctx.bindings = Some(create_target_bindings(
            &self.ctx.gpu.device,
            &resources.layouts,
            &targets,
        ));
        self.ctx.targets = Some(targets);
        self.params.state = RenderState::Once;
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
        self.capture = None;
        self.allocate_targets();
        log::debug!("[VolumeRenderer] Resized to {}x{}", self.width, self.height);
    }

    // ========================================================================
    // FRAME
    // ========================================================================

    /// Draw one frame into `view` if anything changed. Returns whether a frame
    /// was drawn; before every pipeline is ready this is a no-op.
    pub fn render(&mut self, view: &wgpu::TextureView) -> VolumeResult<bool> {
        if self.ctx.resources.is_none() || !self.ctx.readiness.is_ready() {
            return Ok(false);
        }
        let (draw, next) = advance_render_state(self.params.state);
        self.params.state = next;
        if !draw {
            return Ok(false);
        }

        let frame_start = Instant::now();
        self.sync_mask()?;
        update_orientation(&mut self.params);

        let (Some(resources), Some(targets), Some(bindings)) = (
            self.ctx.resources.as_ref(),
            self.ctx.targets.as_ref(),
            self.ctx.bindings.as_ref(),
        ) else {
            return Ok(false);
        };

        write_frame_uniforms(&self.ctx.gpu.queue, resources, targets, &self.params);
        let mut encoder = self
            .ctx
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Volume Frame"),
            });
        let mode = effective_mode(self.params.mode, self.has_roi);
        encode_frame(
            &self.ctx,
            resources,
            targets,
            bindings,
            mode,
            self.eraser_mode,
            &mut encoder,
            view,
        )?;
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.render(&mut encoder, view, targets.width, targets.height);
        }
        self.ctx.gpu.queue.submit(std::iter::once(encoder.finish()));

        if self.eraser_mode && !self.capture_locked {
            self.capture = Some(capture_frame(&self.ctx.gpu, targets)?);
        }

        log::debug!(
            "[VolumeRenderer] Frame {:?} in {:.2}ms",
            mode,
            frame_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(true)
    }

    fn sync_mask(&mut self) -> VolumeResult<()> {
        let (Some(eraser), Some(resources)) = (self.eraser.as_mut(), self.ctx.resources.as_ref())
        else {
            return Ok(());
        };
        if take_dirty(eraser) {
            write_mask_texture(&self.ctx.gpu.queue, &resources.mask, &eraser.mask.voxels)?;
        }
        Ok(())
    }

    /// Render offscreen at `width` x `height` and return PNG bytes
    pub fn screenshot(&mut self, width: u32, height: u32) -> VolumeResult<Vec<u8>> {
        if !self.ctx.readiness.is_ready() {
            return Err(VolumeError::StateError {
                expected: "all pipelines ready".to_string(),
                actual: format!(
                    "{} pending, {} failed",
                    self.ctx.readiness.pending(),
                    self.ctx.readiness.failures().len()
                ),
            });
        }
        let resources = self
            .ctx
            .resources
            .as_ref()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?;
        let width = width.max(1);
        let height = height.max(1);
        let device = &self.ctx.gpu.device;
        let queue = &self.ctx.gpu.queue;

        let targets = create_render_targets(
            device,
            width,
            height,
            self.config.renderer.low_res_divisor,
            self.ctx.float_format,
        );
        let bindings = create_target_bindings(device, &resources.layouts, &targets);
        let output = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Screenshot Target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.ctx.output_format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let output_view = output.create_view(&wgpu::TextureViewDescriptor::default());

        // Keep the centered square area of interest in frame
        let mut params = self.params.clone();
        params.fov_degrees = screenshot_fov(self.params.fov_degrees, width, height);
        update_orientation(&mut params);
        write_frame_uniforms(queue, resources, &targets, &params);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Screenshot"),
        });
        let mode = effective_mode(self.params.mode, self.has_roi);
        encode_frame(
            &self.ctx,
            resources,
            &targets,
            &bindings,
            mode,
            false,
            &mut encoder,
            &output_view,
        )?;
        queue.submit(std::iter::once(encoder.finish()));

        let mut pixels = read_texture(device, queue, &output, width, height, self.ctx.output_format)?;
        if matches!(
            self.ctx.output_format,
            wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
        ) {
            bgra_to_rgba(&mut pixels);
        }
        // Uniforms now hold the screenshot camera
        self.params.state = RenderState::Once;
        log::info!("[VolumeRenderer] Screenshot {}x{}", width, height);
        encode_png(pixels, width, height)
    }

    pub fn set_overlay(&mut self, overlay: Option<Box<dyn OverlayScene>>) {
        self.overlay = overlay;
        self.params.state = RenderState::Once;
    }

    // ========================================================================
    // INPUT
    // ========================================================================

    /// Starts an erase stroke when the eraser is armed, otherwise an orbit
    pub fn on_mouse_down(&mut self, x: f32, y: f32) -> Option<EraseOutcome> {
        self.mouse = MouseState {
            pressed: true,
            last_x: x,
            last_y: y,
        };
        self.params.state = RenderState::Enabled;
        if self.eraser_mode && self.eraser_armed {
            self.capture_locked = true;
            return Some(self.erase_at(x, y, true));
        }
        None
    }

    pub fn on_mouse_move(&mut self, x: f32, y: f32) -> Option<EraseOutcome> {
        if !self.mouse.pressed {
            return None;
        }
        let (dx, dy) = (x - self.mouse.last_x, y - self.mouse.last_y);
        self.mouse.last_x = x;
        self.mouse.last_y = y;
        if self.eraser_mode && self.eraser_armed {
            return Some(self.erase_at(x, y, false));
        }
        self.params.rotation = orbit(self.params.rotation, dx, dy);
        self.params.rotation_dirty = true;
        None
    }

    pub fn on_mouse_up(&mut self, _x: f32, _y: f32) {
        self.mouse.pressed = false;
        self.capture_locked = false;
        self.params.state = RenderState::Once;
    }

    /// Positive `delta` zooms in
    pub fn on_mouse_wheel(&mut self, delta: f32) {
        self.params.camera_distance = zoom(self.params.camera_distance, delta);
        self.params.state = RenderState::Once;
    }

    fn erase_at(&mut self, x: f32, y: f32, is_new_stroke: bool) -> EraseOutcome {
        let Some(eraser) = self.eraser.as_mut() else {
            log::warn!("[VolumeRenderer] Erase requested without an eraser");
            return EraseOutcome::NoCapture;
        };
        let outcome = erase_start(
            eraser,
            self.capture.as_ref(),
            x.floor() as i32,
            y.floor() as i32,
            self.params.iso_threshold,
            is_new_stroke,
        );
        let erased = matches!(outcome, EraseOutcome::Erased { .. });
        self.params.state = state_after_erase(self.params.state, erased, self.mouse.pressed);
        outcome
    }

    // ========================================================================
    // RENDER MODES
    // ========================================================================

    fn set_mode(&mut self, mode: RenderMode) {
        self.params.mode = mode;
        self.params.state = RenderState::Once;
        log::info!(
            "[VolumeRenderer] Mode {:?} (drawing {:?})",
            mode,
            effective_mode(mode, self.has_roi)
        );
    }

    pub fn switch_to_raycast_blend(&mut self) {
        self.set_mode(RenderMode::RaycastBlend);
    }

    pub fn switch_to_iso_surface(&mut self) {
        self.set_mode(RenderMode::IsoSurface);
    }

    pub fn switch_to_max_intensity(&mut self) {
        self.set_mode(RenderMode::MaxIntensity);
    }

    pub fn switch_to_full_volume(&mut self) {
        self.set_mode(RenderMode::FullVolume);
    }

    pub fn switch_to_roi_color(&mut self) {
        self.set_mode(RenderMode::RoiColor);
    }

    /// Mode actually drawn for the current volume
    pub fn render_mode(&self) -> RenderMode {
        effective_mode(self.params.mode, self.has_roi)
    }

    // ========================================================================
    // PARAMETERS
    // ========================================================================

    pub fn set_iso_threshold_value(&mut self, value: f32) {
        self.params.iso_threshold = value.clamp(0.0, 1.0);
        self.params.state = RenderState::Once;
    }

    /// Slider value; scaled by the opacity factor
    pub fn set_opacity_barrier(&mut self, value: f32) {
        self.params.opacity_barrier = opacity_barrier(value);
        self.params.state = RenderState::Once;
    }

    pub fn update_brightness(&mut self, value: f32) {
        self.params.brightness = value;
        self.params.state = RenderState::Once;
    }

    pub fn update_contrast(&mut self, value: f32) {
        self.params.contrast = value;
        self.params.state = RenderState::Once;
    }

    /// Slider in 0..1 to the same step length for every mode
    pub fn set_stepsize(&mut self, value: f32) {
        self.params.step_size = Vec4::splat(step_size_from_slider(value));
        self.params.state = RenderState::Once;
    }

    pub fn update_z_cut_plane(&mut self, value: f32) {
        self.params.cut_plane_center.z = z_cut_center(value);
        self.params.rotation_dirty = true;
        self.params.state = RenderState::Once;
    }

    /// Tissue thresholds: band 1 min, band 1 max, band 2
    pub fn set_transfer_func_vec3(&mut self, values: [f32; 3], color_flag: bool) {
        self.params.bands = band_array(&bands_from_thresholds(values, color_flag));
        self.params.state = RenderState::Once;
    }

    /// Rebuild the lookup from editor handles and upload it
    pub fn update_transfer_function(&mut self, intensities: &[f32], opacities: &[f32]) {
        update_from_handles(&mut self.transfer, intensities, opacities);
        if let Some(resources) = self.ctx.resources.as_ref() {
            write_transfer_texture(&self.ctx.gpu.queue, &resources.transfer, &self.transfer.rgba);
        }
        self.params.state = RenderState::Once;
    }

    /// Non-zero entries mark visible ROI ids
    pub fn update_selected_roi_map(&mut self, selected: &[u8]) {
        if selected.len() != ROI_TABLE_SIZE {
            log::warn!(
                "[VolumeRenderer] ROI selection has {} entries (expected {})",
                selected.len(),
                ROI_TABLE_SIZE
            );
            return;
        }
        if let Some(resources) = self.ctx.resources.as_mut() {
            resources.packed.selected_rois = selected.to_vec();
            write_roi_lut(&self.ctx.gpu.queue, &resources.roi_lut, &resources.packed);
        }
        self.params.state = RenderState::Once;
    }

    pub fn set_mask_flag(&mut self, enabled: bool) {
        self.params.mask_enabled = enabled;
        self.params.state = RenderState::Once;
    }

    /// Shade isosurfaces with ambient occlusion, computing it if needed
    pub fn set_ambient_texture_mode(&mut self, iso_threshold: f32) -> VolumeResult<()> {
        let ready = self
            .ctx
            .resources
            .as_ref()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?
            .ambient_ready;
        if !ready || (self.params.ambient_iso - iso_threshold).abs() > f32::EPSILON {
            self.build_ambient_texture(iso_threshold)?;
        }
        self.params.ambient_enabled = true;
        self.params.state = RenderState::Once;
        Ok(())
    }

    pub fn off_ambient_texture_mode(&mut self) {
        self.params.ambient_enabled = false;
        self.params.state = RenderState::Once;
    }

    // ========================================================================
    // PRECOMPUTE
    // ========================================================================

    /// Compute the AO volume for `iso_threshold` and bind it
    pub fn build_ambient_texture(&mut self, iso_threshold: f32) -> VolumeResult<()> {
        let gpu = self.ctx.gpu.clone();
        let config = self.config.ambient.clone();
        let resources = self
            .ctx
            .resources
            .as_mut()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?;
        let dims = resources.packed.dims;
        let directions = sphere_directions(config.seed_solid, config.subdivisions);

        let occlusion = match choose_slice_backend(&gpu.caps) {
            SliceBackend::Gpu => {
                let kernel =
                    GpuAmbientKernel::new(&gpu, &resources.volume, &directions, iso_threshold, &config)?;
                AmbientOcclusionPrecomputer::new(kernel, dims, config.slices_per_readback).compute()?
            }
            SliceBackend::Cpu => {
                let kernel = CpuAmbientKernel::new(
                    &resources.packed.intensities,
                    dims,
                    directions,
                    iso_threshold,
                    &config,
                )?;
                AmbientOcclusionPrecomputer::new(kernel, dims, config.slices_per_readback).compute()?
            }
        };

        resources.ambient = upload_voxel_texture(
            &gpu.device,
            &gpu.queue,
            "Ambient Texture",
            resources.packed.mode,
            dims,
            &occlusion,
        )?;
        resources.ambient_ready = true;
        resources.rebind_volume(&gpu.device);
        self.params.ambient_iso = iso_threshold;
        self.params.state = RenderState::Once;
        Ok(())
    }

    /// Run the bilateral filter over the whole volume and apply the result
    pub fn run_bilateral_filter(&mut self) -> VolumeResult<()> {
        let gpu = self.ctx.gpu.clone();
        let config = self.config.filter.clone();
        let resources = self
            .ctx
            .resources
            .as_ref()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?;
        let dims = resources.packed.dims;
        let source = &resources.packed.intensities;

        let filtered = match choose_slice_backend(&gpu.caps) {
            SliceBackend::Gpu => {
                let kernel =
                    GpuBilateralKernel::new(&gpu, &resources.volume, &config, config.slices_per_readback)?;
                let mut engine = BilateralFilterEngine::new(kernel, source, dims)?;
                engine.run_to_end()?;
                engine.into_result()
            }
            SliceBackend::Cpu => {
                let kernel = CpuBilateralKernel::new(source, dims, &config)?;
                let mut engine = BilateralFilterEngine::new(kernel, source, dims)?;
                engine.run_to_end()?;
                engine.into_result()
            }
        };
        self.apply_filtered_volume(&filtered)
    }

    /// Make `filtered` the working volume for rendering, AO and the eraser
    pub fn apply_filtered_volume(&mut self, filtered: &[u8]) -> VolumeResult<()> {
        let resources = self
            .ctx
            .resources
            .as_mut()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?;
        write_voxel_texture(&self.ctx.gpu.queue, &resources.volume, filtered)?;
        resources.packed.intensities = filtered.to_vec();
        if resources.ambient_ready {
            // AO was computed from the old intensities
            resources.ambient_ready = false;
            self.params.ambient_enabled = false;
            log::info!("[VolumeRenderer] Ambient occlusion invalidated by filtered volume");
        }
        if let Some(eraser) = self.eraser.as_mut() {
            eraser.intensities = filtered.to_vec();
        }
        self.params.state = RenderState::Once;
        Ok(())
    }

    // ========================================================================
    // ERASER
    // ========================================================================

    /// Returns whether erase mode is now on. Needs float targets for capture.
    pub fn set_eraser_mode(&mut self, enabled: bool) -> VolumeResult<bool> {
        if !enabled {
            self.eraser_mode = false;
            self.capture = None;
            self.capture_locked = false;
            self.params.state = RenderState::Once;
            return Ok(false);
        }
        if self.ctx.float_format != wgpu::TextureFormat::Rgba32Float {
            log::warn!("[VolumeRenderer] Eraser needs Rgba32Float render targets, staying off");
            return Ok(false);
        }
        let resources = self
            .ctx
            .resources
            .as_ref()
            .ok_or_volume(|| VolumeError::NoVolumeLoaded)?;
        if self.eraser.is_none() {
            let mut eraser = create_eraser(
                resources.packed.intensities.clone(),
                resources.packed.dims,
                &self.config.eraser,
            )?;
            set_radius(&mut eraser, self.config.eraser.radius);
            set_depth(&mut eraser, self.config.eraser.depth);
            self.eraser = Some(eraser);
        }
        self.eraser_mode = true;
        self.params.mask_enabled = true;
        // Next frame produces the capture
        self.params.state = RenderState::Once;
        Ok(true)
    }

    pub fn set_eraser_start(&mut self, armed: bool) {
        self.eraser_armed = armed;
    }

    pub fn set_eraser_radius(&mut self, radius: f32) {
        if radius > 0.0 {
            self.config.eraser.radius = radius;
        }
        if let Some(eraser) = self.eraser.as_mut() {
            set_radius(eraser, radius);
        }
    }

    pub fn set_eraser_depth(&mut self, depth: f32) {
        if depth > 0.0 {
            self.config.eraser.depth = depth;
        }
        if let Some(eraser) = self.eraser.as_mut() {
            set_depth(eraser, depth);
        }
    }

    /// Restores the last stroke; None when there is nothing to undo
    pub fn undo_eraser(&mut self) -> Option<usize> {
        let restored = undo_last_erasing(self.eraser.as_mut()?)?;
        self.params.state = RenderState::Once;
        Some(restored)
    }

    pub fn reset_eraser_mask(&mut self) {
        if let Some(eraser) = self.eraser.as_mut() {
            reset_mask(eraser);
            self.params.state = RenderState::Once;
        }
    }

    // ========================================================================
    // STATE
    // ========================================================================

    pub fn shader_failures(&self) -> &[ShaderFailure] {
        self.ctx.readiness.failures()
    }

    pub fn is_ready(&self) -> bool {
        self.ctx.resources.is_some() && self.ctx.readiness.is_ready()
    }

    pub fn generation(&self) -> u64 {
        self.ctx.generation
    }

    pub fn params(&self) -> &RenderParams {
        &self.params
    }

    pub fn eraser(&self) -> Option<&VoxelMaskEditor> {
        self.eraser.as_ref()
    }

    pub fn capture(&self) -> Option<&FrameCapture> {
        self.capture.as_ref()
    }

    pub fn volume_dims(&self) -> Option<UVec3> {
        self.ctx.resources.as_ref().map(|r| r.packed.dims)
    }
}

// ============================================================================
// PASS ENCODING
// ============================================================================

fn write_frame_uniforms(
    queue: &wgpu::Queue,
    resources: &VolumeResources,
    targets: &RenderTargets,
    params: &RenderParams,
) {
    let aspect = targets.width as f32 / targets.height as f32;
    queue.write_buffer(
        &resources.bounds_buffer,
        0,
        bytemuck::bytes_of(&build_bounds_uniform(params, aspect)),
    );
    queue.write_buffer(
        &resources.geometry.quad_vertices,
        0,
        bytemuck::cast_slice(&cut_plane_quad(params)),
    );
    queue.write_buffer(
        &resources.render_buffer,
        0,
        bytemuck::bytes_of(&build_render_uniform(
            params,
            (targets.width, targets.height),
            (targets.low_res_width, targets.low_res_height),
            targets.low_res_divisor,
        )),
    );
}

fn pipeline(ctx: &RenderContext, variant: PipelineVariant) -> VolumeResult<&wgpu::RenderPipeline> {
    ctx.pipelines
        .get(variant)
        .ok_or_volume(|| VolumeError::StateError {
            expected: format!("pipeline {:?}", variant),
            actual: "missing".to_string(),
        })
}

fn color_attachment(
    view: &wgpu::TextureView,
    clear: wgpu::Color,
) -> Option<wgpu::RenderPassColorAttachment<'_>> {
    Some(wgpu::RenderPassColorAttachment {
        view,
        resolve_target: None,
        ops: wgpu::Operations {
            load: wgpu::LoadOp::Clear(clear),
            store: wgpu::StoreOp::Store,
        },
    })
}

fn depth_attachment(view: &wgpu::TextureView, clear: f32) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
    Some(wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: wgpu::LoadOp::Clear(clear),
            store: wgpu::StoreOp::Discard,
        }),
        stencil_ops: None,
    })
}

/// Backface, frontface, low-res march and final pass for one frame
#[allow(clippy::too_many_arguments)]
fn encode_frame(
    ctx: &RenderContext,
    resources: &VolumeResources,
    targets: &RenderTargets,
    bindings: &TargetBindings,
    mode: RenderMode,
    needs_low_res: bool,
    encoder: &mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
) -> VolumeResult<()> {
    let geometry = &resources.geometry;
    let box_count = BOX_INDICES.len() as u32;

    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Backface Pass"),
            color_attachments: &[color_attachment(&targets.backface.view, wgpu::Color::TRANSPARENT)],
            depth_stencil_attachment: depth_attachment(&targets.depth.view, 0.0),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline(ctx, PipelineVariant::Backface)?);
        pass.set_bind_group(0, &resources.bounds_bind_group, &[]);
        pass.set_vertex_buffer(0, geometry.box_vertices.slice(..));
        pass.set_index_buffer(geometry.box_indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..box_count, 0, 0..1);
    }

    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Frontface Pass"),
            color_attachments: &[color_attachment(&targets.frontface.view, wgpu::Color::TRANSPARENT)],
            depth_stencil_attachment: depth_attachment(&targets.depth.view, 1.0),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &resources.bounds_bind_group, &[]);

        pass.set_pipeline(pipeline(ctx, PipelineVariant::CutPlane)?);
        pass.set_vertex_buffer(0, geometry.quad_vertices.slice(..));
        pass.set_index_buffer(geometry.quad_indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..QUAD_INDICES.len() as u32, 0, 0..1);

        pass.set_pipeline(pipeline(ctx, PipelineVariant::Frontface)?);
        pass.set_vertex_buffer(0, geometry.box_vertices.slice(..));
        pass.set_index_buffer(geometry.box_indices.slice(..), wgpu::IndexFormat::Uint16);
        pass.draw_indexed(0..box_count, 0, 0..1);
    }

    let full_res = mode == RenderMode::FullVolume;
    if !full_res || needs_low_res {
        // Full-volume frames still need hit distances for the eraser
        let low_mode = if full_res { RenderMode::RaycastBlend } else { mode };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Low Res March"),
            color_attachments: &[color_attachment(
                &targets.low_res.view,
                wgpu::Color {
                    r: 0.0,
                    g: 0.0,
                    b: 0.0,
                    a: NO_MATERIAL as f64,
                },
            )],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline(ctx, PipelineVariant::LowRes(low_mode))?);
        pass.set_bind_group(0, &resources.uniform_bind_group, &[]);
        pass.set_bind_group(1, &resources.volume_bind_group, &[]);
        pass.set_bind_group(2, &bindings.entry_exit, &[]);
        pass.draw(0..3, 0..1);
    }

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Final Pass"),
        color_attachments: &[color_attachment(view, wgpu::Color::BLACK)],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_bind_group(0, &resources.uniform_bind_group, &[]);
    if full_res {
        pass.set_pipeline(pipeline(ctx, PipelineVariant::FullRes(RenderMode::FullVolume))?);
        pass.set_bind_group(1, &resources.volume_bind_group, &[]);
        pass.set_bind_group(2, &bindings.entry_exit, &[]);
    } else {
        pass.set_pipeline(pipeline(ctx, PipelineVariant::Composite)?);
        pass.set_bind_group(1, &bindings.low_res, &[]);
    }
    pass.draw(0..3, 0..1);
    Ok(())
}

/// Read the float targets back for the eraser
fn capture_frame(gpu: &GpuContext, targets: &RenderTargets) -> VolumeResult<FrameCapture> {
    let start = Instant::now();
    let device = &gpu.device;
    let queue = &gpu.queue;
    let backface = read_texture_f32(device, queue, &targets.backface.texture, targets.width, targets.height)?;
    let frontface = read_texture_f32(device, queue, &targets.frontface.texture, targets.width, targets.height)?;
    let low_res = read_texture_f32(
        device,
        queue,
        &targets.low_res.texture,
        targets.low_res_width,
        targets.low_res_height,
    )?;
    log::debug!(
        "[VolumeRenderer] Captured frame for eraser in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(FrameCapture {
        width: targets.width,
        height: targets.height,
        backface,
        frontface,
        low_res,
        low_res_width: targets.low_res_width,
        low_res_height: targets.low_res_height,
        low_res_divisor: targets.low_res_divisor,
    })
}
