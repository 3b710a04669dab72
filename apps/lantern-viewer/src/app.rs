//! Viewer application implementation.

use anyhow::Context as _;
use ash::vk;
use tracing::{error, info};

use lantern_app::{AppContext, FrameContext, LanternApp};
use lantern_gpu::barrier::{color_subresource_range, record_barriers, ImageBarrier, ImageState};
use lantern_gpu::memory::ImageDesc;
use lantern_gpu::GpuImage;

use crate::canvas::{Canvas, Pixel};

/// Frames per radian of the background flash. Roughly a 6 second cycle at
/// 60 FPS.
const FLASH_PERIOD: f32 = 120.0;

/// Overlay size as a fraction of the frame edge (1/N).
const OVERLAY_FRACTION: u32 = 3;

/// Side length of the generated checkerboard overlay in pixels.
const CHECKER_SIZE: u32 = 256;

/// Cell size of the generated checkerboard in pixels.
const CHECKER_CELL: u32 = 32;

/// Overlay source configuration (from CLI or defaults).
#[derive(Debug, Clone, Default)]
pub struct OverlayParams {
    pub image_path: Option<String>,
}

impl OverlayParams {
    /// Parse overlay parameters from command line arguments. The first
    /// positional argument is taken as the overlay image path.
    pub fn from_args() -> Self {
        let mut params = Self::default();
        for arg in std::env::args().skip(1) {
            if !arg.starts_with('-') {
                params.image_path = Some(arg);
                break;
            }
        }
        params
    }
}

/// Viewer application state.
pub struct Viewer {
    /// One offscreen render target per frame slot.
    targets: Vec<GpuImage>,
    /// Overlay texture, resident as a blit source.
    overlay: GpuImage,
}

impl LanternApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = OverlayParams::from_args();

        let (pixels, width, height) = match &params.image_path {
            Some(path) => {
                let decoded = image::open(path)
                    .with_context(|| format!("failed to open overlay image '{path}'"))?
                    .to_rgba8();
                let (width, height) = decoded.dimensions();
                info!("Overlay: {path} ({width}x{height})");
                (decoded.into_raw(), width, height)
            }
            None => {
                let canvas = Canvas::checkerboard(
                    CHECKER_SIZE,
                    CHECKER_SIZE,
                    CHECKER_CELL,
                    Pixel::rgb(245, 240, 220),
                    Pixel::rgb(40, 44, 52),
                );
                info!("Overlay: generated {CHECKER_SIZE}x{CHECKER_SIZE} checkerboard");
                (canvas.as_bytes().to_vec(), canvas.width(), canvas.height())
            }
        };

        let overlay =
            ctx.gpu
                .upload_rgba_image(&ctx.command_pool, &pixels, width, height, "viewer-overlay")?;

        let targets = create_targets(ctx, ctx.width(), ctx.height())?;

        info!("Viewer initialized");

        Ok(Self { targets, overlay })
    }

    // The frame counter drives the animation; nothing to advance here.
    fn update(&mut self, _ctx: &AppContext, _dt: f32) {}

    fn render(&mut self, ctx: &AppContext, frame: &mut FrameContext) -> anyhow::Result<()> {
        self.record_compose(ctx, frame)?;
        self.record_present_blit(ctx, frame);
        Ok(())
    }

    fn on_resize(&mut self, ctx: &mut AppContext, width: u32, height: u32) -> anyhow::Result<()> {
        // In-flight frames were drained before this call, so the old
        // targets are free to go.
        {
            let mut allocator = ctx.gpu.allocator().lock();
            for target in &mut self.targets {
                allocator.free_image(target)?;
            }
        }

        self.targets = create_targets(ctx, width, height)?;
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut AppContext) {
        let mut allocator = ctx.gpu.allocator().lock();

        for target in &mut self.targets {
            if let Err(e) = allocator.free_image(target) {
                error!("Failed to free render target: {e}");
            }
        }
        if let Err(e) = allocator.free_image(&mut self.overlay) {
            error!("Failed to free overlay texture: {e}");
        }
    }
}

impl Viewer {
    /// Clear the slot's render target and stamp the overlay into its
    /// corner. The target ends the pass as a blit source.
    fn record_compose(&mut self, ctx: &AppContext, frame: &FrameContext) -> anyhow::Result<()> {
        let device = ctx.gpu.device();
        let cmd = frame.command_buffer;
        let target = &mut self.targets[frame.slot_index];

        // Plan both transitions against the tracked state before recording.
        // The first frame enters from Undefined, later ones from TransferSrc.
        let from = target.state;
        let to_dst = ImageBarrier::transition(
            target.image,
            &mut target.state,
            from,
            ImageState::TransferDst,
        )?
        .describe();
        let to_src = ImageBarrier::transition(
            target.image,
            &mut target.state,
            ImageState::TransferDst,
            ImageState::TransferSrc,
        )?
        .describe();

        let clear_color = vk::ClearColorValue {
            float32: background_color(frame.frame_number),
        };

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: self.overlay.extent.width as i32,
                    y: self.overlay.extent.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: overlay_rect(target.extent),
        };

        unsafe {
            record_barriers(device, cmd, &[to_dst]);

            device.cmd_clear_color_image(
                cmd,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &clear_color,
                &[color_subresource_range()],
            );

            // Nearest keeps the checkerboard cells crisp
            device.cmd_blit_image(
                cmd,
                self.overlay.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::NEAREST,
            );

            record_barriers(device, cmd, &[to_src]);
        }

        Ok(())
    }

    /// Scale the composed target onto the acquired presentable image. The
    /// framework has already moved that image into the transfer-destination
    /// state.
    fn record_present_blit(&self, ctx: &AppContext, frame: &FrameContext) {
        let device = ctx.gpu.device();
        let cmd = frame.command_buffer;
        let target = &self.targets[frame.slot_index];

        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: target.extent.width as i32,
                    y: target.extent.height as i32,
                    z: 1,
                },
            ],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: frame.swapchain_extent.width as i32,
                    y: frame.swapchain_extent.height as i32,
                    z: 1,
                },
            ],
        };

        unsafe {
            device.cmd_blit_image(
                cmd,
                target.image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                frame.swapchain_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );
        }
    }
}

/// Create one offscreen render target per frame slot, sized to the frame.
fn create_targets(ctx: &AppContext, width: u32, height: u32) -> anyhow::Result<Vec<GpuImage>> {
    let mut allocator = ctx.gpu.allocator().lock();
    (0..ctx.frames_in_flight())
        .map(|slot| -> anyhow::Result<GpuImage> {
            let target = allocator.create_image(&ImageDesc {
                format: vk::Format::B8G8R8A8_SRGB,
                extent: vk::Extent2D { width, height },
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
                name: &format!("viewer-target-{slot}"),
            })?;
            Ok(target)
        })
        .collect()
}

/// Flash intensity in [0, 1] for a frame number.
fn flash(frame_number: u64) -> f32 {
    (frame_number as f32 / FLASH_PERIOD).sin().abs()
}

/// Background clear color for a frame number: dark base with the flash
/// breathing on the blue channel.
fn background_color(frame_number: u64) -> [f32; 4] {
    let f = flash(frame_number);
    [0.04, 0.07, 0.55f32.mul_add(f, 0.20), 1.0]
}

/// Destination rectangle for the overlay, anchored to the top-left corner
/// at one [`OVERLAY_FRACTION`]th of the frame edge.
fn overlay_rect(extent: vk::Extent2D) -> [vk::Offset3D; 2] {
    let w = (extent.width / OVERLAY_FRACTION).max(1);
    let h = (extent.height / OVERLAY_FRACTION).max(1);
    [
        vk::Offset3D { x: 0, y: 0, z: 0 },
        vk::Offset3D {
            x: w as i32,
            y: h as i32,
            z: 1,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn flash_starts_dark() {
        assert_relative_eq!(flash(0), 0.0);
    }

    #[test]
    fn flash_peaks_near_a_quarter_cycle() {
        // sin(188/120) = sin(1.5667) is within a hair of the peak
        assert_relative_eq!(flash(188), 1.0, epsilon = 1e-4);
    }

    #[test]
    fn flash_never_goes_negative() {
        for frame_number in 0..2000 {
            let f = flash(frame_number);
            assert!((0.0..=1.0).contains(&f), "flash({frame_number}) = {f}");
        }
    }

    #[test]
    fn background_color_is_opaque_and_in_range() {
        for frame_number in (0..2000).step_by(7) {
            let [r, g, b, a] = background_color(frame_number);
            for channel in [r, g, b] {
                assert!((0.0..=1.0).contains(&channel));
            }
            assert_relative_eq!(a, 1.0);
        }
    }

    #[test]
    fn background_flashes_on_the_blue_channel() {
        let dark = background_color(0);
        let bright = background_color(188);
        assert!(bright[2] > dark[2]);
        assert_relative_eq!(dark[0], bright[0]);
        assert_relative_eq!(dark[1], bright[1]);
    }

    #[test]
    fn overlay_rect_is_a_third_of_the_frame() {
        let rect = overlay_rect(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!(rect[0], vk::Offset3D { x: 0, y: 0, z: 0 });
        assert_eq!(rect[1], vk::Offset3D { x: 426, y: 240, z: 1 });
    }

    #[test]
    fn overlay_rect_never_collapses() {
        let rect = overlay_rect(vk::Extent2D {
            width: 1,
            height: 2,
        });
        assert_eq!(rect[1].x, 1);
        assert_eq!(rect[1].y, 1);
    }
}
