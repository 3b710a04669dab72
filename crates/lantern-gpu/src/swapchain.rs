//! Swapchain negotiation and management.
//!
//! Negotiation is split from creation: [`SwapchainConfig::negotiate`] turns
//! surface capabilities plus a requested extent into a concrete
//! configuration without touching the device, and [`Swapchain::create`]
//! realizes that configuration. Recreation reuses the same path with the
//! old handle passed through.

use crate::error::{GpuError, Result};
use crate::queue::QueueFamilyIndices;
use crate::surface::SurfaceCapabilities;
use ash::vk;

/// Target number of presentable images (triple buffering).
pub const TARGET_IMAGE_COUNT: u32 = 3;

/// Fully negotiated swapchain parameters.
#[derive(Clone, Debug)]
pub struct SwapchainConfig {
    pub extent: vk::Extent2D,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    pub queue_families: Vec<u32>,
}

impl SwapchainConfig {
    /// Negotiate swapchain parameters against surface capabilities.
    ///
    /// Pure: no device access.
    pub fn negotiate(
        support: &SurfaceCapabilities,
        requested_extent: vk::Extent2D,
        indices: QueueFamilyIndices,
    ) -> Result<Self> {
        let caps = &support.capabilities;

        let surface_format = select_surface_format(&support.formats)?;
        let extent = calculate_extent(caps, requested_extent);
        let image_count = select_image_count(caps);
        let pre_transform = select_pre_transform(caps);
        let composite_alpha = select_composite_alpha(caps);
        let (sharing_mode, queue_families) = indices.image_sharing();

        Ok(Self {
            extent,
            surface_format,
            // FIFO is the one mode every surface must support
            present_mode: vk::PresentModeKHR::FIFO,
            image_count,
            pre_transform,
            composite_alpha,
            sharing_mode,
            queue_families,
        })
    }
}

/// Select the surface format: 32-bit BGRA with non-linear sRGB when
/// offered, otherwise the first advertised format.
fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    if available.is_empty() {
        return Err(GpuError::SwapchainCreation(
            "surface advertises no formats".to_string(),
        ));
    }

    for format in available {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            return Ok(*format);
        }
    }

    Ok(available[0])
}

/// Calculate the swapchain extent.
///
/// A current extent of `u32::MAX` is the sentinel for "window manager
/// defers to us": clamp the requested size into the supported range. Any
/// other value is authoritative and used verbatim.
fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    requested: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: requested.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: requested.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// Pick the image count, aiming for triple buffering.
///
/// A max of 0 means the surface imposes no upper bound; the target still
/// has to respect the minimum.
fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if capabilities.max_image_count > 0 {
        TARGET_IMAGE_COUNT.clamp(capabilities.min_image_count, capabilities.max_image_count)
    } else {
        TARGET_IMAGE_COUNT.max(capabilities.min_image_count)
    }
}

fn select_pre_transform(capabilities: &vk::SurfaceCapabilitiesKHR) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

fn select_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    let priority = [
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::OPAQUE,
    ];

    priority
        .into_iter()
        .find(|&mode| capabilities.supported_composite_alpha.contains(mode))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

/// Swapchain wrapper.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a swapchain from a negotiated configuration.
    ///
    /// Passing the previous handle as `old_swapchain` lets the driver
    /// recycle resources across a recreation.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn create(
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
        surface: vk::SurfaceKHR,
        config: &SwapchainConfig,
        old_swapchain: Option<vk::SwapchainKHR>,
    ) -> Result<Self> {
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(config.image_count)
            .image_format(config.surface_format.format)
            .image_color_space(config.surface_format.color_space)
            .image_extent(config.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(config.sharing_mode)
            .queue_family_indices(&config.queue_families)
            .pre_transform(config.pre_transform)
            .composite_alpha(config.composite_alpha)
            .present_mode(config.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain.unwrap_or(vk::SwapchainKHR::null()));

        let swapchain = swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        let images = swapchain_loader.get_swapchain_images(swapchain)?;

        let image_views: Vec<_> = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::default()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(config.surface_format.format)
                    .components(vk::ComponentMapping::default())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1),
                    );

                device.create_image_view(&view_info, None)
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        tracing::debug!(
            "Created swapchain: {}x{}, {} images, {:?}",
            config.extent.width,
            config.extent.height,
            images.len(),
            config.surface_format.format,
        );

        Ok(Self {
            swapchain,
            images,
            image_views,
            format: config.surface_format.format,
            extent: config.extent,
        })
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// An out-of-date surface and an acquire timeout come back as distinct
    /// errors so the frame loop can recreate or retry respectively.
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<(u32, bool)> {
        let result = swapchain_loader.acquire_next_image(
            self.swapchain,
            timeout_ns,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            // No image was acquired; the caller must recreate the swapchain.
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(GpuError::SwapchainOutOfDate),
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => Err(GpuError::AcquireTimeout),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Present an image. Returns whether the surface reported itself
    /// suboptimal (out-of-date is folded in; both mean "recreate soon").
    ///
    /// # Safety
    /// All handles must be valid.
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = swapchain_loader.queue_present(queue, &present_info);

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::from(e)),
        }
    }

    /// Destroy the swapchain. Views go first, then the handle.
    ///
    /// # Safety
    /// No in-flight frame may still reference the images.
    pub unsafe fn destroy(
        &self,
        device: &ash::Device,
        swapchain_loader: &ash::khr::swapchain::Device,
    ) {
        for &view in &self.image_views {
            device.destroy_image_view(view, None);
        }
        swapchain_loader.destroy_swapchain(self.swapchain, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn support(capabilities: vk::SurfaceCapabilitiesKHR) -> SurfaceCapabilities {
        SurfaceCapabilities {
            capabilities,
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    fn caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    fn negotiate(capabilities: vk::SurfaceCapabilitiesKHR) -> SwapchainConfig {
        SwapchainConfig::negotiate(
            &support(capabilities),
            vk::Extent2D {
                width: 1280,
                height: 720,
            },
            QueueFamilyIndices::Shared(0),
        )
        .unwrap()
    }

    #[test]
    fn surface_extent_is_authoritative_when_defined() {
        let config = negotiate(caps());
        assert_eq!(config.extent.width, 1920);
        assert_eq!(config.extent.height, 1080);
    }

    #[test]
    fn undefined_extent_clamps_the_request() {
        let mut capabilities = caps();
        capabilities.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        capabilities.min_image_extent = vk::Extent2D {
            width: 640,
            height: 480,
        };
        capabilities.max_image_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };

        // Requested 1280x720 lands on the max in both dimensions
        let config = negotiate(capabilities);
        assert_eq!(config.extent.width, 800);
        assert_eq!(config.extent.height, 600);
    }

    #[test]
    fn srgb_bgra_format_is_preferred() {
        let config = negotiate(caps());
        assert_eq!(config.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(
            config.surface_format.color_space,
            vk::ColorSpaceKHR::SRGB_NONLINEAR
        );
    }

    #[test]
    fn first_format_is_the_fallback() {
        let mut support = support(caps());
        support.formats = vec![vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];

        let config = SwapchainConfig::negotiate(
            &support,
            vk::Extent2D {
                width: 100,
                height: 100,
            },
            QueueFamilyIndices::Shared(0),
        )
        .unwrap();
        assert_eq!(config.surface_format.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn no_formats_is_fatal() {
        let mut support = support(caps());
        support.formats.clear();

        let result = SwapchainConfig::negotiate(
            &support,
            vk::Extent2D {
                width: 100,
                height: 100,
            },
            QueueFamilyIndices::Shared(0),
        );
        assert!(matches!(result, Err(GpuError::SwapchainCreation(_))));
    }

    #[test]
    fn image_count_targets_triple_buffering() {
        let mut capabilities = caps();
        capabilities.min_image_count = 1;
        capabilities.max_image_count = 8;
        assert_eq!(negotiate(capabilities).image_count, 3);
    }

    #[test]
    fn image_count_respects_a_low_maximum() {
        let mut capabilities = caps();
        capabilities.min_image_count = 1;
        capabilities.max_image_count = 2;
        assert_eq!(negotiate(capabilities).image_count, 2);
    }

    #[test]
    fn unbounded_maximum_still_honors_the_minimum() {
        let mut capabilities = caps();
        capabilities.min_image_count = 4;
        capabilities.max_image_count = 0;
        assert_eq!(negotiate(capabilities).image_count, 4);

        capabilities.min_image_count = 1;
        assert_eq!(negotiate(capabilities).image_count, 3);
    }

    #[test]
    fn present_mode_is_always_fifo() {
        assert_eq!(negotiate(caps()).present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn identity_transform_is_preferred() {
        let mut capabilities = caps();
        capabilities.supported_transforms =
            vk::SurfaceTransformFlagsKHR::IDENTITY | vk::SurfaceTransformFlagsKHR::ROTATE_90;
        capabilities.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            negotiate(capabilities).pre_transform,
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );
    }

    #[test]
    fn current_transform_is_kept_without_identity_support() {
        let mut capabilities = caps();
        capabilities.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_180;
        capabilities.current_transform = vk::SurfaceTransformFlagsKHR::ROTATE_180;
        assert_eq!(
            negotiate(capabilities).pre_transform,
            vk::SurfaceTransformFlagsKHR::ROTATE_180
        );
    }

    #[test]
    fn composite_alpha_follows_priority_order() {
        let mut capabilities = caps();
        capabilities.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
            | vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(
            negotiate(capabilities).composite_alpha,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );

        capabilities.supported_composite_alpha = vk::CompositeAlphaFlagsKHR::OPAQUE;
        assert_eq!(
            negotiate(capabilities).composite_alpha,
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }

    #[test]
    fn sharing_mode_follows_queue_resolution() {
        let shared = negotiate(caps());
        assert_eq!(shared.sharing_mode, vk::SharingMode::EXCLUSIVE);
        assert!(shared.queue_families.is_empty());

        let split = SwapchainConfig::negotiate(
            &support(caps()),
            vk::Extent2D {
                width: 100,
                height: 100,
            },
            QueueFamilyIndices::Split {
                graphics: 0,
                present: 2,
            },
        )
        .unwrap();
        assert_eq!(split.sharing_mode, vk::SharingMode::CONCURRENT);
        assert_eq!(split.queue_families, vec![0, 2]);
    }
}
