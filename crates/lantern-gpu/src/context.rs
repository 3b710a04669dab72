//! GPU context management.

use crate::adapter::{default_predicates, select_physical_device, AdapterProfile};
use crate::barrier::{record_barriers, ImageBarrier, ImageState};
use crate::command::{execute_one_shot, CommandPool};
use crate::error::{GpuError, Result};
use crate::instance::create_instance;
use crate::memory::{GpuAllocator, GpuImage, ImageDesc};
use crate::queue::QueueFamilyIndices;
use crate::surface::SurfaceContext;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) adapter: AdapterProfile,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) allocator: Mutex<GpuAllocator>,

    pub(crate) queue_families: QueueFamilyIndices,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
    pub(crate) swapchain_loader: ash::khr::swapchain::Device,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the selected adapter's capability profile.
    pub fn adapter(&self) -> &AdapterProfile {
        &self.adapter
    }

    /// Get the resolved queue family assignment.
    pub fn queue_families(&self) -> QueueFamilyIndices {
        self.queue_families
    }

    /// Get the graphics queue.
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the present queue. Identical to the graphics queue when the
    /// families are shared.
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Get the Vulkan instance handle.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the swapchain extension loader.
    pub fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Get access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for the device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }

    /// Upload decoded RGBA8 pixels into a device-local image.
    ///
    /// The image is left in the `TransferSrc` state, ready to be blitted
    /// from. The upload runs synchronously on the graphics queue.
    pub fn upload_rgba_image(
        &self,
        pool: &CommandPool,
        pixels: &[u8],
        width: u32,
        height: u32,
        name: &str,
    ) -> Result<GpuImage> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(GpuError::InvalidState(format!(
                "pixel buffer is {} bytes, {}x{} RGBA needs {}",
                pixels.len(),
                width,
                height,
                expected
            )));
        }

        let mut staging = self
            .allocator
            .lock()
            .create_staging_buffer(expected as u64, "upload-staging")?;
        staging.write(pixels)?;

        let mut image = self.allocator.lock().create_image(&ImageDesc {
            format: vk::Format::R8G8B8A8_SRGB,
            extent: vk::Extent2D { width, height },
            usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::TRANSFER_SRC,
            name,
        })?;

        // Plan both transitions up front so the closure only records.
        let to_dst = ImageBarrier::transition(
            image.image,
            &mut image.state,
            ImageState::Undefined,
            ImageState::TransferDst,
        )?
        .describe();
        let to_src = ImageBarrier::transition(
            image.image,
            &mut image.state,
            ImageState::TransferDst,
            ImageState::TransferSrc,
        )?
        .describe();

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        let buffer = staging.buffer;
        let target = image.image;
        unsafe {
            execute_one_shot(&self.device, pool, self.graphics_queue, |cmd| {
                record_barriers(&self.device, cmd, &[to_dst]);
                self.device.cmd_copy_buffer_to_image(
                    cmd,
                    buffer,
                    target,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
                record_barriers(&self.device, cmd, &[to_src]);
            })?;
        }

        self.allocator.lock().free_buffer(&mut staging)?;

        tracing::debug!("Uploaded {width}x{height} RGBA image '{name}'");

        Ok(image)
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Allocator must release all VkDeviceMemory before the device goes.
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lantern".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    pub fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the GPU context for a window.
    ///
    /// The surface is created first so adapter scoring and queue family
    /// resolution can query presentation support against it. The caller
    /// owns the returned surface and must destroy it before the context.
    pub fn build<W>(self, window: &W) -> Result<(GpuContext, SurfaceContext)>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // Load Vulkan entry point
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        // Create Vulkan instance
        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        // The surface has to exist before scoring can see present support
        let surface = unsafe { SurfaceContext::create(&entry, &instance, window) }?;

        // Score and select the adapter
        let (physical_device, adapter) = unsafe {
            select_physical_device(
                &instance,
                &surface.surface_loader,
                surface.surface,
                &default_predicates(),
            )
        }?;

        // Resolve where graphics and present work will run
        let queue_families = QueueFamilyIndices::resolve(&adapter)?;
        match queue_families {
            QueueFamilyIndices::Shared(family) => {
                tracing::info!("Graphics and present share queue family {family}");
            }
            QueueFamilyIndices::Split { graphics, present } => {
                tracing::info!(
                    "Graphics on queue family {graphics}, present on queue family {present}"
                );
            }
        }

        // Create logical device and retrieve the queues
        let device = unsafe { create_device(&instance, physical_device, queue_families) }?;
        let device = Arc::new(device);

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics(), 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present(), 0) };

        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);

        // Create GPU allocator
        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        let context = GpuContext {
            entry,
            instance,
            physical_device,
            adapter,
            device,
            allocator: Mutex::new(allocator),
            queue_families,
            graphics_queue,
            present_queue,
            swapchain_loader,
        };

        Ok((context, surface))
    }
}

/// Required device extensions.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// Create the logical device and enable the features the frame loop needs.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let extensions = required_device_extensions();
    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    // Synchronization2 backs every barrier this crate records
    let mut vulkan_1_3_features =
        vk::PhysicalDeviceVulkan13Features::default().synchronization2(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}
