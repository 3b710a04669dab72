//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No adapter survived predicate filtering.
    #[error("No suitable GPU adapter found")]
    NoSuitableAdapter,

    /// The adapter lacks a required queue family.
    #[error("Missing {0} queue family")]
    MissingQueueFamily(&'static str),

    /// The surface changed; the swapchain must be recreated.
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// A swapchain image could not be acquired within the timeout.
    #[error("Swapchain image acquisition timed out")]
    AcquireTimeout,

    /// A fence stayed unsignaled through every bounded wait attempt.
    #[error("Fence wait timed out after {0} attempts")]
    FenceTimeout(u32),

    /// The device was lost; only teardown is possible.
    #[error("Device lost")]
    DeviceLost,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
