//! Vulkan presentation core for Lantern.
//!
//! This crate provides:
//! - Instance and device management with predicate-scored adapter selection
//! - Queue family resolution for graphics and present work
//! - Swapchain negotiation and recreation
//! - Image layout transition planning over synchronization2 barriers
//! - Frame-in-flight slots and fence/semaphore plumbing
//! - Memory allocation via gpu-allocator

pub mod adapter;
pub mod barrier;
pub mod command;
pub mod context;
pub mod error;
pub mod instance;
pub mod memory;
pub mod queue;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use adapter::{score_adapter, select_physical_device, AdapterProfile, Score, ScorePredicate};
pub use barrier::{ImageBarrier, ImageState, QueueOwnership};
pub use context::{GpuContext, GpuContextBuilder};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage, ImageDesc};
pub use queue::QueueFamilyIndices;
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{Swapchain, SwapchainConfig};
pub use sync::{
    create_fence, create_semaphore, FrameSlot, FrameSlots, FENCE_WAIT_ATTEMPTS, FRAMES_IN_FLIGHT,
};
