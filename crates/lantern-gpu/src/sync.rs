//! Synchronization primitives and frame slots.
//!
//! The frame loop runs a fixed ring of slots, each owning the command
//! buffer, semaphores, and fence for one frame in flight. The per-slot
//! fence is the only point where the CPU blocks on the GPU.

use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use ash::vk;

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 2;

/// Budget for a single fence wait attempt.
pub const FENCE_TIMEOUT_NS: u64 = 100_000_000;

/// Wait attempts before a stuck fence becomes a hard error.
pub const FENCE_WAIT_ATTEMPTS: u32 = 8;

/// Outcome of a single bounded fence wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceWait {
    Signaled,
    TimedOut,
}

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Wait on a fence for at most `timeout_ns`.
///
/// A timeout is an expected outcome and comes back as [`FenceWait::TimedOut`];
/// a lost device is classified as the fatal [`GpuError::DeviceLost`].
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence(
    device: &ash::Device,
    fence: vk::Fence,
    timeout_ns: u64,
) -> Result<FenceWait> {
    match device.wait_for_fences(&[fence], true, timeout_ns) {
        Ok(()) => Ok(FenceWait::Signaled),
        Err(vk::Result::TIMEOUT) => Ok(FenceWait::TimedOut),
        Err(vk::Result::ERROR_DEVICE_LOST) => Err(GpuError::DeviceLost),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Wait on a fence with a bounded retry budget.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn wait_for_fence_bounded(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    for attempt in 1..=FENCE_WAIT_ATTEMPTS {
        match wait_for_fence(device, fence, FENCE_TIMEOUT_NS)? {
            FenceWait::Signaled => return Ok(()),
            FenceWait::TimedOut => {
                tracing::warn!(
                    "Fence wait timed out (attempt {attempt}/{FENCE_WAIT_ATTEMPTS})"
                );
            }
        }
    }

    Err(GpuError::FenceTimeout(FENCE_WAIT_ATTEMPTS))
}

/// Reset a fence to the unsignaled state.
///
/// # Safety
/// The device and fence must be valid.
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}

/// Resources owned by one frame slot.
#[derive(Clone, Copy)]
pub struct FrameSlot {
    /// Command buffer recorded by this slot.
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the acquired image is ready to be written.
    pub image_available: vk::Semaphore,
    /// Signaled when this slot's submission has finished rendering.
    pub render_finished: vk::Semaphore,
    /// Signaled when this slot's submission has fully completed.
    pub in_flight: vk::Fence,
}

impl FrameSlot {
    /// Create one slot's resources. The fence starts signaled so the first
    /// wait on a fresh slot returns immediately.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        Ok(Self {
            command_buffer: pool.allocate_command_buffer(device)?,
            image_available: create_semaphore(device)?,
            render_finished: create_semaphore(device)?,
            in_flight: create_fence(device, true)?,
        })
    }

    /// Destroy the slot's sync primitives. The command buffer is freed with
    /// its pool.
    ///
    /// # Safety
    /// The device must be valid and the slot must not be in flight.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight, None);
    }
}

/// Fixed ring of frame slots plus the monotonic frame counter.
pub struct FrameSlots {
    slots: Vec<FrameSlot>,
    current: usize,
    frame_count: u64,
}

impl FrameSlots {
    /// Create the slot ring.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        pool: &CommandPool,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            slots.push(FrameSlot::new(device, pool)?);
        }

        Ok(Self {
            slots,
            current: 0,
            frame_count: 0,
        })
    }

    /// The slot owning the frame currently being recorded.
    pub fn current(&self) -> &FrameSlot {
        &self.slots[self.current]
    }

    /// Index of the current slot.
    pub fn slot_index(&self) -> usize {
        self.current
    }

    /// Total frames advanced since creation.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Number of slots in the ring.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the ring is empty (it never is in practice).
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Every fence in the ring, for draining before recreation.
    pub fn fences(&self) -> Vec<vk::Fence> {
        self.slots.iter().map(|s| s.in_flight).collect()
    }

    /// Move to the next slot and bump the frame counter.
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.frame_count += 1;
    }

    /// Destroy all slots.
    ///
    /// # Safety
    /// The device must be valid and no slot may be in flight.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for slot in &self.slots {
            slot.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_slot() -> FrameSlot {
        FrameSlot {
            command_buffer: vk::CommandBuffer::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        }
    }

    fn ring(frames_in_flight: usize) -> FrameSlots {
        FrameSlots {
            slots: vec![null_slot(); frames_in_flight],
            current: 0,
            frame_count: 0,
        }
    }

    #[test]
    fn two_draws_use_each_slot_exactly_once() {
        let mut slots = ring(FRAMES_IN_FLIGHT);
        let mut used = vec![0u32; FRAMES_IN_FLIGHT];

        for _ in 0..FRAMES_IN_FLIGHT {
            used[slots.slot_index()] += 1;
            slots.advance();
        }

        assert_eq!(used, vec![1, 1]);
        assert_eq!(slots.frame_count(), 2);
        assert_eq!(slots.slot_index(), 0);
    }

    #[test]
    fn hundred_frames_cycle_without_stalling() {
        let mut slots = ring(FRAMES_IN_FLIGHT);
        let image_count = 3u32;
        let mut acquired = 0u32;
        let mut used = vec![0u32; FRAMES_IN_FLIGHT];

        for _ in 0..100 {
            // Stand-in for acquisition against a software device
            let image_index = acquired % image_count;
            acquired += 1;
            assert!(image_index < image_count);

            used[slots.slot_index()] += 1;
            slots.advance();
        }

        assert_eq!(slots.frame_count(), 100);
        assert_eq!(used, vec![50, 50]);
    }

    #[test]
    fn frame_counter_is_monotonic_across_wraps() {
        let mut slots = ring(FRAMES_IN_FLIGHT);
        let mut last = slots.frame_count();

        for _ in 0..7 {
            slots.advance();
            assert!(slots.frame_count() > last);
            last = slots.frame_count();
        }

        assert_eq!(slots.frame_count(), 7);
        assert_eq!(slots.slot_index(), 7 % FRAMES_IN_FLIGHT);
    }

    #[test]
    fn fences_lists_every_slot() {
        let slots = ring(FRAMES_IN_FLIGHT);
        assert_eq!(slots.fences().len(), FRAMES_IN_FLIGHT);
    }
}
