//! Image layout transitions for the render, blit, present pipeline.
//!
//! Every image the frame loop touches is tracked through a small state
//! machine. Transitions are planned as values first ([`ImageBarrier`]),
//! validated against the tracked state, and only then lowered to
//! synchronization2 barriers. A mismatched layout transition is undefined
//! behavior on the device, so the plan step catches it on the host instead.

use crate::error::{GpuError, Result};
use crate::queue::QueueFamilyIndices;
use ash::vk;

/// Lifecycle states of an image used by the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageState {
    /// Freshly created or recreated; contents undefined.
    Undefined,
    /// Render target written by the color-output stage.
    ColorAttachment,
    /// Source of a blit or copy.
    TransferSrc,
    /// Destination of a blit, copy, or clear.
    TransferDst,
    /// Handed to the compositor for presentation.
    Present,
}

impl ImageState {
    /// The Vulkan layout backing this state.
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            Self::Undefined => vk::ImageLayout::UNDEFINED,
            Self::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            Self::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Self::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Self::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }

    /// Stage and access to wait on when leaving this state.
    fn src_sync(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            Self::Undefined => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
            Self::ColorAttachment => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            Self::TransferSrc => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
            ),
            Self::TransferDst => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            // Leaving Present happens right after acquisition; chain off the
            // stage the acquire semaphore is waited at.
            Self::Present => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::NONE,
            ),
        }
    }

    /// Stage and access blocked when entering this state.
    fn dst_sync(self) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
        match self {
            Self::Undefined => (vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE),
            Self::ColorAttachment => (
                vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
                vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            ),
            Self::TransferSrc => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_READ,
            ),
            Self::TransferDst => (
                vk::PipelineStageFlags2::TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            ),
            // Nothing on the GPU timeline reads a presented image.
            Self::Present => (vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE),
        }
    }
}

/// Queue family ownership carried by a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueOwnership {
    /// Same family on both sides, or concurrent sharing; no handoff.
    Unified,
    /// Explicit ownership handoff between two families.
    Transfer { src_family: u32, dst_family: u32 },
}

impl QueueOwnership {
    /// Ownership policy for presentable images, given how the swapchain
    /// was created.
    ///
    /// Split families only need a handoff under exclusive sharing; the
    /// concurrent mode the swapchain negotiates for the split case makes
    /// ownership implicit. The returned direction is graphics to present,
    /// the hand-off before presentation; [`QueueOwnership::reversed`]
    /// gives the way back.
    pub fn for_swapchain(indices: QueueFamilyIndices, sharing_mode: vk::SharingMode) -> Self {
        match (indices, sharing_mode) {
            (
                QueueFamilyIndices::Split { graphics, present },
                vk::SharingMode::EXCLUSIVE,
            ) => Self::Transfer {
                src_family: graphics,
                dst_family: present,
            },
            _ => Self::Unified,
        }
    }

    /// The opposite handoff direction.
    pub fn reversed(self) -> Self {
        match self {
            Self::Unified => Self::Unified,
            Self::Transfer {
                src_family,
                dst_family,
            } => Self::Transfer {
                src_family: dst_family,
                dst_family: src_family,
            },
        }
    }

    fn families(self) -> (u32, u32) {
        match self {
            Self::Unified => (vk::QUEUE_FAMILY_IGNORED, vk::QUEUE_FAMILY_IGNORED),
            Self::Transfer {
                src_family,
                dst_family,
            } => (src_family, dst_family),
        }
    }
}

/// A validated, committed transition plan for one image.
#[derive(Clone, Copy, Debug)]
pub struct ImageBarrier {
    pub image: vk::Image,
    pub from: ImageState,
    pub to: ImageState,
    pub ownership: QueueOwnership,
}

impl ImageBarrier {
    /// Plan a transition and advance the tracked state.
    ///
    /// Rejects a `from` that disagrees with what the tracker recorded, and
    /// rejects transitions into `Undefined` (layouts only ever leave it).
    pub fn transition(
        image: vk::Image,
        tracked: &mut ImageState,
        from: ImageState,
        to: ImageState,
    ) -> Result<Self> {
        if *tracked != from {
            return Err(GpuError::InvalidState(format!(
                "image is {:?}, transition declared {:?}",
                tracked, from
            )));
        }
        if to == ImageState::Undefined {
            return Err(GpuError::InvalidState(
                "cannot transition an image into Undefined".to_string(),
            ));
        }

        *tracked = to;

        Ok(Self {
            image,
            from,
            to,
            ownership: QueueOwnership::Unified,
        })
    }

    /// Attach a queue family handoff to this transition.
    #[must_use]
    pub fn with_ownership(mut self, ownership: QueueOwnership) -> Self {
        self.ownership = ownership;
        self
    }

    /// Lower the plan to a synchronization2 barrier.
    pub fn describe(&self) -> vk::ImageMemoryBarrier2<'static> {
        let (src_stage, src_access) = self.from.src_sync();
        let (dst_stage, dst_access) = self.to.dst_sync();
        let (src_family, dst_family) = self.ownership.families();

        vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(self.from.layout())
            .new_layout(self.to.layout())
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(self.image)
            .subresource_range(color_subresource_range())
    }

    /// The release/acquire barrier pair for an exclusive-mode handoff.
    ///
    /// The release half records on the source family's command buffer, the
    /// acquire half on the destination's. Both must name the same families
    /// and layouts; the unused half of each sync scope is left empty per
    /// the ownership transfer rules.
    pub fn ownership_pair(
        &self,
    ) -> Option<(vk::ImageMemoryBarrier2<'static>, vk::ImageMemoryBarrier2<'static>)> {
        if self.ownership == QueueOwnership::Unified {
            return None;
        }

        let (src_stage, src_access) = self.from.src_sync();
        let (dst_stage, dst_access) = self.to.dst_sync();
        let (src_family, dst_family) = self.ownership.families();

        let release = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(vk::PipelineStageFlags2::NONE)
            .dst_access_mask(vk::AccessFlags2::NONE)
            .old_layout(self.from.layout())
            .new_layout(self.to.layout())
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(self.image)
            .subresource_range(color_subresource_range());

        let acquire = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::NONE)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .old_layout(self.from.layout())
            .new_layout(self.to.layout())
            .src_queue_family_index(src_family)
            .dst_queue_family_index(dst_family)
            .image(self.image)
            .subresource_range(color_subresource_range());

        Some((release, acquire))
    }
}

/// Record a batch of barriers into one dependency.
///
/// # Safety
/// The command buffer must be in the recording state and belong to a queue
/// family consistent with each barrier's ownership side.
pub unsafe fn record_barriers(
    device: &ash::Device,
    command_buffer: vk::CommandBuffer,
    barriers: &[vk::ImageMemoryBarrier2],
) {
    let dependency = vk::DependencyInfo::default().image_memory_barriers(barriers);
    device.cmd_pipeline_barrier2(command_buffer, &dependency);
}

/// Subresource range covering the single color mip of a 2D image.
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_commits_the_tracked_state() {
        let mut tracked = ImageState::Undefined;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::Undefined,
            ImageState::TransferDst,
        )
        .unwrap();

        assert_eq!(tracked, ImageState::TransferDst);
        assert_eq!(barrier.from, ImageState::Undefined);
        assert_eq!(barrier.to, ImageState::TransferDst);
    }

    #[test]
    fn stale_from_is_rejected_and_leaves_the_tracker_alone() {
        let mut tracked = ImageState::Present;
        let result = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::TransferSrc,
            ImageState::TransferDst,
        );

        assert!(matches!(result, Err(GpuError::InvalidState(_))));
        assert_eq!(tracked, ImageState::Present);
    }

    #[test]
    fn transitions_into_undefined_are_rejected() {
        let mut tracked = ImageState::Present;
        let result = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::Present,
            ImageState::Undefined,
        );

        assert!(matches!(result, Err(GpuError::InvalidState(_))));
        assert_eq!(tracked, ImageState::Present);
    }

    #[test]
    fn present_to_transfer_dst_chains_off_the_acquire_wait_stage() {
        let mut tracked = ImageState::Present;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::Present,
            ImageState::TransferDst,
        )
        .unwrap()
        .describe();

        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.old_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
    }

    #[test]
    fn transfer_dst_to_present_releases_transfer_writes() {
        let mut tracked = ImageState::TransferDst;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::TransferDst,
            ImageState::Present,
        )
        .unwrap()
        .describe();

        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(
            barrier.dst_stage_mask,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE
        );
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::NONE);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn render_to_blit_source_fences_color_writes_against_reads() {
        let mut tracked = ImageState::ColorAttachment;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::ColorAttachment,
            ImageState::TransferSrc,
        )
        .unwrap()
        .describe();

        assert_eq!(
            barrier.src_stage_mask,
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(
            barrier.src_access_mask,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE
        );
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_READ);
    }

    #[test]
    fn unified_ownership_ignores_queue_families() {
        let mut tracked = ImageState::Undefined;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::Undefined,
            ImageState::TransferDst,
        )
        .unwrap()
        .describe();

        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
        assert_eq!(barrier.dst_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn split_exclusive_swapchains_need_a_handoff() {
        let indices = QueueFamilyIndices::Split {
            graphics: 0,
            present: 2,
        };

        assert_eq!(
            QueueOwnership::for_swapchain(indices, vk::SharingMode::EXCLUSIVE),
            QueueOwnership::Transfer {
                src_family: 0,
                dst_family: 2
            }
        );
        assert_eq!(
            QueueOwnership::for_swapchain(indices, vk::SharingMode::CONCURRENT),
            QueueOwnership::Unified
        );
        assert_eq!(
            QueueOwnership::for_swapchain(QueueFamilyIndices::Shared(1), vk::SharingMode::EXCLUSIVE),
            QueueOwnership::Unified
        );
    }

    #[test]
    fn ownership_pair_halves_agree_on_families_and_layouts() {
        let mut tracked = ImageState::TransferDst;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::TransferDst,
            ImageState::Present,
        )
        .unwrap()
        .with_ownership(QueueOwnership::Transfer {
            src_family: 0,
            dst_family: 2,
        });

        let (release, acquire) = barrier.ownership_pair().unwrap();

        assert_eq!(release.src_queue_family_index, 0);
        assert_eq!(release.dst_queue_family_index, 2);
        assert_eq!(acquire.src_queue_family_index, 0);
        assert_eq!(acquire.dst_queue_family_index, 2);
        assert_eq!(release.old_layout, acquire.old_layout);
        assert_eq!(release.new_layout, acquire.new_layout);

        // Release half fences the source's writes; acquire half gates the
        // destination's consumption.
        assert_eq!(release.src_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(release.dst_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(acquire.src_stage_mask, vk::PipelineStageFlags2::NONE);
        assert_eq!(
            acquire.dst_stage_mask,
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE
        );
    }

    #[test]
    fn unified_barriers_have_no_ownership_pair() {
        let mut tracked = ImageState::TransferDst;
        let barrier = ImageBarrier::transition(
            vk::Image::null(),
            &mut tracked,
            ImageState::TransferDst,
            ImageState::Present,
        )
        .unwrap();

        assert!(barrier.ownership_pair().is_none());
    }

    #[test]
    fn reversing_a_handoff_swaps_the_families() {
        let forward = QueueOwnership::Transfer {
            src_family: 1,
            dst_family: 3,
        };
        assert_eq!(
            forward.reversed(),
            QueueOwnership::Transfer {
                src_family: 3,
                dst_family: 1
            }
        );
        assert_eq!(QueueOwnership::Unified.reversed(), QueueOwnership::Unified);
    }

    #[test]
    fn full_frame_sequence_walks_both_images_through_their_states() {
        let mut presentable = ImageState::Undefined;
        let mut target = ImageState::Undefined;

        // Presentable image becomes writable for the blit.
        ImageBarrier::transition(
            vk::Image::null(),
            &mut presentable,
            ImageState::Undefined,
            ImageState::TransferDst,
        )
        .unwrap();

        // Offscreen target is written, then flipped to a blit source.
        ImageBarrier::transition(
            vk::Image::null(),
            &mut target,
            ImageState::Undefined,
            ImageState::TransferDst,
        )
        .unwrap();
        ImageBarrier::transition(
            vk::Image::null(),
            &mut target,
            ImageState::TransferDst,
            ImageState::TransferSrc,
        )
        .unwrap();

        // Presentable image goes out to the compositor.
        ImageBarrier::transition(
            vk::Image::null(),
            &mut presentable,
            ImageState::TransferDst,
            ImageState::Present,
        )
        .unwrap();

        assert_eq!(presentable, ImageState::Present);
        assert_eq!(target, ImageState::TransferSrc);

        // The next frame starts from Present, not Undefined.
        let next = ImageBarrier::transition(
            vk::Image::null(),
            &mut presentable,
            ImageState::Present,
            ImageState::TransferDst,
        );
        assert!(next.is_ok());
    }
}
