//! Queue family resolution.
//!
//! Presentation and graphics may or may not live on the same queue family.
//! The resolved shape is carried as an enum so downstream code (swapchain
//! sharing mode, ownership transfer barriers) can match on it instead of
//! comparing raw indices.

use crate::adapter::AdapterProfile;
use crate::error::{GpuError, Result};
use ash::vk;

/// Resolved queue family assignment for graphics and present work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueFamilyIndices {
    /// One family drives both graphics and present.
    Shared(u32),
    /// Graphics and present live on different families.
    Split { graphics: u32, present: u32 },
}

impl QueueFamilyIndices {
    /// Pick queue families from an adapter profile.
    ///
    /// A family supporting both graphics and present is preferred; among
    /// candidates the lowest index wins. Only when no family covers both
    /// does the assignment split.
    pub fn resolve(profile: &AdapterProfile) -> Result<Self> {
        let graphics = profile.graphics_families();
        let present = profile.present_families();

        if graphics.is_empty() {
            return Err(GpuError::MissingQueueFamily("graphics"));
        }
        if present.is_empty() {
            return Err(GpuError::MissingQueueFamily("present"));
        }

        if let Some(shared) = graphics.iter().find(|family| present.contains(family)) {
            return Ok(Self::Shared(*shared));
        }

        Ok(Self::Split {
            graphics: graphics[0],
            present: present[0],
        })
    }

    /// Family index for graphics command submission.
    pub fn graphics(&self) -> u32 {
        match self {
            Self::Shared(family) => *family,
            Self::Split { graphics, .. } => *graphics,
        }
    }

    /// Family index for presentation.
    pub fn present(&self) -> u32 {
        match self {
            Self::Shared(family) => *family,
            Self::Split { present, .. } => *present,
        }
    }

    /// Whether graphics and present share one family.
    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }

    /// Deduplicated families, for device queue creation.
    pub fn unique_families(&self) -> Vec<u32> {
        match self {
            Self::Shared(family) => vec![*family],
            Self::Split { graphics, present } => vec![*graphics, *present],
        }
    }

    /// Sharing mode and family list for swapchain image creation.
    ///
    /// Shared families use exclusive ownership; split families hand the
    /// swapchain images over to concurrent sharing so no per-frame queue
    /// ownership transfer is required.
    pub fn image_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        match self {
            Self::Shared(_) => (vk::SharingMode::EXCLUSIVE, Vec::new()),
            Self::Split { graphics, present } => {
                (vk::SharingMode::CONCURRENT, vec![*graphics, *present])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn profile(queue_flags: Vec<vk::QueueFlags>, present_support: Vec<bool>) -> AdapterProfile {
        AdapterProfile {
            name: "Test Adapter".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            memory_type_flags: Vec::new(),
            queue_flags,
            present_support,
            extensions: Vec::<CString>::new(),
            device_local_bytes: 0,
        }
    }

    #[test]
    fn shared_family_wins_over_split() {
        // Family 0: transfer only. Family 1: graphics, no present.
        // Family 2: graphics and present.
        let profile = profile(
            vec![
                vk::QueueFlags::TRANSFER,
                vk::QueueFlags::GRAPHICS,
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            ],
            vec![false, false, true],
        );

        let indices = QueueFamilyIndices::resolve(&profile).unwrap();
        assert_eq!(indices, QueueFamilyIndices::Shared(2));
        assert!(indices.is_shared());
        assert_eq!(indices.graphics(), 2);
        assert_eq!(indices.present(), 2);
    }

    #[test]
    fn lowest_shared_family_is_chosen() {
        let profile = profile(
            vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::GRAPHICS],
            vec![true, true],
        );

        assert_eq!(
            QueueFamilyIndices::resolve(&profile).unwrap(),
            QueueFamilyIndices::Shared(0)
        );
    }

    #[test]
    fn split_when_no_family_covers_both() {
        let profile = profile(
            vec![vk::QueueFlags::GRAPHICS, vk::QueueFlags::TRANSFER],
            vec![false, true],
        );

        let indices = QueueFamilyIndices::resolve(&profile).unwrap();
        assert_eq!(
            indices,
            QueueFamilyIndices::Split {
                graphics: 0,
                present: 1
            }
        );
        assert!(!indices.is_shared());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn missing_graphics_family_is_an_error() {
        let profile = profile(vec![vk::QueueFlags::TRANSFER], vec![true]);

        match QueueFamilyIndices::resolve(&profile) {
            Err(GpuError::MissingQueueFamily("graphics")) => {}
            other => panic!("expected missing graphics family, got {other:?}"),
        }
    }

    #[test]
    fn missing_present_family_is_an_error() {
        let profile = profile(vec![vk::QueueFlags::GRAPHICS], vec![false]);

        match QueueFamilyIndices::resolve(&profile) {
            Err(GpuError::MissingQueueFamily("present")) => {}
            other => panic!("expected missing present family, got {other:?}"),
        }
    }

    #[test]
    fn shared_images_are_exclusive() {
        let (mode, families) = QueueFamilyIndices::Shared(0).image_sharing();
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());
    }

    #[test]
    fn split_images_are_concurrent_across_both_families() {
        let indices = QueueFamilyIndices::Split {
            graphics: 1,
            present: 3,
        };
        let (mode, families) = indices.image_sharing();
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![1, 3]);
    }

    #[test]
    fn shared_family_deduplicates() {
        assert_eq!(QueueFamilyIndices::Shared(4).unique_families(), vec![4]);
    }
}
