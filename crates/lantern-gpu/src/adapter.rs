//! Adapter scoring and selection.
//!
//! Every candidate physical device is snapshotted into an [`AdapterProfile`]
//! once, then ranked by folding a list of independent predicates into a
//! [`Score`]. A single `NotSuitable` poisons the whole sum, so hard
//! requirements and soft preferences compose through the same algebra.

use crate::context::required_device_extensions;
use crate::error::{GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};

/// Outcome of scoring an adapter.
///
/// Forms a monoid under [`Score::combine`]: numeric weights add, and
/// `NotSuitable` absorbs everything it touches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Score {
    /// Usable adapter with an accumulated preference weight.
    Suitable(u32),
    /// Vetoed adapter; poisons any sum it participates in.
    NotSuitable,
}

impl Score {
    /// Combine two scores. Associative and commutative.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Suitable(a), Self::Suitable(b)) => Self::Suitable(a.saturating_add(b)),
            _ => Self::NotSuitable,
        }
    }

    /// Whether this score permits selection.
    pub fn is_suitable(self) -> bool {
        matches!(self, Self::Suitable(_))
    }

    /// The numeric weight, if suitable.
    pub fn weight(self) -> Option<u32> {
        match self {
            Self::Suitable(w) => Some(w),
            Self::NotSuitable => None,
        }
    }
}

impl std::ops::Add for Score {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.combine(rhs)
    }
}

/// Capability snapshot of one physical device, queried once at startup.
///
/// Scoring and queue resolution read only this snapshot, never the live
/// device.
#[derive(Clone, Debug)]
pub struct AdapterProfile {
    /// Device name from the driver.
    pub name: String,
    /// Device class (discrete, integrated, CPU, ...).
    pub device_type: vk::PhysicalDeviceType,
    /// Packed Vulkan API version.
    pub api_version: u32,
    /// Property flags of each memory type.
    pub memory_type_flags: Vec<vk::MemoryPropertyFlags>,
    /// Capability flags of each queue family, indexed by family.
    pub queue_flags: Vec<vk::QueueFlags>,
    /// Per-queue-family presentation support against the active surface.
    pub present_support: Vec<bool>,
    /// Available device extensions.
    pub extensions: Vec<CString>,
    /// Total device-local memory in bytes.
    pub device_local_bytes: u64,
}

impl AdapterProfile {
    /// Query the profile of a physical device.
    ///
    /// # Safety
    /// The instance, surface loader, surface, and physical device must be valid.
    pub unsafe fn query(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory = instance.get_physical_device_memory_properties(physical_device);
        let queue_families =
            instance.get_physical_device_queue_family_properties(physical_device);

        let name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let memory_type_flags = memory
            .memory_types
            .iter()
            .take(memory.memory_type_count as usize)
            .map(|t| t.property_flags)
            .collect();

        let device_local_bytes = memory
            .memory_heaps
            .iter()
            .take(memory.memory_heap_count as usize)
            .filter(|h| h.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|h| h.size)
            .sum();

        let queue_flags: Vec<_> = queue_families.iter().map(|f| f.queue_flags).collect();

        let mut present_support = Vec::with_capacity(queue_families.len());
        for family in 0..queue_families.len() as u32 {
            let supported = surface_loader.get_physical_device_surface_support(
                physical_device,
                family,
                surface,
            )?;
            present_support.push(supported);
        }

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)?
            .iter()
            .map(|props| CStr::from_ptr(props.extension_name.as_ptr()).to_owned())
            .collect();

        Ok(Self {
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            memory_type_flags,
            queue_flags,
            present_support,
            extensions,
            device_local_bytes,
        })
    }

    /// Queue family indices with graphics capability.
    pub fn graphics_families(&self) -> Vec<u32> {
        self.queue_flags
            .iter()
            .enumerate()
            .filter(|(_, flags)| flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Queue family indices that can present to the active surface.
    pub fn present_families(&self) -> Vec<u32> {
        self.present_support
            .iter()
            .enumerate()
            .filter(|(_, supported)| **supported)
            .map(|(i, _)| i as u32)
            .collect()
    }

    /// Whether any queue family supports both graphics and present.
    pub fn has_shared_graphics_present(&self) -> bool {
        self.queue_flags
            .iter()
            .zip(&self.present_support)
            .any(|(flags, present)| flags.contains(vk::QueueFlags::GRAPHICS) && *present)
    }

    /// Whether any memory type advertises all of the given property flags.
    pub fn has_memory_flags(&self, required: vk::MemoryPropertyFlags) -> bool {
        self.memory_type_flags
            .iter()
            .any(|flags| flags.contains(required))
    }

    /// Whether the given device extension is available.
    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// Human-readable device class.
    pub fn device_type_name(&self) -> &'static str {
        match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// One-line summary for logging.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}, {} MB, Vulkan {}.{})",
            self.name,
            self.device_type_name(),
            self.device_local_bytes / (1024 * 1024),
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
        )
    }
}

/// A composable scoring rule.
///
/// Predicates are independent: new rules can be added without touching
/// existing ones. Closures with the matching signature work directly.
pub trait ScorePredicate {
    /// Score one adapter.
    fn score(&self, profile: &AdapterProfile) -> Score;
}

impl<F> ScorePredicate for F
where
    F: Fn(&AdapterProfile) -> Score,
{
    fn score(&self, profile: &AdapterProfile) -> Score {
        self(profile)
    }
}

/// Bonus for discrete GPUs.
pub struct PreferDiscrete(pub u32);

impl ScorePredicate for PreferDiscrete {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            Score::Suitable(self.0)
        } else {
            Score::Suitable(0)
        }
    }
}

/// Bonus for integrated GPUs.
pub struct PreferIntegrated(pub u32);

impl ScorePredicate for PreferIntegrated {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU {
            Score::Suitable(self.0)
        } else {
            Score::Suitable(0)
        }
    }
}

/// Veto for CPU/software implementations.
pub struct RejectCpuClass;

impl ScorePredicate for RejectCpuClass {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.device_type == vk::PhysicalDeviceType::CPU {
            Score::NotSuitable
        } else {
            Score::Suitable(0)
        }
    }
}

/// Veto if the device's API version is below the target.
pub struct RequireApiVersion(pub u32);

impl ScorePredicate for RequireApiVersion {
    fn score(&self, profile: &AdapterProfile) -> Score {
        let major = vk::api_version_major(profile.api_version);
        let minor = vk::api_version_minor(profile.api_version);
        let target = (vk::api_version_major(self.0), vk::api_version_minor(self.0));
        if (major, minor) >= target {
            Score::Suitable(0)
        } else {
            Score::NotSuitable
        }
    }
}

/// Veto if any of the named device extensions is missing.
pub struct RequireExtensions(pub Vec<&'static CStr>);

impl ScorePredicate for RequireExtensions {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if self.0.iter().all(|name| profile.has_extension(name)) {
            Score::Suitable(0)
        } else {
            Score::NotSuitable
        }
    }
}

/// Veto if no queue family has graphics capability.
pub struct RequireGraphicsQueue;

impl ScorePredicate for RequireGraphicsQueue {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.graphics_families().is_empty() {
            Score::NotSuitable
        } else {
            Score::Suitable(0)
        }
    }
}

/// Veto if no queue family can present to the active surface.
pub struct RequirePresentQueue;

impl ScorePredicate for RequirePresentQueue {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.present_families().is_empty() {
            Score::NotSuitable
        } else {
            Score::Suitable(0)
        }
    }
}

/// Veto if no memory type advertises all required property flags.
pub struct RequireMemoryFlags(pub vk::MemoryPropertyFlags);

impl ScorePredicate for RequireMemoryFlags {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.has_memory_flags(self.0) {
            Score::Suitable(0)
        } else {
            Score::NotSuitable
        }
    }
}

/// Bonus if one family covers both graphics and present.
pub struct PreferSharedGraphicsPresent(pub u32);

impl ScorePredicate for PreferSharedGraphicsPresent {
    fn score(&self, profile: &AdapterProfile) -> Score {
        if profile.has_shared_graphics_present() {
            Score::Suitable(self.0)
        } else {
            Score::Suitable(0)
        }
    }
}

/// The default predicate set used by the context builder.
pub fn default_predicates() -> Vec<Box<dyn ScorePredicate>> {
    vec![
        Box::new(PreferDiscrete(5000)),
        Box::new(PreferIntegrated(1000)),
        Box::new(RejectCpuClass),
        Box::new(RequireApiVersion(vk::API_VERSION_1_3)),
        Box::new(RequireExtensions(required_device_extensions())),
        Box::new(RequireGraphicsQueue),
        Box::new(RequirePresentQueue),
        Box::new(RequireMemoryFlags(
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_COHERENT,
        )),
        Box::new(PreferSharedGraphicsPresent(500)),
    ]
}

/// Fold all predicate results into a single score.
pub fn score_adapter(profile: &AdapterProfile, predicates: &[Box<dyn ScorePredicate>]) -> Score {
    predicates
        .iter()
        .fold(Score::Suitable(0), |acc, p| acc.combine(p.score(profile)))
}

/// Select the highest-scoring suitable physical device.
///
/// # Safety
/// The instance, surface loader, and surface must be valid.
pub unsafe fn select_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    predicates: &[Box<dyn ScorePredicate>],
) -> Result<(vk::PhysicalDevice, AdapterProfile)> {
    let devices = instance.enumerate_physical_devices()?;

    let mut best: Option<(u32, vk::PhysicalDevice, AdapterProfile)> = None;

    for device in devices {
        let profile = AdapterProfile::query(instance, surface_loader, surface, device)?;
        match score_adapter(&profile, predicates) {
            Score::Suitable(weight) => {
                tracing::debug!("Adapter {} scored {}", profile.summary(), weight);
                // Ties keep the earlier adapter
                if best.as_ref().map_or(true, |(w, _, _)| weight > *w) {
                    best = Some((weight, device, profile));
                }
            }
            Score::NotSuitable => {
                tracing::debug!("Adapter {} rejected", profile.summary());
            }
        }
    }

    let (weight, device, profile) = best.ok_or(GpuError::NoSuitableAdapter)?;
    tracing::info!("Selected adapter: {} (score {})", profile.summary(), weight);

    Ok((device, profile))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_profile() -> AdapterProfile {
        AdapterProfile {
            name: "Test Adapter".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            memory_type_flags: vec![
                vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_COHERENT,
                vk::MemoryPropertyFlags::HOST_VISIBLE,
            ],
            queue_flags: vec![
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
                vk::QueueFlags::TRANSFER,
            ],
            present_support: vec![true, false],
            extensions: vec![ash::khr::swapchain::NAME.to_owned()],
            device_local_bytes: 4 << 30,
        }
    }

    #[test]
    fn not_suitable_absorbs_any_sum() {
        assert_eq!(
            Score::NotSuitable.combine(Score::Suitable(5000)),
            Score::NotSuitable
        );
        assert_eq!(
            Score::Suitable(5000).combine(Score::NotSuitable),
            Score::NotSuitable
        );
        assert_eq!(
            Score::NotSuitable.combine(Score::NotSuitable),
            Score::NotSuitable
        );
    }

    #[test]
    fn combine_is_associative_and_commutative() {
        let (a, b, c) = (Score::Suitable(1), Score::Suitable(20), Score::Suitable(300));
        assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
        assert_eq!(a.combine(b), b.combine(a));
        assert_eq!(a + b + c, Score::Suitable(321));
    }

    #[test]
    fn cpu_class_is_vetoed_regardless_of_other_predicates() {
        let mut profile = base_profile();
        profile.device_type = vk::PhysicalDeviceType::CPU;

        let score = score_adapter(&profile, &default_predicates());
        assert_eq!(score, Score::NotSuitable);
    }

    #[test]
    fn default_predicates_accept_a_complete_discrete_adapter() {
        let score = score_adapter(&base_profile(), &default_predicates());
        // Discrete bonus plus the shared graphics/present bonus
        assert_eq!(score, Score::Suitable(5500));
    }

    #[test]
    fn missing_swapchain_extension_is_vetoed() {
        let mut profile = base_profile();
        profile.extensions.clear();

        let score = score_adapter(&profile, &default_predicates());
        assert_eq!(score, Score::NotSuitable);
    }

    #[test]
    fn missing_present_support_is_vetoed() {
        let mut profile = base_profile();
        profile.present_support = vec![false, false];

        let score = score_adapter(&profile, &default_predicates());
        assert_eq!(score, Score::NotSuitable);
    }

    #[test]
    fn missing_memory_flags_are_vetoed() {
        let mut profile = base_profile();
        profile.memory_type_flags = vec![vk::MemoryPropertyFlags::HOST_VISIBLE];

        let score = score_adapter(&profile, &default_predicates());
        assert_eq!(score, Score::NotSuitable);
    }

    #[test]
    fn old_api_version_is_vetoed() {
        let mut profile = base_profile();
        profile.api_version = vk::API_VERSION_1_2;

        let score = score_adapter(&profile, &default_predicates());
        assert_eq!(score, Score::NotSuitable);
    }

    #[test]
    fn integrated_scores_below_discrete() {
        let discrete = score_adapter(&base_profile(), &default_predicates());

        let mut integrated = base_profile();
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let integrated = score_adapter(&integrated, &default_predicates());

        assert!(discrete.weight() > integrated.weight());
        assert_eq!(integrated, Score::Suitable(1500));
    }

    #[test]
    fn closures_work_as_predicates() {
        let predicates: Vec<Box<dyn ScorePredicate>> =
            vec![Box::new(|p: &AdapterProfile| {
                if p.name.is_empty() {
                    Score::NotSuitable
                } else {
                    Score::Suitable(7)
                }
            })];

        assert_eq!(score_adapter(&base_profile(), &predicates), Score::Suitable(7));
    }

    #[test]
    fn predicate_order_does_not_change_the_outcome() {
        let profile = base_profile();
        let forward = score_adapter(&profile, &default_predicates());

        let mut reversed = default_predicates();
        reversed.reverse();
        let backward = score_adapter(&profile, &reversed);

        assert_eq!(forward, backward);
    }
}
