//! Instance creation, validation messenger and physical-device selection.

use ash::vk;
use std::ffi::{c_void, CStr};

use crate::context::DeviceInfo;
use crate::error::{BenchError, VkResultExt};

const APP_NAME: &CStr = c"vkstride";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
/// Requested by the instance and required of the device.
const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

// ============================================================================
// Instance
// ============================================================================

pub struct DebugMessenger {
    pub loader: ash::ext::debug_utils::Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

/// Headless instance (no surface extensions) targeting Vulkan 1.3.
///
/// With `validation`, the Khronos layer is enabled if installed and its
/// messages are routed into tracing; a missing layer only warns.
pub fn create_instance(entry: &ash::Entry, validation: bool) -> Result<(ash::Instance, bool), BenchError> {
    let validation = validation && validation_layer_available(entry);

    let app_info = vk::ApplicationInfo::default()
        .application_name(APP_NAME)
        .application_version(vk::make_api_version(0, 0, 3, 0))
        .engine_name(APP_NAME)
        .api_version(MIN_API_VERSION);

    let layers = if validation { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };
    let extensions = if validation {
        vec![ash::ext::debug_utils::NAME.as_ptr()]
    } else {
        Vec::new()
    };

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_layer_names(&layers)
        .enabled_extension_names(&extensions);

    let instance = unsafe { entry.create_instance(&info, None) }.vk_op("create_instance")?;
    Ok((instance, validation))
}

fn validation_layer_available(entry: &ash::Entry) -> bool {
    let layers = match unsafe { entry.enumerate_instance_layer_properties() } {
        Ok(layers) => layers,
        Err(e) => {
            tracing::warn!("Could not enumerate instance layers: {:?}", e);
            return false;
        }
    };
    let found = layers
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
    if !found {
        tracing::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
    }
    found
}

pub fn create_debug_messenger(
    entry: &ash::Entry,
    instance: &ash::Instance,
) -> Result<DebugMessenger, BenchError> {
    let loader = ash::ext::debug_utils::Instance::new(entry, instance);
    let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    let messenger =
        unsafe { loader.create_debug_utils_messenger(&info, None) }.vk_op("create_debug_utils_messenger")?;
    Ok(DebugMessenger { loader, messenger })
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let message = if data.is_null() || (*data).p_message.is_null() {
        std::borrow::Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vkstride::validation", "{:?}: {}", kind, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vkstride::validation", "{:?}: {}", kind, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!(target: "vkstride::validation", "{:?}: {}", kind, message);
    } else {
        tracing::trace!(target: "vkstride::validation", "{:?}: {}", kind, message);
    }

    vk::FALSE
}

// ============================================================================
// Physical device
// ============================================================================

pub struct PhysicalDeviceChoice {
    pub physical: vk::PhysicalDevice,
    pub info: DeviceInfo,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// First queue family with compute support and non-zero timestamp bits.
pub fn pick_queue_family(families: &[vk::QueueFamilyProperties]) -> Result<(u32, u32), BenchError> {
    let mut compute_without_timestamps = None;

    for (index, family) in families.iter().enumerate() {
        if !family.queue_flags.contains(vk::QueueFlags::COMPUTE) || family.queue_count == 0 {
            continue;
        }
        if family.timestamp_valid_bits > 0 {
            return Ok((index as u32, family.timestamp_valid_bits));
        }
        compute_without_timestamps.get_or_insert(index as u32);
    }

    match compute_without_timestamps {
        Some(family) => Err(BenchError::TimestampsUnsupported { family }),
        None => Err(BenchError::NoComputeDevice),
    }
}

fn meets_api_minimum(api_version: u32) -> bool {
    vk::make_api_version(0, vk::api_version_major(api_version), vk::api_version_minor(api_version), 0)
        >= MIN_API_VERSION
}

fn format_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

/// First device with Vulkan 1.3, host query reset and a timestamp-capable
/// compute queue.
pub fn select_physical_device(instance: &ash::Instance) -> Result<PhysicalDeviceChoice, BenchError> {
    let devices = unsafe { instance.enumerate_physical_devices() }.vk_op("enumerate_physical_devices")?;
    let mut last_error = BenchError::NoComputeDevice;

    for physical in devices {
        let props = unsafe { instance.get_physical_device_properties(physical) };
        let name = props
            .device_name_as_c_str()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "Unknown device".to_string());

        if !meets_api_minimum(props.api_version) {
            tracing::debug!("Skipping {}: Vulkan {}", name, format_version(props.api_version));
            continue;
        }

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features12);
        unsafe { instance.get_physical_device_features2(physical, &mut features) };
        if features12.host_query_reset != vk::TRUE {
            tracing::debug!("Skipping {}: no hostQueryReset", name);
            continue;
        }

        let families = unsafe { instance.get_physical_device_queue_family_properties(physical) };
        let (queue_family_index, timestamp_valid_bits) = match pick_queue_family(&families) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", name, e);
                last_error = e;
                continue;
            }
        };

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(physical) };
        tracing::info!(
            "Using {} (Vulkan {}, queue family {}, {} timestamp bits, {} ns/tick)",
            name,
            format_version(props.api_version),
            queue_family_index,
            timestamp_valid_bits,
            props.limits.timestamp_period
        );

        return Ok(PhysicalDeviceChoice {
            physical,
            info: DeviceInfo {
                name,
                api_version: format_version(props.api_version),
                queue_family_index,
                timestamp_period_ns: props.limits.timestamp_period,
                timestamp_valid_bits,
            },
            memory_properties,
        });
    }

    Err(last_error)
}
