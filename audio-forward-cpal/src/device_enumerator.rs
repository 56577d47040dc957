//! Input device enumeration on the default cpal host.

use cpal::traits::{DeviceTrait, HostTrait};

use audio_forward_core::models::error::CaptureError;
use audio_forward_core::traits::audio_source::SourceInfo;

/// Name of the default input device, if there is one.
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

/// List input devices. cpal identifies devices by name, so `id` and `name`
/// carry the same value.
pub fn list_input_devices() -> Result<Vec<SourceInfo>, CaptureError> {
    let host = cpal::default_host();
    let default_name = default_input_device_name();
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Stream(format!("failed to enumerate input devices: {}", e)))?;

    Ok(devices
        .filter_map(|d| d.name().ok())
        .map(|name| SourceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            id: name.clone(),
            name,
        })
        .collect())
}

/// Resolve `name` to an input device, or the default device for `None`.
pub(crate) fn find_input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotAvailable),
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::Stream(format!("failed to enumerate input devices: {}", e)))?
            .find(|d| d.name().ok().as_deref() == Some(name))
            .ok_or(CaptureError::DeviceNotAvailable),
    }
}
