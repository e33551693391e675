use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// The named input device, or the host default when `device_name` is `None`.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("audio host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("no default input device"),
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("input device {target:?} not found")),
    }
}

pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("no default output device"),
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("output device {target:?} not found")),
    }
}

/// Checks that the input device exists and will hand out a capture config.
/// Opening a stream is left to the caller.
pub fn probe_input(device_name: Option<&str>) -> anyhow::Result<String> {
    let device = get_or_default_input(device_name)?;
    let name = device.name().unwrap_or_else(|_| "unnamed device".to_string());
    let config = device
        .default_input_config()
        .with_context(|| format!("{name} has no usable input configuration"))?;
    tracing::info!(
        "microphone {} ready ({}ch, {}hz)",
        name,
        config.channels(),
        config.sample_rate().0
    );
    Ok(name)
}

fn describe(name: &str, channels: u16, sample_rate: u32, is_default: bool) -> String {
    let mut line = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if is_default {
        line.push_str(" [default]");
    }
    line
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.input_devices()? {
        let Ok(name) = device.name() else { continue };
        match device.default_input_config() {
            Ok(cfg) => lines.push(describe(
                &name,
                cfg.channels(),
                cfg.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("skipping input {}: {}", name, e),
        }
    }
    Ok(lines.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.output_devices()? {
        let Ok(name) = device.name() else { continue };
        match device.default_output_config() {
            Ok(cfg) => lines.push(describe(
                &name,
                cfg.channels(),
                cfg.sample_rate().0,
                default_name.as_deref() == Some(name.as_str()),
            )),
            Err(e) => tracing::debug!("skipping output {}: {}", name, e),
        }
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_device_is_marked() {
        assert_eq!(describe("USB Mic", 1, 48000, true), " * USB Mic(1ch, 48000hz) [default]");
        assert_eq!(describe("Speakers", 2, 44100, false), " * Speakers(2ch, 44100hz)");
    }
}
