//! Device and sample helpers for the output path.

use anyhow::Result;
use cpal::traits::DeviceTrait;
use cpal::{Device, SampleFormat, SupportedStreamConfig, SupportedStreamConfigRange};

/// Human-readable device name, or "Unknown".
pub fn get_device_name(device: &Device) -> String {
    device.description().ok().map(|desc| desc.name().to_string()).unwrap_or_else(|| "Unknown".to_string())
}

/// Pick an F32 mono or stereo output configuration.
///
/// Prefers a range that contains `preferred_rate` (the device default), so no
/// rate change is forced on shared hardware. Otherwise the closest supported
/// rate of the first usable range is chosen and the clip is resampled.
pub fn find_best_config(configs: impl Iterator<Item = SupportedStreamConfigRange>, preferred_rate: u32) -> Result<SupportedStreamConfig> {
    let usable: Vec<SupportedStreamConfigRange> =
        configs.filter(|c| c.channels() <= 2 && c.sample_format() == SampleFormat::F32).collect();

    if let Some(config) = usable.iter().find(|c| (c.min_sample_rate()..=c.max_sample_rate()).contains(&preferred_rate)) {
        return Ok((*config).with_sample_rate(preferred_rate));
    }

    let Some(config) = usable.first() else {
        anyhow::bail!("No F32 output configuration available");
    };
    let rate = preferred_rate.clamp(config.min_sample_rate(), config.max_sample_rate());
    Ok((*config).with_sample_rate(rate))
}

/// Average interleaved frames down to a single channel.
pub fn downmix_to_mono(data: &[f32], channels: usize) -> Vec<f32> {
    match channels {
        0 | 1 => data.to_vec(),
        n => data.chunks(n).map(|frame| frame.iter().sum::<f32>() / frame.len() as f32).collect(),
    }
}
