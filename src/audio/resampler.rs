//! Clip resampling to the output device rate with rubato's FFT resampler.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{Fft, FixedSync, Resampler};

/// Frames fed to the resampler per call.
const CHUNK_SIZE: usize = 1024;

/// FFT sub-chunks (quality against CPU).
const SUB_CHUNKS: usize = 2;

/// Resample a whole mono clip from `from_rate` to `to_rate`.
///
/// The final chunk is zero-padded, and the padding is trimmed from the output
/// so the result lasts as long as the input.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let mut resampler = Fft::<f32>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1, FixedSync::Input)
        .context("Failed to create resampler")?;

    let frames_max = resampler.output_frames_max();
    let mut scratch = vec![0.0f32; frames_max];
    let mut padded = vec![0.0f32; CHUNK_SIZE];

    let expected = (samples.len() as u64 * to_rate as u64 / from_rate as u64) as usize;
    let mut output = Vec::with_capacity(expected + frames_max);

    for chunk in samples.chunks(CHUNK_SIZE) {
        let input: &[f32] = if chunk.len() == CHUNK_SIZE {
            chunk
        } else {
            padded[..chunk.len()].copy_from_slice(chunk);
            padded[chunk.len()..].fill(0.0);
            &padded
        };

        let input = InterleavedSlice::new(input, 1, CHUNK_SIZE).context("Failed to wrap resampler input")?;
        let mut out = InterleavedSlice::new_mut(&mut scratch, 1, frames_max).context("Failed to wrap resampler output")?;
        let (_, written) = resampler.process_into_buffer(&input, &mut out, None).map_err(|e| anyhow::anyhow!("Resampling error: {}", e))?;
        output.extend_from_slice(&scratch[..written]);
    }

    output.truncate(expected);
    Ok(output)
}
