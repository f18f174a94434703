//! WAV I/O helpers built on `hound`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use duet_domain::RawAudio;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Decode a WAV file into interleaved `f32` samples.
pub fn read_wav(path: &Path) -> Result<RawAudio> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("open {}", path.display()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("decode {}", path.display()))?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                bail!("{}: unsupported bit depth {}", path.display(), spec.bits_per_sample);
            }
            // full-scale value for the declared bit depth
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("decode {}", path.display()))?
        }
    };

    Ok(RawAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Load reference audio for conditioning: decoded, validated, down-mixed.
pub fn load_prompt_clip(path: &Path) -> Result<RawAudio> {
    let audio = read_wav(path)?;
    audio
        .validate()
        .map_err(|e| anyhow::anyhow!("prompt audio {}: {e}", path.display()))?;
    Ok(audio.into_mono())
}

/// Write `audio` as 16-bit PCM (clip -1.0‥+1.0, scale to ±32767).
pub fn write_wav(path: &Path, audio: &RawAudio) -> Result<()> {
    let spec = WavSpec {
        channels: audio.channels,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(path, spec).with_context(|| format!("create {}", path.display()))?;
    for &s in &audio.samples {
        writer.write_sample((s.clamp(-1.0, 1.0) * 32767.0) as i16)?;
    }
    writer
        .finalize()
        .with_context(|| format!("finalize {}", path.display()))?;
    Ok(())
}
