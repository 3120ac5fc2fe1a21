//! Codec Manager (spec §4.3)
//!
//! Owns the two platform encoder handles on the worker side. Generalizes
//! `VideoEncoder`/`AudioEncoder`'s configure/encode bodies off a single NAPI
//! instance into a worker-owned component with no NAPI surface of its own —
//! callers only see `PipelineError`, never `napi::Error`.

use crate::codec::{
  AudioEncoderConfig as InternalAudioEncoderConfig, AudioSampleBuffer, CodecContext,
  EncoderConfig as InternalEncoderConfig, Scaler,
};
use crate::ffi::{AVCodecID, AVPixelFormat, AVSampleFormat};
use crate::pipeline::config::{CodecFamily, PipelineConfig, PipelineContainer};
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::frame::{AudioBlockHandle, PlanarAudioData, VideoFrameHandle};

/// An encoded chunk handed to the Muxer Driver (spec §3 "Encoded chunk").
#[derive(Debug, Clone)]
pub struct EncodedChunk {
  pub data: Vec<u8>,
  pub is_key: bool,
  pub timestamp_us: i64,
  pub duration_us: i64,
}

/// Per-stream decoder-config metadata, emitted on the first chunk after
/// (re)configuration (spec §3/§4.3).
#[derive(Debug, Clone, Default)]
pub struct ChunkMetadata {
  pub codec: Option<String>,
  pub description: Option<Vec<u8>>,
}

/// Per-encoder queue-depth snapshot sent to the controller as `queueSize`
/// (spec §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDepth {
  pub video: u32,
  pub audio: u32,
}

/// Fixed `preferred -> fallback` table (spec §4.3): `avc->avc`, `hevc->hevc`,
/// `vp9->vp8`, `av1->vp8`. Applied only when the preferred family fails to
/// negotiate, never unconditionally.
fn video_fallback(preferred: CodecFamily) -> CodecFamily {
  match preferred {
    CodecFamily::Vp9 => CodecFamily::Vp8,
    CodecFamily::Av1 => CodecFamily::Vp8,
    other => other,
  }
}

pub(crate) fn codec_family_to_av(family: CodecFamily) -> Option<AVCodecID> {
  match family {
    CodecFamily::Avc => Some(AVCodecID::H264),
    CodecFamily::Hevc => Some(AVCodecID::Hevc),
    CodecFamily::Vp8 => Some(AVCodecID::Vp8),
    CodecFamily::Vp9 => Some(AVCodecID::Vp9),
    CodecFamily::Av1 => Some(AVCodecID::Av1),
    CodecFamily::Aac => Some(AVCodecID::Aac),
    CodecFamily::Opus => Some(AVCodecID::Opus),
  }
}

fn container_supports_video(container: PipelineContainer, family: CodecFamily) -> bool {
  match container {
    PipelineContainer::Mp4 => matches!(family, CodecFamily::Avc | CodecFamily::Hevc),
    PipelineContainer::WebM => matches!(family, CodecFamily::Vp8 | CodecFamily::Vp9 | CodecFamily::Av1),
  }
}

struct VideoPipe {
  context: CodecContext,
  scaler: Option<Scaler>,
  width: u32,
  height: u32,
  extradata_sent: bool,
  frame_count: u64,
  negotiated_codec: CodecFamily,
}

struct AudioPipe {
  context: CodecContext,
  buffer: AudioSampleBuffer,
  extradata_sent: bool,
  frame_count: u64,
  negotiated_codec: CodecFamily,
}

/// Owns the two independent encoder handles (spec §4.3).
pub struct CodecManager {
  video: Option<VideoPipe>,
  audio: Option<AudioPipe>,
}

impl CodecManager {
  pub fn new() -> Self {
    Self {
      video: None,
      audio: None,
    }
  }

  /// Negotiate and configure both enabled encoders. Returns the actual
  /// codec family strings chosen, for the `initialized` message.
  pub fn initialize(
    &mut self,
    config: &PipelineConfig,
  ) -> Result<(Option<String>, Option<String>), PipelineError> {
    let actual_video = if config.video_enabled() {
      let preferred = config
        .codec
        .video
        .ok_or_else(|| PipelineError::new(PipelineErrorKind::ConfigurationError, "video enabled without codec.video"))?;
      let fallback = video_fallback(preferred);

      let (mut context, negotiated) = match Self::find_video_encoder(preferred, config.container) {
        Ok(found) => found,
        Err(primary_err) => {
          if fallback == preferred {
            return Err(primary_err);
          }
          Self::find_video_encoder(fallback, config.container)?
        }
      };

      let encoder_config = InternalEncoderConfig {
        width: config.width,
        height: config.height,
        pixel_format: AVPixelFormat::Yuv420p,
        bitrate: config.video_bitrate as u64,
        framerate_num: config.frame_rate.round() as u32,
        framerate_den: 1,
        gop_size: 60,
        max_b_frames: 2,
        thread_count: 0,
        profile: None,
        level: None,
        bitrate_mode: crate::codec::BitrateMode::Constant,
        rc_max_rate: None,
        rc_buffer_size: None,
        crf: None,
      };
      context
        .configure_encoder(&encoder_config)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::ConfigurationError, "video configure failed", e))?;
      context
        .open()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InitializationFailed, "video encoder open failed", e))?;

      self.video = Some(VideoPipe {
        context,
        scaler: None,
        width: config.width,
        height: config.height,
        extradata_sent: false,
        frame_count: 0,
        negotiated_codec: negotiated,
      });
      codec_family_to_av(negotiated).map(|id| id.to_webcodecs_codec().to_string())
    } else {
      None
    };

    let actual_audio = if config.audio_enabled() {
      let preferred = config
        .codec
        .audio
        .ok_or_else(|| PipelineError::new(PipelineErrorKind::ConfigurationError, "audio enabled without codec.audio"))?;

      let negotiated = match (preferred, config.container) {
        (CodecFamily::Aac, PipelineContainer::Mp4) => CodecFamily::Aac,
        (CodecFamily::Aac, PipelineContainer::WebM) => CodecFamily::Opus,
        (other, _) => other,
      };
      if negotiated == CodecFamily::Aac && config.container == PipelineContainer::WebM {
        return Err(PipelineError::new(
          PipelineErrorKind::NotSupported,
          "aac is not representable in webm",
        ));
      }

      let codec_id = codec_family_to_av(negotiated)
        .ok_or_else(|| PipelineError::new(PipelineErrorKind::NotSupported, "unsupported audio codec family"))?;
      let mut context = CodecContext::new_encoder(codec_id).map_err(|e| {
        if config.container == PipelineContainer::Mp4 && negotiated == CodecFamily::Aac {
          PipelineError::new(PipelineErrorKind::NotSupported, "aac encoder unavailable, no fallback for mp4")
        } else {
          PipelineError::with_cause(PipelineErrorKind::NotSupported, "no audio encoder available", e)
        }
      })?;

      let sample_rate = config.sample_rate.unwrap_or(48_000);
      let channels = config.channels.unwrap_or(2);
      let audio_config = InternalAudioEncoderConfig {
        sample_rate,
        channels,
        sample_format: AVSampleFormat::Fltp,
        bitrate: config.audio_bitrate as u64,
      };
      context
        .configure_audio_encoder(&audio_config)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::ConfigurationError, "audio configure failed", e))?;
      context
        .open()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InitializationFailed, "audio encoder open failed", e))?;

      let frame_size = AudioSampleBuffer::frame_size_for_codec(negotiated.as_str());
      self.audio = Some(AudioPipe {
        context,
        buffer: AudioSampleBuffer::new(frame_size, channels, sample_rate, AVSampleFormat::Fltp),
        extradata_sent: false,
        frame_count: 0,
        negotiated_codec: negotiated,
      });
      codec_family_to_av(negotiated).map(|id| id.to_webcodecs_codec().to_string())
    } else {
      None
    };

    Ok((actual_video, actual_audio))
  }

  /// Check representability in `container` and look up a platform encoder
  /// for `family` (spec §4.3 "queries platform support"). Returns the found
  /// encoder paired with the family actually used, so the caller can retry
  /// with the fallback family on failure.
  fn find_video_encoder(
    family: CodecFamily,
    container: PipelineContainer,
  ) -> Result<(CodecContext, CodecFamily), PipelineError> {
    if !container_supports_video(container, family) {
      return Err(PipelineError::new(
        PipelineErrorKind::NotSupported,
        format!("{:?} is not representable in {:?}", family, container),
      ));
    }
    let codec_id = codec_family_to_av(family)
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::NotSupported, "unsupported video codec family"))?;
    let context = CodecContext::new_encoder(codec_id)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::NotSupported, "no video encoder available", e))?;
    Ok((context, family))
  }

  /// Encode one video frame, returning any chunks produced.
  pub fn encode_video(
    &mut self,
    handle: &VideoFrameHandle,
    timestamp_us: i64,
  ) -> Result<Vec<(EncodedChunk, ChunkMetadata)>, PipelineError> {
    let pipe = self
      .video
      .as_mut()
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidState, "video encoder not configured"))?;

    let (cloned, needs_conversion) = handle.frame().with_frame(|f| {
      let needs_conv = f.format() != AVPixelFormat::Yuv420p || f.width() != pipe.width || f.height() != pipe.height;
      (f.try_clone(), needs_conv)
    })?;
    let mut internal_frame = cloned.map_err(|e| {
      PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, "failed to clone frame", e)
    })?;

    if needs_conversion {
      if pipe.scaler.is_none() {
        pipe.scaler = Some(
          Scaler::new(
            internal_frame.width(),
            internal_frame.height(),
            internal_frame.format(),
            pipe.width,
            pipe.height,
            AVPixelFormat::Yuv420p,
            crate::codec::scaler::ScaleAlgorithm::Bilinear,
          )
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, "scaler setup failed", e))?,
        );
      }
      internal_frame = pipe
        .scaler
        .as_ref()
        .unwrap()
        .scale_alloc(&internal_frame)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, "scale failed", e))?;
    }

    internal_frame.set_pts(timestamp_us);

    let extradata = if !pipe.extradata_sent {
      pipe.context.extradata().map(|d| d.to_vec())
    } else {
      None
    };

    let packets = pipe
      .context
      .encode(Some(&internal_frame))
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, "video encode failed", e))?;
    pipe.frame_count += 1;

    let mut out = Vec::with_capacity(packets.len());
    for (i, packet) in packets.into_iter().enumerate() {
      let metadata = if i == 0 && !pipe.extradata_sent {
        pipe.extradata_sent = true;
        ChunkMetadata {
          codec: Some(pipe.negotiated_codec.as_str().to_string()),
          description: extradata.clone(),
        }
      } else {
        ChunkMetadata::default()
      };
      out.push((
        EncodedChunk {
          data: packet.to_vec(),
          is_key: packet.is_key(),
          timestamp_us: packet.pts(),
          duration_us: packet.duration(),
        },
        metadata,
      ));
    }
    Ok(out)
  }

  /// Feed one audio block. Audio codecs consume fixed-size frames, so a
  /// submitted block may produce zero, one, or more chunks.
  pub fn encode_audio_block(
    &mut self,
    block: &AudioBlockHandle,
  ) -> Result<Vec<(EncodedChunk, ChunkMetadata)>, PipelineError> {
    let pipe = self
      .audio
      .as_mut()
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidState, "audio encoder not configured"))?;

    block
      .data()
      .with_frame(|f| pipe.buffer.add_frame(f))?
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "failed to buffer audio", e))?;

    Self::drain_audio_buffer(pipe)
  }

  /// Feed one planar-float audio block (the non-native-handle shape, spec §6).
  pub fn encode_planar_audio(
    &mut self,
    audio: &PlanarAudioData,
  ) -> Result<Vec<(EncodedChunk, ChunkMetadata)>, PipelineError> {
    audio.validate()?;
    let pipe = self
      .audio
      .as_mut()
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidState, "audio encoder not configured"))?;

    let mut interleaved = vec![0f32; audio.frame_count as usize * audio.channels as usize];
    for (ch, plane) in audio.planes.iter().enumerate() {
      for (i, sample) in plane.iter().enumerate() {
        interleaved[i * audio.channels as usize + ch] = *sample;
      }
    }
    let bytes = bytemuck_cast_f32_slice(&interleaved);
    pipe
      .buffer
      .add_samples(bytes, audio.frame_count as usize)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "failed to buffer planar audio", e))?;

    Self::drain_audio_buffer(pipe)
  }

  fn drain_audio_buffer(pipe: &mut AudioPipe) -> Result<Vec<(EncodedChunk, ChunkMetadata)>, PipelineError> {
    let mut out = Vec::new();
    while pipe.buffer.has_full_frame() {
      let frame = pipe
        .buffer
        .take_frame()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "failed to take audio frame", e))?;
      let Some(frame) = frame else { break };
      out.extend(Self::encode_audio_frame_internal(pipe, frame)?);
    }
    Ok(out)
  }

  fn encode_audio_frame_internal(
    pipe: &mut AudioPipe,
    frame: crate::codec::Frame,
  ) -> Result<Vec<(EncodedChunk, ChunkMetadata)>, PipelineError> {
    let extradata = if !pipe.extradata_sent {
      pipe.context.extradata().map(|d| d.to_vec())
    } else {
      None
    };
    let packets = pipe
      .context
      .encode(Some(&frame))
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "audio encode failed", e))?;
    pipe.frame_count += 1;

    let mut out = Vec::with_capacity(packets.len());
    for (i, packet) in packets.into_iter().enumerate() {
      let metadata = if i == 0 && !pipe.extradata_sent {
        pipe.extradata_sent = true;
        ChunkMetadata {
          codec: Some(pipe.negotiated_codec.as_str().to_string()),
          description: extradata.clone(),
        }
      } else {
        ChunkMetadata::default()
      };
      out.push((
        EncodedChunk {
          data: packet.to_vec(),
          is_key: packet.is_key(),
          timestamp_us: packet.pts(),
          duration_us: packet.duration(),
        },
        metadata,
      ));
    }
    Ok(out)
  }

  /// Current per-encoder queue depth (spec §4.3 "periodically reports").
  /// This codec layer's `encode` is a synchronous send/drain pair, so the
  /// pending-platform-queue is always zero; the field exists so the
  /// scheduler's backpressure math has a single source of truth even as the
  /// underlying codec primitive's async-ness evolves.
  pub fn queue_depth(&self) -> QueueDepth {
    QueueDepth { video: 0, audio: 0 }
  }

  /// The codec family negotiation landed on for video, if video is enabled
  /// (spec §4.3 "emits the actual chosen codec strings"). Used by the Muxer
  /// Driver to add the video track without re-deriving negotiation.
  pub fn negotiated_video_family(&self) -> Option<CodecFamily> {
    self.video.as_ref().map(|p| p.negotiated_codec)
  }

  pub fn negotiated_audio_family(&self) -> Option<CodecFamily> {
    self.audio.as_ref().map(|p| p.negotiated_codec)
  }

  /// Fixed audio frame size (samples per channel) the negotiated audio codec
  /// requires, used to size the muxer's audio track for codecs (e.g. AAC,
  /// Opus) that mandate a fixed frame size in the container.
  pub fn audio_frame_size(&self) -> Option<u32> {
    self.audio.as_ref().map(|p| p.buffer.frame_size() as u32)
  }

  /// Flush both encoders. Called once on `finalize` (spec §4.3). Returns
  /// video and audio chunks separately — unlike `encode_video`/
  /// `encode_audio_block`, a single flush call can drain both encoders at
  /// once, and the Muxer Driver needs to know which track each chunk
  /// belongs to.
  pub fn flush(&mut self) -> Result<(Vec<(EncodedChunk, ChunkMetadata)>, Vec<(EncodedChunk, ChunkMetadata)>), PipelineError> {
    let mut video_out = Vec::new();
    if let Some(pipe) = self.video.as_mut() {
      let packets = pipe
        .context
        .flush_encoder()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::VideoEncodingError, "video flush failed", e))?;
      for packet in packets {
        video_out.push((
          EncodedChunk {
            data: packet.to_vec(),
            is_key: packet.is_key(),
            timestamp_us: packet.pts(),
            duration_us: packet.duration(),
          },
          ChunkMetadata::default(),
        ));
      }
    }
    let mut audio_out = Vec::new();
    if let Some(pipe) = self.audio.as_mut() {
      if let Some(frame) = pipe
        .buffer
        .flush()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "audio buffer flush failed", e))?
      {
        audio_out.extend(Self::encode_audio_frame_internal(pipe, frame)?);
      }
      let packets = pipe
        .context
        .flush_encoder()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::AudioEncodingError, "audio flush failed", e))?;
      for packet in packets {
        audio_out.push((
          EncodedChunk {
            data: packet.to_vec(),
            is_key: packet.is_key(),
            timestamp_us: packet.pts(),
            duration_us: packet.duration(),
          },
          ChunkMetadata::default(),
        ));
      }
    }
    Ok((video_out, audio_out))
  }

  /// Release both platform handles. Idempotent: a manager with no
  /// configured encoders simply does nothing (spec §4.3 "Close").
  pub fn close(&mut self) {
    self.video = None;
    self.audio = None;
  }
}

impl Default for CodecManager {
  fn default() -> Self {
    Self::new()
  }
}

/// Reinterpret an `f32` sample buffer as raw little-endian bytes for
/// `AudioSampleBuffer::add_samples`, which stores bytes rather than typed
/// samples.
fn bytemuck_cast_f32_slice(samples: &[f32]) -> &[u8] {
  unsafe { std::slice::from_raw_parts(samples.as_ptr() as *const u8, std::mem::size_of_val(samples)) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn av1_falls_back_to_vp8() {
    assert_eq!(video_fallback(CodecFamily::Av1), CodecFamily::Vp8);
  }

  #[test]
  fn vp9_falls_back_to_vp8() {
    assert_eq!(video_fallback(CodecFamily::Vp9), CodecFamily::Vp8);
  }

  #[test]
  fn avc_and_hevc_have_no_fallback() {
    assert_eq!(video_fallback(CodecFamily::Avc), CodecFamily::Avc);
    assert_eq!(video_fallback(CodecFamily::Hevc), CodecFamily::Hevc);
  }

  #[test]
  fn mp4_rejects_vp8() {
    assert!(!container_supports_video(PipelineContainer::Mp4, CodecFamily::Vp8));
  }

  #[test]
  fn webm_rejects_avc() {
    assert!(!container_supports_video(PipelineContainer::WebM, CodecFamily::Avc));
  }
}
