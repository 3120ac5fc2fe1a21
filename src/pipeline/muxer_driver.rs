//! Muxer Driver (spec §4.4)
//!
//! Drives `codec::muxer::MuxerContext` directly off the pipeline's own
//! `EncodedChunk`/`ChunkMetadata` types, rather than the NAPI-object-returning
//! `MuxerInner<F>` the donor `webcodecs::muxer_base` builds for the JS-facing
//! standalone muxer. The lazy-header, monotonic-pts-clamp, and
//! dynamic-extradata-update patterns are carried over from there, generalized
//! to the pipeline's dual batch/realtime output modes (spec §4.4/§6).
//!
//! All track timestamps are in microseconds, matching the unit convention
//! used pipeline-wide (`EncodedChunk::timestamp_us`, `ProgressRecord`, ...);
//! both streams are added to the muxer with a `1/1_000_000` time base so
//! `EncodedChunk::timestamp_us` can be written to the packet verbatim.

use crate::codec::muxer::{AudioStreamConfig, MuxerOptions, MuxerOutput, VideoStreamConfig};
use crate::codec::{ContainerFormat, MuxerContext, Packet};
use crate::ffi::{AVPixelFormat, AVRational, AVSampleFormat};
use crate::pipeline::codec_manager::{ChunkMetadata, EncodedChunk};
use crate::pipeline::codec_manager::codec_family_to_av;
use crate::pipeline::config::{CodecFamily, PipelineContainer, PipelineLatencyMode};
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::message::StreamingChunk;

const MICROSECOND_TIME_BASE: AVRational = AVRational { num: 1, den: 1_000_000 };

/// Result of a chunk write or finalize: zero or more fragments ready to
/// forward to the controller as `StreamingChunk`s (realtime mode only).
pub type DrainedFragments = Vec<StreamingChunk>;

/// The final output of a successful `finalize()` call.
pub enum FinalizedOutput {
  /// Quality mode: the single complete container buffer.
  Buffer(Vec<u8>),
  /// Realtime mode: bytes already streamed out via `StreamingChunk`s.
  AlreadyStreamed,
}

pub struct MuxerDriver {
  muxer: MuxerContext,
  mode: PipelineLatencyMode,
  video_stream_index: Option<i32>,
  audio_stream_index: Option<i32>,
  last_video_pts: i64,
  last_audio_pts: i64,
  next_sequence: u64,
  header_written: bool,
}

impl MuxerDriver {
  pub fn new(container: PipelineContainer, mode: PipelineLatencyMode) -> Result<Self, PipelineError> {
    let internal_container = container.to_internal();
    let output = match mode {
      PipelineLatencyMode::Quality => MuxerOutput::Buffer,
      // 1 MiB ring; drained continuously, so capacity only bounds the
      // worst-case single write burst, not total output size.
      PipelineLatencyMode::Realtime => MuxerOutput::Streaming(1024 * 1024),
    };
    let muxer = MuxerContext::new(internal_container, output)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to create muxer", e))?;
    Ok(Self {
      muxer,
      mode,
      video_stream_index: None,
      audio_stream_index: None,
      last_video_pts: -1,
      last_audio_pts: -1,
      next_sequence: 0,
      header_written: false,
    })
  }

  pub fn add_video_track(
    &mut self,
    codec: CodecFamily,
    width: u32,
    height: u32,
    extradata: Option<Vec<u8>>,
  ) -> Result<(), PipelineError> {
    let codec_id = codec_family_to_av(codec)
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::NotSupported, "unsupported video codec family"))?;
    let index = self
      .muxer
      .add_video_stream(&VideoStreamConfig {
        codec_id,
        width,
        height,
        pixel_format: AVPixelFormat::Yuv420p,
        time_base: MICROSECOND_TIME_BASE,
        bitrate: None,
        extradata,
      })
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to add video track", e))?;
    self.video_stream_index = Some(index);
    Ok(())
  }

  pub fn add_audio_track(
    &mut self,
    codec: CodecFamily,
    sample_rate: u32,
    channels: u32,
    frame_size: Option<u32>,
    extradata: Option<Vec<u8>>,
  ) -> Result<(), PipelineError> {
    let codec_id = codec_family_to_av(codec)
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::NotSupported, "unsupported audio codec family"))?;
    let index = self
      .muxer
      .add_audio_stream(&AudioStreamConfig {
        codec_id,
        sample_rate,
        channels,
        sample_format: AVSampleFormat::Fltp,
        time_base: MICROSECOND_TIME_BASE,
        bitrate: None,
        frame_size,
        extradata,
      })
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to add audio track", e))?;
    self.audio_stream_index = Some(index);
    Ok(())
  }

  fn ensure_header_written(&mut self) -> Result<(), PipelineError> {
    if self.header_written {
      return Ok(());
    }
    let options = MuxerOptions {
      fast_start: true,
      fragmented: matches!(self.mode, PipelineLatencyMode::Realtime),
      live: matches!(self.mode, PipelineLatencyMode::Realtime),
    };
    self
      .muxer
      .write_header(Some(&options))
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to write container header", e))?;
    self.header_written = true;
    Ok(())
  }

  pub fn write_video_chunk(
    &mut self,
    chunk: &EncodedChunk,
    metadata: &ChunkMetadata,
  ) -> Result<DrainedFragments, PipelineError> {
    let stream_index = self
      .video_stream_index
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidState, "no video track configured"))?;
    self.ensure_header_written()?;
    if let Some(description) = &metadata.description {
      self
        .muxer
        .update_video_extradata(description)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to update video extradata", e))?;
    }
    self.write_chunk(stream_index, chunk, true)
  }

  pub fn write_audio_chunk(
    &mut self,
    chunk: &EncodedChunk,
    metadata: &ChunkMetadata,
  ) -> Result<DrainedFragments, PipelineError> {
    let stream_index = self
      .audio_stream_index
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidState, "no audio track configured"))?;
    self.ensure_header_written()?;
    if let Some(description) = &metadata.description {
      self
        .muxer
        .update_audio_extradata(description)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to update audio extradata", e))?;
    }
    self.write_chunk(stream_index, chunk, false)
  }

  fn write_chunk(
    &mut self,
    stream_index: i32,
    chunk: &EncodedChunk,
    is_video: bool,
  ) -> Result<DrainedFragments, PipelineError> {
    let last_pts = if is_video { self.last_video_pts } else { self.last_audio_pts };
    // Clamp to monotonic, mirroring `muxer_base.rs`'s `last_video_pts`/
    // `last_audio_pts` handling: never let a muxed timestamp run backwards.
    let pts = chunk.timestamp_us.max(last_pts + 1).max(0);
    if is_video {
      self.last_video_pts = pts;
    } else {
      self.last_audio_pts = pts;
    }

    let mut packet = Packet::from_bytes(&chunk.data)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to build packet", e))?;
    packet.set_stream_index(stream_index);
    packet.set_pts(pts);
    packet.set_dts(pts);
    packet.set_duration(chunk.duration_us.max(0));
    if chunk.is_key {
      packet.set_flags(packet.flags() | crate::ffi::pkt_flag::KEY);
    }

    self
      .muxer
      .write_packet(&mut packet)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to write packet", e))?;

    self.drain_streaming_fragments()
  }

  /// Pull any bytes the streaming I/O context has accumulated since the last
  /// drain (realtime mode only; a no-op in batch mode).
  fn drain_streaming_fragments(&mut self) -> Result<DrainedFragments, PipelineError> {
    if self.mode != PipelineLatencyMode::Realtime {
      return Ok(Vec::new());
    }
    let Some(handle) = self.muxer.get_streaming_handle() else {
      return Ok(Vec::new());
    };
    let mut fragments = Vec::new();
    while let Some(data) = handle.read_available() {
      if data.is_empty() {
        break;
      }
      fragments.push(StreamingChunk {
        data,
        sequence: self.next_sequence,
        is_header: self.next_sequence == 0,
      });
      self.next_sequence += 1;
    }
    Ok(fragments)
  }

  /// Flush any buffered interleaver packets (spec §4.4, called before
  /// `finalize`).
  pub fn flush(&mut self) -> Result<DrainedFragments, PipelineError> {
    if !self.header_written {
      return Ok(Vec::new());
    }
    self
      .muxer
      .flush()
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to flush muxer", e))?;
    self.drain_streaming_fragments()
  }

  /// Write the trailer and return the finalized output (spec §4.4: "one
  /// finalized buffer" for batch, "already streamed" for realtime).
  pub fn finalize(&mut self) -> Result<(FinalizedOutput, DrainedFragments), PipelineError> {
    if !self.header_written {
      // No media was ever written (e.g. zero-frame finalize); still produce
      // a syntactically valid empty container by writing the header now.
      self.ensure_header_written()?;
    }
    self
      .muxer
      .finalize()
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::MuxingFailed, "failed to finalize muxer", e))?;

    match self.mode {
      PipelineLatencyMode::Quality => {
        let buffer = self.muxer.take_buffer().unwrap_or_default();
        Ok((FinalizedOutput::Buffer(buffer), Vec::new()))
      }
      PipelineLatencyMode::Realtime => {
        let fragments = self.drain_streaming_fragments()?;
        self.muxer.finish_streaming();
        Ok((FinalizedOutput::AlreadyStreamed, fragments))
      }
    }
  }

  /// Tear down on cancellation without attempting to write a trailer (spec
  /// §4.5/§7: a cancelled pipeline produces no usable output).
  pub fn abort(&mut self) {
    if self.mode == PipelineLatencyMode::Realtime {
      self.muxer.finish_streaming();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quality_mode_uses_buffer_output() {
    let driver = MuxerDriver::new(PipelineContainer::Mp4, PipelineLatencyMode::Quality);
    assert!(driver.is_ok());
  }

  #[test]
  fn realtime_mode_uses_streaming_output() {
    let driver = MuxerDriver::new(PipelineContainer::WebM, PipelineLatencyMode::Realtime);
    assert!(driver.is_ok());
  }

  #[test]
  fn video_chunk_before_track_added_fails() {
    let mut driver = MuxerDriver::new(PipelineContainer::Mp4, PipelineLatencyMode::Quality).unwrap();
    let chunk = EncodedChunk {
      data: vec![0u8; 4],
      is_key: true,
      timestamp_us: 0,
      duration_us: 33_333,
    };
    let result = driver.write_video_chunk(&chunk, &ChunkMetadata::default());
    assert!(result.is_err());
  }
}
