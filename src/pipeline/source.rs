//! Source Adapter (spec §4.1)
//!
//! Normalizes any of the four input shapes spec.md §9 calls out — a finite
//! frame sequence, a live media stream, a caller-paced async iterator, or a
//! pre-recorded media file — into one uniform lazy sequence of normalized
//! items that the Frame Scheduler drives. This is the tagged-enum-match
//! design spec.md §9 asks for: one `Source` variant per input shape, with
//! the adapter itself a `match` over it.

use crate::codec::audio_buffer::AudioSampleBuffer;
use crate::codec::context::CodecContext;
use crate::codec::demuxer::{DemuxerContext, MediaType};
use crate::codec::resampler::Resampler;
use crate::codec::scaler::{ScaleAlgorithm, Scaler};
use crate::ffi::{AVPixelFormat, AVSampleFormat};
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::frame::PlanarAudioData;
use crate::webcodecs::{AudioData, VideoFrame};
use std::collections::VecDeque;
use std::path::PathBuf;

/// One event surfaced by a dynamic (live-stream or async-iterator) source.
pub enum SourceEvent {
  Video {
    frame: VideoFrame,
    /// Intrinsic timestamp, if the source supplies one (live streams do;
    /// async iterators generally don't, spec §4.1).
    timestamp_us: Option<i64>,
  },
  Audio {
    data: AudioData,
    timestamp_us: Option<i64>,
  },
  PlanarAudio(PlanarAudioData),
}

/// A caller-supplied reader driving either the live-stream or async-iterator
/// input shape. Both shapes share this trait; the `Source` variant they're
/// wrapped in determines whether the scheduler trusts `timestamp_us` or
/// assigns one itself (spec §4.1/§4.2).
pub trait DynamicFrameSource: Send + 'static {
  /// Pull the next event, blocking the calling (worker-owned) thread if
  /// necessary. Returns `Ok(None)` at end of stream.
  fn poll_next(&mut self) -> Result<Option<SourceEvent>, PipelineError>;
}

/// One normalized item the scheduler feeds to the worker, already
/// timestamped per spec §4.2's assignment rules.
pub enum NormalizedItem {
  Video { frame: VideoFrame, timestamp_us: Option<i64> },
  Audio { data: AudioData, timestamp_us: Option<i64> },
  PlanarAudio(PlanarAudioData),
}

/// The tagged-variant `Source` spec.md §9 calls for: one constructor per
/// input shape.
pub enum Source {
  /// Finite frame sequence — known length, index-derived timestamps.
  Frames(Vec<VideoFrame>),
  /// Live media stream — reader with intrinsic timestamps, unknown length,
  /// not restartable.
  LiveStream(Box<dyn DynamicFrameSource>),
  /// Caller-paced async iterator — unknown length, scheduler-assigned
  /// timestamps.
  AsyncIterator(Box<dyn DynamicFrameSource>),
  /// Pre-recorded media file, decoded on demand.
  MediaFile(PathBuf),
}

enum SourceImpl {
  Frames(std::vec::IntoIter<VideoFrame>, usize),
  LiveStream(Box<dyn DynamicFrameSource>),
  AsyncIterator(Box<dyn DynamicFrameSource>),
  MediaFile(Box<MediaFileDecoder>),
}

/// Drives the adapter and exposes one `next()` call per scheduler tick
/// (spec §4.2 "Drives the adapter").
pub struct SourceAdapter {
  inner: SourceImpl,
  frame_rate: f64,
  next_index: u64,
}

impl SourceAdapter {
  pub fn new(source: Source, frame_rate: f64) -> Result<Self, PipelineError> {
    let inner = match source {
      Source::Frames(frames) => {
        let len = frames.len();
        SourceImpl::Frames(frames.into_iter(), len)
      }
      Source::LiveStream(reader) => SourceImpl::LiveStream(reader),
      Source::AsyncIterator(reader) => SourceImpl::AsyncIterator(reader),
      Source::MediaFile(path) => {
        SourceImpl::MediaFile(Box::new(MediaFileDecoder::open(&path, frame_rate)?))
      }
    };
    Ok(Self {
      inner,
      frame_rate,
      next_index: 0,
    })
  }

  /// Computed `total_frames`, when derivable (spec §4.1: "fails with
  /// `UnknownLength` for live and async sources").
  pub fn total_frames(&self) -> Result<Option<u64>, PipelineError> {
    match &self.inner {
      SourceImpl::Frames(_, len) => Ok(Some(*len as u64)),
      SourceImpl::LiveStream(_) | SourceImpl::AsyncIterator(_) => Err(PipelineError::new(
        PipelineErrorKind::UnknownLength,
        "length is not derivable for a live or async-iterator source",
      )),
      SourceImpl::MediaFile(decoder) => Ok(decoder.total_frames_hint()),
    }
  }

  /// Pull the next normalized item, or `Ok(None)` at end of stream.
  pub fn next(&mut self) -> Result<Option<NormalizedItem>, PipelineError> {
    match &mut self.inner {
      SourceImpl::Frames(iter, _) => match iter.next() {
        Some(frame) => {
          let ts = index_timestamp_us(self.next_index, self.frame_rate);
          self.next_index += 1;
          Ok(Some(NormalizedItem::Video {
            frame,
            timestamp_us: Some(ts),
          }))
        }
        None => Ok(None),
      },
      SourceImpl::LiveStream(reader) => match reader.poll_next()? {
        Some(SourceEvent::Video { frame, timestamp_us }) => {
          Ok(Some(NormalizedItem::Video { frame, timestamp_us }))
        }
        Some(SourceEvent::Audio { data, timestamp_us }) => {
          Ok(Some(NormalizedItem::Audio { data, timestamp_us }))
        }
        Some(SourceEvent::PlanarAudio(audio)) => Ok(Some(NormalizedItem::PlanarAudio(audio))),
        None => Ok(None),
      },
      SourceImpl::AsyncIterator(reader) => match reader.poll_next()? {
        Some(SourceEvent::Video { frame, .. }) => {
          let ts = index_timestamp_us(self.next_index, self.frame_rate);
          self.next_index += 1;
          Ok(Some(NormalizedItem::Video {
            frame,
            timestamp_us: Some(ts),
          }))
        }
        Some(SourceEvent::Audio { data, timestamp_us }) => {
          Ok(Some(NormalizedItem::Audio { data, timestamp_us }))
        }
        Some(SourceEvent::PlanarAudio(audio)) => Ok(Some(NormalizedItem::PlanarAudio(audio))),
        None => Ok(None),
      },
      SourceImpl::MediaFile(decoder) => decoder.next(),
    }
  }
}

fn index_timestamp_us(index: u64, frame_rate: f64) -> i64 {
  ((index as f64) / frame_rate * 1_000_000.0).round() as i64
}

/// Decodes a pre-recorded media file into a visual sequence re-timestamped
/// onto `frame_rate`'s index grid, plus an audio sequence rechunked into
/// blocks sized to roughly one frame-duration (spec §4.1: "chunked into
/// blocks sized to roughly one frame-duration"), mirroring the
/// `AudioSampleBuffer` rechunking the Codec Manager already does on the
/// encoder side. Resampling the source's native frame rate to match
/// `frame_rate` exactly (drop/dup cadence) is out of scope; re-timestamping
/// is sufficient for the muxer's monotonic-timestamp contract.
struct MediaFileDecoder {
  demuxer: DemuxerContext,
  video_stream_index: Option<i32>,
  audio_stream_index: Option<i32>,
  video_decoder: Option<CodecContext>,
  audio_decoder: Option<CodecContext>,
  video_scaler: Option<Scaler>,
  audio_resampler: Option<Resampler>,
  audio_buffer: Option<AudioSampleBuffer>,
  pending: VecDeque<NormalizedItem>,
  next_video_index: u64,
  next_audio_index: u64,
  frame_rate: f64,
  eof: bool,
}

impl MediaFileDecoder {
  fn open(path: &PathBuf, frame_rate: f64) -> Result<Self, PipelineError> {
    let path_str = path
      .to_str()
      .ok_or_else(|| PipelineError::new(PipelineErrorKind::InvalidInput, "non-UTF8 file path"))?;
    let demuxer = DemuxerContext::open_file(path_str)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "failed to open media file", e))?;

    let video_info = demuxer.find_best_stream(MediaType::Video).cloned();
    let audio_info = demuxer.find_best_stream(MediaType::Audio).cloned();

    let video_stream_index = video_info.as_ref().map(|s| s.index);
    let audio_stream_index = audio_info.as_ref().map(|s| s.index);

    let video_decoder = match &video_info {
      Some(info) => {
        let mut ctx = CodecContext::new_decoder(info.codec_id)
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "no video decoder available", e))?;
        ctx
          .configure_decoder(&crate::codec::DecoderConfig {
            codec_id: info.codec_id,
            thread_count: 0,
            extradata: info.extradata.clone(),
          })
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "video decoder configure failed", e))?;
        ctx
          .open()
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "video decoder open failed", e))?;
        Some(ctx)
      }
      None => None,
    };

    let audio_decoder = match &audio_info {
      Some(info) => {
        let mut ctx = CodecContext::new_decoder(info.codec_id)
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "no audio decoder available", e))?;
        ctx
          .configure_decoder(&crate::codec::DecoderConfig {
            codec_id: info.codec_id,
            thread_count: 0,
            extradata: info.extradata.clone(),
          })
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "audio decoder configure failed", e))?;
        ctx
          .open()
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "audio decoder open failed", e))?;
        Some(ctx)
      }
      None => None,
    };

    Ok(Self {
      demuxer,
      video_stream_index,
      audio_stream_index,
      video_decoder,
      audio_decoder,
      video_scaler: None,
      audio_resampler: None,
      audio_buffer: None,
      pending: VecDeque::new(),
      next_video_index: 0,
      next_audio_index: 0,
      frame_rate,
      eof: false,
    })
  }

  fn total_frames_hint(&self) -> Option<u64> {
    let info = self
      .video_stream_index
      .and_then(|idx| self.demuxer.get_stream(idx))?;
    let duration_us = info.duration.map(|d| {
      let (num, den) = info.time_base;
      (d as f64) * (num as f64) / (den as f64) * 1_000_000.0
    })?;
    Some((duration_us / 1_000_000.0 * self.frame_rate).round().max(0.0) as u64)
  }

  fn next(&mut self) -> Result<Option<NormalizedItem>, PipelineError> {
    loop {
      if let Some(item) = self.pending.pop_front() {
        return Ok(Some(item));
      }
      if self.eof {
        return Ok(None);
      }
      self.pump_one_packet()?;
    }
  }

  fn pump_one_packet(&mut self) -> Result<(), PipelineError> {
    let Some((packet, stream_index)) = self
      .demuxer
      .read_packet()
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "demux read failed", e))?
    else {
      self.eof = true;
      self.flush_decoders()?;
      return Ok(());
    };

    if Some(stream_index) == self.video_stream_index {
      let frames = self
        .video_decoder
        .as_mut()
        .unwrap()
        .decode(Some(&packet))
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "video decode failed", e))?;
      for frame in frames {
        self.emit_video_frame(frame)?;
      }
    } else if Some(stream_index) == self.audio_stream_index {
      let frames = self
        .audio_decoder
        .as_mut()
        .unwrap()
        .decode(Some(&packet))
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "audio decode failed", e))?;
      for frame in frames {
        self.emit_audio_frame(frame)?;
      }
    }
    Ok(())
  }

  fn flush_decoders(&mut self) -> Result<(), PipelineError> {
    if let Some(ctx) = self.video_decoder.as_mut() {
      let frames = ctx
        .flush_decoder()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "video flush failed", e))?;
      for frame in frames {
        self.emit_video_frame(frame)?;
      }
    }
    if let Some(ctx) = self.audio_decoder.as_mut() {
      let frames = ctx
        .flush_decoder()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "audio flush failed", e))?;
      for frame in frames {
        self.emit_audio_frame(frame)?;
      }
    }
    if let Some(buffer) = self.audio_buffer.as_mut() {
      let trailing = buffer
        .flush()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "audio rechunk flush failed", e))?;
      if let Some(frame) = trailing {
        self.push_audio_block(frame)?;
      }
    }
    Ok(())
  }

  fn emit_video_frame(&mut self, mut frame: crate::codec::Frame) -> Result<(), PipelineError> {
    if frame.format() != AVPixelFormat::Yuv420p {
      if self.video_scaler.is_none() {
        self.video_scaler = Some(
          Scaler::new(
            frame.width(),
            frame.height(),
            frame.format(),
            frame.width(),
            frame.height(),
            AVPixelFormat::Yuv420p,
            ScaleAlgorithm::Bilinear,
          )
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "decoder scaler setup failed", e))?,
        );
      }
      frame = self
        .video_scaler
        .as_ref()
        .unwrap()
        .scale_alloc(&frame)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "decoder scale failed", e))?;
    }
    let timestamp_us = index_timestamp_us(self.next_video_index, self.frame_rate);
    self.next_video_index += 1;
    let video_frame = VideoFrame::from_internal(frame, timestamp_us, None);
    self.pending.push_back(NormalizedItem::Video {
      frame: video_frame,
      timestamp_us: Some(timestamp_us),
    });
    Ok(())
  }

  /// Decode-convert one native audio frame to `Fltp` and feed it into the
  /// rechunking buffer, draining every full ~1-frame-duration block it
  /// produces (spec §4.1).
  fn emit_audio_frame(&mut self, frame: crate::codec::Frame) -> Result<(), PipelineError> {
    let needs_conversion = frame.sample_format() != AVSampleFormat::Fltp;
    let converted;
    let source = if needs_conversion {
      if self.audio_resampler.is_none() {
        self.audio_resampler = Some(
          Resampler::new_format_converter(
            frame.channels(),
            frame.sample_rate(),
            frame.sample_format(),
            AVSampleFormat::Fltp,
          )
          .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "decoder resampler setup failed", e))?,
        );
      }
      converted = self
        .audio_resampler
        .as_mut()
        .unwrap()
        .convert_alloc(&frame)
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "decoder resample failed", e))?;
      &converted
    } else {
      &frame
    };

    if self.audio_buffer.is_none() {
      let block_frames = ((source.sample_rate() as f64 / self.frame_rate).round() as usize).max(1);
      self.audio_buffer = Some(AudioSampleBuffer::new(
        block_frames,
        source.channels(),
        source.sample_rate(),
        AVSampleFormat::Fltp,
      ));
    }
    let buffer = self.audio_buffer.as_mut().unwrap();
    buffer
      .add_frame(source)
      .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "failed to rechunk decoded audio", e))?;

    while buffer.has_full_frame() {
      let Some(block) = buffer
        .take_frame()
        .map_err(|e| PipelineError::with_cause(PipelineErrorKind::InvalidInput, "failed to take rechunked audio block", e))?
      else {
        break;
      };
      self.push_audio_block(block)?;
    }
    Ok(())
  }

  /// Timestamp and enqueue one rechunked audio block (spec §4.1/§4.2: block
  /// timestamps advance on the same `frame_rate`-derived index grid as
  /// video, since each block spans roughly one frame-duration).
  fn push_audio_block(&mut self, mut block: crate::codec::Frame) -> Result<(), PipelineError> {
    let timestamp_us = index_timestamp_us(self.next_audio_index, self.frame_rate);
    self.next_audio_index += 1;
    block.set_pts(timestamp_us);
    let data = AudioData::from_internal(block, timestamp_us);
    self.pending.push_back(NormalizedItem::Audio {
      data,
      timestamp_us: Some(timestamp_us),
    });
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn index_timestamp_advances_by_frame_duration() {
    assert_eq!(index_timestamp_us(0, 30.0), 0);
    assert_eq!(index_timestamp_us(1, 30.0), 33_333);
    assert_eq!(index_timestamp_us(30, 30.0), 1_000_000);
  }

  struct CountingSource {
    remaining: u32,
  }

  impl DynamicFrameSource for CountingSource {
    fn poll_next(&mut self) -> Result<Option<SourceEvent>, PipelineError> {
      if self.remaining == 0 {
        return Ok(None);
      }
      self.remaining -= 1;
      Err(PipelineError::new(PipelineErrorKind::InternalError, "test stub has no real frame"))
    }
  }

  #[test]
  fn async_iterator_reports_unknown_length() {
    let source = Source::AsyncIterator(Box::new(CountingSource { remaining: 3 }));
    let adapter = SourceAdapter::new(source, 30.0);
    // Construction never touches the reader for AsyncIterator, so this always succeeds.
    let adapter = adapter.expect("adapter construction does not probe length");
    assert!(adapter.total_frames().is_err());
  }
}
