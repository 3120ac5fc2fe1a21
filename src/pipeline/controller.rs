//! Controller (spec §4.6)
//!
//! `EncodingPipeline` is the single NAPI-facing object. It owns the embedded
//! `FrameScheduler` (timestamp assignment, backpressure pacing, progress
//! tracking — spec §4.2 lives here, not on the worker, per spec §2) and a
//! `WorkerHandle` to the dedicated worker thread (`pipeline::worker`).
//!
//! A second plain OS thread ("dispatcher") blocks on the `crossbeam_channel`
//! receiving `WorkerMessage`s and fans them out to the caller: either into
//! JS-facing `ThreadsafeFunction` callbacks (`dataChunk`, `queueSize`,
//! `error`), or by resolving a `tokio::sync::oneshot` that an in-flight
//! `initialize`/`finalize` `#[napi] async fn` is awaiting. This mirrors the
//! `ThreadsafeFunction`-callback plumbing `video_encoder.rs::with_callbacks`
//! already uses for its own output/error callbacks, generalized to a second,
//! non-tokio consumer thread since the dispatcher has no napi-embedded
//! reactor of its own to run on.

use crate::pipeline::codec_manager::CodecManager;
use crate::pipeline::config::{PipelineConfig, PipelineContainer};
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::frame::{AudioBlockHandle, PlanarAudioData, VideoFrameHandle};
use crate::pipeline::message::{ControllerMessage, WorkerMessage};
use crate::pipeline::scheduler::FrameScheduler;
use crate::pipeline::source::{NormalizedItem, Source, SourceAdapter};
use crate::pipeline::state::PipelineState;
use crate::pipeline::worker::{self, WorkerHandle};
use crate::webcodecs::{AudioData, VideoFrame};
use napi::bindgen_prelude::*;
use napi::threadsafe_function::{ThreadsafeFunction, ThreadsafeFunctionCallMode};
use napi_derive::napi;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// `initialized` event payload (spec §6).
#[napi(object)]
#[derive(Debug, Clone)]
pub struct PipelineInitializedEvent {
  pub actual_video_codec: Option<String>,
  pub actual_audio_codec: Option<String>,
}

/// `progress` event payload (spec §4.2/§6). Emitted directly by the
/// controller from its own scheduler, never round-tripped through the
/// worker (see `message.rs`'s `WorkerMessage` doc comment).
#[napi(object)]
#[derive(Debug, Clone)]
pub struct PipelineProgressEvent {
  pub frames_submitted: i64,
  pub frames_encoded: i64,
  pub audio_blocks_submitted: i64,
  pub ewma_fps: f64,
  pub queue_depth: i64,
  pub frames_dropped: i64,
  /// Known only for a finite source (spec §4.1: `UnknownLength` for live and
  /// async-iterator sources).
  pub total_frames: Option<i64>,
  pub estimated_remaining_ms: Option<i64>,
  pub stage: String,
}

/// `queueSize` event payload (spec §4.3/§6).
#[napi(object)]
#[derive(Debug, Clone, Copy)]
pub struct PipelineQueueSizeEvent {
  pub video: i64,
  pub audio: i64,
}

/// `dataChunk` event payload (spec §4.4/§6). `container` is attached here
/// from the controller's own frozen config, not carried on the wire-level
/// `StreamingChunk` the worker emits.
#[napi(object)]
#[derive(Clone)]
pub struct PipelineDataChunkEvent {
  pub bytes: Buffer,
  pub sequence: i64,
  /// True for the first, structural fragment (spec §4.4).
  pub is_header: bool,
  pub container: String,
}

/// `finalized` event payload (spec §6). `buffer` is `None` in realtime mode,
/// where bytes already went out as `dataChunk` events.
#[napi(object)]
#[derive(Clone)]
pub struct PipelineFinalizedEvent {
  pub buffer: Option<Buffer>,
}

/// `cancelled` event payload (spec §6).
#[napi(object)]
#[derive(Debug, Clone, Copy)]
pub struct PipelineCancelledEvent {
  pub cancelled: bool,
}

/// `error` event payload (spec §6/§7).
#[napi(object)]
#[derive(Debug, Clone)]
pub struct PipelineErrorEvent {
  pub kind: String,
  pub message: String,
}

/// Result of the static `is_config_supported` probe (mirrors
/// `VideoEncoderSupport`/`AudioEncoderSupport`'s shape).
#[napi(object)]
#[derive(Debug, Clone, Copy)]
pub struct PipelineSupport {
  pub supported: bool,
}

struct Callbacks {
  on_initialized: Option<ThreadsafeFunction<PipelineInitializedEvent>>,
  on_queue_size: Option<ThreadsafeFunction<PipelineQueueSizeEvent>>,
  on_data_chunk: Option<ThreadsafeFunction<PipelineDataChunkEvent>>,
  on_finalized: Option<ThreadsafeFunction<PipelineFinalizedEvent>>,
  on_cancelled: Option<ThreadsafeFunction<PipelineCancelledEvent>>,
  on_error: Option<ThreadsafeFunction<PipelineErrorEvent>>,
}

/// The single outstanding async handshake, if any. `initialize` and
/// `finalize` are mutually exclusive in time (the state machine forbids
/// calling one while the other is in flight), so one slot suffices.
enum PendingOp {
  Initialize(tokio::sync::oneshot::Sender<Result<PipelineInitializedEvent, PipelineError>>),
  Finalize(tokio::sync::oneshot::Sender<Result<Option<Vec<u8>>, PipelineError>>),
}

struct Shared {
  state: Mutex<PipelineState>,
  container: Mutex<Option<PipelineContainer>>,
  pending: Mutex<Option<PendingOp>>,
  scheduler: Mutex<FrameScheduler>,
  video_queue_depth: AtomicU32,
  audio_queue_depth: AtomicU32,
  actual_video_codec: Mutex<Option<String>>,
  actual_audio_codec: Mutex<Option<String>>,
  frame_rate: Mutex<f64>,
  /// Set once a `Source`-driven encode (`encode_frames`/`encode_media_file`)
  /// knows its length (spec §4.1); `None` for a manually-paced encode or an
  /// unbounded source.
  total_frames: Mutex<Option<u64>>,
  /// Cloned from the same sender the worker thread reports through, so a
  /// source-pump thread (spawned by `drive_source`) can surface a Source
  /// Adapter error as the same terminal `error` event the worker's own
  /// failures produce, without a second notification path.
  event_tx: crossbeam::channel::Sender<WorkerMessage>,
  callbacks: Callbacks,
}

impl Shared {
  fn reject_pending_cancelled(&self) {
    if let Some(op) = self.pending.lock().unwrap().take() {
      let cancelled = PipelineError::new(PipelineErrorKind::Cancelled, "pipeline was cancelled");
      match op {
        PendingOp::Initialize(tx) => {
          let _ = tx.send(Err(cancelled));
        }
        PendingOp::Finalize(tx) => {
          let _ = tx.send(Err(cancelled));
        }
      }
    }
  }
}

/// Drain `WorkerMessage`s off `event_rx` on a plain blocking OS thread and
/// fan them out to callbacks / pending handshakes. No tokio runtime is
/// needed here: `crossbeam_channel::Receiver` blocks natively.
fn spawn_dispatcher(shared: Arc<Shared>, event_rx: crossbeam::channel::Receiver<WorkerMessage>) {
  std::thread::Builder::new()
    .name("encoding-pipeline-dispatcher".into())
    .spawn(move || {
      for message in event_rx {
        match message {
          WorkerMessage::Initialized {
            actual_video_codec,
            actual_audio_codec,
          } => {
            *shared.state.lock().unwrap() = PipelineState::Ready;
            *shared.actual_video_codec.lock().unwrap() = actual_video_codec.clone();
            *shared.actual_audio_codec.lock().unwrap() = actual_audio_codec.clone();
            let event = PipelineInitializedEvent {
              actual_video_codec,
              actual_audio_codec,
            };
            if let Some(PendingOp::Initialize(tx)) = shared.pending.lock().unwrap().take() {
              let _ = tx.send(Ok(event.clone()));
            }
            if let Some(cb) = &shared.callbacks.on_initialized {
              cb.call(Ok(event), ThreadsafeFunctionCallMode::NonBlocking);
            }
          }
          WorkerMessage::QueueSize(depth) => {
            shared.video_queue_depth.store(depth.video, Ordering::Relaxed);
            shared.audio_queue_depth.store(depth.audio, Ordering::Relaxed);
            if let Some(cb) = &shared.callbacks.on_queue_size {
              cb.call(
                Ok(PipelineQueueSizeEvent {
                  video: depth.video as i64,
                  audio: depth.audio as i64,
                }),
                ThreadsafeFunctionCallMode::NonBlocking,
              );
            }
          }
          WorkerMessage::StreamingChunk(chunk) => {
            if let Some(cb) = &shared.callbacks.on_data_chunk {
              let container = shared
                .container
                .lock()
                .unwrap()
                .map(|c| format!("{:?}", c).to_lowercase())
                .unwrap_or_default();
              cb.call(
                Ok(PipelineDataChunkEvent {
                  bytes: Buffer::from(chunk.data),
                  sequence: chunk.sequence as i64,
                  is_header: chunk.is_header,
                  container,
                }),
                ThreadsafeFunctionCallMode::NonBlocking,
              );
            }
          }
          WorkerMessage::Finalized(buffer) => {
            *shared.state.lock().unwrap() = PipelineState::Terminated;
            if let Some(PendingOp::Finalize(tx)) = shared.pending.lock().unwrap().take() {
              let _ = tx.send(Ok(buffer.clone()));
            }
            if let Some(cb) = &shared.callbacks.on_finalized {
              cb.call(
                Ok(PipelineFinalizedEvent {
                  buffer: buffer.map(Buffer::from),
                }),
                ThreadsafeFunctionCallMode::NonBlocking,
              );
            }
            break;
          }
          WorkerMessage::Cancelled => {
            *shared.state.lock().unwrap() = PipelineState::Cancelled;
            shared.reject_pending_cancelled();
            if let Some(cb) = &shared.callbacks.on_cancelled {
              cb.call(Ok(PipelineCancelledEvent { cancelled: true }), ThreadsafeFunctionCallMode::NonBlocking);
            }
            break;
          }
          WorkerMessage::Error(error) => {
            *shared.state.lock().unwrap() = PipelineState::Terminated;
            let kind = error.kind.as_str().to_string();
            let message = error.message.clone();
            if let Some(op) = shared.pending.lock().unwrap().take() {
              match op {
                PendingOp::Initialize(tx) => {
                  let _ = tx.send(Err(error));
                }
                PendingOp::Finalize(tx) => {
                  let _ = tx.send(Err(error));
                }
              }
            }
            if let Some(cb) = &shared.callbacks.on_error {
              cb.call(Ok(PipelineErrorEvent { kind, message }), ThreadsafeFunctionCallMode::NonBlocking);
            }
            break;
          }
        }
      }
    })
    .expect("failed to spawn encoding pipeline dispatcher thread");
}

/// The encoding pipeline's controller-side facade (spec §4.6). One instance
/// per encode; not reusable once terminated or cancelled.
#[napi]
pub struct EncodingPipeline {
  worker: WorkerHandle,
  shared: Arc<Shared>,
}

#[napi]
impl EncodingPipeline {
  /// Construct a pipeline, registering the event callbacks it will invoke
  /// for the lifetime of the encode (spec §6's `initialized`/`queueSize`/
  /// `dataChunk`/`finalized`/`cancelled`/`error` events). Mirrors
  /// `VideoEncoder::with_callbacks`'s factory-with-callbacks shape, widened
  /// to the pipeline's larger event set.
  #[napi(factory)]
  pub fn with_callbacks(
    on_initialized: Option<ThreadsafeFunction<PipelineInitializedEvent>>,
    on_queue_size: Option<ThreadsafeFunction<PipelineQueueSizeEvent>>,
    on_data_chunk: Option<ThreadsafeFunction<PipelineDataChunkEvent>>,
    on_finalized: Option<ThreadsafeFunction<PipelineFinalizedEvent>>,
    on_cancelled: Option<ThreadsafeFunction<PipelineCancelledEvent>>,
    on_error: Option<ThreadsafeFunction<PipelineErrorEvent>>,
  ) -> Self {
    let (event_tx, event_rx) = crossbeam::channel::unbounded();
    let worker = worker::spawn(event_tx.clone());
    let shared = Arc::new(Shared {
      state: Mutex::new(PipelineState::Idle),
      container: Mutex::new(None),
      pending: Mutex::new(None),
      // Placeholder scheduler; replaced with the caller's actual config at
      // `initialize` time.
      scheduler: Mutex::new(FrameScheduler::new(
        crate::pipeline::config::FirstTimestampBehavior::default(),
        crate::pipeline::config::PipelineLatencyMode::default(),
        10,
        30.0,
      )),
      video_queue_depth: AtomicU32::new(0),
      audio_queue_depth: AtomicU32::new(0),
      actual_video_codec: Mutex::new(None),
      actual_audio_codec: Mutex::new(None),
      frame_rate: Mutex::new(30.0),
      total_frames: Mutex::new(None),
      event_tx,
      callbacks: Callbacks {
        on_initialized,
        on_queue_size,
        on_data_chunk,
        on_finalized,
        on_cancelled,
        on_error,
      },
    });
    spawn_dispatcher(Arc::clone(&shared), event_rx);
    Self { worker, shared }
  }

  /// Negotiate codecs and prepare the muxer (spec §4.6). Rejects with
  /// `InvalidState` if called more than once.
  #[napi]
  pub async fn initialize(&self, config: PipelineConfig) -> Result<PipelineInitializedEvent> {
    {
      let mut state = self.shared.state.lock().unwrap();
      if let Err(e) = state.validate_transition(PipelineState::Initializing) {
        return Err(e.to_napi_error());
      }
      *state = PipelineState::Initializing;
    }
    *self.shared.container.lock().unwrap() = Some(config.container);
    *self.shared.frame_rate.lock().unwrap() = config.frame_rate;
    *self.shared.scheduler.lock().unwrap() = FrameScheduler::new(
      config.first_timestamp_behavior(),
      config.latency_mode,
      config.max_queue_depth(),
      config.frame_rate,
    );

    let (tx, rx) = tokio::sync::oneshot::channel();
    *self.shared.pending.lock().unwrap() = Some(PendingOp::Initialize(tx));
    self
      .worker
      .send(ControllerMessage::Initialize { config })
      .map_err(|e| e.to_napi_error())?;

    match rx.await {
      Ok(Ok(event)) => Ok(event),
      Ok(Err(e)) => Err(e.to_napi_error()),
      Err(_) => Err(
        PipelineError::new(PipelineErrorKind::InternalError, "pipeline worker dropped before acknowledging initialize")
          .to_napi_error(),
      ),
    }
  }

  /// Submit one video frame, assigning/validating its timestamp via the
  /// embedded scheduler (spec §4.2) before handing it to the worker.
  /// Dropped silently (and recorded) under realtime backpressure, per spec
  /// §4.2/§6's explicit allowance for frame drops in that mode.
  #[napi]
  pub fn add_video_frame(&self, frame: VideoFrame, timestamp_us: Option<i64>) -> Result<()> {
    self.ensure_accepting_frames()?;
    let queue_depth = self.shared.video_queue_depth.load(Ordering::Relaxed);
    let mut scheduler = self.shared.scheduler.lock().unwrap();
    if scheduler.should_pause_for(queue_depth) {
      scheduler.record_dropped_frame();
      return Ok(());
    }
    let resolved_ts = scheduler.resolve_video_timestamp(timestamp_us).map_err(|e| e.to_napi_error())?;
    drop(scheduler);
    let handle = Arc::new(VideoFrameHandle::new(frame, Some(resolved_ts)));
    self
      .worker
      .send(ControllerMessage::SubmitVideoFrame { frame: handle })
      .map_err(|e| e.to_napi_error())
  }

  /// Submit one platform-native audio block (spec §3 "native handle" half of
  /// the audio sample block union).
  #[napi]
  pub fn add_audio(&self, data: AudioData, timestamp_us: Option<i64>) -> Result<()> {
    self.ensure_accepting_frames()?;
    let queue_depth = self.shared.audio_queue_depth.load(Ordering::Relaxed);
    let mut scheduler = self.shared.scheduler.lock().unwrap();
    if scheduler.should_pause_for(queue_depth) {
      scheduler.record_dropped_frame();
      return Ok(());
    }
    let resolved_ts = scheduler.resolve_audio_timestamp(timestamp_us).map_err(|e| e.to_napi_error())?;
    drop(scheduler);
    let handle = Arc::new(AudioBlockHandle::new(data, Some(resolved_ts)));
    self
      .worker
      .send(ControllerMessage::SubmitAudioBlock { block: handle })
      .map_err(|e| e.to_napi_error())
  }

  /// Submit one planar-`f32` audio block (spec §3 "planar buffer" half of the
  /// audio sample block union), e.g. from a `Float32Array`-backed source.
  #[napi]
  pub fn add_planar_audio(
    &self,
    sample_rate: u32,
    channels: u32,
    frame_count: u32,
    planes: Vec<Float32Array>,
    timestamp_us: Option<i64>,
  ) -> Result<()> {
    self.ensure_accepting_frames()?;
    let queue_depth = self.shared.audio_queue_depth.load(Ordering::Relaxed);
    let mut scheduler = self.shared.scheduler.lock().unwrap();
    if scheduler.should_pause_for(queue_depth) {
      scheduler.record_dropped_frame();
      return Ok(());
    }
    let resolved_ts = scheduler.resolve_audio_timestamp(timestamp_us).map_err(|e| e.to_napi_error())?;
    let audio = PlanarAudioData {
      sample_rate,
      channels,
      frame_count,
      planes: planes.iter().map(|p| p.to_vec()).collect(),
      timestamp_us: Some(resolved_ts),
    };
    audio.validate().map_err(|e| e.to_napi_error())?;
    scheduler.advance_audio(audio.duration_us());
    drop(scheduler);
    self
      .worker
      .send(ControllerMessage::SubmitPlanarAudio { audio })
      .map_err(|e| e.to_napi_error())
  }

  /// Drive a finite, in-memory frame sequence through the Source Adapter and
  /// Frame Scheduler to completion, finalizing automatically at end of
  /// stream (spec §4.1 "finite frame sequence" / §4.2 "Completion: when the
  /// adapter reports end, sends `finalize`"). Runs on a dedicated pump
  /// thread, mirroring the worker's own dedicated-thread pattern, since
  /// `SourceAdapter::next()` is a blocking call.
  #[napi]
  pub fn encode_frames(&self, frames: Vec<VideoFrame>) -> Result<()> {
    self.drive_source(Source::Frames(frames))
  }

  /// Drive a pre-recorded media file through the Source Adapter (spec
  /// §4.1's "pre-recorded media file" shape: decoded, re-timestamped onto
  /// `frame_rate`'s grid, video and audio interleaved as they decode) to
  /// completion, finalizing automatically at end of stream.
  #[napi]
  pub fn encode_media_file(&self, path: String) -> Result<()> {
    self.drive_source(Source::MediaFile(PathBuf::from(path)))
  }

  fn drive_source(&self, source: Source) -> Result<()> {
    self.ensure_accepting_frames()?;
    let frame_rate = *self.shared.frame_rate.lock().unwrap();
    let mut adapter = SourceAdapter::new(source, frame_rate).map_err(|e| e.to_napi_error())?;
    *self.shared.total_frames.lock().unwrap() = adapter.total_frames().ok().flatten();

    let command_tx = self.worker.sender();
    let shared = Arc::clone(&self.shared);
    std::thread::Builder::new()
      .name("encoding-pipeline-source-pump".into())
      .spawn(move || loop {
        match adapter.next() {
          Ok(Some(item)) => {
            if !submit_normalized_item(&shared, &command_tx, item) {
              break;
            }
          }
          Ok(None) => {
            let _ = command_tx.send(ControllerMessage::Finalize);
            break;
          }
          Err(e) => {
            let _ = shared.event_tx.send(WorkerMessage::Error(e));
            let _ = command_tx.send(ControllerMessage::Cancel);
            break;
          }
        }
      })
      .expect("failed to spawn encoding pipeline source pump thread");
    Ok(())
  }

  fn ensure_accepting_frames(&self) -> Result<()> {
    let state = *self.shared.state.lock().unwrap();
    if matches!(state, PipelineState::Ready | PipelineState::Running) {
      Ok(())
    } else {
      Err(
        PipelineError::new(PipelineErrorKind::InvalidState, format!("cannot submit media in state {state:?}"))
          .to_napi_error(),
      )
    }
  }

  /// The current progress snapshot (spec §4.2: `{processed_frames,
  /// total_frames?, fps, stage, estimated_remaining_ms?}`). Read
  /// synchronously; not a Promise, since the scheduler lives on this side of
  /// the NAPI boundary already.
  #[napi]
  pub fn progress(&self) -> PipelineProgressEvent {
    let queue_depth =
      self.shared.video_queue_depth.load(Ordering::Relaxed) + self.shared.audio_queue_depth.load(Ordering::Relaxed);
    let scheduler = self.shared.scheduler.lock().unwrap();
    let record = scheduler.progress(queue_depth);
    let frames_dropped = scheduler.frames_dropped();
    drop(scheduler);

    let total_frames = *self.shared.total_frames.lock().unwrap();
    // `estimated_remaining_ms` is defined only when `total_frames` is known
    // and `fps > 0` (spec §4.2).
    let estimated_remaining_ms = match total_frames {
      Some(total) if record.ewma_fps > 0.0 && total > record.frames_encoded => {
        let remaining = (total - record.frames_encoded) as f64;
        Some((remaining / record.ewma_fps * 1000.0).round() as i64)
      }
      _ => None,
    };
    let stage = format!("{:?}", *self.shared.state.lock().unwrap()).to_lowercase();

    PipelineProgressEvent {
      frames_submitted: record.frames_submitted as i64,
      frames_encoded: record.frames_encoded as i64,
      audio_blocks_submitted: record.audio_blocks_submitted as i64,
      ewma_fps: record.ewma_fps,
      queue_depth: record.queue_depth as i64,
      frames_dropped: frames_dropped as i64,
      total_frames: total_frames.map(|t| t as i64),
      estimated_remaining_ms,
      stage,
    }
  }

  /// Flush and finalize (spec §4.6). Resolves with the complete container
  /// buffer in quality mode, or `null` in realtime mode (already streamed
  /// out via `dataChunk` events).
  #[napi]
  pub async fn finalize(&self) -> Result<Option<Buffer>> {
    {
      let state = *self.shared.state.lock().unwrap();
      if !matches!(state, PipelineState::Ready | PipelineState::Running) {
        return Err(
          PipelineError::new(PipelineErrorKind::InvalidState, format!("cannot finalize in state {state:?}")).to_napi_error(),
        );
      }
    }
    let (tx, rx) = tokio::sync::oneshot::channel();
    *self.shared.pending.lock().unwrap() = Some(PendingOp::Finalize(tx));
    self.worker.send(ControllerMessage::Finalize).map_err(|e| e.to_napi_error())?;

    match rx.await {
      Ok(Ok(bytes)) => Ok(bytes.map(Buffer::from)),
      Ok(Err(e)) => Err(e.to_napi_error()),
      Err(_) => Err(
        PipelineError::new(PipelineErrorKind::InternalError, "pipeline worker dropped before acknowledging finalize")
          .to_napi_error(),
      ),
    }
  }

  /// Abort the pipeline (spec §4.6). Returns immediately: quiescence and the
  /// `cancelled` event follow asynchronously once the worker drains.
  /// Rejects any in-flight `initialize`/`finalize` with `Cancelled`.
  #[napi]
  pub fn cancel(&self) -> Result<()> {
    let mut state = self.shared.state.lock().unwrap();
    if state.is_terminal() {
      return Ok(());
    }
    *state = PipelineState::Cancelled;
    drop(state);
    self.shared.reject_pending_cancelled();
    self.worker.send(ControllerMessage::Cancel).map_err(|e| e.to_napi_error())
  }

  /// The codec family actually negotiated for video, after fallback (spec
  /// §4.3/§4.6). `None` before `initialize` resolves or when video is
  /// disabled.
  #[napi]
  pub fn actual_video_codec(&self) -> Option<String> {
    self.shared.actual_video_codec.lock().unwrap().clone()
  }

  /// The codec family actually negotiated for audio, after fallback.
  #[napi]
  pub fn actual_audio_codec(&self) -> Option<String> {
    self.shared.actual_audio_codec.lock().unwrap().clone()
  }

  /// Probe whether a configuration would negotiate successfully, without
  /// constructing a pipeline (spec §4.6 addition; mirrors
  /// `VideoEncoder::is_config_supported`/`AudioEncoder::is_config_supported`'s
  /// "try to build it, report whether that succeeded" shape).
  #[napi]
  pub async fn is_config_supported(config: PipelineConfig) -> Result<PipelineSupport> {
    if config.validate().is_err() {
      return Ok(PipelineSupport { supported: false });
    }
    let mut probe = CodecManager::new();
    let supported = probe.initialize(&config).is_ok();
    probe.close();
    Ok(PipelineSupport { supported })
  }
}

/// Block the pump thread while the relevant stream is over the backpressure
/// ceiling (spec §4.2: "otherwise awaits a queue-depth signal or a short
/// poll interval"). Unlike `add_video_frame`/`add_audio`, a source-driven
/// pump controls its own pull rate, so it waits rather than drops — dropping
/// is reserved for externally-pushed submission, where the call has already
/// arrived by the time backpressure is observed.
fn wait_for_capacity(shared: &Shared, is_video: bool) {
  loop {
    let depth = if is_video {
      shared.video_queue_depth.load(Ordering::Relaxed)
    } else {
      shared.audio_queue_depth.load(Ordering::Relaxed)
    };
    let paused = shared.scheduler.lock().unwrap().should_pause_for(depth);
    if !paused {
      return;
    }
    std::thread::sleep(std::time::Duration::from_millis(5));
  }
}

/// Route one `NormalizedItem` from the Source Adapter through the Frame
/// Scheduler to the worker. Returns `false` once the worker channel has
/// closed, signaling the pump thread to stop.
fn submit_normalized_item(shared: &Arc<Shared>, command_tx: &UnboundedSender<ControllerMessage>, item: NormalizedItem) -> bool {
  match item {
    NormalizedItem::Video { frame, timestamp_us } => {
      wait_for_capacity(shared, true);
      let resolved = match shared.scheduler.lock().unwrap().resolve_video_timestamp(timestamp_us) {
        Ok(ts) => ts,
        Err(e) => {
          let _ = shared.event_tx.send(WorkerMessage::Error(e));
          return false;
        }
      };
      let handle = Arc::new(VideoFrameHandle::new(frame, Some(resolved)));
      command_tx.send(ControllerMessage::SubmitVideoFrame { frame: handle }).is_ok()
    }
    NormalizedItem::Audio { data, timestamp_us } => {
      wait_for_capacity(shared, false);
      let resolved = match shared.scheduler.lock().unwrap().resolve_audio_timestamp(timestamp_us) {
        Ok(ts) => ts,
        Err(e) => {
          let _ = shared.event_tx.send(WorkerMessage::Error(e));
          return false;
        }
      };
      let handle = Arc::new(AudioBlockHandle::new(data, Some(resolved)));
      command_tx.send(ControllerMessage::SubmitAudioBlock { block: handle }).is_ok()
    }
    NormalizedItem::PlanarAudio(mut audio) => {
      wait_for_capacity(shared, false);
      let mut scheduler = shared.scheduler.lock().unwrap();
      let resolved = match scheduler.resolve_audio_timestamp(audio.timestamp_us) {
        Ok(ts) => ts,
        Err(e) => {
          drop(scheduler);
          let _ = shared.event_tx.send(WorkerMessage::Error(e));
          return false;
        }
      };
      audio.timestamp_us = Some(resolved);
      scheduler.advance_audio(audio.duration_us());
      drop(scheduler);
      command_tx.send(ControllerMessage::SubmitPlanarAudio { audio }).is_ok()
    }
  }
}
