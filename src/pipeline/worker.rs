//! Message Loop + worker thread (spec §4.5)
//!
//! The worker runs on one dedicated OS thread driving its own current-thread
//! `tokio` runtime (spec §5), entirely separate from the controller's NAPI-
//! embedded reactor. It owns the `CodecManager` and `MuxerDriver` — the two
//! platform-handle-owning components — and processes `ControllerMessage`s
//! strictly in arrival order off a `tokio::sync::mpsc` channel, the
//! "single-threaded cooperative dispatcher" spec §4.5 describes.
//!
//! `WorkerMessage`s flow back over a `crossbeam_channel`, not a `tokio`
//! channel: the controller-side dispatcher (`pipeline::controller`) reads it
//! from a plain blocking OS thread, not from within a tokio task, so a
//! synchronous MPSC fits better than an async one there.

use crate::pipeline::codec_manager::CodecManager;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::error::{PipelineError, PipelineErrorKind};
use crate::pipeline::frame::{AudioBlockHandle, PlanarAudioData, VideoFrameHandle};
use crate::pipeline::message::{ControllerMessage, WorkerMessage};
use crate::pipeline::muxer_driver::{FinalizedOutput, MuxerDriver};
use crate::pipeline::state::PipelineState;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle to a spawned worker. Dropping this (after dropping the last clone
/// of `command_tx`, which happens when the handle itself drops) closes the
/// channel, which unblocks the worker's `recv().await` with `None` and lets
/// its thread exit even if no `finalize`/`cancel` was ever sent.
pub struct WorkerHandle {
  command_tx: mpsc::UnboundedSender<ControllerMessage>,
  join: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
  pub fn send(&self, message: ControllerMessage) -> Result<(), PipelineError> {
    self
      .command_tx
      .send(message)
      .map_err(|_| PipelineError::new(PipelineErrorKind::InvalidState, "pipeline worker has already shut down"))
  }

  /// A cheap-clone sender, for a source-pump thread (`pipeline::controller`)
  /// that needs to submit messages from outside the `EncodingPipeline`
  /// methods proper while the Source Adapter drives it (spec §4.1/§4.2).
  pub fn sender(&self) -> mpsc::UnboundedSender<ControllerMessage> {
    self.command_tx.clone()
  }
}

impl Drop for WorkerHandle {
  fn drop(&mut self) {
    if let Some(join) = self.join.take() {
      let _ = join.join();
    }
  }
}

/// Spawn the worker thread. `event_tx` is the crossbeam sender the worker
/// uses to report back to the controller; the receiving end is owned by the
/// controller's dispatcher thread (`pipeline::controller`).
pub fn spawn(event_tx: crossbeam::channel::Sender<WorkerMessage>) -> WorkerHandle {
  let (command_tx, command_rx) = mpsc::unbounded_channel();
  let join = std::thread::Builder::new()
    .name("encoding-pipeline-worker".into())
    .spawn(move || {
      let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
          let _ = event_tx.send(WorkerMessage::Error(PipelineError::with_cause(
            PipelineErrorKind::InitializationFailed,
            "failed to start pipeline worker runtime",
            e,
          )));
          return;
        }
      };
      runtime.block_on(Worker::new(event_tx).run(command_rx));
    })
    .expect("failed to spawn encoding pipeline worker thread");
  WorkerHandle {
    command_tx,
    join: Some(join),
  }
}

struct Worker {
  event_tx: crossbeam::channel::Sender<WorkerMessage>,
  state: PipelineState,
  codec_manager: CodecManager,
  muxer: Option<MuxerDriver>,
  config: Option<PipelineConfig>,
}

impl Worker {
  fn new(event_tx: crossbeam::channel::Sender<WorkerMessage>) -> Self {
    Self {
      event_tx,
      state: PipelineState::Idle,
      codec_manager: CodecManager::new(),
      muxer: None,
      config: None,
    }
  }

  /// Drains the channel until the sender half drops or a terminal message is
  /// produced. Buffered `ControllerMessage`s still in `command_rx` when this
  /// function returns are dropped along with it, which is exactly the release
  /// path spec invariant #4 needs for frames queued behind a `cancel`.
  async fn run(mut self, mut command_rx: mpsc::UnboundedReceiver<ControllerMessage>) {
    while let Some(message) = command_rx.recv().await {
      match message {
        ControllerMessage::Initialize { config } => {
          if !self.transition(PipelineState::Initializing) {
            continue;
          }
          if self.handle_initialize(config).is_err() {
            return;
          }
        }
        ControllerMessage::SubmitVideoFrame { frame } => {
          if self.handle_submit_video(frame).is_err() {
            return;
          }
        }
        ControllerMessage::SubmitAudioBlock { block } => {
          if self.handle_submit_audio(block).is_err() {
            return;
          }
        }
        ControllerMessage::SubmitPlanarAudio { audio } => {
          if self.handle_submit_planar_audio(audio).is_err() {
            return;
          }
        }
        ControllerMessage::Finalize => {
          self.handle_finalize();
          return;
        }
        ControllerMessage::Cancel => {
          self.handle_cancel();
          return;
        }
      }
    }
  }

  /// Apply a state transition, logging and swallowing invalid ones rather
  /// than terminating the pipeline over a stray out-of-order message (spec
  /// §4.5 "unknown commands ... never fatal" generalizes to out-of-precondition
  /// ones too, since the controller is the only client and already guards
  /// preconditions before sending).
  fn transition(&mut self, to: PipelineState) -> bool {
    match self.state.validate_transition(to) {
      Ok(()) => {
        self.state = to;
        true
      }
      Err(_) => false,
    }
  }

  fn handle_initialize(&mut self, config: PipelineConfig) -> Result<(), ()> {
    if let Err(e) = config.validate() {
      self.fail(e);
      return Err(());
    }
    let (actual_video, actual_audio) = match self.codec_manager.initialize(&config) {
      Ok(result) => result,
      Err(e) => {
        self.fail(e);
        return Err(());
      }
    };
    let mut driver = match MuxerDriver::new(config.container, config.latency_mode) {
      Ok(driver) => driver,
      Err(e) => {
        self.fail(e);
        return Err(());
      }
    };
    if config.video_enabled() {
      let family = self.codec_manager.negotiated_video_family().expect("video negotiated above");
      if let Err(e) = driver.add_video_track(family, config.width, config.height, None) {
        self.fail(e);
        return Err(());
      }
    }
    if config.audio_enabled() {
      let family = self.codec_manager.negotiated_audio_family().expect("audio negotiated above");
      let frame_size = self.codec_manager.audio_frame_size();
      if let Err(e) = driver.add_audio_track(
        family,
        config.sample_rate.unwrap_or(48_000),
        config.channels.unwrap_or(2),
        frame_size,
        None,
      ) {
        self.fail(e);
        return Err(());
      }
    }
    self.muxer = Some(driver);
    self.config = Some(config);
    self.transition(PipelineState::Ready);
    let _ = self.event_tx.send(WorkerMessage::Initialized {
      actual_video_codec: actual_video,
      actual_audio_codec: actual_audio,
    });
    Ok(())
  }

  fn handle_submit_video(&mut self, frame: Arc<VideoFrameHandle>) -> Result<(), ()> {
    if !matches!(self.state, PipelineState::Ready | PipelineState::Running) {
      return Ok(()); // dropped: frame releases when `frame` goes out of scope
    }
    self.transition(PipelineState::Running);
    let timestamp_us = frame.explicit_timestamp_us.unwrap_or(0);
    let chunks = match self.codec_manager.encode_video(&frame, timestamp_us) {
      Ok(chunks) => chunks,
      Err(e) => {
        self.fail(e);
        return Err(());
      }
    };
    for (chunk, metadata) in &chunks {
      if let Some(driver) = self.muxer.as_mut() {
        match driver.write_video_chunk(chunk, metadata) {
          Ok(fragments) => self.emit_fragments(fragments),
          Err(e) => {
            self.fail(e);
            return Err(());
          }
        }
      }
    }
    let _ = self.event_tx.send(WorkerMessage::QueueSize(self.codec_manager.queue_depth()));
    Ok(())
  }

  fn handle_submit_audio(&mut self, block: Arc<AudioBlockHandle>) -> Result<(), ()> {
    if !matches!(self.state, PipelineState::Ready | PipelineState::Running) {
      return Ok(());
    }
    self.transition(PipelineState::Running);
    let chunks = match self.codec_manager.encode_audio_block(&block) {
      Ok(chunks) => chunks,
      Err(e) => {
        self.fail(e);
        return Err(());
      }
    };
    self.mux_audio_chunks(chunks)
  }

  fn handle_submit_planar_audio(&mut self, audio: PlanarAudioData) -> Result<(), ()> {
    if !matches!(self.state, PipelineState::Ready | PipelineState::Running) {
      return Ok(());
    }
    self.transition(PipelineState::Running);
    let chunks = match self.codec_manager.encode_planar_audio(&audio) {
      Ok(chunks) => chunks,
      Err(e) => {
        self.fail(e);
        return Err(());
      }
    };
    self.mux_audio_chunks(chunks)
  }

  fn mux_audio_chunks(
    &mut self,
    chunks: Vec<(crate::pipeline::codec_manager::EncodedChunk, crate::pipeline::codec_manager::ChunkMetadata)>,
  ) -> Result<(), ()> {
    for (chunk, metadata) in &chunks {
      if let Some(driver) = self.muxer.as_mut() {
        match driver.write_audio_chunk(chunk, metadata) {
          Ok(fragments) => self.emit_fragments(fragments),
          Err(e) => {
            self.fail(e);
            return Err(());
          }
        }
      }
    }
    let _ = self.event_tx.send(WorkerMessage::QueueSize(self.codec_manager.queue_depth()));
    Ok(())
  }

  fn handle_finalize(&mut self) {
    if !matches!(self.state, PipelineState::Ready | PipelineState::Running) {
      self.fail(PipelineError::new(
        PipelineErrorKind::InvalidState,
        "finalize called before the pipeline is running",
      ));
      return;
    }
    self.transition(PipelineState::Finalizing);

    let (video_chunks, audio_chunks) = match self.codec_manager.flush() {
      Ok(chunks) => chunks,
      Err(e) => {
        self.fail(e);
        return;
      }
    };
    self.codec_manager.close();

    let Some(mut driver) = self.muxer.take() else {
      self.fail(PipelineError::new(PipelineErrorKind::InternalError, "finalize with no muxer configured"));
      return;
    };
    for (chunk, metadata) in &video_chunks {
      if let Err(e) = driver.write_video_chunk(chunk, metadata).map(|f| self.emit_fragments(f)) {
        self.fail(e);
        return;
      }
    }
    for (chunk, metadata) in &audio_chunks {
      if let Err(e) = driver.write_audio_chunk(chunk, metadata).map(|f| self.emit_fragments(f)) {
        self.fail(e);
        return;
      }
    }
    if let Err(e) = driver.flush().map(|f| self.emit_fragments(f)) {
      self.fail(e);
      return;
    }

    match driver.finalize() {
      Ok((output, fragments)) => {
        self.emit_fragments(fragments);
        self.transition(PipelineState::Terminated);
        let buffer = match output {
          FinalizedOutput::Buffer(bytes) => Some(bytes),
          FinalizedOutput::AlreadyStreamed => None,
        };
        let _ = self.event_tx.send(WorkerMessage::Finalized(buffer));
      }
      Err(e) => self.fail(e),
    }
  }

  fn handle_cancel(&mut self) {
    self.transition(PipelineState::Cancelled);
    self.codec_manager.close();
    if let Some(mut driver) = self.muxer.take() {
      driver.abort();
    }
    let _ = self.event_tx.send(WorkerMessage::Cancelled);
  }

  fn emit_fragments(&self, fragments: Vec<crate::pipeline::message::StreamingChunk>) {
    for fragment in fragments {
      let _ = self.event_tx.send(WorkerMessage::StreamingChunk(fragment));
    }
  }

  /// Surface an error as the terminal `error` message (spec §6/§7) and let
  /// the run loop exit.
  fn fail(&mut self, error: PipelineError) {
    tracing::warn!(target: "webcodecs", kind = error.kind.as_str(), message = %error.message, "pipeline worker terminating with error");
    self.codec_manager.close();
    if let Some(mut driver) = self.muxer.take() {
      driver.abort();
    }
    let _ = self.event_tx.send(WorkerMessage::Error(error));
  }
}
