//! Encoding pipeline core (spec.md §1-§9)
//!
//! A `PipelineConfig` goes in, `EncodingPipeline` negotiates codecs, drains a
//! caller-fed stream of video frames/audio blocks through a dedicated worker
//! thread, and muxes the result into either one finalized buffer (quality
//! mode) or a sequence of streamed fragments (realtime mode). See each
//! submodule's header comment for the spec section it implements.

pub mod codec_manager;
pub mod config;
pub mod controller;
pub mod error;
pub mod frame;
pub mod message;
pub mod muxer_driver;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod worker;

pub use config::{CodecFamily, CodecPreference, FirstTimestampBehavior, PipelineConfig, PipelineContainer, PipelineLatencyMode};
pub use controller::{
  EncodingPipeline, PipelineCancelledEvent, PipelineDataChunkEvent, PipelineErrorEvent, PipelineFinalizedEvent,
  PipelineInitializedEvent, PipelineProgressEvent, PipelineQueueSizeEvent, PipelineSupport,
};
pub use error::{PipelineError, PipelineErrorKind};
