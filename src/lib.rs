#![deny(clippy::all)]

//! Asynchronous encoding pipeline core for a browser-style media encoder.
//!
//! Converts an ordered stream of raw video frames and audio samples into a
//! fragmented MP4 or WebM byte stream, via a controller/worker pipeline that
//! negotiates codecs, paces input, and drives a dual-path (batch/realtime)
//! muxer. `FFmpeg`, reached only through the `codec`/`ffi` wrapper layers
//! below, is the concrete backing behind the opaque codec/muxer primitives
//! spec'd for this core; `VideoFrame`/`AudioData` are the two WebCodecs
//! types the pipeline exchanges ownership of across the controller/worker
//! boundary.

// FFmpeg C bindings (hand-written, no bindgen)
pub mod ffi;

// Safe codec wrappers (RAII)
pub mod codec;

// WebCodecs frame/audio-block types the pipeline core owns and transfers;
// kept internal since the rest of the WebCodecs NAPI surface (encoders,
// decoders, muxers) is not part of this crate's public contract.
mod webcodecs;

// Asynchronous encoding pipeline core (controller/worker, scheduler, muxer
// driver) built on top of the WebCodecs primitives above.
pub mod pipeline;

// Re-export the pipeline's NAPI-facing surface at crate root
pub use pipeline::{
    CodecFamily, CodecPreference, EncodingPipeline, FirstTimestampBehavior, PipelineCancelledEvent, PipelineConfig,
    PipelineContainer, PipelineDataChunkEvent, PipelineErrorEvent, PipelineFinalizedEvent, PipelineInitializedEvent,
    PipelineLatencyMode, PipelineProgressEvent, PipelineQueueSizeEvent, PipelineSupport,
};

// Re-export the WebCodecs types the pipeline's public methods take/return.
pub use webcodecs::{AudioData, VideoFrame};
