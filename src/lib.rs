#![forbid(unsafe_code)]

pub mod address;
pub mod codec;
pub mod composite;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod server;

pub use address::{LayerAddress, TextEdit, TextLayerEntry, apply_edit, enumerate, resolve};
pub use composite::{Compositor, CpuCompositor, PreviewArtifact};
pub use error::{OvertypeError, OvertypeResult};
pub use model::{Canvas, Document, Layer, LayerKind, PixelData};
pub use pipeline::{
    InspectOutcome, MutateOutcome, PREVIEW_MAX_SIDE, document_digest, inspect, mutate, reserialize,
};
pub use server::{ServerConfig, ServerHandle};
