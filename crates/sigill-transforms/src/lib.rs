#![forbid(unsafe_code)]

//! Transform pipeline engine for sigill.
//!
//! Implements the transform chain model from XML-DSig: each reference
//! names its input by URI (or, under 2.0, by a selection) and carries a
//! sequence of transforms applied strictly in order. Stages are built
//! from algorithm URIs through a static registry.

pub mod base64_transform;
pub mod enveloped;
pub mod pipeline;
pub mod selection;
pub mod stage;
pub mod uri;
pub mod xpath_filter;

pub use pipeline::{reference_pipeline, TransformContext, TransformData, TransformPipeline};
pub use selection::{Selection, SelectionKind};
pub use stage::{C14nParams, QNameAwareKind, TransformStage};
pub use uri::UriResolver;
pub use xpath_filter::{BoundXPath, Filter2Step, FilterOp};
