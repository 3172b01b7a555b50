//! Client stream production: ordering, pacing, session control.

pub mod controller;
pub mod pacer;
pub mod registry;
pub mod reorderer;

pub use controller::{ChatStream, ChatStreamController, ControllerSettings, ResumeRequest, StartRequest};
pub use pacer::Pacer;
pub use registry::{Registration, StreamRegistry};
pub use reorderer::{ReorderState, StreamReorderer};
