//! Wire types shared by every lidarnav client.
//!
//! - [`frame`]: frames of the streaming segmentation endpoint and their classification
//! - [`classes`]: the semantic class legend used for per-point labels
//! - [`env`]: navigation environment payloads (grids, actions, step results)
//! - [`api`]: request/response bodies of the plain JSON endpoints

pub mod api;
pub mod classes;
pub mod env;
pub mod frame;

pub use classes::{ClassId, SemanticClass};
pub use env::{Action, Direction, Grid, StepResult};
pub use frame::{Frame, Payload};
