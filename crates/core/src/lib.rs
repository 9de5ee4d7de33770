//! # lidarnav
//!
//! Client core for a LiDAR segmentation and grid-navigation backend.
//!
//! Two subsystems:
//!
//! - streaming segmentation: raw response chunks are split into frames by
//!   [`decoder::FrameDecoder`], folded into progress and a class histogram by
//!   [`aggregate::ResultAggregator`], and driven end to end by
//!   [`session::StreamSession`];
//! - navigation episodes: [`episode::EpisodeController`] wraps reset/step calls
//!   to a remote [`episode::Environment`], and [`autorun::AutoRunScheduler`]
//!   steps it at a fixed cadence.
//!
//! ## Quick Start
//!
//! ```
//! use lidarnav::prelude::*;
//!
//! let body = "data: {\"total_batches\": 1}\n\n\
//!             data: {\"batch\": 1, \"preds\": [1, 1, 3]}\n\n\
//!             data: {\"done\": true, \"final\": [1, 1, 3]}\n\n";
//!
//! let mut agg = ResultAggregator::new();
//! for frame in lidarnav::decoder::decode_chunks(body.as_bytes().chunks(7)).unwrap() {
//!     if let Fold::Complete(result) = agg.apply(frame) {
//!         assert_eq!(result.histogram.count(1), 2);
//!         assert!(result.is_consistent());
//!     }
//! }
//! ```
//!
//! Against a live server, [`client::ApiClient`] provides both the stream source
//! and the environment:
//!
//! ```no_run
//! use lidarnav::prelude::*;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(&ClientConfig::default())?;
//! let upload = Upload::from_path("scene1.npz".as_ref()).await?;
//! let result = StreamSession::new()
//!     .run(client.segment_stream(upload), |u| println!("{}%", u.progress.percent()), |_| {})
//!     .await?;
//! println!("{} points", result.num_points());
//!
//! let controller = EpisodeController::new(client).into_shared();
//! controller.lock().await.reset_random(EpisodeTally::Keep).await?;
//! let mut auto = AutoRunScheduler::default();
//! auto.start(&controller).await?;
//! # Ok(())
//! # }
//! ```

#[path = "core/decoder.rs"]
pub mod decoder;

#[path = "core/aggregate.rs"]
pub mod aggregate;

#[path = "core/session.rs"]
pub mod session;

#[path = "core/episode.rs"]
pub mod episode;

#[path = "core/autorun.rs"]
pub mod autorun;

pub mod client;
pub mod config;
pub mod error;
pub mod paths;

#[cfg(test)]
mod testing;

pub use lidarnav_protocol as protocol;

/// Prelude module for convenient imports.
///
/// ```
/// use lidarnav::prelude::*;
/// ```
pub mod prelude {
    pub use crate::aggregate::{Fold, Histogram, ProgressState, ResultAggregator, SegmentationResult};
    pub use crate::autorun::{AutoRunExit, AutoRunScheduler, StopHandle};
    pub use crate::client::{ApiClient, Upload};
    pub use crate::config::ClientConfig;
    pub use crate::decoder::FrameDecoder;
    pub use crate::episode::{
        EpisodeController, EpisodePhase, EpisodeStats, EpisodeTally, Environment, ResetSource,
        SharedController, StepOutcome,
    };
    pub use crate::error::{DecodeError, EpisodeError, StreamError, TransportError};
    pub use crate::paths::AppPaths;
    pub use crate::session::{StreamSession, StreamSource, StreamUpdate};
    pub use lidarnav_protocol::{Action, ClassId, Frame, Grid, SemanticClass, StepResult};
}
