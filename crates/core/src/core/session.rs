//! One streaming segmentation request, end to end.

use std::future::Future;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use lidarnav_protocol::classes::ClassId;
use lidarnav_protocol::frame::Frame;
use tracing::{debug, info};

use crate::aggregate::{Fold, Histogram, ProgressState, ResultAggregator, SegmentationResult};
use crate::decoder::{frames_with, FrameDecoder};
use crate::error::{StreamError, TransportError};

/// Something that opens a chunked response body.
///
/// Opening may fail (connection refused, bad status, no body); chunks of an
/// opened body may fail too. Both surface as [`TransportError`].
pub trait StreamSource {
    type Body: Stream<Item = Result<Bytes, TransportError>> + Unpin;

    fn open(self) -> impl Future<Output = Result<Self::Body, TransportError>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchInfo {
    pub index: u32,
    pub len: usize,
}

/// Passed to the update callback after every `Header` and `Batch` frame.
#[derive(Debug, Clone, Copy)]
pub struct StreamUpdate<'a> {
    pub progress: ProgressState,
    /// Set when the update was caused by a batch.
    pub batch: Option<BatchInfo>,
    /// Snapshot of the running histogram.
    pub histogram: &'a Histogram,
}

#[derive(Debug, Default)]
pub struct StreamSession {
    decoder: FrameDecoder,
    aggregator: ResultAggregator,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_aggregator(aggregator: ResultAggregator) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            aggregator,
        }
    }

    /// Drives `source` to completion.
    ///
    /// `on_update` runs synchronously for each progress frame, in arrival order.
    /// `on_complete` runs once with the final labels, just before the session
    /// resolves with `Ok`. Consuming `self` makes a second settlement impossible.
    ///
    /// Updates already delivered stay valid when the session later fails.
    pub async fn run<S, U, C>(
        self,
        source: S,
        mut on_update: U,
        on_complete: C,
    ) -> Result<SegmentationResult, StreamError>
    where
        S: StreamSource,
        U: FnMut(StreamUpdate<'_>),
        C: FnOnce(&[ClassId]),
    {
        let Self {
            decoder,
            mut aggregator,
        } = self;

        let body = source.open().await?;
        let mut frames = frames_with(body, decoder);

        while let Some(frame) = frames.next().await {
            let frame = frame?;
            let batch = match &frame {
                Frame::Batch { index, labels } => Some(BatchInfo {
                    index: *index,
                    len: labels.len(),
                }),
                _ => None,
            };

            match aggregator.apply(frame) {
                Fold::Progress(progress) => on_update(StreamUpdate {
                    progress,
                    batch,
                    histogram: aggregator.histogram(),
                }),
                Fold::Complete(result) => {
                    on_complete(&result.labels);
                    info!(
                        "Segmentation finished: {} points in {} batches",
                        result.num_points(),
                        result.progress.current
                    );
                    return Ok(result);
                }
                Fold::Ignored => debug!("Late frame after completion"),
            }
        }

        Err(TransportError::Truncated.into())
    }
}
