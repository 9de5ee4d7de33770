//! Folding decoded frames into progress and a class histogram.
//!
//! Per-point labels of completed batches are never retained; only their counts.
//! The label sequence held at the end is the authoritative one from `Final`.

use hashbrown::HashMap;
use lidarnav_protocol::classes::{ClassId, SemanticClass};
use lidarnav_protocol::frame::Frame;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressState {
    /// Batches observed so far, capped at `total` once a header was seen.
    pub current: u32,
    pub total: u32,
    /// Index carried by the most recent batch, as sent by the server.
    pub last_index: Option<u32>,
}

impl ProgressState {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.current) / f64::from(self.total)
        }
    }

    pub fn percent(&self) -> u32 {
        (self.fraction() * 100.0).round() as u32
    }
}

/// Running per-class counts.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    counts: HashMap<ClassId, u64>,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Histogram with an explicit zero entry for each of `ids`.
    pub fn with_classes(ids: impl IntoIterator<Item = ClassId>) -> Self {
        Self {
            counts: ids.into_iter().map(|id| (id, 0)).collect(),
        }
    }

    pub fn from_labels(labels: &[ClassId]) -> Self {
        let mut h = Self::new();
        h.extend(labels);
        h
    }

    pub fn record(&mut self, id: ClassId) {
        *self.counts.entry(id).or_insert(0) += 1;
    }

    pub fn extend(&mut self, labels: &[ClassId]) {
        for &id in labels {
            self.record(id);
        }
    }

    pub fn count(&self, id: ClassId) -> u64 {
        self.counts.get(&id).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn fraction(&self, id: ClassId) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.count(id) as f64 / total as f64,
        }
    }

    /// All entries (including explicit zeros), ascending by class id.
    pub fn sorted(&self) -> Vec<(ClassId, u64)> {
        let mut entries: Vec<(ClassId, u64)> = self.counts.iter().map(|(&k, &v)| (k, v)).collect();
        entries.sort_unstable_by_key(|&(id, _)| id);
        entries
    }

    pub fn nonzero(&self) -> Vec<(ClassId, u64)> {
        self.sorted().into_iter().filter(|&(_, n)| n > 0).collect()
    }

    /// Equal per-class counts, ignoring explicit zero entries.
    pub fn same_counts(&self, other: &Histogram) -> bool {
        self.nonzero() == other.nonzero()
    }

    pub fn unknown_count(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(&id, _)| SemanticClass::from_id(id).is_none())
            .map(|(_, &n)| n)
            .sum()
    }
}

/// Outcome of a completed stream.
#[derive(Debug, Clone)]
pub struct SegmentationResult {
    /// Authoritative per-point labels from `Final`.
    pub labels: Vec<ClassId>,
    /// Histogram recomputed from `labels`.
    pub histogram: Histogram,
    /// Histogram accumulated batch by batch while streaming.
    pub streamed: Histogram,
    pub progress: ProgressState,
}

impl SegmentationResult {
    pub fn num_points(&self) -> usize {
        self.labels.len()
    }

    pub fn is_consistent(&self) -> bool {
        self.histogram.same_counts(&self.streamed)
    }
}

#[derive(Debug)]
pub enum Fold {
    Progress(ProgressState),
    Complete(SegmentationResult),
    /// Frame arrived after completion; nothing changed.
    Ignored,
}

#[derive(Debug)]
pub struct ResultAggregator {
    progress: ProgressState,
    histogram: Histogram,
    header_seen: bool,
    batches: u32,
    complete: bool,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultAggregator {
    /// Aggregator seeded with the full class legend.
    pub fn new() -> Self {
        Self::with_classes(SemanticClass::known_ids())
    }

    pub fn with_classes(ids: impl IntoIterator<Item = ClassId>) -> Self {
        Self {
            progress: ProgressState::default(),
            histogram: Histogram::with_classes(ids),
            header_seen: false,
            batches: 0,
            complete: false,
        }
    }

    pub fn progress(&self) -> ProgressState {
        self.progress
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn apply(&mut self, frame: Frame) -> Fold {
        if self.complete {
            debug!("Ignoring {} frame after completion", frame.kind());
            return Fold::Ignored;
        }

        match frame {
            Frame::Header { total_batches } => {
                self.on_header(total_batches);
                Fold::Progress(self.progress)
            }
            Frame::Batch { index, labels } => {
                self.on_batch(index, &labels);
                Fold::Progress(self.progress)
            }
            Frame::Final { labels } => Fold::Complete(self.on_final(labels)),
        }
    }

    fn on_header(&mut self, total_batches: u32) {
        if self.header_seen {
            warn!(
                "Duplicate header ({} batches) ignored; keeping {}",
                total_batches, self.progress.total
            );
            return;
        }
        self.header_seen = true;
        self.progress.total = total_batches;
        if self.progress.current > total_batches {
            // Batches arrived before the header; keep progress monotonic.
            warn!(
                "Header announces {} batches but {} already received",
                total_batches, self.progress.current
            );
            self.progress.total = self.progress.current;
        }
    }

    fn on_batch(&mut self, index: u32, labels: &[ClassId]) {
        if let Some(last) = self.progress.last_index {
            if index <= last {
                // Tolerated: the server gives no ordering guarantee we rely on.
                warn!("Out-of-order or duplicate batch index {} after {}", index, last);
            }
        }

        self.histogram.extend(labels);
        self.batches = self.batches.saturating_add(1);
        self.progress.last_index = Some(index);

        let mut current = self.batches;
        if self.header_seen && current > self.progress.total {
            warn!(
                "Received {} batches, more than the {} announced",
                current, self.progress.total
            );
            current = self.progress.total;
        }
        self.progress.current = self.progress.current.max(current);
        debug!(
            "Batch {} folded: {} points, {}/{}",
            index,
            labels.len(),
            self.progress.current,
            self.progress.total
        );
    }

    fn on_final(&mut self, labels: Vec<ClassId>) -> SegmentationResult {
        self.complete = true;

        let mut histogram = Histogram::with_classes(SemanticClass::known_ids());
        histogram.extend(&labels);
        let streamed = std::mem::take(&mut self.histogram);
        let result = SegmentationResult {
            labels,
            histogram,
            streamed,
            progress: self.progress,
        };

        if !result.is_consistent() {
            warn!(
                "Final labels ({} points) disagree with streamed batches ({} points); using final",
                result.histogram.total(),
                result.streamed.total()
            );
        }
        result
    }
}
