//! Frame decoding for the streaming segmentation endpoint.
//!
//! [`FrameDecoder`] is a `tokio_util` codec: it accumulates raw chunks, splits on
//! the `\n\n` delimiter, keeps the trailing partial segment buffered, and yields
//! one [`Frame`] per complete `data:` segment. Chunk boundaries never matter;
//! delimiters straddling two chunks are found because the search resumes just
//! before the previously scanned end.

use std::io;

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, TryStreamExt};
use lidarnav_protocol::frame::{self, Frame, Payload};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use crate::error::{DecodeError, StreamError, TransportError};

const DELIMITER: &[u8] = b"\n\n";
const DATA_PREFIX: &str = "data:";

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Set once `Final` (or an in-band error) was seen. Sticky.
    finished: bool,
    /// Buffer prefix already known to hold no delimiter.
    scanned: usize,
    discarded: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Segments dropped because they lacked the `data:` prefix or matched no frame shape.
    pub fn discarded_segments(&self) -> u64 {
        self.discarded
    }

    fn next_segment(&mut self, src: &mut BytesMut) -> Option<BytesMut> {
        let start = self.scanned.saturating_sub(DELIMITER.len() - 1);
        let found = src[start..]
            .windows(DELIMITER.len())
            .position(|w| w == DELIMITER);

        match found {
            Some(offset) => {
                let segment = src.split_to(start + offset);
                src.advance(DELIMITER.len());
                self.scanned = 0;
                Some(segment)
            }
            None => {
                self.scanned = src.len();
                None
            }
        }
    }

    fn decode_segment(&mut self, segment: &[u8]) -> Result<Option<Frame>, StreamError> {
        let text = String::from_utf8_lossy(segment);
        let Some(body) = text.strip_prefix(DATA_PREFIX) else {
            self.discarded += 1;
            debug!("Discarding {}-byte segment without data prefix", segment.len());
            return Ok(None);
        };

        let body = body.trim();
        match frame::parse_payload(body).map_err(|e| DecodeError::new(body, e))? {
            Payload::Frame(frame) => {
                if frame.is_final() {
                    self.finished = true;
                }
                debug!("Decoded {} frame", frame.kind());
                Ok(Some(frame))
            }
            Payload::Error(message) => {
                self.finished = true;
                Err(TransportError::Remote(message).into())
            }
            Payload::Unrecognized => {
                self.discarded += 1;
                debug!("Ignoring payload with no known frame shape");
                Ok(None)
            }
        }
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StreamError> {
        loop {
            if self.finished {
                if !src.is_empty() {
                    debug!("Dropping {} bytes after end of stream", src.len());
                    src.clear();
                }
                return Ok(None);
            }
            let Some(segment) = self.next_segment(src) else {
                return Ok(None);
            };
            if let Some(frame) = self.decode_segment(&segment)? {
                return Ok(Some(frame));
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, StreamError> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            warn!("Discarding incomplete trailing segment ({} bytes)", src.len());
            src.clear();
        }
        self.scanned = 0;
        Ok(None)
    }
}

/// Lazily decodes a chunked body into frames, driving `decoder`.
pub fn frames_with<S>(body: S, decoder: FrameDecoder) -> impl Stream<Item = Result<Frame, StreamError>> + Unpin
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    let reader = StreamReader::new(body.map_err(io::Error::other));
    FramedRead::new(reader, decoder)
}

pub fn frames<S>(body: S) -> impl Stream<Item = Result<Frame, StreamError>> + Unpin
where
    S: Stream<Item = Result<Bytes, TransportError>> + Unpin,
{
    frames_with(body, FrameDecoder::new())
}

/// Decodes an in-memory sequence of chunks, treating its end as end-of-body.
pub fn decode_chunks<I, B>(chunks: I) -> Result<Vec<Frame>, StreamError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::new();
    let mut out = Vec::new();

    for chunk in chunks {
        buf.extend_from_slice(chunk.as_ref());
        while let Some(frame) = decoder.decode(&mut buf)? {
            out.push(frame);
        }
    }
    while let Some(frame) = decoder.decode_eof(&mut buf)? {
        out.push(frame);
    }
    Ok(out)
}
