use crate::CompletionError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures_util::Stream;
use std::fmt::Display;
use std::io::Read;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Flags byte + big-endian u32 length
pub const FRAME_HEADER_LEN: usize = 5;

/// Payload is gzip-compressed
pub const FLAG_COMPRESSED: u8 = 0x01;
/// Payload is the JSON end-of-stream trailer
pub const FLAG_END_STREAM: u8 = 0x02;

/// Frames larger than this are treated as a corrupt stream
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A length-prefixed unit carrying one serialized protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flags: u8,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            flags,
            payload: payload.into(),
        }
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & FLAG_END_STREAM != 0
    }

    /// Serialize as header + payload
    pub fn encode(&self) -> Bytes {
        encode_frame(self.flags, &self.payload)
    }

    /// Payload with compression removed.
    ///
    /// Inflated output is held to [`MAX_FRAME_LEN`] like any other frame.
    pub fn decoded_payload(&self) -> Result<Bytes, CompletionError> {
        if !self.is_compressed() {
            return Ok(self.payload.clone());
        }
        let mut decoder =
            flate2::read::GzDecoder::new(self.payload.as_ref()).take(MAX_FRAME_LEN as u64 + 1);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).map_err(|e| {
            CompletionError::InvalidResponse(format!("Failed to decompress frame: {e}"))
        })?;
        if out.len() > MAX_FRAME_LEN {
            return Err(CompletionError::InvalidResponse(format!(
                "Decompressed frame exceeds {MAX_FRAME_LEN} bytes"
            )));
        }
        Ok(Bytes::from(out))
    }
}

/// Prefix `payload` with the 5-byte frame header
pub fn encode_frame(flags: u8, payload: &[u8]) -> Bytes {
    let mut buffer = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buffer.put_u8(flags);
    buffer.put_u32(payload.len() as u32);
    buffer.put_slice(payload);
    buffer.freeze()
}

/// Incremental frame splitter.
///
/// Bytes are pushed as they arrive; complete frames are popped strictly on the
/// header boundary. Partial frames stay buffered until their tail arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of buffered bytes that do not yet form a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, CompletionError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let flags = self.buffer[0];
        let length = u32::from_be_bytes([
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
            self.buffer[4],
        ]) as usize;

        if length > MAX_FRAME_LEN {
            return Err(CompletionError::TransportError(format!(
                "Frame length {length} exceeds limit of {MAX_FRAME_LEN} bytes"
            )));
        }
        if self.buffer.len() < FRAME_HEADER_LEN + length {
            return Ok(None);
        }

        self.buffer.advance(FRAME_HEADER_LEN);
        let payload = self.buffer.split_to(length).freeze();
        Ok(Some(Frame { flags, payload }))
    }
}

/// Frame stream parser over a chunked byte stream (e.g. an HTTP body)
pub struct FrameParser<S> {
    inner: S,
    decoder: FrameDecoder,
    finished: bool,
}

impl<S, E> FrameParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self {
            inner: stream,
            decoder: FrameDecoder::new(),
            finished: false,
        }
    }
}

impl<S, E> Stream for FrameParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    type Item = Result<Frame, CompletionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if self.finished {
                return Poll::Ready(None);
            }

            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Poll::Ready(Some(Ok(frame))),
                Ok(None) => {}
                Err(e) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => self.decoder.push(&bytes),
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(CompletionError::TransportError(
                        e.to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    let leftover = self.decoder.buffered();
                    if leftover > 0 {
                        return Poll::Ready(Some(Err(CompletionError::TransportError(
                            format!("Stream ended inside a frame ({leftover} bytes buffered)"),
                        ))));
                    }
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
