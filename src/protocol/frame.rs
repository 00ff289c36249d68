//! Frame encoding and decoding for the XBee API protocol.
//!
//! The wire format is:
//! ```text
//! ┌──────────┬──────────────┬────────────┬──────────────┬──────────┐
//! │   0x7E   │ length (BE)  │ frame type │   payload    │ checksum │
//! │  1 byte  │   2 bytes    │   1 byte   │ length-1 b.  │  1 byte  │
//! └──────────┴──────────────┴────────────┴──────────────┴──────────┘
//! ```
//!
//! The length counts the frame type and payload. The checksum is
//! `0xFF - (sum of frame type and payload bytes)`.
//!
//! In escaped API mode (`AP=2`) every byte after the delimiter that equals
//! one of [`START_DELIMITER`], [`ESCAPE`], [`XON`] or [`XOFF`] is sent as
//! [`ESCAPE`] followed by the byte XOR [`ESCAPE_XOR`]. The length is always
//! computed on the unescaped content.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::FrameError;
use crate::protocol::ApiFrameType;

/// Frame start delimiter.
pub const START_DELIMITER: u8 = 0x7E;

/// Escape byte used in escaped API mode.
pub const ESCAPE: u8 = 0x7D;

/// Software flow control resume byte.
pub const XON: u8 = 0x11;

/// Software flow control pause byte.
pub const XOFF: u8 = 0x13;

/// Value XOR'd into an escaped byte.
pub const ESCAPE_XOR: u8 = 0x20;

/// Maximum content length (frame type plus payload).
pub const MAX_FRAME_LENGTH: usize = 0xFFFF;

/// Default largest content length accepted by [`FrameDecoder`].
///
/// Comfortably above the largest frame any module emits (IPv4 receive frames
/// on Wi-Fi and Cellular modules), far below what the length field allows.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 2048;

/// Smallest possible raw frame: delimiter, length, type, checksum.
pub const MIN_FRAME_SIZE: usize = 5;

/// Returns true if the byte must be escaped in escaped API mode.
#[must_use]
pub const fn needs_escape(byte: u8) -> bool {
    matches!(byte, START_DELIMITER | ESCAPE | XON | XOFF)
}

/// Computes the checksum over frame content (type and payload).
#[must_use]
pub fn checksum(content: &[u8]) -> u8 {
    0xFF - content.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// An API frame: a frame type plus its type-specific payload.
///
/// Frames are immutable values; [`ApiFrame::with_frame_id`] returns a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFrame {
    frame_type: u8,
    data: Bytes,
}

impl ApiFrame {
    /// Creates a frame from a type byte and payload.
    #[must_use]
    pub fn new(frame_type: impl Into<u8>, data: impl Into<Bytes>) -> Self {
        Self {
            frame_type: frame_type.into(),
            data: data.into(),
        }
    }

    /// Returns the raw frame type byte.
    #[must_use]
    pub const fn frame_type(&self) -> u8 {
        self.frame_type
    }

    /// Returns the known frame type, if any.
    #[must_use]
    pub const fn kind(&self) -> Option<ApiFrameType> {
        ApiFrameType::from_byte(self.frame_type)
    }

    /// Returns the payload following the frame type.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the frame ID for frame types that carry one.
    #[must_use]
    pub fn frame_id(&self) -> Option<u8> {
        match self.kind() {
            Some(kind) if kind.has_frame_id() => self.data.first().copied(),
            _ => None,
        }
    }

    /// Returns a copy of this frame with its frame ID replaced.
    ///
    /// Frames whose type carries no frame ID are returned unchanged.
    #[must_use]
    pub fn with_frame_id(self, frame_id: u8) -> Self {
        if self.frame_id().is_none() {
            return self;
        }
        let mut data = BytesMut::from(&self.data[..]);
        data[0] = frame_id;
        Self {
            frame_type: self.frame_type,
            data: data.freeze(),
        }
    }

    /// Returns the frame content length (type plus payload).
    #[must_use]
    pub fn len(&self) -> usize {
        1 + self.data.len()
    }

    /// Always false; a frame has at least its type byte.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Computes this frame's checksum.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        0xFF - self
            .data
            .iter()
            .fold(self.frame_type, |sum, &b| sum.wrapping_add(b))
    }

    /// Encodes the frame for the wire.
    pub fn encode(&self, escaped: bool) -> Result<Bytes, FrameError> {
        encode(self.frame_type, &self.data, escaped)
    }
}

/// Encodes a frame type and payload into wire bytes.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the content does not fit the 16-bit
/// length field.
pub fn encode(frame_type: u8, payload: &[u8], escaped: bool) -> Result<Bytes, FrameError> {
    let length = 1 + payload.len();
    let length = u16::try_from(length).map_err(|_| FrameError::TooLarge {
        size: length,
        max: MAX_FRAME_LENGTH,
    })?;

    let mut content = BytesMut::with_capacity(4 + payload.len());
    content.put_u16(length);
    content.put_u8(frame_type);
    content.put_slice(payload);
    let sum = checksum(&content[2..]);
    content.put_u8(sum);

    let mut buf = BytesMut::with_capacity(1 + content.len() * 2);
    buf.put_u8(START_DELIMITER);
    if escaped {
        for &byte in &content {
            if needs_escape(byte) {
                buf.put_u8(ESCAPE);
                buf.put_u8(byte ^ ESCAPE_XOR);
            } else {
                buf.put_u8(byte);
            }
        }
    } else {
        buf.put_slice(&content);
    }
    Ok(buf.freeze())
}

/// Removes escape sequences from escaped bytes.
///
/// # Errors
///
/// Returns [`FrameError::DanglingEscape`] if the input ends with an escape.
fn unescape(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESCAPE {
            let next = bytes.next().ok_or(FrameError::DanglingEscape)?;
            out.push(next ^ ESCAPE_XOR);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

/// Decodes one complete raw frame, delimiter included.
///
/// # Errors
///
/// Returns a `FrameError` if the delimiter is missing, the declared length
/// does not match the content, or the checksum does not verify.
pub fn decode(raw: &[u8], escaped: bool) -> Result<ApiFrame, FrameError> {
    let (&first, rest) = raw.split_first().ok_or(FrameError::TooShort(0))?;
    if first != START_DELIMITER {
        return Err(FrameError::InvalidDelimiter(first));
    }

    let content = if escaped {
        unescape(rest)?
    } else {
        rest.to_vec()
    };
    if content.len() + 1 < MIN_FRAME_SIZE {
        return Err(FrameError::TooShort(content.len() + 1));
    }

    let mut cursor = &content[..];
    let declared = usize::from(cursor.get_u16());
    if declared == 0 {
        return Err(FrameError::EmptyFrame);
    }
    // Remaining bytes are type + payload + checksum.
    let actual = cursor.len() - 1;
    if actual != declared {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    let (body, trailer) = cursor.split_at(declared);
    let expected = checksum(body);
    if trailer[0] != expected {
        return Err(FrameError::Checksum {
            expected,
            actual: trailer[0],
        });
    }

    Ok(ApiFrame::new(body[0], Bytes::copy_from_slice(&body[1..])))
}

/// Parser state, reported by [`FrameDecoder::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParserState {
    /// Discarding bytes until a start delimiter.
    #[default]
    SearchingDelimiter,
    /// Waiting for the high length byte.
    ReadingLengthHi,
    /// Waiting for the low length byte.
    ReadingLengthLo,
    /// Collecting frame type and payload.
    ReadingPayload,
    /// Waiting for the checksum byte.
    ReadingChecksum,
    /// The last call produced a frame.
    FrameComplete,
}

/// Outcome of scanning buffered bytes that start with a delimiter.
enum Scan {
    Complete { frame: ApiFrame, consumed: usize },
    Incomplete(ParserState),
    Malformed { error: FrameError, skip: usize },
}

/// Parses one frame from `buf`, which must start with [`START_DELIMITER`].
fn scan(buf: &[u8], escaped: bool, max_length: usize) -> Scan {
    let mut state = ParserState::ReadingLengthHi;
    let mut length = 0usize;
    let mut content: Vec<u8> = Vec::new();
    let mut escape_next = false;

    for (idx, &raw) in buf.iter().enumerate().skip(1) {
        let mut byte = raw;
        if escaped {
            if byte == START_DELIMITER {
                // A fresh frame begins here; the current one was cut short.
                return Scan::Malformed {
                    error: FrameError::UnexpectedDelimiter,
                    skip: idx,
                };
            }
            if escape_next {
                byte ^= ESCAPE_XOR;
                escape_next = false;
            } else if byte == ESCAPE {
                escape_next = true;
                continue;
            }
        }

        match state {
            ParserState::ReadingLengthHi => {
                length = usize::from(byte) << 8;
                state = ParserState::ReadingLengthLo;
            }
            ParserState::ReadingLengthLo => {
                length |= usize::from(byte);
                if length == 0 {
                    return Scan::Malformed {
                        error: FrameError::EmptyFrame,
                        skip: 1,
                    };
                }
                if length > max_length {
                    return Scan::Malformed {
                        error: FrameError::TooLarge {
                            size: length,
                            max: max_length,
                        },
                        skip: 1,
                    };
                }
                content.reserve(length);
                state = ParserState::ReadingPayload;
            }
            ParserState::ReadingPayload => {
                content.push(byte);
                if content.len() == length {
                    state = ParserState::ReadingChecksum;
                }
            }
            ParserState::ReadingChecksum => {
                let expected = checksum(&content);
                if byte != expected {
                    return Scan::Malformed {
                        error: FrameError::Checksum {
                            expected,
                            actual: byte,
                        },
                        skip: 1,
                    };
                }
                let frame_type = content[0];
                let data = Bytes::from(content).slice(1..);
                return Scan::Complete {
                    frame: ApiFrame::new(frame_type, data),
                    consumed: idx + 1,
                };
            }
            ParserState::SearchingDelimiter | ParserState::FrameComplete => break,
        }
    }

    Scan::Incomplete(state)
}

/// Stream reassembler that turns arbitrary read chunks into frames.
///
/// Bytes stay buffered until a frame is complete. A frame that fails
/// verification is dropped by skipping only its start delimiter, so a valid
/// frame hidden behind it is still found on the next scan. A frame whose
/// declared length exceeds the configured maximum is dropped the same way.
///
/// An incomplete frame is abandoned as soon as a later start delimiter in
/// the buffer begins a complete frame with a valid checksum. A corrupted
/// length therefore never holds back the frames that follow it.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    escaped: bool,
    max_length: usize,
    state: ParserState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self {
            buffer: BytesMut::new(),
            escaped: false,
            max_length: DEFAULT_MAX_FRAME_LENGTH,
            state: ParserState::default(),
        }
    }
}

impl FrameDecoder {
    /// Creates a decoder for non-escaped API mode.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder for the given escaping mode.
    #[must_use]
    pub fn with_escaping(escaped: bool) -> Self {
        Self {
            escaped,
            ..Self::default()
        }
    }

    /// Sets the largest accepted content length (frame type plus payload).
    #[must_use]
    pub fn max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length.clamp(1, MAX_FRAME_LENGTH);
        self
    }

    /// Switches between escaped and non-escaped parsing.
    ///
    /// Any partially received frame is discarded.
    pub fn set_escaped(&mut self, escaped: bool) {
        if self.escaped != escaped {
            self.escaped = escaped;
            self.clear();
        }
    }

    /// Returns true if the decoder expects escaped frames.
    #[must_use]
    pub const fn is_escaped(&self) -> bool {
        self.escaped
    }

    /// Returns the state reached by the last call to [`decode`](Self::decode).
    #[must_use]
    pub const fn state(&self) -> ParserState {
        self.state
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(frame))` for a verified frame, `Ok(None)` if more data
    /// is needed, or an error describing a frame that was dropped. After an
    /// error the caller should simply call `decode` again.
    pub fn decode(&mut self) -> Result<Option<ApiFrame>, FrameError> {
        self.state = ParserState::SearchingDelimiter;
        match self.buffer.iter().position(|&b| b == START_DELIMITER) {
            Some(0) => {}
            Some(pos) => {
                tracing::trace!("skipping {pos} bytes before start delimiter");
                self.buffer.advance(pos);
            }
            None => {
                if !self.buffer.is_empty() {
                    tracing::trace!("discarding {} bytes without delimiter", self.buffer.len());
                    self.buffer.clear();
                }
                return Ok(None);
            }
        }

        match scan(&self.buffer, self.escaped, self.max_length) {
            Scan::Complete { frame, consumed } => {
                self.buffer.advance(consumed);
                self.state = ParserState::FrameComplete;
                Ok(Some(frame))
            }
            Scan::Malformed { error, skip } => {
                self.buffer.advance(skip);
                Err(error)
            }
            Scan::Incomplete(state) => {
                if let Some(pos) = self.resync_point() {
                    tracing::trace!("abandoning incomplete frame, next frame at offset {pos}");
                    self.buffer.advance(pos);
                    return Err(FrameError::UnexpectedDelimiter);
                }
                self.state = state;
                Ok(None)
            }
        }
    }

    /// Finds a later start delimiter that begins a complete, valid frame.
    fn resync_point(&self) -> Option<usize> {
        self.buffer
            .iter()
            .enumerate()
            .skip(1)
            .filter(|&(_, &b)| b == START_DELIMITER)
            .map(|(pos, _)| pos)
            .find(|&pos| {
                matches!(
                    scan(&self.buffer[pos..], self.escaped, self.max_length),
                    Scan::Complete { .. }
                )
            })
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = ParserState::SearchingDelimiter;
    }
}
