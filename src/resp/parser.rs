use std::str::from_utf8;

use bytes::Bytes;

use super::{
    frame::RESPFrame,
    reader::{Terminator, WireReader},
    sequence::{ByteSequence, Segments},
    token,
};
use crate::error::ProtocolError;

pub const DEFAULT_MAX_DEPTH: usize = 64;

type Parsed<T> = Result<Option<T>, ProtocolError>;

/**
 * Stateless RESP reply parser over a chunked sequence.
 *
 * Parsing is all-or-nothing: `Ok(None)` means the sequence holds only part of
 * a reply and nothing should be discarded yet.
 */
#[derive(Debug, Clone, Copy)]
pub struct RESPParser {
    max_depth: usize,
}

impl Default for RESPParser {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl RESPParser {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /**
     * Parses one reply from the front of `input`, returning it with the number of bytes it spans
     */
    pub fn parse<S: Segments + ?Sized>(&self, input: &S) -> Parsed<(RESPFrame, usize)> {
        let mut needed = None;
        self.parse_with_hint(input, &mut needed)
    }

    /**
     * As `parse`, additionally recording in `needed` the total input length
     * below which a retry cannot succeed (set while waiting on a bulk payload)
     */
    pub fn parse_with_hint<S: Segments + ?Sized>(
        &self,
        input: &S,
        needed: &mut Option<usize>,
    ) -> Parsed<(RESPFrame, usize)> {
        let mut reader = WireReader::new(input);

        match self.parse_frame(&mut reader, 0, needed)? {
            Some(frame) => {
                *needed = None;
                Ok(Some((frame, reader.position() as usize)))
            }
            None => Ok(None),
        }
    }

    fn parse_frame<S: Segments + ?Sized>(
        &self,
        reader: &mut WireReader<S>,
        depth: usize,
        needed: &mut Option<usize>,
    ) -> Parsed<RESPFrame> {
        let prefix = match reader.consume_byte() {
            Some(prefix) => prefix,
            None => return Ok(None),
        };

        match prefix {
            token::SIMPLE_STRING => Ok(Self::read_line(reader)?.map(RESPFrame::Simple)),
            token::ERROR => Ok(Self::read_line(reader)?.map(RESPFrame::Error)),
            token::INTEGER => Self::read_integer(reader).map(|n| n.map(RESPFrame::Integer)),
            token::BULK_STRING => Self::read_bulk(reader, needed),
            token::ARRAY => self.read_array(reader, depth, needed),
            other => Err(ProtocolError::InvalidPrefix(other)),
        }
    }

    /**
     * Bytes up to the next terminator, with the terminator consumed
     */
    fn read_line<S: Segments + ?Sized>(reader: &mut WireReader<S>) -> Parsed<Bytes> {
        let length = match reader.find_terminator_offset() {
            Some(length) => length,
            None => return Ok(None),
        };
        let line = match reader.consume_as_slice(length) {
            Some(line) => line,
            None => return Ok(None),
        };
        Self::expect_terminator(reader)?;
        Ok(Some(line.to_bytes()))
    }

    fn read_integer<S: Segments + ?Sized>(reader: &mut WireReader<S>) -> Parsed<i64> {
        let line = match Self::read_line(reader)? {
            Some(line) => line,
            None => return Ok(None),
        };
        from_utf8(&line)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Some)
            .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(&line).into_owned()))
    }

    fn read_bulk<S: Segments + ?Sized>(
        reader: &mut WireReader<S>,
        needed: &mut Option<usize>,
    ) -> Parsed<RESPFrame> {
        let length = match Self::read_integer(reader)? {
            Some(-1) => return Ok(Some(RESPFrame::Null)),
            Some(length) if length < 0 => return Err(ProtocolError::InvalidLength(length)),
            Some(length) => length as usize,
            None => return Ok(None),
        };

        let payload = match reader.consume_as_slice(length) {
            Some(payload) => payload,
            None => {
                *needed = Some(reader.position() as usize + length + 2);
                return Ok(None);
            }
        };
        match reader.try_consume_terminator() {
            // Only a payload split across chunks gets copied here
            Terminator::Success => Ok(Some(RESPFrame::Bulk(payload.to_bytes()))),
            Terminator::NeedMoreData => Ok(None),
            Terminator::Failure => Err(ProtocolError::InvalidTerminator {
                position: reader.position(),
            }),
        }
    }

    fn read_array<S: Segments + ?Sized>(
        &self,
        reader: &mut WireReader<S>,
        depth: usize,
        needed: &mut Option<usize>,
    ) -> Parsed<RESPFrame> {
        let count = match Self::read_integer(reader)? {
            Some(-1) => return Ok(Some(RESPFrame::Null)),
            Some(count) if count < 0 => return Err(ProtocolError::InvalidLength(count)),
            Some(count) => count as usize,
            None => return Ok(None),
        };
        if depth + 1 > self.max_depth {
            return Err(ProtocolError::NestingTooDeep(self.max_depth));
        }

        // Cap the up-front allocation; the count comes off the wire
        let mut children = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            match self.parse_frame(reader, depth + 1, needed)? {
                Some(child) => children.push(child),
                None => return Ok(None),
            }
        }
        Ok(Some(RESPFrame::Array(children)))
    }

    fn expect_terminator<S: Segments + ?Sized>(reader: &mut WireReader<S>) -> Result<(), ProtocolError> {
        match reader.try_consume_terminator() {
            Terminator::Success => Ok(()),
            _ => Err(ProtocolError::InvalidTerminator {
                position: reader.position(),
            }),
        }
    }
}

/**
 * Per-connection decoding state: buffered inbound chunks plus the minimum
 * length the buffer must reach before a retry is worthwhile.
 */
#[derive(Debug, Default)]
pub struct ReplyDecoder {
    parser: RESPParser,
    buffer: ByteSequence,
    needed: Option<usize>,
}

impl ReplyDecoder {
    pub fn new(parser: RESPParser) -> Self {
        Self {
            parser,
            buffer: ByteSequence::new(),
            needed: None,
        }
    }

    pub fn feed(&mut self, chunk: Bytes) {
        self.buffer.push(chunk);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /**
     * Next complete reply, discarding its bytes from the buffer
     */
    pub fn next_frame(&mut self) -> Result<Option<RESPFrame>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if matches!(self.needed, Some(needed) if self.buffer.len() < needed) {
            return Ok(None);
        }

        match self.parser.parse_with_hint(&self.buffer, &mut self.needed)? {
            Some((frame, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }
}
