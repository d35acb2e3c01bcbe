use bytes::Bytes;

use super::sequence::{ByteSequence, Segments};

pub const CR: u8 = b'\r';
pub const LF: u8 = b'\n';

/**
 * Result of probing for a `\r\n` line terminator
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Success,
    /// The bytes present are definitively not a terminator
    Failure,
    /// Input ends at or inside the terminator; nothing was consumed
    NeedMoreData,
}

/**
 * Resumable position inside a chunked sequence.
 *
 * `consumed_before` caches the logical offset of the active segment, so the
 * absolute position is O(1) and every walk starts at the active segment rather
 * than at the front of the sequence. A cursor stays valid when further chunks
 * are appended to the sequence it was taken from.
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    segment: usize,
    offset: usize,
    consumed_before: u64,
}

impl Cursor {
    pub fn position(&self) -> u64 {
        self.consumed_before + self.offset as u64
    }
}

/**
 * Byte-exact decoding primitives over a chunked byte source.
 * Cheap to copy: a copy is an independent reader over the same bytes.
 */
pub struct WireReader<'a, S: Segments + ?Sized = ByteSequence> {
    source: &'a S,
    cursor: Cursor,
}

impl<'a, S: Segments + ?Sized> Clone for WireReader<'a, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S: Segments + ?Sized> Copy for WireReader<'a, S> {}

impl<'a, S: Segments + ?Sized> WireReader<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self::resume(source, Cursor::default())
    }

    /**
     * Continues from a cursor taken earlier over the same (possibly extended) source
     */
    pub fn resume(source: &'a S, cursor: Cursor) -> Self {
        Self { source, cursor }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn restore(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Logical bytes consumed since the start of the source
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /**
     * Active segment with at least one unread byte, stepping over exhausted
     * and empty segments. None when the source is drained.
     */
    fn current(&mut self) -> Option<&'a Bytes> {
        loop {
            let segment = self.source.segment(self.cursor.segment)?;
            if self.cursor.offset < segment.len() {
                return Some(segment);
            }
            self.cursor.consumed_before += segment.len() as u64;
            self.cursor.segment += 1;
            self.cursor.offset = 0;
        }
    }

    pub fn peek_byte(&mut self) -> Option<u8> {
        let segment = self.current()?;
        Some(segment[self.cursor.offset])
    }

    pub fn consume_byte(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.cursor.offset += 1;
        Some(byte)
    }

    pub fn try_consume_terminator(&mut self) -> Terminator {
        let mut lookahead = *self;
        match lookahead.consume_byte() {
            None => return Terminator::NeedMoreData,
            Some(CR) => {}
            Some(_) => return Terminator::Failure,
        }
        match lookahead.consume_byte() {
            None => Terminator::NeedMoreData,
            Some(LF) => {
                *self = lookahead;
                Terminator::Success
            }
            Some(_) => Terminator::Failure,
        }
    }

    /**
     * Skips exactly `count` bytes.
     * On false the reader is left drained, not rolled back: take a cursor first
     * if the position must be recoverable.
     */
    pub fn try_consume(&mut self, mut count: usize) -> bool {
        while count > 0 {
            let segment = match self.current() {
                Some(segment) => segment,
                None => return false,
            };
            let step = (segment.len() - self.cursor.offset).min(count);
            self.cursor.offset += step;
            count -= step;
        }
        true
    }

    /**
     * Zero-copy view of the next `count` bytes.
     * Leaves the reader untouched when fewer bytes are available.
     */
    pub fn consume_as_slice(&mut self, count: usize) -> Option<ByteSequence> {
        let start = self.cursor;
        let mut slice = ByteSequence::new();
        let mut wanted = count;

        while wanted > 0 {
            let segment = match self.current() {
                Some(segment) => segment,
                None => {
                    self.cursor = start;
                    return None;
                }
            };
            let from = self.cursor.offset;
            let to = segment.len().min(from + wanted);
            slice.push(segment.slice(from..to));
            self.cursor.offset = to;
            wanted -= to - from;
        }
        Some(slice)
    }

    pub fn consume_to_end(&mut self) -> ByteSequence {
        let mut rest = ByteSequence::new();
        while let Some(segment) = self.current() {
            rest.push(segment.slice(self.cursor.offset..));
            self.cursor.offset = segment.len();
        }
        rest
    }

    /// Unread bytes from the cursor to the end of the source
    pub fn remaining(&self) -> usize {
        let mut lookahead = *self;
        let mut total = 0;
        while let Some(segment) = lookahead.current() {
            total += segment.len() - lookahead.cursor.offset;
            lookahead.cursor.offset = segment.len();
        }
        total
    }

    /**
     * Offset from the cursor to the next occurrence of `needle`.
     * Never moves this reader.
     */
    pub fn index_of(&self, needle: u8) -> Option<usize> {
        let mut lookahead = *self;
        lookahead.scan_to(needle)
    }

    /**
     * Offset from the cursor to the next `\r\n`, including a terminator
     * whose two bytes sit in different segments. Never moves this reader.
     */
    pub fn find_terminator_offset(&self) -> Option<usize> {
        let mut lookahead = *self;
        let mut offset = 0;
        loop {
            offset += lookahead.scan_to(CR)?;
            // lookahead now sits on the CR
            lookahead.cursor.offset += 1;
            match lookahead.peek_byte() {
                Some(LF) => return Some(offset),
                Some(_) => offset += 1,
                None => return None,
            }
        }
    }

    /**
     * Moves the lookahead onto the next `needle`, returning how far it travelled
     */
    fn scan_to(&mut self, needle: u8) -> Option<usize> {
        let mut travelled = 0;
        loop {
            let segment = self.current()?;
            let unread = &segment[self.cursor.offset..];
            match unread.iter().position(|&byte| byte == needle) {
                Some(index) => {
                    self.cursor.offset += index;
                    return Some(travelled + index);
                }
                None => {
                    travelled += unread.len();
                    self.cursor.offset = segment.len();
                }
            }
        }
    }
}
