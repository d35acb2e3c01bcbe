use std::collections::VecDeque;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/**
 * Indexed access to the segments of a chunked byte stream.
 * Segments are visited strictly in index order; an index past the end yields None.
 */
pub trait Segments {
    fn segment(&self, index: usize) -> Option<&Bytes>;
}

impl Segments for [Bytes] {
    fn segment(&self, index: usize) -> Option<&Bytes> {
        self.get(index)
    }
}

impl Segments for Vec<Bytes> {
    fn segment(&self, index: usize) -> Option<&Bytes> {
        self.get(index)
    }
}

/**
 * Logically contiguous bytes stored as a run of reference-counted chunks.
 * Slicing never copies; only `to_bytes` on a multi-segment sequence does.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteSequence {
    segments: VecDeque<Bytes>,
    len: usize,
}

impl ByteSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk. Empty chunks are dropped.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.segments.push_back(chunk);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /**
     * Discards the first `count` bytes, releasing fully consumed chunks
     */
    pub fn advance(&mut self, mut count: usize) {
        assert!(count <= self.len, "advance past end of sequence");
        self.len -= count;

        while count > 0 {
            let front = match self.segments.front_mut() {
                Some(front) => front,
                None => break,
            };
            if front.len() <= count {
                count -= front.len();
                self.segments.pop_front();
            } else {
                front.advance(count);
                count = 0;
            }
        }
    }

    /**
     * Contiguous view of the whole sequence.
     * Zero-copy for zero or one segment, otherwise the segments are gathered.
     */
    pub fn to_bytes(&self) -> Bytes {
        match self.segments.len() {
            0 => Bytes::new(),
            1 => self.segments[0].clone(),
            _ => {
                let mut gathered = BytesMut::with_capacity(self.len);
                for segment in &self.segments {
                    gathered.put_slice(segment);
                }
                gathered.freeze()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bytes> {
        self.segments.iter()
    }
}

impl Segments for ByteSequence {
    fn segment(&self, index: usize) -> Option<&Bytes> {
        self.segments.get(index)
    }
}

impl From<Bytes> for ByteSequence {
    fn from(chunk: Bytes) -> ByteSequence {
        let mut sequence = ByteSequence::new();
        sequence.push(chunk);
        sequence
    }
}

impl From<Vec<Bytes>> for ByteSequence {
    fn from(chunks: Vec<Bytes>) -> ByteSequence {
        chunks.into_iter().collect()
    }
}

impl FromIterator<Bytes> for ByteSequence {
    fn from_iter<I: IntoIterator<Item = Bytes>>(iter: I) -> ByteSequence {
        let mut sequence = ByteSequence::new();
        iter.into_iter().for_each(|chunk| sequence.push(chunk));
        sequence
    }
}
