//! Fixed-capacity lookahead window used to spot line and boundary terminators.

/// Circular byte window over the most recent `capacity` bytes of a stream.
///
/// The parser pushes bytes one at a time and asks whether the window currently
/// ends with a terminator (`\r\n`, `\r\n--boundary`). Everything pushed before
/// the terminator is recovered with [`extract_prefix`](Self::extract_prefix).
///
/// The logical length is tracked explicitly, so suffix matching never reads
/// bytes older than the last [`reset`](Self::reset), zeroed or not.
#[derive(Debug)]
pub(crate) struct LookaheadBuffer {
    buffer: Box<[u8]>,
    cursor: usize,
    len: usize,
}

impl LookaheadBuffer {
    #[inline]
    #[track_caller]
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Lookahead capacity must be non-zero");

        Self {
            buffer: vec![0; capacity].into_boxed_slice(),
            cursor: 0,
            len: 0,
        }
    }

    /// Rewinds and zero-fills the backing store.
    #[inline]
    pub(crate) fn init(&mut self) {
        self.buffer.fill(0);
        self.reset();
    }

    /// Rewinds the cursor and logical length, memory is left untouched.
    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.cursor = 0;
        self.len = 0;
    }

    #[inline(always)]
    pub(crate) fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub(crate) fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Writes one byte at the cursor.
    ///
    /// Once the window is full the oldest byte is overwritten and returned.
    #[inline]
    pub(crate) fn push(&mut self, byte: u8) -> Option<u8> {
        let evicted = match self.is_full() {
            true => Some(self.buffer[self.cursor]),
            false => {
                self.len += 1;
                None
            }
        };

        self.buffer[self.cursor] = byte;
        self.cursor = (self.cursor + 1) % self.capacity();

        evicted
    }

    /// Returns `true` if the last `pattern.len()` pushed bytes equal `pattern`.
    ///
    /// A pattern longer than the capacity can never match; callers building
    /// patterns at runtime must reject those before parsing.
    #[inline]
    #[track_caller]
    pub(crate) fn ends_with(&self, pattern: &[u8]) -> bool {
        debug_assert!(
            pattern.len() <= self.capacity(),
            "Pattern is longer than the lookahead window"
        );

        if pattern.is_empty() || pattern.len() > self.len {
            return false;
        }

        let cap = self.capacity();
        let start = (self.cursor + cap - pattern.len()) % cap;

        pattern
            .iter()
            .enumerate()
            .all(|(i, byte)| self.buffer[(start + i) % cap] == *byte)
    }

    /// Appends everything since the last reset, minus the trailing `skip`
    /// bytes, to `dest`. Returns the number of copied bytes.
    #[inline]
    pub(crate) fn extract_prefix(&self, skip: usize, dest: &mut Vec<u8>) -> usize {
        self.extract_prefix_n(skip, usize::MAX, dest)
    }

    /// Same as [`extract_prefix`](Self::extract_prefix), copying at most `max` bytes.
    pub(crate) fn extract_prefix_n(&self, skip: usize, max: usize, dest: &mut Vec<u8>) -> usize {
        let count = self.len.saturating_sub(skip).min(max);
        if count == 0 {
            return 0;
        }

        let cap = self.capacity();
        let start = (self.cursor + cap - self.len) % cap;

        let first = count.min(cap - start);
        dest.extend_from_slice(&self.buffer[start..start + first]);
        dest.extend_from_slice(&self.buffer[..count - first]);

        count
    }
}
