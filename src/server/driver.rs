//! Boundary between the HTTP engine and the modem's socket layer.

use crossbeam::queue::ArrayQueue;

/// Number of socket slots the modem exposes.
pub const MAX_SOCKETS: usize = 4;

/// Index of one of the modem's [`MAX_SOCKETS`] socket slots.
///
/// "No socket" is `Option::<SocketHandle>::None`; a value outside the slot
/// range can not be constructed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketHandle(u8);

impl SocketHandle {
    /// Returns `None` for values outside `0..MAX_SOCKETS`.
    #[inline]
    pub const fn new(index: u8) -> Option<Self> {
        match (index as usize) < MAX_SOCKETS {
            true => Some(Self(index)),
            false => None,
        }
    }

    #[inline(always)]
    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Link state reported by the modem for one socket.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Established,
}

/// Socket operations the server needs from the modem driver.
///
/// Every call must return promptly: the server polls
/// [`is_data_available`](Self::is_data_available) and waits on its own
/// between polls instead of blocking in the driver.
pub trait SocketDriver: Send {
    /// Starts listening on `port`. Called once, before the first cycle.
    fn start_server(&mut self, port: u16) -> bool;

    /// Takes the socket of a pending client connection, if any.
    fn acquire_handle(&mut self) -> Option<SocketHandle>;

    /// Closes the link if still open and returns the slot to the free pool.
    ///
    /// Called exactly once for every handle returned by
    /// [`acquire_handle`](Self::acquire_handle).
    fn release_handle(&mut self, handle: SocketHandle);

    /// Number of bytes that can be read without waiting, `0` if none.
    fn is_data_available(&mut self, handle: SocketHandle) -> usize;

    /// Reads one byte, if available.
    ///
    /// The flag is `true` when the remote side closed the link and no
    /// buffered bytes remain after this read.
    fn read_byte(&mut self, handle: SocketHandle) -> (Option<u8>, bool);

    /// Reads up to `buf.len()` available bytes, returns how many were read.
    fn read_bytes(&mut self, handle: SocketHandle, buf: &mut [u8]) -> usize;

    /// Sends `bytes`, `false` if the modem rejected the send.
    fn write_bytes(&mut self, handle: SocketHandle, bytes: &[u8]) -> bool;

    fn connection_state(&mut self, handle: SocketHandle) -> ConnectionState;
}

/// Free pool of socket slots for driver implementations.
///
/// All [`MAX_SOCKETS`] slots start free.
///
/// # Examples
/// ```
/// use at_web::{SocketSlots, MAX_SOCKETS};
///
/// let slots = SocketSlots::new();
/// let first = slots.acquire().unwrap();
///
/// assert_eq!(slots.free(), MAX_SOCKETS - 1);
/// slots.release(first);
/// assert_eq!(slots.free(), MAX_SOCKETS);
/// ```
#[derive(Debug)]
pub struct SocketSlots {
    free: ArrayQueue<SocketHandle>,
}

impl SocketSlots {
    pub fn new() -> Self {
        let free = ArrayQueue::new(MAX_SOCKETS);
        for index in 0..MAX_SOCKETS as u8 {
            let _ = free.push(SocketHandle(index));
        }

        Self { free }
    }

    #[inline]
    pub fn acquire(&self) -> Option<SocketHandle> {
        self.free.pop()
    }

    /// Returns `false` if the slot was already free.
    #[inline]
    pub fn release(&self, handle: SocketHandle) -> bool {
        // Capacity equals the slot count, a full queue means a double release
        self.free.push(handle).is_ok()
    }

    #[inline]
    pub fn free(&self) -> usize {
        self.free.len()
    }
}

impl Default for SocketSlots {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted in-memory driver.
    #[derive(Debug, Default)]
    pub(crate) struct MockDriver {
        pub(crate) slots: SocketSlots,
        pub(crate) pending: usize,
        pub(crate) input: VecDeque<u8>,
        pub(crate) output: Vec<u8>,
        pub(crate) released: Vec<SocketHandle>,
        pub(crate) writes: usize,
        pub(crate) fail_writes: bool,
        /// Remote side closes once `input` is drained.
        pub(crate) close_after_input: bool,
        pub(crate) listening: Option<u16>,
    }

    impl MockDriver {
        pub(crate) fn with_request<V: AsRef<[u8]>>(value: V) -> Self {
            Self {
                pending: 1,
                input: value.as_ref().iter().copied().collect(),
                ..Self::default()
            }
        }

        pub(crate) fn output_str(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }

        fn remote_closed(&self) -> bool {
            self.close_after_input && self.input.is_empty()
        }
    }

    impl SocketDriver for MockDriver {
        fn start_server(&mut self, port: u16) -> bool {
            self.listening = Some(port);
            true
        }

        fn acquire_handle(&mut self) -> Option<SocketHandle> {
            if self.pending == 0 {
                return None;
            }

            self.pending -= 1;
            self.slots.acquire()
        }

        fn release_handle(&mut self, handle: SocketHandle) {
            assert!(self.slots.release(handle), "double release of {handle:?}");
            self.released.push(handle);
        }

        fn is_data_available(&mut self, _: SocketHandle) -> usize {
            self.input.len()
        }

        fn read_byte(&mut self, _: SocketHandle) -> (Option<u8>, bool) {
            let byte = self.input.pop_front();
            (byte, self.remote_closed())
        }

        fn read_bytes(&mut self, _: SocketHandle, buf: &mut [u8]) -> usize {
            let count = buf.len().min(self.input.len());
            for (slot, byte) in buf.iter_mut().zip(self.input.drain(..count)) {
                *slot = byte;
            }
            count
        }

        fn write_bytes(&mut self, _: SocketHandle, bytes: &[u8]) -> bool {
            self.writes += 1;
            if self.fail_writes {
                return false;
            }

            self.output.extend_from_slice(bytes);
            true
        }

        fn connection_state(&mut self, _: SocketHandle) -> ConnectionState {
            match self.remote_closed() {
                true => ConnectionState::Closed,
                false => ConnectionState::Established,
            }
        }
    }
}
