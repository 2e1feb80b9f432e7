//! Fixed-depth window of in-flight reads.

use crate::executor::BackendCall;

/// Calls a race read keeps outstanding: the one being waited on plus two look-aheads.
pub const LOOKAHEAD_DEPTH: usize = 3;

/// Ring buffer of pending calls, oldest first.
pub struct LookAhead<T> {
    slots: [Option<BackendCall<T>>; LOOKAHEAD_DEPTH],
    head: usize,
    len: usize,
}

impl<T> LookAhead<T> {
    pub fn new() -> Self {
        Self { slots: [None, None, None], head: 0, len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == LOOKAHEAD_DEPTH
    }

    /// Append a call behind the others. A full window refuses it, which drops
    /// (and so cancels) the call, and returns `false`.
    pub fn push(&mut self, call: BackendCall<T>) -> bool {
        if self.is_full() {
            return false;
        }
        let tail = (self.head + self.len) % LOOKAHEAD_DEPTH;
        self.slots[tail] = Some(call);
        self.len += 1;
        true
    }

    pub fn oldest_mut(&mut self) -> Option<&mut BackendCall<T>> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.head].as_mut()
    }

    pub fn pop_oldest(&mut self) -> Option<BackendCall<T>> {
        if self.is_empty() {
            return None;
        }
        let call = self.slots[self.head].take();
        self.head = (self.head + 1) % LOOKAHEAD_DEPTH;
        self.len -= 1;
        call
    }

    /// Cancel and forget every pending call.
    pub fn cancel_all(&mut self) {
        while let Some(mut call) = self.pop_oldest() {
            call.cancel();
        }
    }
}

impl<T> Default for LookAhead<T> {
    fn default() -> Self {
        Self::new()
    }
}
