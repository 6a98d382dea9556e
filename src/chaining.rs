//! Command chaining reassembly and response staging.
//!
//! A single fixed scratch buffer backs both directions: chained command
//! frames are accumulated into it before the final frame hands the whole
//! payload to a handler, and oversized responses are parked in it until
//! GET RESPONSE drains them. The buffer is wiped whenever a sequence
//! completes or aborts, so key material never outlives the operation that
//! put it there.

use crate::error::TokenError;

/// Scratch buffer capacity in bytes.
pub const SCRATCH_CAPACITY: usize = 510;

/// Reassembles chained commands and stages partial responses.
pub struct Reconciler {
    buf: [u8; SCRATCH_CAPACITY],
    /// Write cursor for incoming chain segments.
    cursor: usize,
    /// Instruction that opened the current chain, if one is in flight.
    open_ins: Option<u8>,
    /// Bytes staged for GET RESPONSE, counted from the start of `buf`.
    staged: usize,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            buf: [0u8; SCRATCH_CAPACITY],
            cursor: 0,
            open_ins: None,
            staged: 0,
        }
    }

    /// Instruction of the chain currently being reassembled.
    pub fn open_chain_ins(&self) -> Option<u8> {
        self.open_ins
    }

    /// Append a non-final chain segment.
    ///
    /// Claims the buffer: any response fragment still staged is dropped.
    /// Overflowing the scratch buffer aborts the whole sequence.
    pub fn push_chain_segment(&mut self, ins: u8, data: &[u8]) -> Result<(), TokenError> {
        self.drop_staged();
        if self.cursor + data.len() > SCRATCH_CAPACITY {
            self.abort_chain();
            return Err(TokenError::WrongLength);
        }
        self.buf[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
        self.open_ins = Some(ins);
        Ok(())
    }

    /// Append the final segment and close the chain.
    ///
    /// Claims the buffer like [`push_chain_segment`](Self::push_chain_segment).
    /// Returns the total reassembled length; the payload is readable via
    /// [`data`](Self::data) until the next operation claims the buffer.
    pub fn finish_chain(&mut self, data: &[u8]) -> Result<usize, TokenError> {
        self.drop_staged();
        if self.cursor + data.len() > SCRATCH_CAPACITY {
            self.abort_chain();
            return Err(TokenError::WrongLength);
        }
        self.buf[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        let total = self.cursor + data.len();
        self.cursor = 0;
        self.open_ins = None;
        Ok(total)
    }

    /// Reassembled payload of the most recently finished chain.
    pub fn data(&self, len: usize) -> &[u8] {
        &self.buf[..len]
    }

    /// Mark a chain as open for `ins` without buffering anything, for
    /// commands that consume their segments immediately.
    pub fn note_chain(&mut self, ins: u8) {
        self.open_ins = Some(ins);
    }

    /// Close the chain marker without touching the buffer.
    pub fn close_chain(&mut self) {
        self.open_ins = None;
    }

    /// Drop an in-flight chain and wipe the scratch buffer. A staged
    /// response fragment cannot survive the wipe, so its count goes too.
    pub fn abort_chain(&mut self) {
        self.cursor = 0;
        self.open_ins = None;
        self.staged = 0;
        self.buf.fill(0);
    }

    fn drop_staged(&mut self) {
        if self.staged != 0 {
            self.staged = 0;
            self.buf.fill(0);
        }
    }

    /// Park response bytes for a later GET RESPONSE.
    ///
    /// Only one staged response can exist at a time.
    pub fn stage_response(&mut self, data: &[u8]) -> Result<(), TokenError> {
        if self.staged != 0 {
            return Err(TokenError::ConditionsNotSatisfied);
        }
        if data.len() > SCRATCH_CAPACITY {
            return Err(TokenError::CryptoFailed);
        }
        self.buf[..data.len()].copy_from_slice(data);
        self.staged = data.len();
        Ok(())
    }

    /// Bytes currently waiting for GET RESPONSE.
    pub fn staged_len(&self) -> usize {
        self.staged
    }

    /// Hand out the staged response.
    ///
    /// `le` must name the staged byte count exactly; a mismatch reports the
    /// correct count without consuming anything. On a match the bytes are
    /// returned and the buffer is wiped.
    pub fn take_response(&mut self, le: u32) -> Result<Vec<u8>, TokenError> {
        if self.staged == 0 {
            return Err(TokenError::ConditionsNotSatisfied);
        }
        if self.staged > 256 {
            return Err(TokenError::CryptoFailed);
        }
        if le as usize != self.staged {
            // 0 encodes 256 on the wire, which the cast gets right.
            return Err(TokenError::WrongExpectedLength(self.staged as u8));
        }
        let out = self.buf[..self.staged].to_vec();
        self.staged = 0;
        self.buf.fill(0);
        Ok(out)
    }

    /// Wipe everything: in-flight chain, staged response, buffer contents.
    pub fn clear(&mut self) {
        self.cursor = 0;
        self.open_ins = None;
        self.staged = 0;
        self.buf.fill(0);
    }

    /// True if no chain is open and nothing is staged.
    pub fn is_idle(&self) -> bool {
        self.open_ins.is_none() && self.staged == 0
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        self.buf.fill(0);
    }
}
