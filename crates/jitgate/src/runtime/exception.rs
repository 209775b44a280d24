//! Exception metadata and landing-pad search
//!
//! Compiled methods register the code ranges their landing pads cover.
//! When a bridged call diverts, `exceptional_return` records the call-site
//! return address and asks [`exception_handler`] for a landing pad; the search
//! is a small state machine that ends either in a landing pad inside the
//! current frame or in "unwind to the caller".

use parking_lot::RwLock;

use super::trampoline::{DispatchState, ThreadContext};
use crate::error::ExceptionTableError;

/// A half-open code range `[start, end)` whose exceptions land at `landing_pad`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerRange {
    /// First covered code address
    pub start: usize,
    /// One past the last covered code address
    pub end: usize,
    /// Entry of the landing-pad continuation
    pub landing_pad: usize,
}

impl HandlerRange {
    /// Whether `pc` falls inside the range
    pub fn contains(&self, pc: usize) -> bool {
        self.start <= pc && pc < self.end
    }
}

/// Thread-safe table of handler ranges, sorted by start address
pub struct ExceptionTable {
    ranges: RwLock<Vec<HandlerRange>>,
}

impl ExceptionTable {
    /// Create an empty table
    pub fn new() -> Self {
        ExceptionTable {
            ranges: RwLock::new(Vec::new()),
        }
    }

    /// Register the landing pad for a code range.
    ///
    /// Ranges may not overlap; a compiled method registers one range per
    /// region with a distinct handler.
    pub fn register(&self, start: usize, end: usize, landing_pad: usize) -> Result<(), ExceptionTableError> {
        if start >= end {
            return Err(ExceptionTableError::EmptyRange { start, end });
        }

        let mut ranges = self.ranges.write();
        let pos = ranges.partition_point(|r| r.start < start);
        let overlaps_prev = pos > 0 && ranges[pos - 1].end > start;
        let overlaps_next = ranges.get(pos).is_some_and(|r| r.start < end);
        if overlaps_prev || overlaps_next {
            return Err(ExceptionTableError::OverlappingRange { start, end });
        }

        ranges.insert(pos, HandlerRange { start, end, landing_pad });
        Ok(())
    }

    /// Landing pad covering `pc`
    pub fn find(&self, pc: usize) -> Option<usize> {
        let ranges = self.ranges.read();
        let pos = ranges.partition_point(|r| r.start <= pc);
        let candidate = ranges.get(pos.checked_sub(1)?)?;
        candidate.contains(pc).then_some(candidate.landing_pad)
    }

    /// Number of registered ranges
    pub fn len(&self) -> usize {
        self.ranges.read().len()
    }

    /// Whether no range is registered
    pub fn is_empty(&self) -> bool {
        self.ranges.read().is_empty()
    }
}

impl Default for ExceptionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExceptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionTable")
            .field("ranges", &self.len())
            .finish()
    }
}

/// Landing-pad search for one diverted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerSearch {
    /// Looking up the faulting pc
    Searching {
        /// Return address of the diverted call
        pc: usize,
        /// Whether an exception is actually in flight
        has_exception: bool,
    },
    /// Resume at this landing pad in the current frame
    FoundLandingPad(usize),
    /// No handler here; unwind to the caller frame
    NoHandlerInFrame,
}

impl HandlerSearch {
    /// Begin a search for the call that returned to `return_pc`
    pub fn start(return_pc: usize, has_exception: bool) -> Self {
        HandlerSearch::Searching {
            pc: return_pc,
            has_exception,
        }
    }

    /// Whether the search has reached an outcome
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HandlerSearch::Searching { .. })
    }

    /// Advance one step using the method metadata
    pub fn step(self, table: Option<&ExceptionTable>) -> Self {
        match self {
            HandlerSearch::Searching { pc, has_exception } => {
                // A return address points past the call; step back into it
                // so a call that ends its range still belongs to it.
                let pad = match (has_exception, table) {
                    (true, Some(table)) if pc != 0 => table.find(pc - 1),
                    _ => None,
                };
                match pad {
                    Some(pad) => HandlerSearch::FoundLandingPad(pad),
                    None => HandlerSearch::NoHandlerInFrame,
                }
            }
            terminal => terminal,
        }
    }

    /// Run to a terminal state
    pub fn resolve(mut self, table: Option<&ExceptionTable>) -> Self {
        while !self.is_terminal() {
            self = self.step(table);
        }
        self
    }

    /// Landing pad, if one was found
    pub fn landing_pad(&self) -> Option<usize> {
        match self {
            HandlerSearch::FoundLandingPad(pad) => Some(*pad),
            _ => None,
        }
    }

    /// State recorded in the thread context
    pub fn dispatch_state(&self) -> DispatchState {
        match self {
            HandlerSearch::Searching { .. } => DispatchState::Searching,
            HandlerSearch::FoundLandingPad(_) => DispatchState::FoundLandingPad,
            HandlerSearch::NoHandlerInFrame => DispatchState::NoHandlerInFrame,
        }
    }
}

/// Landing-pad lookup for the thread's in-flight exception.
///
/// Returns the landing pad, or 0 when control must unwind to the caller.
/// Records the outcome in `dispatch_state`.
///
/// # Safety
/// `thread` must be null or point to a live [`ThreadContext`] not aliased
/// by any other reference for the duration of the call. Its
/// `exception_table` must be null or point to a live [`ExceptionTable`].
pub unsafe extern "C" fn exception_handler(thread: *mut ThreadContext) -> usize {
    // SAFETY: guaranteed by the caller; null finds nothing.
    let Some(thread) = (unsafe { thread.as_mut() }) else {
        return 0;
    };
    // SAFETY: guaranteed by the caller.
    let table = unsafe { thread.exception_table.as_ref() };

    let outcome = HandlerSearch::start(thread.exception_pc, !thread.pending_exception.is_null()).resolve(table);
    tracing::trace!(
        pc = thread.exception_pc,
        state = ?outcome.dispatch_state(),
        "exception handler search"
    );

    thread.dispatch_state = outcome.dispatch_state() as usize;
    outcome.landing_pad().unwrap_or(0)
}

/// Raise `exception` on the calling thread.
///
/// Generated code reaches this through its stub; the stub observes the
/// pending exception on return and diverts into `exceptional_return`.
///
/// # Safety
/// `thread` must be null or point to a live [`ThreadContext`] not aliased
/// by any other reference for the duration of the call.
pub unsafe extern "C" fn install_exceptional_return(exception: *mut u8, thread: *mut ThreadContext) {
    // SAFETY: guaranteed by the caller.
    if let Some(thread) = unsafe { thread.as_mut() } {
        thread.pending_exception = exception;
    }
}
