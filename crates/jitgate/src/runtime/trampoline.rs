//! Thread context shared between stubs and engine services
//!
//! Defines the C-ABI record a stub materializes as the hidden trailing
//! argument of every stub-mediated service, and the thread-local slot the
//! default accessor reads it from. Field offsets are baked into synthesized
//! code, so the layout is `#[repr(C)]` and only ever extended at the end.

use std::cell::Cell;
use std::mem::offset_of;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use super::exception::ExceptionTable;

/// Frame-boundary record written by a stub before it enters native code.
///
/// All three words are zero while the thread runs generated code. A stack
/// walker that finds them set knows a generated-code frame lies directly
/// beneath the stub frame they describe.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameAnchor {
    /// Stack pointer of the stub frame
    pub last_sp: usize,
    /// Frame pointer of the stub frame
    pub last_fp: usize,
    /// Return address into the generated caller
    pub last_pc: usize,
}

impl FrameAnchor {
    /// Whether the thread is currently inside a native call
    pub fn is_set(&self) -> bool {
        self.last_sp != 0 || self.last_fp != 0 || self.last_pc != 0
    }
}

/// Progress of the landing-pad search for the last diverted call
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// No dispatch has happened since the last reset
    Idle = 0,
    /// `exceptional_return` entered, handler search running
    Searching = 1,
    /// A landing pad in the current frame takes the exception
    FoundLandingPad = 2,
    /// No handler in this frame; control unwinds to the caller
    NoHandlerInFrame = 3,
}

impl DispatchState {
    /// Decode the raw word stored in [`ThreadContext::dispatch_state`]
    pub fn from_word(word: usize) -> Option<Self> {
        match word {
            0 => Some(DispatchState::Idle),
            1 => Some(DispatchState::Searching),
            2 => Some(DispatchState::FoundLandingPad),
            3 => Some(DispatchState::NoHandlerInFrame),
            _ => None,
        }
    }
}

/// How a stub-mediated call ended.
///
/// Stubs return it as a trailing `i32` after the routine's own results, and
/// landing pads return it the same way.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// The service returned; the results are valid
    Returned = 0,
    /// The call threw and no landing pad in the caller's frame took the
    /// exception. It stays pending and the results are meaningless.
    Unwind = 1,
    /// The service returned valid results but asked the caller to deoptimize
    Deoptimize = 2,
}

impl CallStatus {
    /// Decode the status word returned by a stub
    pub fn from_word(word: u32) -> Option<Self> {
        match word {
            0 => Some(CallStatus::Returned),
            1 => Some(CallStatus::Unwind),
            2 => Some(CallStatus::Deoptimize),
            _ => None,
        }
    }
}

/// User trap code a stub raises when called on a thread with no attached
/// [`ThreadContext`]
pub const DETACHED_THREAD_TRAP: u8 = 1;

/// Per-thread state read and written by synthesized routines
#[repr(C)]
#[derive(Debug)]
pub struct ThreadContext {
    /// Frame anchor, set only while a stub is inside a native call
    pub anchor: FrameAnchor,
    /// Managed-heap exception raised by a service (null when none)
    pub pending_exception: *mut u8,
    /// Non-zero when a service asks the caller to deoptimize
    pub deopt_requested: usize,
    /// Exception handed to the landing pad
    pub exception_oop: *mut u8,
    /// Return address of the call site that diverted
    pub exception_pc: usize,
    /// Raw [`DispatchState`]
    pub dispatch_state: usize,
    /// Exception metadata consulted by `exception_handler` (may be null)
    pub exception_table: *const ExceptionTable,
}

/// Byte offsets of [`ThreadContext`] fields used by synthesized code
pub mod offsets {
    use super::*;

    /// `anchor.last_sp`
    pub const LAST_SP: i32 = (offset_of!(ThreadContext, anchor) + offset_of!(FrameAnchor, last_sp)) as i32;
    /// `anchor.last_fp`
    pub const LAST_FP: i32 = (offset_of!(ThreadContext, anchor) + offset_of!(FrameAnchor, last_fp)) as i32;
    /// `anchor.last_pc`
    pub const LAST_PC: i32 = (offset_of!(ThreadContext, anchor) + offset_of!(FrameAnchor, last_pc)) as i32;
    /// `pending_exception`
    pub const PENDING_EXCEPTION: i32 = offset_of!(ThreadContext, pending_exception) as i32;
    /// `deopt_requested`
    pub const DEOPT_REQUESTED: i32 = offset_of!(ThreadContext, deopt_requested) as i32;
    /// `exception_oop`
    pub const EXCEPTION_OOP: i32 = offset_of!(ThreadContext, exception_oop) as i32;
    /// `exception_pc`
    pub const EXCEPTION_PC: i32 = offset_of!(ThreadContext, exception_pc) as i32;
    /// `dispatch_state`
    pub const DISPATCH_STATE: i32 = offset_of!(ThreadContext, dispatch_state) as i32;
}

impl ThreadContext {
    /// A context with no anchor, no pending exception and no exception table
    pub fn new() -> Self {
        ThreadContext {
            anchor: FrameAnchor::default(),
            pending_exception: ptr::null_mut(),
            deopt_requested: 0,
            exception_oop: ptr::null_mut(),
            exception_pc: 0,
            dispatch_state: DispatchState::Idle as usize,
            exception_table: ptr::null(),
        }
    }

    /// Whether the last call left the thread in a diverted state
    pub fn has_divert(&self) -> bool {
        !self.pending_exception.is_null() || self.deopt_requested != 0
    }
}

impl Default for ThreadContext {
    fn default() -> Self {
        Self::new()
    }
}

thread_local! {
    static CURRENT: Cell<*mut ThreadContext> = const { Cell::new(ptr::null_mut()) };
}

/// Thread-context accessor called by stubs under the thread-local source.
///
/// Returns null on a thread that has not been attached; stubs then trap
/// with [`DETACHED_THREAD_TRAP`] before touching the context.
pub extern "C" fn current_thread() -> *mut ThreadContext {
    CURRENT.with(|slot| slot.get())
}

/// A [`ThreadContext`] attached to the current OS thread.
///
/// The context lives at a stable heap address for the guard's lifetime and
/// is detached from the thread-local slot on drop. All access goes through
/// the raw pointer because synthesized code writes the same memory.
pub struct AttachedThread {
    ctx: NonNull<ThreadContext>,
    previous: *mut ThreadContext,
    exception_table: Option<Arc<ExceptionTable>>,
}

impl AttachedThread {
    /// Allocate a fresh context and make it the current thread's context
    pub fn attach() -> Self {
        let ctx = NonNull::from(Box::leak(Box::new(ThreadContext::new())));
        let previous = CURRENT.with(|slot| slot.replace(ctx.as_ptr()));
        AttachedThread {
            ctx,
            previous,
            exception_table: None,
        }
    }

    /// Raw pointer handed to synthesized code
    pub fn as_ptr(&self) -> *mut ThreadContext {
        self.ctx.as_ptr()
    }

    /// Install the exception metadata `exception_handler` consults
    pub fn set_exception_table(&mut self, table: Arc<ExceptionTable>) {
        // SAFETY: ctx is owned by this guard and valid until drop.
        unsafe { (*self.ctx.as_ptr()).exception_table = Arc::as_ptr(&table) };
        self.exception_table = Some(table);
    }

    /// Snapshot of the frame anchor
    pub fn anchor(&self) -> FrameAnchor {
        // SAFETY: see set_exception_table.
        unsafe { (*self.ctx.as_ptr()).anchor }
    }

    /// Pending exception, if any
    pub fn pending_exception(&self) -> Option<NonNull<u8>> {
        // SAFETY: see set_exception_table.
        NonNull::new(unsafe { (*self.ctx.as_ptr()).pending_exception })
    }

    /// Take and clear the pending exception, ending the dispatch that left it
    pub fn take_pending_exception(&mut self) -> Option<NonNull<u8>> {
        // SAFETY: see set_exception_table.
        let ctx = unsafe { &mut *self.ctx.as_ptr() };
        ctx.dispatch_state = DispatchState::Idle as usize;
        NonNull::new(std::mem::replace(&mut ctx.pending_exception, ptr::null_mut()))
    }

    /// Exception handed to a landing pad that has not yet entered it
    pub fn exception_oop(&self) -> Option<NonNull<u8>> {
        // SAFETY: see set_exception_table.
        NonNull::new(unsafe { (*self.ctx.as_ptr()).exception_oop })
    }

    /// Whether a deoptimization request is outstanding
    pub fn deopt_requested(&self) -> bool {
        // SAFETY: see set_exception_table.
        unsafe { (*self.ctx.as_ptr()).deopt_requested != 0 }
    }

    /// Clear an outstanding deoptimization request
    pub fn clear_deopt(&mut self) {
        // SAFETY: see set_exception_table.
        unsafe { (*self.ctx.as_ptr()).deopt_requested = 0 };
    }

    /// State of the last landing-pad search
    pub fn dispatch_state(&self) -> Option<DispatchState> {
        // SAFETY: see set_exception_table.
        DispatchState::from_word(unsafe { (*self.ctx.as_ptr()).dispatch_state })
    }

    /// Return address recorded by the last diversion
    pub fn exception_pc(&self) -> usize {
        // SAFETY: see set_exception_table.
        unsafe { (*self.ctx.as_ptr()).exception_pc }
    }
}

impl Drop for AttachedThread {
    fn drop(&mut self) {
        let previous = self.previous;
        CURRENT.with(|slot| slot.set(previous));
        // SAFETY: ctx came from Box::leak in attach and is released once.
        drop(unsafe { Box::from_raw(self.ctx.as_ptr()) });
    }
}
