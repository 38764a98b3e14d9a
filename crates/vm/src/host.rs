//! Defines the capabilities a host must provide to the [`Cpu`](crate::cpu::Cpu) in order to run
//! a program.
//!
//! The engine knows nothing about how a program is presented to the user. Everything it needs
//! from the outside world goes through three narrow traits:
//!
//! - [`InputSource`], queried by instructions that read user-supplied values.
//! - [`OutputSink`], written to by instructions that produce results.
//! - [`Observer`], notified of the lifecycle of a run and asked about breakpoints.
//!
//! All of them are called from the worker thread executing the program. A host that needs its
//! own thread affinity (such as a UI event loop) must forward the calls itself.

use crate::error::Error;
use crate::Word;

/// A source of integers supplied by the user.
pub trait InputSource {
    /// Returns the next value typed by the user.
    ///
    /// This may block the worker thread for as long as necessary. Parsing and validating the
    /// user's input is the responsibility of the host.
    fn read_input_value(&self) -> Word;
}

/// A sink receiving the values printed by a program.
pub trait OutputSink {
    /// Writes a computed value.
    fn print(&self, value: Word);
}

/// A collection of callbacks raised during the execution of a program.
#[allow(unused_variables)]
pub trait Observer {
    /// Returns whether a breakpoint is set on the instruction at `address`.
    ///
    /// Only consulted in [`Mode::Normal`](crate::Mode::Normal).
    fn is_breakpoint(&self, address: usize) -> bool {
        false
    }

    /// Called before the instruction at `address` is dispatched.
    ///
    /// Blank lines, no-op placeholders and the halt marker do not raise this callback.
    fn on_instruction_executing(&self, address: usize) {}

    /// Called when the engine suspends before the instruction at `address`.
    ///
    /// The engine then blocks until [`Cpu::resume`](crate::cpu::Cpu::resume) or
    /// [`Cpu::switch_to_normal`](crate::cpu::Cpu::switch_to_normal) is called. Calling one of
    /// them from within this callback is allowed.
    fn on_suspended(&self, address: usize) {}

    /// Called after the instruction at `address` has been executed successfully.
    fn on_instruction_executed(&self, address: usize) {}

    /// Called when the program reached the halt marker.
    fn on_finished(&self) {}

    /// Called when the run was aborted by a fatal error.
    fn on_fatal_error(&self, error: &Error) {}
}

/// Everything the [`Cpu`](crate::cpu::Cpu) needs from its host.
///
/// This is implemented automatically for any type implementing the three capability traits.
pub trait Host: InputSource + OutputSink + Observer {}

impl<T> Host for T where T: ?Sized + InputSource + OutputSink + Observer {}

/// A host that provides no input, discards output and ignores every callback.
///
/// Reading from it always yields zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl InputSource for NullHost {
    fn read_input_value(&self) -> Word {
        0
    }
}

impl OutputSink for NullHost {
    fn print(&self, _value: Word) {}
}

impl Observer for NullHost {}
