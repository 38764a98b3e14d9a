//! The host given to the engine by the terminal runner.
//!
//! The engine calls its host from the worker thread. [`TerminalHost`] does not touch the
//! terminal itself: every callback is turned into a [`HostEvent`] and sent to the main thread,
//! which owns standard input and output.

use std::collections::BTreeSet;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use stackasm_vm::error::Error;
use stackasm_vm::host::{InputSource, Observer, OutputSink};
use stackasm_vm::Word;
use tracing::{trace, warn};

/// The set of lines flagged as breakpoints, shared with the main thread.
pub type Breakpoints = Arc<RwLock<BTreeSet<usize>>>;

/// Something the main thread has to react to.
#[derive(Debug)]
pub enum HostEvent {
    /// The run is suspended before the instruction at the given address.
    Suspended(usize),
    /// The program printed a value.
    Output(Word),
    /// The program waits for a value. The main thread answers over the input channel.
    InputRequested,
    /// The program reached the halt marker.
    Finished,
    /// The run was aborted.
    Fatal(Error),
}

/// A [`Host`](stackasm_vm::host::Host) forwarding everything to the main thread.
#[derive(Debug)]
pub struct TerminalHost {
    events: Sender<HostEvent>,
    input: Mutex<Receiver<Word>>,
    breakpoints: Breakpoints,
}

impl TerminalHost {
    /// Creates a new [`TerminalHost`].
    ///
    /// `events` carries the callbacks to the main thread, and `input` carries its answers to
    /// [`HostEvent::InputRequested`].
    pub fn new(events: Sender<HostEvent>, input: Receiver<Word>, breakpoints: Breakpoints) -> Self {
        Self {
            events,
            input: Mutex::new(input),
            breakpoints,
        }
    }

    fn send(&self, event: HostEvent) {
        if self.events.send(event).is_err() {
            warn!("the session ended before the run");
        }
    }
}

impl InputSource for TerminalHost {
    fn read_input_value(&self) -> Word {
        self.send(HostEvent::InputRequested);

        let input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        input.recv().unwrap_or_else(|_| {
            warn!("input closed, reading zero");
            0
        })
    }
}

impl OutputSink for TerminalHost {
    fn print(&self, value: Word) {
        self.send(HostEvent::Output(value));
    }
}

impl Observer for TerminalHost {
    fn is_breakpoint(&self, address: usize) -> bool {
        self.breakpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&address)
    }

    fn on_instruction_executing(&self, address: usize) {
        trace!(address, "executing");
    }

    fn on_suspended(&self, address: usize) {
        self.send(HostEvent::Suspended(address));
    }

    fn on_finished(&self) {
        self.send(HostEvent::Finished);
    }

    fn on_fatal_error(&self, error: &Error) {
        self.send(HostEvent::Fatal(error.clone()));
    }
}
