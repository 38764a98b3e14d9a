//! # stackasm
//!
//! An interpreter for a small stack-based instructional assembly language.
//!
//! A program is a list of text lines, each holding one mnemonic and at most one integer
//! parameter. The interpreter executes them one at a time against an [`ExecutionContext`] and
//! lets a host pause the execution between any two instructions, either because a breakpoint
//! was hit or because the host is stepping through the program.
//!
//! # Components
//!
//! - [`Memory`]: the instructions region (the program's lines) and the stack region (the
//!   [`OperandStack`](memory::OperandStack)).
//!
//! - [`ProgramCounter`]: the index of the next line to fetch.
//!
//! - [`Instruction`](instr::Instruction): the behavior of a single opcode, looked up by mnemonic
//!   in the [`Registry`](instr::Registry).
//!
//! - [`Cpu`]: the engine, running the fetch-decode-execute loop on a worker thread and talking
//!   to the [`Host`](host::Host).

#![warn(missing_docs, missing_debug_implementations)]
#![deny(unsafe_code)]

use num_traits::ToPrimitive;

use error::Error;
use memory::Memory;
use pc::ProgramCounter;

pub use cpu::{Controller, Cpu, RunHandle, SharedContext};

pub mod cpu;
pub mod error;
pub mod host;
pub mod instr;
pub mod memory;
pub mod pc;

/// The only operand type of the machine.
pub type Word = i64;

/// How the engine decides whether to suspend before an instruction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Suspend only before instructions flagged as breakpoints by the host.
    ///
    /// Hitting a breakpoint switches the mode to [`Mode::Debug`].
    #[default]
    Normal,
    /// Suspend before every instruction.
    Debug,
}

/// Contains the full state of a run: memory, **Program Counter** and execution mode.
///
/// A context is created by the host, bound to a [`Cpu`], and mutated by the engine and the
/// instructions it executes. Between runs it is brought back to its initial state with
/// [`ExecutionContext::reset`].
#[derive(Debug, Default)]
pub struct ExecutionContext {
    /// The memory of the machine.
    pub memory: Memory,
    /// The index of the next instruction.
    pub pc: ProgramCounter,
    /// The current execution mode.
    pub mode: Mode,
}

impl ExecutionContext {
    /// Creates a new [`ExecutionContext`] running the program held by `memory`, starting in
    /// [`Mode::Normal`].
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            pc: ProgramCounter::new(),
            mode: Mode::Normal,
        }
    }

    /// Creates a new [`ExecutionContext`] from the lines of a program.
    pub fn with_program<I, S>(program: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Memory::new(program))
    }

    /// Prepares the context for a new run: the stack is cleared and the **Program Counter**
    /// goes back to the first instruction. The instructions region and the mode are kept.
    pub fn reset(&mut self) {
        self.memory.stack_mut().clear();
        self.pc.reset();
    }

    /// Returns the raw line the **Program Counter** points to.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidProgramCounter`] when the counter is past the end of the program.
    pub fn fetch(&self) -> Result<&str, Error> {
        let pc = self.pc.get();
        let len = self.memory.instructions().len();

        let invalid = || Error::InvalidProgramCounter {
            pc: pc.to_i64().unwrap_or(Word::MAX),
            len,
        };

        if pc > len {
            return Err(invalid());
        }

        // A counter equal to the length passes the check above but has no line to read.
        self.memory.instruction(pc).ok_or_else(invalid)
    }

    /// Sets the **Program Counter** to the address held by an operand.
    pub fn jump_to(&mut self, target: Word) -> Result<(), Error> {
        let len = self.memory.instructions().len();
        self.pc.jump_to_word(target, len)
    }
}
