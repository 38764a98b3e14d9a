//! The control loop of the terminal runner.
//!
//! A [`Session`] owns the engine and runs on the main thread. It starts the program, then
//! reacts to the [`HostEvent`]s sent by the worker thread until the run ends: values are
//! printed, input requests are answered, and suspensions open the interactive debugger.

use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{anyhow, bail};
use stackasm_vm::error::Error;
use stackasm_vm::memory::{OperandStack, StackChange};
use stackasm_vm::{Controller, Cpu, ExecutionContext, Mode, Word};
use tracing::{debug, trace};

use crate::config::Config;
use crate::host::{Breakpoints, HostEvent, TerminalHost};

const HELP: &str = "\
commands:
  s, step       execute the next instruction
  c, continue   run until the next breakpoint
  r, run        run to the end, ignoring breakpoints
  p, stack      print the stack, bottom to top
  b N           toggle the breakpoint on line N
  b             list the breakpoints
  h, help       print this message
  q, quit       stop the program";

/// The prompt shown when the program reads a value.
const INPUT_PROMPT: &str = "input> ";

/// How a run ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The program reached the halt marker.
    Finished,
    /// The run was aborted by an error.
    Failed(Error),
    /// The user quit from the debugger.
    Quit,
}

/// A debugger command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Step,
    Continue,
    Run,
    Stack,
    Toggle(usize),
    List,
    Help,
    Quit,
}

impl Command {
    fn parse(input: &str) -> Result<Self, String> {
        let mut words = input.split_whitespace();

        let command = match words.next() {
            None | Some("s" | "step") => Self::Step,
            Some("c" | "continue") => Self::Continue,
            Some("r" | "run") => Self::Run,
            Some("p" | "stack") => Self::Stack,
            Some("h" | "help") => Self::Help,
            Some("q" | "quit") => Self::Quit,
            Some("b" | "break") => match words.next() {
                None => Self::List,
                Some(line) => Self::Toggle(
                    line.parse()
                        .map_err(|_| format!("invalid line number: {line}"))?,
                ),
            },
            Some(other) => return Err(format!("unknown command: {other} (try `help`)")),
        };

        match words.next() {
            Some(extra) => Err(format!("unexpected argument: {extra}")),
            None => Ok(command),
        }
    }
}

/// What the event loop does once the debugger returns.
enum Flow {
    Proceed,
    Quit,
}

/// Runs one program against a terminal.
#[derive(Debug)]
pub struct Session<R, W> {
    cpu: Cpu,
    controller: Controller,
    breakpoints: Breakpoints,
    debug: bool,
    prompt: String,
    reader: R,
    writer: W,
}

impl<R: BufRead, W: Write> Session<R, W> {
    /// Creates a new [`Session`] for `program`.
    ///
    /// Commands and input values are read from `reader`. Program output and debugger messages
    /// are written to `writer`.
    pub fn new(
        program: Vec<String>,
        config: &Config,
        reader: R,
        writer: W,
    ) -> anyhow::Result<Self> {
        let mut context = ExecutionContext::with_program(program);
        context
            .memory
            .stack_mut()
            .subscribe(|change: StackChange, stack: &OperandStack| {
                trace!(?change, len = stack.len(), "stack changed");
            });

        let cpu = Cpu::with_context(Arc::new(Mutex::new(context)))?;
        let controller = cpu.controller()?;

        Ok(Self {
            cpu,
            controller,
            breakpoints: Arc::new(RwLock::new(config.breakpoints.iter().copied().collect())),
            debug: config.debug,
            prompt: config.prompt().to_owned(),
            reader,
            writer,
        })
    }

    /// Runs the program to its end, or until the user quits.
    pub fn run(&mut self) -> anyhow::Result<Outcome> {
        let (events_tx, events) = mpsc::channel();
        let (input, input_rx) = mpsc::channel();
        let host = TerminalHost::new(events_tx, input_rx, Arc::clone(&self.breakpoints));

        let mode = if self.debug { Mode::Debug } else { Mode::Normal };
        if let Some(context) = self.cpu.context() {
            let mut context = context.lock().unwrap_or_else(PoisonError::into_inner);
            context.reset();
            context.mode = mode;
        }

        let handle = self.cpu.begin_execution(host)?;
        debug!(?mode, "session started");

        loop {
            let event = events
                .recv()
                .map_err(|_| anyhow!("the engine stopped without reporting"))?;

            match event {
                HostEvent::Suspended(address) => {
                    if let Flow::Quit = self.debugger(address)? {
                        debug!(address, "quit from the debugger");
                        return Ok(Outcome::Quit);
                    }
                }
                HostEvent::Output(value) => writeln!(self.writer, "{value}")?,
                HostEvent::InputRequested => {
                    let value = self.read_value()?;
                    input
                        .send(value)
                        .map_err(|_| anyhow!("the engine stopped while reading a value"))?;
                }
                HostEvent::Finished => {
                    handle
                        .join()
                        .map_err(|_| anyhow!("the engine thread panicked"))?;
                    return Ok(Outcome::Finished);
                }
                HostEvent::Fatal(error) => {
                    writeln!(self.writer, "error: {error}")?;
                    handle
                        .join()
                        .map_err(|_| anyhow!("the engine thread panicked"))?;
                    return Ok(Outcome::Failed(error));
                }
            }
        }
    }

    /// Prompts for commands while the run is suspended before `address`.
    fn debugger(&mut self, address: usize) -> anyhow::Result<Flow> {
        // The worker thread does not hold the context while suspended.
        let line = self.controller.inspect(|context| {
            context
                .memory
                .instruction(address)
                .unwrap_or_default()
                .to_owned()
        });
        writeln!(self.writer, "{address:>4} | {line}")?;

        loop {
            let Some(input) = ask(&mut self.reader, &mut self.writer, &self.prompt)? else {
                self.controller.switch_to_normal();
                return Ok(Flow::Proceed);
            };

            match Command::parse(&input) {
                Ok(Command::Step) => {
                    self.controller.resume();
                    return Ok(Flow::Proceed);
                }
                Ok(Command::Continue) => {
                    self.controller.continue_execution();
                    return Ok(Flow::Proceed);
                }
                Ok(Command::Run) => {
                    self.controller.switch_to_normal();
                    return Ok(Flow::Proceed);
                }
                Ok(Command::Quit) => return Ok(Flow::Quit),
                Ok(Command::Stack) => {
                    let stack = self
                        .controller
                        .inspect(|context| context.memory.stack().as_slice().to_vec());
                    self.print_stack(&stack)?;
                }
                Ok(Command::Toggle(line)) => self.toggle_breakpoint(line)?,
                Ok(Command::List) => {
                    let breakpoints = self
                        .breakpoints
                        .read()
                        .unwrap_or_else(PoisonError::into_inner);
                    if breakpoints.is_empty() {
                        writeln!(self.writer, "no breakpoints")?;
                    } else {
                        let lines: Vec<String> =
                            breakpoints.iter().map(usize::to_string).collect();
                        writeln!(self.writer, "breakpoints: {}", lines.join(", "))?;
                    }
                }
                Ok(Command::Help) => writeln!(self.writer, "{HELP}")?,
                Err(message) => writeln!(self.writer, "{message}")?,
            }
        }
    }

    fn print_stack(&mut self, stack: &[Word]) -> io::Result<()> {
        if stack.is_empty() {
            writeln!(self.writer, "(empty)")
        } else {
            writeln!(self.writer, "{stack:?}")
        }
    }

    fn toggle_breakpoint(&mut self, line: usize) -> io::Result<()> {
        let len = self
            .controller
            .inspect(|context| context.memory.instructions().len());
        if line >= len {
            return writeln!(self.writer, "line {line} is past the end of the program");
        }

        let mut breakpoints = self
            .breakpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if breakpoints.remove(&line) {
            writeln!(self.writer, "breakpoint removed from line {line}")
        } else {
            breakpoints.insert(line);
            writeln!(self.writer, "breakpoint set on line {line}")
        }
    }

    /// Prompts until the user types an integer.
    fn read_value(&mut self) -> anyhow::Result<Word> {
        loop {
            let Some(input) = ask(&mut self.reader, &mut self.writer, INPUT_PROMPT)? else {
                bail!("standard input closed while the program was reading a value");
            };

            match input.trim().parse() {
                Ok(value) => return Ok(value),
                Err(_) => writeln!(self.writer, "not an integer: {}", input.trim())?,
            }
        }
    }
}

/// Prints `prompt` and reads one line. Returns `None` at the end of the input.
fn ask<R, W>(reader: &mut R, writer: &mut W, prompt: &str) -> io::Result<Option<String>>
where
    R: BufRead,
    W: Write,
{
    write!(writer, "{prompt}")?;
    writer.flush()?;

    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }

    Ok(Some(line.trim_end().to_owned()))
}
