use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use stackasm_vm::error::Error;
use stackasm_vm::host::{InputSource, Observer, OutputSink};
use stackasm_vm::memory::{OperandStack, StackChange};
use stackasm_vm::{Controller, Cpu, ExecutionContext, Mode, SharedContext, Word};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Executing(usize),
    Suspended(usize),
    Executed(usize),
    Printed(Word),
    Finished,
    Fatal(Error),
}

/// What the recording host does when the engine suspends.
#[derive(Debug, Clone, Copy)]
enum OnSuspend {
    /// Resume right away.
    Resume,
    /// Switch to normal mode after the given number of suspensions, resume before that.
    RunToEndAfter(usize),
    /// Continue to the next breakpoint after the given number of suspensions, resume before that.
    ContinueAfter(usize),
    /// Do nothing; the test resumes the run itself.
    Hold,
}

#[derive(Clone)]
struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
    input: Arc<Mutex<VecDeque<Word>>>,
    breakpoints: Arc<HashSet<usize>>,
    mode_switches: Arc<Vec<(usize, Mode)>>,
    suspensions: Arc<AtomicUsize>,
    on_suspend: OnSuspend,
    controller: Controller,
}

impl Recorder {
    fn new(cpu: &Cpu, on_suspend: OnSuspend) -> Self {
        Self {
            events: Arc::default(),
            input: Arc::default(),
            breakpoints: Arc::default(),
            mode_switches: Arc::default(),
            suspensions: Arc::default(),
            on_suspend,
            controller: cpu.controller().unwrap(),
        }
    }

    fn with_breakpoints(mut self, breakpoints: &[usize]) -> Self {
        self.breakpoints = Arc::new(breakpoints.iter().copied().collect());
        self
    }

    /// Switches the mode from `on_instruction_executing` at the given addresses.
    fn with_mode_switches(mut self, switches: &[(usize, Mode)]) -> Self {
        self.mode_switches = Arc::new(switches.to_vec());
        self
    }

    fn with_input(self, values: &[Word]) -> Self {
        self.input.lock().unwrap().extend(values);
        self
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn printed(&self) -> Vec<Word> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Printed(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    fn suspended_at(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Suspended(address) => Some(address),
                _ => None,
            })
            .collect()
    }

    fn executed_at(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Executing(address) => Some(address),
                _ => None,
            })
            .collect()
    }

    fn last(&self) -> Option<Event> {
        self.events().last().cloned()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl InputSource for Recorder {
    fn read_input_value(&self) -> Word {
        self.input.lock().unwrap().pop_front().unwrap_or(0)
    }
}

impl OutputSink for Recorder {
    fn print(&self, value: Word) {
        self.push(Event::Printed(value));
    }
}

impl Observer for Recorder {
    fn is_breakpoint(&self, address: usize) -> bool {
        self.breakpoints.contains(&address)
    }

    fn on_instruction_executing(&self, address: usize) {
        self.push(Event::Executing(address));

        for &(at, mode) in self.mode_switches.iter() {
            match mode {
                Mode::Normal if at == address => self.controller.switch_to_normal(),
                Mode::Debug if at == address => self.controller.switch_to_debug(),
                _ => (),
            }
        }
    }

    fn on_suspended(&self, address: usize) {
        self.push(Event::Suspended(address));
        let count = self.suspensions.fetch_add(1, Ordering::SeqCst) + 1;

        match self.on_suspend {
            OnSuspend::Resume => self.controller.resume(),
            OnSuspend::RunToEndAfter(n) if count >= n => self.controller.switch_to_normal(),
            OnSuspend::RunToEndAfter(_) => self.controller.resume(),
            OnSuspend::ContinueAfter(n) if count >= n => self.controller.continue_execution(),
            OnSuspend::ContinueAfter(_) => self.controller.resume(),
            OnSuspend::Hold => (),
        }
    }

    fn on_instruction_executed(&self, address: usize) {
        self.push(Event::Executed(address));
    }

    fn on_finished(&self) {
        self.push(Event::Finished);
    }

    fn on_fatal_error(&self, error: &Error) {
        self.push(Event::Fatal(error.clone()));
    }
}

fn shared(program: &[&str]) -> SharedContext {
    Arc::new(Mutex::new(ExecutionContext::with_program(
        program.iter().copied(),
    )))
}

fn engine(program: &[&str]) -> (Cpu, SharedContext) {
    let context = shared(program);
    let cpu = Cpu::with_context(Arc::clone(&context)).unwrap();
    (cpu, context)
}

fn run(cpu: &Cpu, host: &Recorder) {
    cpu.begin_execution(host.clone()).unwrap().join().unwrap();
}

fn stack_of(context: &SharedContext) -> Vec<Word> {
    context.lock().unwrap().memory.stack().as_slice().to_vec()
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn halt_only_program() {
    let (cpu, context) = engine(&["HLT"]);

    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    {
        let mut context = context.lock().unwrap();
        context
            .memory
            .stack_mut()
            .subscribe(move |change: StackChange, _: &OperandStack| {
                sink.lock().unwrap().push(change)
            });
        context.reset();
    }

    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(host.events(), [Event::Finished]);
    assert_eq!(*changes.lock().unwrap(), [StackChange::Cleared]);
    assert!(!cpu.is_running());
}

#[test]
fn arithmetic_program() {
    let (cpu, context) = engine(&[
        "PUSH 6", "PUSH 7", "MUL", "DUP", "PRINT", "PUSH 2", "SUB", "PRINT", "HLT",
    ]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(host.printed(), [42, 40]);
    assert_eq!(host.last(), Some(Event::Finished));
    assert!(stack_of(&context).is_empty());
}

#[test]
fn ceq_program() {
    let (cpu, context) = engine(&[
        "PUSH 9", "PUSH 5", "PUSH 5", "CEQ", "PUSH 3", "PUSH 7", "ceq", "HLT",
    ]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(stack_of(&context), [9, 1, 0]);
}

#[test]
fn callbacks_bracket_each_dispatch() {
    let (cpu, _) = engine(&["PUSH 1", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(
        host.events(),
        [
            Event::Executing(0),
            Event::Executed(0),
            Event::Executing(1),
            Event::Printed(1),
            Event::Executed(1),
            Event::Finished,
        ]
    );
}

#[test]
fn blank_and_noop_lines_are_skipped() {
    let (cpu, context) = engine(&["", "NOP", "PUSH 4", "L1 NOP", "  ", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(host.executed_at(), [2]);
    assert_eq!(stack_of(&context), [4]);
    assert_eq!(host.last(), Some(Event::Finished));
}

#[test]
fn countdown_loop() {
    // Prints 3, 2, 1.
    let (cpu, _) = engine(&[
        "PUSH 3", // 0
        "NOP",    // 1: loop
        "DUP",    // 2
        "JPF 9",  // 3
        "DUP",    // 4
        "PRINT",  // 5
        "PUSH 1", // 6
        "SUB",    // 7
        "JMP 1",  // 8
        "HLT",    // 9
    ]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(host.printed(), [3, 2, 1]);
    assert_eq!(host.last(), Some(Event::Finished));
}

#[test]
fn input_program() {
    let (cpu, _) = engine(&["READ", "READ", "ADD", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume).with_input(&[20, 22]);
    run(&cpu, &host);

    assert_eq!(host.printed(), [42]);
}

#[test]
fn jump_past_the_end() {
    for mode in [Mode::Normal, Mode::Debug] {
        let (cpu, context) = engine(&["JMP 7", "HLT"]);
        context.lock().unwrap().mode = mode;

        let host = Recorder::new(&cpu, OnSuspend::Resume);
        run(&cpu, &host);

        assert_eq!(
            host.last(),
            Some(Event::Fatal(Error::InvalidProgramCounter { pc: 7, len: 2 }))
        );
    }
}

#[test]
fn running_off_the_end() {
    let (cpu, _) = engine(&["PUSH 1", "POP"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(
        host.last(),
        Some(Event::Fatal(Error::InvalidProgramCounter { pc: 2, len: 2 }))
    );
}

#[test]
fn unknown_instruction() {
    let (cpu, context) = engine(&["PUSH 1", "PUSH 2", "FROB", "ADD", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(
        host.last(),
        Some(Event::Fatal(Error::UnknownInstruction("FROB".into())))
    );
    assert_eq!(stack_of(&context), [1, 2]);
    assert_eq!(context.lock().unwrap().pc.get(), 2);
    assert!(!host.events().contains(&Event::Executed(2)));
}

#[test]
fn unknown_instruction_with_operands() {
    let (cpu, context) = engine(&["PUSH 1", "FROB x", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(
        host.last(),
        Some(Event::Fatal(Error::UnknownInstruction("FROB".into())))
    );
    assert_eq!(stack_of(&context), [1]);
}

#[test]
fn instruction_faults_are_fatal() {
    let (cpu, _) = engine(&["PUSH 1", "PUSH 0", "DIV", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);
    assert_eq!(host.last(), Some(Event::Fatal(Error::DivisionByZero)));
    assert!(host.printed().is_empty());

    let (cpu, _) = engine(&["POP", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);
    assert_eq!(host.last(), Some(Event::Fatal(Error::StackUnderflow)));

    let (cpu, _) = engine(&["PUSH one", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);
    assert_eq!(
        host.last(),
        Some(Event::Fatal(Error::InvalidParameter {
            token: "one".into(),
            line: 0,
        }))
    );
}

#[test]
fn normal_mode_never_suspends_without_breakpoints() {
    let (cpu, _) = engine(&["PUSH 1", "PUSH 2", "ADD", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert!(host.suspended_at().is_empty());
    assert_eq!(host.printed(), [3]);
}

#[test]
fn debug_mode_suspends_before_every_dispatch() {
    let (cpu, _) = engine(&["PUSH 1", "", "PUSH 2", "ADD", "PRINT", "HLT"]);
    cpu.switch_to_debug();

    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(host.suspended_at(), [0, 2, 3, 4]);
    assert_eq!(host.suspended_at(), host.executed_at());

    // Every suspension directly follows the executing callback of its instruction.
    let events = host.events();
    for (i, event) in events.iter().enumerate() {
        if let Event::Suspended(address) = event {
            assert_eq!(events[i - 1], Event::Executing(*address));
        }
    }
    assert_eq!(host.printed(), [3]);
}

#[test]
fn breakpoint_switches_to_debug() {
    let (cpu, context) = engine(&["PUSH 1", "PUSH 2", "ADD", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume).with_breakpoints(&[2]);
    run(&cpu, &host);

    assert_eq!(host.suspended_at(), [2, 3]);
    assert_eq!(context.lock().unwrap().mode, Mode::Debug);
    assert_eq!(host.printed(), [3]);
}

#[test]
fn switch_to_normal_runs_to_the_end() {
    let (cpu, context) = engine(&["PUSH 1", "PUSH 2", "ADD", "PRINT", "HLT"]);
    cpu.switch_to_debug();

    let host = Recorder::new(&cpu, OnSuspend::RunToEndAfter(2)).with_breakpoints(&[3]);
    run(&cpu, &host);

    assert_eq!(host.suspended_at(), [0, 1]);
    assert_eq!(host.printed(), [3]);
    assert_eq!(host.last(), Some(Event::Finished));
    assert_eq!(context.lock().unwrap().mode, Mode::Normal);
}

#[test]
fn continue_stops_at_the_next_breakpoint() {
    let (cpu, context) = engine(&["PUSH 1", "PUSH 2", "ADD", "PRINT", "HLT"]);
    cpu.switch_to_debug();

    let host = Recorder::new(&cpu, OnSuspend::ContinueAfter(1)).with_breakpoints(&[3]);
    run(&cpu, &host);

    assert_eq!(host.suspended_at(), [0, 3]);
    assert_eq!(host.printed(), [3]);
    assert_eq!(host.last(), Some(Event::Finished));
    assert_eq!(context.lock().unwrap().mode, Mode::Normal);
}

#[test]
fn held_run_waits_for_resume() {
    let (cpu, context) = engine(&["PUSH 5", "PRINT", "HLT"]);
    cpu.switch_to_debug();

    // Resume signals left over from before the run are discarded.
    cpu.resume();
    cpu.resume();

    let host = Recorder::new(&cpu, OnSuspend::Hold);
    let handle = cpu.begin_execution(host.clone()).unwrap();

    wait_until(|| host.suspended_at() == [0]);
    thread::sleep(Duration::from_millis(20));
    assert!(cpu.is_running());
    assert!(stack_of(&context).is_empty());
    assert_eq!(host.suspended_at(), [0]);
    assert_eq!(cpu.begin_execution(host.clone()).unwrap_err(), Error::AlreadyRunning);

    cpu.resume();
    wait_until(|| host.suspended_at() == [0, 1]);
    assert_eq!(stack_of(&context), [5]);
    assert!(!handle.is_finished());

    cpu.switch_to_normal();
    handle.join().unwrap();

    assert_eq!(host.printed(), [5]);
    assert_eq!(host.last(), Some(Event::Finished));
}

#[test]
fn restart_after_reset() {
    let (cpu, context) = engine(&["READ", "PUSH 2", "MUL", "PRINT", "HLT"]);
    let host = Recorder::new(&cpu, OnSuspend::Resume).with_input(&[4, 10]);

    run(&cpu, &host);
    context.lock().unwrap().reset();
    run(&cpu, &host);

    assert_eq!(host.printed(), [8, 20]);
}

#[test]
fn finished_listeners() {
    let (cpu, _) = engine(&["HLT"]);
    let calls = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        cpu.on_finished(move || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn finished_listeners_ignore_fatal_errors() {
    let (cpu, _) = engine(&["POP"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    cpu.on_finished(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let host = Recorder::new(&cpu, OnSuspend::Resume);
    run(&cpu, &host);

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(host.last(), Some(Event::Fatal(Error::StackUnderflow)));
}

#[test]
fn resume_without_suspension_is_dropped() {
    let (cpu, context) = engine(&["PUSH 1", "PUSH 2", "ADD", "PRINT", "HLT"]);

    // Switching to normal mode while the run is not suspended must not let a later debug
    // suspension through.
    let host = Recorder::new(&cpu, OnSuspend::Hold)
        .with_mode_switches(&[(0, Mode::Normal), (2, Mode::Debug)]);
    let handle = cpu.begin_execution(host.clone()).unwrap();

    wait_until(|| host.suspended_at() == [2]);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(host.suspended_at(), [2]);
    assert!(!host.events().contains(&Event::Executed(2)));
    assert_eq!(stack_of(&context), [1, 2]);

    cpu.resume();
    wait_until(|| host.suspended_at() == [2, 3]);
    assert_eq!(stack_of(&context), [3]);

    cpu.switch_to_normal();
    handle.join().unwrap();
    assert_eq!(host.printed(), [3]);
}

/// A host whose input source panics.
struct PanickingInput {
    fatal: Arc<Mutex<Option<Error>>>,
}

impl InputSource for PanickingInput {
    fn read_input_value(&self) -> Word {
        panic!("keyboard unplugged")
    }
}

impl OutputSink for PanickingInput {
    fn print(&self, _value: Word) {}
}

impl Observer for PanickingInput {
    fn on_fatal_error(&self, error: &Error) {
        *self.fatal.lock().unwrap() = Some(error.clone());
    }
}

#[test]
fn host_panics_end_the_run() {
    let (cpu, context) = engine(&["READ", "HLT"]);
    let fatal = Arc::new(Mutex::new(None));

    let host = PanickingInput {
        fatal: Arc::clone(&fatal),
    };
    cpu.begin_execution(host).unwrap().join().unwrap();

    assert!(!cpu.is_running());
    assert_eq!(
        *fatal.lock().unwrap(),
        Some(Error::Panicked("keyboard unplugged".into()))
    );

    // The panic happened with the context locked.
    context
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .reset();

    let host = Recorder::new(&cpu, OnSuspend::Resume).with_input(&[4]);
    run(&cpu, &host);
    assert_eq!(host.last(), Some(Event::Finished));
}

#[test]
fn uninitialized_engine() {
    let mut cpu = Cpu::new();
    assert!(matches!(
        cpu.begin_execution(stackasm_vm::host::NullHost),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(cpu.controller(), Err(Error::InvalidArgument(_))));
    assert!(matches!(cpu.initialize(None), Err(Error::InvalidArgument(_))));
    assert!(cpu.registry().is_none());

    cpu.initialize(Some(shared(&["HLT"]))).unwrap();
    assert!(cpu.registry().is_some());
    cpu.begin_execution(stackasm_vm::host::NullHost)
        .unwrap()
        .join()
        .unwrap();
}
