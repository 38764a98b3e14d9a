//! Defines the [`Cpu`] type, the engine executing programs.
//!
//! More information in the documentation for [`Cpu`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, trace};

use crate::error::Error;
use crate::host::Host;
use crate::instr::{parse_params, Line, Registry, StepContext};
use crate::{ExecutionContext, Mode};

/// An [`ExecutionContext`] shared between the host and the worker thread of a run.
pub type SharedContext = Arc<Mutex<ExecutionContext>>;

/// A listener of the [`Cpu`]'s finished notification.
type FinishedListener = Box<dyn Fn() + Send + Sync>;

/// The Central Processing Unit (CPU) responsible for executing programs.
///
/// By itself, a [`Cpu`] is not enough to execute anything. It has to be bound to an
/// [`ExecutionContext`] with [`Cpu::initialize`] and given a [`Host`] when the run begins.
///
/// # Runs
///
/// [`Cpu::begin_execution`] starts the fetch-decode-execute loop on a dedicated worker thread
/// and returns immediately. The loop stops when the halt marker is reached or when an error
/// occurs. Both outcomes are reported to the host, never returned to the caller. A panic raised
/// by a host callback also ends the run, as an [`Error::Panicked`] fatal error.
///
/// # Suspension
///
/// Before each instruction is dispatched, the engine decides whether to suspend according to
/// the [`Mode`] of the context. When it does, the worker thread blocks until the host calls
/// [`Cpu::resume`] or [`Cpu::switch_to_normal`]. There is no timeout.
///
/// The context is only locked by the worker thread while an instruction is fetched or executed,
/// never while the host is being called back or while the run is suspended.
pub struct Cpu {
    /// The context bound by [`Cpu::initialize`].
    context: Option<SharedContext>,
    /// The instruction registry, built on first initialization and shared by every run.
    registry: Option<Arc<Registry>>,
    /// The state shared with the worker thread.
    control: Arc<Control>,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    /// Creates a new [`Cpu`], not bound to any context.
    pub fn new() -> Self {
        Self {
            context: None,
            registry: None,
            control: Arc::new(Control::new()),
        }
    }

    /// Creates a new [`Cpu`] already bound to `context`.
    pub fn with_context(context: SharedContext) -> Result<Self, Error> {
        let mut cpu = Self::new();
        cpu.initialize(Some(context))?;
        Ok(cpu)
    }

    /// Binds the engine to `context`, building the instruction registry if it has not been
    /// built yet.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `context` is `None`.
    /// - [`Error::AlreadyRunning`] if a run is in progress.
    /// - [`Error::DuplicateMnemonic`] if the built-in instruction table is inconsistent.
    pub fn initialize(&mut self, context: Option<SharedContext>) -> Result<(), Error> {
        let context = context.ok_or(Error::InvalidArgument("missing execution context"))?;

        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        if self.registry.is_none() {
            self.registry = Some(Arc::new(Registry::builtin()?));
        }

        self.context = Some(context);
        Ok(())
    }

    /// Returns the bound context, if any.
    #[inline(always)]
    pub fn context(&self) -> Option<&SharedContext> {
        self.context.as_ref()
    }

    /// Returns the instruction registry, once the engine has been initialized.
    #[inline(always)]
    pub fn registry(&self) -> Option<&Registry> {
        self.registry.as_deref()
    }

    /// Returns whether a run is in progress.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// Registers a listener called every time a run halts cleanly.
    ///
    /// Listeners are called on the worker thread, after the host's
    /// [`on_finished`](crate::host::Observer::on_finished) callback. They must not register
    /// other listeners.
    pub fn on_finished<F>(&self, listener: F)
    where
        F: 'static + Fn() + Send + Sync,
    {
        lock(&self.control.finished).push(Box::new(listener));
    }

    /// Starts executing the bound context on a new worker thread.
    ///
    /// The context is used as is: resetting it between runs is up to the host (see
    /// [`ExecutionContext::reset`]).
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if no context is bound.
    /// - [`Error::AlreadyRunning`] if a previous run has not ended.
    pub fn begin_execution<H>(&self, host: H) -> Result<RunHandle, Error>
    where
        H: 'static + Host + Send,
    {
        let (Some(context), Some(registry)) = (self.context.clone(), self.registry.clone())
        else {
            return Err(Error::InvalidArgument("the engine is not initialized"));
        };

        if self.control.running.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }

        self.control.drain_resumes();
        self.control.run_to_end.store(false, Ordering::Release);

        let worker = Worker {
            context,
            registry,
            control: Arc::clone(&self.control),
            host,
        };

        Ok(RunHandle {
            thread: thread::spawn(move || worker.main()),
        })
    }

    /// Returns a handle able to control the runs of this engine from any thread, including
    /// from within the host's callbacks.
    pub fn controller(&self) -> Result<Controller, Error> {
        let context = self
            .context
            .clone()
            .ok_or(Error::InvalidArgument("missing execution context"))?;

        Ok(Controller {
            context,
            control: Arc::clone(&self.control),
        })
    }

    /// Lets a suspended run execute its next instruction.
    ///
    /// Resuming while the run is not suspended has no effect, and neither does resuming twice
    /// the same suspension.
    #[inline]
    pub fn resume(&self) {
        self.control.resume();
    }

    /// Switches the bound context to [`Mode::Normal`] and releases a pending suspension.
    ///
    /// When called during a run, the rest of the run ignores breakpoints.
    pub fn switch_to_normal(&self) {
        if let Some(context) = &self.context {
            set_mode(context, &self.control, Mode::Normal);
        }
    }

    /// Switches the bound context to [`Mode::Debug`].
    pub fn switch_to_debug(&self) {
        if let Some(context) = &self.context {
            set_mode(context, &self.control, Mode::Debug);
        }
    }

    /// Switches the bound context to [`Mode::Normal`] and releases a pending suspension, keeping
    /// breakpoints active.
    ///
    /// Unlike [`Cpu::switch_to_normal`], the run stops again at the next breakpoint.
    pub fn continue_execution(&self) {
        if let Some(context) = &self.context {
            continue_execution(context, &self.control);
        }
    }

    /// Returns the mode of the bound context.
    pub fn mode(&self) -> Option<Mode> {
        self.context.as_ref().map(|context| lock(context).mode)
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("bound", &self.context.is_some())
            .field("registry", &self.registry)
            .field("running", &self.is_running())
            .finish()
    }
}

/// A cloneable handle controlling the runs of a [`Cpu`].
#[derive(Clone)]
pub struct Controller {
    context: SharedContext,
    control: Arc<Control>,
}

impl Controller {
    /// See [`Cpu::resume`].
    #[inline]
    pub fn resume(&self) {
        self.control.resume();
    }

    /// See [`Cpu::switch_to_normal`].
    pub fn switch_to_normal(&self) {
        set_mode(&self.context, &self.control, Mode::Normal);
    }

    /// See [`Cpu::switch_to_debug`].
    pub fn switch_to_debug(&self) {
        set_mode(&self.context, &self.control, Mode::Debug);
    }

    /// See [`Cpu::continue_execution`].
    pub fn continue_execution(&self) {
        continue_execution(&self.context, &self.control);
    }

    /// Returns the current mode of the context.
    pub fn mode(&self) -> Mode {
        lock(&self.context).mode
    }

    /// Returns whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.control.running.load(Ordering::Acquire)
    }

    /// Calls `f` with the context locked.
    ///
    /// This is meant for display purposes. Must not be called from the
    /// [`InputSource`](crate::host::InputSource) callback, during which the worker thread
    /// holds the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&ExecutionContext) -> R) -> R {
        f(&*lock(&self.context))
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// The handle of the worker thread of a run.
///
/// Dropping it detaches the thread. Completion is reported to the host whether or not the
/// handle is joined.
#[derive(Debug)]
pub struct RunHandle {
    thread: JoinHandle<()>,
}

impl RunHandle {
    /// Waits for the run to end.
    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }

    /// Returns whether the worker thread has ended.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }
}

/// The state shared between a [`Cpu`], its [`Controller`]s and the worker thread.
struct Control {
    /// Sending half of the single-slot resume signal.
    resume_tx: SyncSender<()>,
    /// Receiving half of the resume signal, only ever waited on by the worker thread.
    resume_rx: Mutex<Receiver<()>>,
    /// Whether the worker thread is suspended and no resume signal has been sent for it yet.
    suspended: Mutex<bool>,
    /// Whether a run is in progress.
    running: AtomicBool,
    /// Set when the host switched to [`Mode::Normal`] during the current run. Breakpoints are
    /// ignored until the run ends or the mode goes back to [`Mode::Debug`].
    run_to_end: AtomicBool,
    /// The listeners of the finished notification.
    finished: Mutex<Vec<FinishedListener>>,
}

impl Control {
    fn new() -> Self {
        let (resume_tx, resume_rx) = mpsc::sync_channel(1);

        Self {
            resume_tx,
            resume_rx: Mutex::new(resume_rx),
            suspended: Mutex::new(false),
            running: AtomicBool::new(false),
            run_to_end: AtomicBool::new(false),
            finished: Mutex::new(Vec::new()),
        }
    }

    fn resume(&self) {
        let mut suspended = lock(&self.suspended);
        if *suspended {
            // The slot is empty until the one signal of this suspension is sent.
            let _ = self.resume_tx.try_send(());
            *suspended = false;
        }
    }

    /// Marks the worker thread as suspended. Resume signals are only delivered from then on.
    fn suspend(&self) {
        *lock(&self.suspended) = true;
    }

    /// Discards the state left over from a previous run.
    fn drain_resumes(&self) {
        *lock(&self.suspended) = false;
        while lock(&self.resume_rx).try_recv().is_ok() {}
    }

    /// Blocks until a resume signal is received.
    fn wait(&self) {
        // `self` holds the sender, so the channel cannot be disconnected.
        let _ = lock(&self.resume_rx).recv();
    }

    fn notify_finished(&self) {
        for listener in lock(&self.finished).iter() {
            listener();
        }
    }
}

fn set_mode(context: &SharedContext, control: &Control, mode: Mode) {
    lock(context).mode = mode;
    debug!(?mode, "execution mode switched");

    match mode {
        Mode::Normal => {
            control.run_to_end.store(true, Ordering::Release);
            control.resume();
        }
        Mode::Debug => control.run_to_end.store(false, Ordering::Release),
    }
}

fn continue_execution(context: &SharedContext, control: &Control) {
    lock(context).mode = Mode::Normal;
    control.run_to_end.store(false, Ordering::Release);
    debug!("continuing to the next breakpoint");
    control.resume();
}

/// Locks a mutex, ignoring poisoning.
///
/// The data protected by the engine's mutexes stays consistent even if a host callback panics.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A line fetched from the instructions region, detached from the context.
enum Fetched {
    /// The halt marker.
    Halt,
    /// A line the engine skips.
    Skip,
    /// An instruction to dispatch.
    Dispatch {
        /// The address of the line.
        address: usize,
        /// The mnemonic, as written in the program.
        mnemonic: String,
        /// The raw parameter tokens.
        operands: Vec<String>,
    },
}

/// Fetches and decodes the line the **Program Counter** of `context` points to.
fn fetch(context: &ExecutionContext) -> Result<Fetched, Error> {
    let address = context.pc.get();

    Ok(match Line::decode(context.fetch()?) {
        Line::Halt => Fetched::Halt,
        Line::NoOp => Fetched::Skip,
        Line::Op { mnemonic, operands } => Fetched::Dispatch {
            address,
            mnemonic: mnemonic.to_owned(),
            operands: operands.into_iter().map(str::to_owned).collect(),
        },
    })
}

/// The state owned by the worker thread of a run.
struct Worker<H> {
    context: SharedContext,
    registry: Arc<Registry>,
    control: Arc<Control>,
    host: H,
}

impl<H: Host> Worker<H> {
    /// The entry point of the worker thread.
    fn main(self) {
        info!(
            instructions = lock(&self.context).memory.instructions().len(),
            "run started"
        );

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run()))
            .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(&*payload))));
        self.control.running.store(false, Ordering::Release);

        match result {
            Ok(()) => {
                info!("run finished");
                self.host.on_finished();
                self.control.notify_finished();
            }
            Err(err) => {
                error!(%err, "run aborted");
                self.host.on_fatal_error(&err);
            }
        }
    }

    /// The fetch-decode-execute loop.
    fn run(&self) -> Result<(), Error> {
        loop {
            let fetched = {
                let mut context = lock(&self.context);
                let fetched = fetch(&context)?;

                if let Fetched::Skip = fetched {
                    context.pc.increment();
                    continue;
                }

                fetched
            };

            let Fetched::Dispatch {
                address,
                mnemonic,
                operands,
            } = fetched
            else {
                return Ok(());
            };

            self.host.on_instruction_executing(address);
            self.checkpoint(address);

            let instruction = self
                .registry
                .get(&mnemonic)
                .ok_or(Error::UnknownInstruction(mnemonic))?;
            let params = parse_params(&operands, address)?;

            {
                let mut context = lock(&self.context);
                trace!(address, mnemonic = instruction.mnemonic(), ?params, "dispatch");
                instruction.run(&mut StepContext::new(&mut context, &params, &self.host))?;
            }

            self.host.on_instruction_executed(address);
        }
    }

    /// Suspends the worker thread if the current mode requires it.
    fn checkpoint(&self, address: usize) {
        let mode = lock(&self.context).mode;

        let suspend = match mode {
            Mode::Debug => true,
            Mode::Normal if self.control.run_to_end.load(Ordering::Acquire) => false,
            Mode::Normal if self.host.is_breakpoint(address) => {
                debug!(address, "breakpoint hit");
                lock(&self.context).mode = Mode::Debug;
                true
            }
            Mode::Normal => false,
        };

        if suspend {
            debug!(address, "suspended");
            self.control.suspend();
            self.host.on_suspended(address);
            self.control.wait();
        }
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
