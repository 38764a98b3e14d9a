//! Defines the [`OperandStack`] type.

use std::fmt;

use crate::error::Error;
use crate::Word;

/// The reason attached to a change notification emitted by an [`OperandStack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackChange {
    /// The stack has been emptied.
    Cleared,
    /// A value was pushed, occupying the given index.
    Inserted(usize),
    /// The cursor moved one position down.
    Popped,
    /// The value at the given index was replaced in place.
    Pushed(usize),
}

/// Receives the change notifications of an [`OperandStack`].
///
/// Listeners are called synchronously, on whatever thread mutates the stack (the worker thread
/// of the [`Cpu`](crate::cpu::Cpu) during a run).
pub trait StackListener: Send {
    /// Called after the stack has been modified.
    ///
    /// `stack` is the stack in its new state.
    fn stack_changed(&mut self, change: StackChange, stack: &OperandStack);
}

impl<F> StackListener for F
where
    F: FnMut(StackChange, &OperandStack) + Send,
{
    #[inline(always)]
    fn stack_changed(&mut self, change: StackChange, stack: &OperandStack) {
        self(change, stack)
    }
}

/// The operand stack of the machine, the working memory of every instruction.
///
/// # Representation
///
/// The stack is a flat array of slots together with a cursor. Retreating the cursor does not
/// erase the slot it leaves, which remains readable through [`OperandStack::load_at`] until it
/// is written over by a subsequent push. This lets a host display the recent history of the
/// stack next to its live part.
#[derive(Default)]
pub struct OperandStack {
    /// Every slot written since the last clear.
    ///
    /// The first `len` entries are live; the others are history.
    slots: Vec<Word>,
    /// The number of live values. The cursor sits at `len - 1`.
    len: usize,
    /// The listeners notified of every change.
    listeners: Vec<Box<dyn StackListener>>,
}

impl OperandStack {
    /// Creates a new, empty [`OperandStack`].
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            len: 0,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener notified of every subsequent change.
    pub fn subscribe<L>(&mut self, listener: L)
    where
        L: 'static + StackListener,
    {
        self.listeners.push(Box::new(listener));
    }

    /// Returns the number of live values.
    #[inline(always)]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns whether the stack holds no live value.
    #[inline(always)]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the index of the cursor, or `None` if the stack is empty.
    #[inline(always)]
    pub fn cursor(&self) -> Option<usize> {
        self.len.checked_sub(1)
    }

    /// Writes `value` just above the cursor and moves the cursor onto it.
    pub fn push(&mut self, value: Word) {
        let index = self.len;

        if index < self.slots.len() {
            self.slots[index] = value;
        } else {
            self.slots.push(value);
        }

        self.len += 1;
        self.notify(StackChange::Inserted(index));
    }

    /// Returns the value at the cursor without moving it.
    pub fn peek(&self) -> Result<Word, Error> {
        self.cursor()
            .map(|index| self.slots[index])
            .ok_or(Error::StackUnderflow)
    }

    /// Moves the cursor one position down, leaving the value in history.
    pub fn retreat(&mut self) -> Result<(), Error> {
        if self.len == 0 {
            return Err(Error::StackUnderflow);
        }

        self.len -= 1;
        self.notify(StackChange::Popped);
        Ok(())
    }

    /// Returns the value at the cursor and retreats past it.
    pub fn pop(&mut self) -> Result<Word, Error> {
        let value = self.peek()?;
        self.retreat()?;
        Ok(value)
    }

    /// Replaces the value at the cursor.
    pub fn overwrite(&mut self, value: Word) -> Result<(), Error> {
        let index = self.cursor().ok_or(Error::StackUnderflow)?;
        self.overwrite_at(index, value)
    }

    /// Replaces the live value at `index`, counted from the bottom of the stack.
    ///
    /// Fails with [`Error::StackUnderflow`] when `index` is not below the cursor or on it.
    pub fn overwrite_at(&mut self, index: usize, value: Word) -> Result<(), Error> {
        if index >= self.len {
            return Err(Error::StackUnderflow);
        }

        self.slots[index] = value;
        self.notify(StackChange::Pushed(index));
        Ok(())
    }

    /// Empties the stack, dropping its history.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.len = 0;
        self.notify(StackChange::Cleared);
    }

    /// Reads any slot still held by the stack, live or not.
    ///
    /// This is meant for inspection only. Instructions never use it.
    #[inline]
    pub fn load_at(&self, index: usize) -> Option<Word> {
        self.slots.get(index).copied()
    }

    /// Returns the live values, from the bottom of the stack to its top.
    #[inline]
    pub fn as_slice(&self) -> &[Word] {
        &self.slots[..self.len]
    }

    /// Returns an iterator over the live values, from the bottom of the stack to its top.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, Word> {
        self.as_slice().iter()
    }

    fn notify(&mut self, change: StackChange) {
        if self.listeners.is_empty() {
            return;
        }

        // Listeners get a shared view of the stack, so they are moved out for the duration
        // of the call.
        let mut listeners = std::mem::take(&mut self.listeners);
        for listener in &mut listeners {
            listener.stack_changed(change, self);
        }
        self.listeners = listeners;
    }
}

impl fmt::Debug for OperandStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperandStack")
            .field("live", &self.as_slice())
            .field("history", &self.slots.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
