//! Defines the [`Registry`], mapping mnemonics to their [`Instruction`] implementation.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use super::{Instruction, BUILTIN_INSTRUCTIONS};
use crate::error::Error;

/// A read-only mapping from mnemonic to [`Instruction`].
///
/// Lookups are case-insensitive: keys are stored in upper case and queries are upper-cased
/// before being looked up.
pub struct Registry {
    /// The registered instructions, keyed by upper-case mnemonic.
    entries: HashMap<String, &'static dyn Instruction>,
}

impl Registry {
    /// Builds a registry from an explicit list of instructions.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateMnemonic`] if two instructions declare the same mnemonic.
    pub fn new<I>(instructions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = &'static dyn Instruction>,
    {
        let mut entries = HashMap::new();

        for instruction in instructions {
            let mnemonic = instruction.mnemonic();
            if entries
                .insert(mnemonic.to_ascii_uppercase(), instruction)
                .is_some()
            {
                return Err(Error::DuplicateMnemonic(mnemonic));
            }
        }

        debug!(count = entries.len(), "instruction registry built");

        Ok(Self { entries })
    }

    /// Builds a registry holding every built-in instruction.
    pub fn builtin() -> Result<Self, Error> {
        Self::new(BUILTIN_INSTRUCTIONS.iter().copied())
    }

    /// Returns the instruction registered under `mnemonic`, ignoring case.
    pub fn get(&self, mnemonic: &str) -> Option<&'static dyn Instruction> {
        self.entries.get(&mnemonic.to_ascii_uppercase()).copied()
    }

    /// Returns the number of registered instructions.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether no instruction is registered.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the registered mnemonics, in no particular order.
    pub fn mnemonics(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut mnemonics: Vec<&str> = self.mnemonics().collect();
        mnemonics.sort_unstable();

        f.debug_struct("Registry")
            .field("mnemonics", &mnemonics)
            .finish()
    }
}
