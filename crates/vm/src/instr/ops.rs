//! The built-in instruction set.
//!
//! Binary operations follow the same template: `top` is the value at the cursor and `next` the
//! value right below it. Both are consumed and the result takes the place of `next`. The
//! result is always computed as `next OP top`.

use super::{Instruction, InstructionFlags, StepContext};
use crate::error::Error;
use crate::Word;

/// Every built-in instruction, as registered by [`Registry::builtin`](super::Registry::builtin).
pub static BUILTIN_INSTRUCTIONS: &[&dyn Instruction] = &[
    &Push, &Pop, &Dup, &Swap, &Add, &Sub, &Mul, &Div, &Mod, &Neg, &And, &Or, &Not, &Ceq, &Cne,
    &Clt, &Cle, &Cgt, &Cge, &Jmp, &Jpf, &Jpt, &Read, &Print,
];

/// Declares an instruction replacing the two topmost operands with the result of `$op`.
macro_rules! binary_instruction {
    ($(#[$meta:meta])* $name:ident, $mnemonic:literal, |$next:ident, $top:ident| $op:expr) => {
        $(#[$meta])*
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl Instruction for $name {
            #[inline(always)]
            fn mnemonic(&self) -> &'static str {
                $mnemonic
            }

            fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
                step.binary(|$next: Word, $top: Word| $op)
            }
        }
    };
}

/// Declares an instruction replacing the two topmost operands with `1` when `$cmp` holds
/// between them, and `0` otherwise.
macro_rules! comparison_instruction {
    ($(#[$meta:meta])* $name:ident, $mnemonic:literal, $cmp:tt) => {
        binary_instruction!(
            $(#[$meta])*
            $name,
            $mnemonic,
            |next, top| Ok(Word::from(next $cmp top))
        );
    };
}

/// Returns `1` for `true` and `0` for `false`.
#[inline(always)]
fn truth(value: bool) -> Word {
    Word::from(value)
}

/// Pushes its parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Push;

impl Instruction for Push {
    fn mnemonic(&self) -> &'static str {
        "PUSH"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::NEEDS_PARAMETER
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let value = step.param(self.mnemonic())?;
        step.stack().push(value);
        Ok(())
    }
}

/// Discards the topmost operand.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pop;

impl Instruction for Pop {
    fn mnemonic(&self) -> &'static str {
        "POP"
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        step.stack().retreat()
    }
}

/// Pushes a copy of the topmost operand.
#[derive(Debug, Default, Clone, Copy)]
pub struct Dup;

impl Instruction for Dup {
    fn mnemonic(&self) -> &'static str {
        "DUP"
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let stack = step.stack();
        let top = stack.peek()?;
        stack.push(top);
        Ok(())
    }
}

/// Exchanges the two topmost operands.
#[derive(Debug, Default, Clone, Copy)]
pub struct Swap;

impl Instruction for Swap {
    fn mnemonic(&self) -> &'static str {
        "SWAP"
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let stack = step.stack();
        let &[.., next, top] = stack.as_slice() else {
            return Err(Error::StackUnderflow);
        };

        stack.overwrite_at(stack.len() - 2, top)?;
        stack.overwrite(next)
    }
}

binary_instruction!(
    /// Adds the two topmost operands.
    Add, "ADD", |next, top| next.checked_add(top).ok_or(Error::ArithmeticOverflow("ADD"))
);

binary_instruction!(
    /// Subtracts the topmost operand from the one below it.
    Sub, "SUB", |next, top| next.checked_sub(top).ok_or(Error::ArithmeticOverflow("SUB"))
);

binary_instruction!(
    /// Multiplies the two topmost operands.
    Mul, "MUL", |next, top| next.checked_mul(top).ok_or(Error::ArithmeticOverflow("MUL"))
);

binary_instruction!(
    /// Divides the operand below the top by the topmost one, rounding toward zero.
    Div, "DIV", |next, top| match top {
        0 => Err(Error::DivisionByZero),
        _ => next.checked_div(top).ok_or(Error::ArithmeticOverflow("DIV")),
    }
);

binary_instruction!(
    /// Computes the remainder of the division of the operand below the top by the topmost one.
    Mod, "MOD", |next, top| match top {
        0 => Err(Error::DivisionByZero),
        _ => next.checked_rem(top).ok_or(Error::ArithmeticOverflow("MOD")),
    }
);

binary_instruction!(
    /// Logical conjunction: `1` when both operands are non-zero.
    And, "AND", |next, top| Ok(truth(next != 0 && top != 0))
);

binary_instruction!(
    /// Logical disjunction: `1` when either operand is non-zero.
    Or, "OR", |next, top| Ok(truth(next != 0 || top != 0))
);

comparison_instruction!(
    /// Equality comparison.
    Ceq, "CEQ", ==
);
comparison_instruction!(
    /// Inequality comparison.
    Cne, "CNE", !=
);
comparison_instruction!(
    /// `1` when the operand below the top is less than the topmost one.
    Clt, "CLT", <
);
comparison_instruction!(
    /// `1` when the operand below the top is less than or equal to the topmost one.
    Cle, "CLE", <=
);
comparison_instruction!(
    /// `1` when the operand below the top is greater than the topmost one.
    Cgt, "CGT", >
);
comparison_instruction!(
    /// `1` when the operand below the top is greater than or equal to the topmost one.
    Cge, "CGE", >=
);

/// Negates the topmost operand.
#[derive(Debug, Default, Clone, Copy)]
pub struct Neg;

impl Instruction for Neg {
    fn mnemonic(&self) -> &'static str {
        "NEG"
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        step.unary(|top| top.checked_neg().ok_or(Error::ArithmeticOverflow("NEG")))
    }
}

/// Logical negation: `1` when the topmost operand is zero, `0` otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct Not;

impl Instruction for Not {
    fn mnemonic(&self) -> &'static str {
        "NOT"
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        step.unary(|top| Ok(truth(top == 0)))
    }
}

/// Jumps unconditionally to the address given as parameter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Jmp;

impl Instruction for Jmp {
    fn mnemonic(&self) -> &'static str {
        "JMP"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::CONTROL_TRANSFER | InstructionFlags::NEEDS_PARAMETER
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let target = step.param(self.mnemonic())?;
        step.context.jump_to(target)
    }
}

/// Pops the topmost operand and jumps if it is zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct Jpf;

impl Instruction for Jpf {
    fn mnemonic(&self) -> &'static str {
        "JPF"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::CONTROL_TRANSFER | InstructionFlags::NEEDS_PARAMETER
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        conditional_jump(step, self.mnemonic(), |value| value == 0)
    }
}

/// Pops the topmost operand and jumps if it is not zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct Jpt;

impl Instruction for Jpt {
    fn mnemonic(&self) -> &'static str {
        "JPT"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::CONTROL_TRANSFER | InstructionFlags::NEEDS_PARAMETER
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        conditional_jump(step, self.mnemonic(), |value| value != 0)
    }
}

fn conditional_jump<F>(step: &mut StepContext, mnemonic: &'static str, taken: F) -> Result<(), Error>
where
    F: FnOnce(Word) -> bool,
{
    let target = step.param(mnemonic)?;
    let value = step.stack().pop()?;

    if taken(value) {
        step.context.jump_to(target)
    } else {
        step.context.pc.increment();
        Ok(())
    }
}

/// Pushes a value read from the host.
#[derive(Debug, Default, Clone, Copy)]
pub struct Read;

impl Instruction for Read {
    fn mnemonic(&self) -> &'static str {
        "READ"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::READS_INPUT
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let value = step.host.read_input_value();
        step.stack().push(value);
        Ok(())
    }
}

/// Pops the topmost operand and prints it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Print;

impl Instruction for Print {
    fn mnemonic(&self) -> &'static str {
        "PRINT"
    }

    fn flags(&self) -> InstructionFlags {
        InstructionFlags::WRITES_OUTPUT
    }

    fn execute(&self, step: &mut StepContext) -> Result<(), Error> {
        let value = step.stack().pop()?;
        step.host.print(value);
        Ok(())
    }
}
