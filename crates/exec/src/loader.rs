//! Loads program files into the lines of the instructions region.
//!
//! Lines are kept one-to-one with the file so that a line index in the editor is the address
//! the program counter and the jump instructions use. Everything following a `;` is a comment.

use std::fs;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

/// The character starting a comment.
const COMMENT: char = ';';

/// Reads the program stored at `path`.
pub fn load(path: &Path) -> anyhow::Result<Vec<String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let program = parse(&text);

    debug!(path = %path.display(), lines = program.len(), "program loaded");
    Ok(program)
}

/// Splits the text of a program into lines, stripping comments and trailing whitespace.
pub fn parse(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| {
            let code = match line.find(COMMENT) {
                Some(start) => &line[..start],
                None => line,
            };
            code.trim_end().to_owned()
        })
        .collect()
}
