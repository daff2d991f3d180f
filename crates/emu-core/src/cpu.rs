//! CPU core trait.

use crate::Ticks;

/// A CPU core, as the clock loop sees it.
///
/// The clock does not care which processor it is driving; it only needs
/// to execute one instruction at a time and account for the T-states
/// consumed. Memory access is exposed so snapshot and debug layers can
/// reach guest RAM without knowing the bus layout.
pub trait Cpu {
    /// Execute the next instruction and return the T-states it consumed.
    fn execute_instruction(&mut self) -> Ticks;

    /// Returns the current program counter.
    fn pc(&self) -> u16;

    /// Read a byte of guest memory.
    fn read_memory(&self, address: u16) -> u8;

    /// Write a byte of guest memory.
    fn write_memory(&mut self, address: u16, value: u8);

    /// Request a non-maskable interrupt.
    fn nmi(&mut self);

    /// Reset the CPU to its initial state.
    fn reset(&mut self);
}
