//! Hardware abstraction of the simulated board

pub mod interrupts;
