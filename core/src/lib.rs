//! Invocation core of a register-based virtual machine.
//!
//! Boxed host values are lowered into typed register banks, each callable unit's workers
//! run concurrently under a pluggable scheduler, and every package is initialized exactly
//! once before its functions execute.

pub mod config;
pub mod rt;
pub mod util;
pub mod val;
pub mod vm;
