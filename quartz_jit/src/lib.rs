//! Mid-tier JIT backend IR for Quartz.
//!
//! This crate sits between bytecode ingestion and machine-code emission:
//! - Ordered, mutable instruction lists per function
//! - Operand model with strict single-slot claim discipline
//! - Control-flow linkage (labels, branches, jump tables)
//! - Bailout records for deoptimization back to the interpreter
//! - Range cloning with consistent label/symbol remapping
#![deny(unsafe_op_in_unsafe_fn)]
pub mod bailout;
pub mod ir;
