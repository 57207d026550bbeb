//! Refcounting, memory substrate, and buffer types for upipe.
//!
//! This crate covers the bottom three layers of the core (see the
//! workspace root's architecture diagram): [`refcount`], the memory
//! substrate ([`umem`], [`udict`], [`uref`]), and [`ubuf`]. Everything
//! above this - the pump scheduler, the pipe/probe/control protocol, and
//! the composition helpers - is built on top of these types in the
//! `upipe-runtime`, `upipe-pipe`, and `upipe-xfer` crates.

pub mod error;
pub mod refcount;
pub mod ubuf;
pub mod udict;
pub mod umem;
pub mod uref;

pub use error::CoreError;
