//! SSA intermediate representation for Murre function bodies.
//!
//! - **Types** ([`Instr`], [`Block`], [`Function`], [`Module`]): the data
//!   model the front end produces and the optimizer rewrites.
//! - **Printing** ([`print`]): human-readable listings for debugging.

mod types;
pub use types::*;

pub mod print;
