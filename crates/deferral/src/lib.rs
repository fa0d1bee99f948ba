#![doc = include_str!("../README.md")]

mod action;
mod error;
mod key;
mod registry;
mod sink;
mod source;
mod unit;

pub use crate::action::*;
pub use crate::error::*;
pub use crate::key::*;
pub use crate::registry::*;
pub use crate::sink::*;
pub use crate::source::*;
pub use crate::unit::*;
