#![allow(dead_code)]

mod executor;
mod source;

pub use executor::*;
pub use source::*;
