#![allow(dead_code)]

pub mod data;
pub mod setup;

pub use data::*;
pub use setup::*;
