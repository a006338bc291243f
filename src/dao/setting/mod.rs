pub mod setting;

pub use setting::*;
