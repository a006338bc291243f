pub mod crypto;
pub mod gateway_key;

pub use gateway_key::*;
