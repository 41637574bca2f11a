//! Marshalling - moving values across the native boundary
//!
//! Design: Scalars travel as 64-bit register images with exact
//! width/signedness semantics; arrays and structs travel through temporary
//! aligned buffers whose copy directions come from annotations.
//!
//! Architecture:
//! - `numeric.rs` - Narrow/widen/sign-extension rules
//! - `buffer.rs` - Array and struct by-reference marshalling

mod buffer;
mod numeric;

pub use buffer::{
    marshal_array, marshal_struct, unmarshal_array, unmarshal_struct, Direction, NativeBuffer,
};
pub use numeric::{convert, from_native, integer_value, narrow, normalize, to_native};

#[cfg(test)]
mod tests;
