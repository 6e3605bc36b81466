//! Key and value codecs shared by every backend.

pub mod key;
mod shape;
pub mod value;

pub use key::DecodedKey;
pub use value::{Encoding, SerializedValue};
