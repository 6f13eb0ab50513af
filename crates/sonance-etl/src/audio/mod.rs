pub mod decoder;
pub mod descriptor;

pub use decoder::{decode_audio, DecodedAudio};
pub use descriptor::{describe, Descriptor, DESCRIPTOR_DIM};
