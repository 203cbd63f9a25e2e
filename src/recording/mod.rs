pub mod encoder;
pub mod recorder;

pub use encoder::{Encoder, EncoderError, EncoderFactory, EncoderFormat, PcmEncoder, WavEncoder};
pub use recorder::{Boundary, BoundaryPolicy, ChunkRecorder, Segment};
