pub mod encoder;
pub mod mixer;
pub mod source;
pub mod synthetic;

pub use encoder::{encode_wav, ChunkEncoder, EncodedChunk, EncoderConfig, EncoderHandle};
pub use mixer::{AudioMixer, MixedSignal, MixerConfig};
pub use source::{
    AcquiredSources, AudioFrame, AudioSourceHandle, DisplayCapture, SourceAcquirer, SourceKind,
    SourceProvider, SourceState,
};
pub use synthetic::SyntheticSourceProvider;
