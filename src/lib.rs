pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;

pub use audio::{
    AudioFrame, AudioMixer, AudioSourceHandle, ChunkEncoder, DisplayCapture, EncodedChunk,
    EncoderConfig, MixedSignal, MixerConfig, SourceAcquirer, SourceKind, SourceProvider,
    SyntheticSourceProvider,
};
pub use config::Config;
pub use error::SessionError;
pub use session::{SessionConfig, SessionController, SessionState, SessionStats, SessionStatus};
pub use transport::{Transport, TransportConnector, TransportEvent, WebSocketConnector};
