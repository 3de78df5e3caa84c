pub mod bundle;
pub mod data_channel;
pub mod handle;
pub mod ice;
pub mod signal;
pub mod state;
pub mod types;

pub use data_channel::{Channel, ChannelListener, LoggingListener};
pub use handle::{Handle, ReleaseStatus};
pub use signal::{Completion, Signal, SignalMode};
pub use state::{ChannelState, ConnectionState, GatheringState, NegotiationPhase};
pub use types::{
    Candidate, ConnectionBundle, Description, Message, SdpType, ServerConfig, SessionConfig,
};
