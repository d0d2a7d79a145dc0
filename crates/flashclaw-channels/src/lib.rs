pub mod channel;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::{Channel, InboundHandler};
pub use dispatch::{AgentInvocation, AgentInvoker, ChannelDispatch};
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{ChannelStatus, MessageFormat, SendOptions, SendResult};
