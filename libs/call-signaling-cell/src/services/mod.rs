// libs/call-signaling-cell/src/services/mod.rs

pub mod broker;
pub mod coordinator;
pub mod events;
pub mod transport;

pub use broker::RedisSignalTransport;
pub use coordinator::{CallCoordinator, CoordinatorConfig};
pub use events::{CallEventBus, CallEventReceiver, CallEventSender, SubscriptionId};
pub use transport::{CallTransport, LoopbackTransport, SignalReceiver, SignalSender};
