// Real-time hub: wire protocol, transport contract, WebSocket transport and
// the connection multiplexer shared by every feature service.

pub mod listeners;
pub mod multiplexer;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use listeners::{HandlerError, ListenerId, ListenerRegistry};
pub use multiplexer::{HubMultiplexer, HubMultiplexerBuilder, HubState};
pub use transport::{AccessTokenSource, HubEvent, HubInvocation, HubSession, HubTransport, hub_url};
pub use websocket::WebSocketHubTransport;
