pub mod acceptor;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod http;
pub mod line;
pub mod registry;
pub mod resource;
pub mod response;

/// Re-exports of common components for easier access
pub use acceptor::ConnectionAcceptor;
pub use buffer::{ReadBuffer, Span, WriteBuffer};
pub use config::ServerConfig;
pub use connection::{Connection, ConnectionState};
pub use error::{ServerError, ServerResult};
pub use event_loop::{EventLoop, EventPoller, ShutdownHandle};
pub use http::{HttpParser, Method, Outcome, ParseState, Parsed, Request, Status};
pub use line::LineStatus;
pub use registry::{Registry, Source};
pub use resource::{ResolvedFile, Resolver};
pub use response::{build_response, ResponseBuilder, Segments};
