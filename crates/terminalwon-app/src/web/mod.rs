// Web frontend module
pub mod protocol;
pub mod routes;
pub mod server;

pub use protocol::{ClientMessage, Envelope};
pub use server::{WebServer, WebServerConfig};
