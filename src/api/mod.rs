//! RPC façade: a stateless HTTP translation layer over the extension
//! manager. One inbound call maps onto one manager call; mutating calls
//! answer with a `{success, error?}` envelope, pure read queries propagate
//! failures as transport-level errors.

pub mod handlers;
pub mod models;
pub mod routes;
pub mod server;

pub use handlers::AppState;
pub use server::BridgeServer;
