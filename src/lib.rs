pub mod checkpoint;
pub mod dns;
pub mod dnssec;
pub mod error;
pub mod http_api;
pub mod notify;
pub mod pool;
pub mod responder;
pub mod server;
pub mod state;

pub use error::{HighwayError, Result};
