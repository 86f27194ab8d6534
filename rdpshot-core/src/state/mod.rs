pub mod connection;
pub mod fallback;

pub use connection::ConnectionState;
pub use fallback::{Verdict, decide};
