pub mod audit;
pub mod chat;
pub mod connection;
pub mod request;
pub mod whitelist;

pub use audit::*;
pub use chat::*;
pub use connection::*;
pub use request::*;
pub use whitelist::*;
