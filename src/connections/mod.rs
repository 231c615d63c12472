//! Connections and subscription binding.
//!
//! The engine only needs two things from a client connection: sending a
//! message and learning when the connection goes away. [`Connection`]
//! captures exactly that; [`ChannelConnection`] is a ready-made
//! implementation that hands deliveries to the host over a channel.

mod binder;
mod channel;
mod connection;

pub use binder::ConnectionBinder;
pub use channel::{ChannelConnection, Delivery};
pub use connection::{AckLost, AckSender, Acknowledgement, Connection, DisconnectHandler};
