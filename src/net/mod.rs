//! Socket abstraction over TCP and unix domain socket.
mod socket;

pub use socket::{InvalidAddress, ReadSocket, Socket, WriteSocket};
