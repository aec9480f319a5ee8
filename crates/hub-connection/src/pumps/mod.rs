//! Background tasks feeding the dispatch queue and the socket.

pub(crate) mod keepalive;
pub(crate) mod read;
pub(crate) mod write;
