// Hollowmaze: seeded maze generation plus a server-authoritative trap/item
// lifecycle served over HTTP and WebSocket.

pub mod config;
pub mod error;
pub mod game;
pub mod maze;

pub mod transports {
    pub mod https;
}
