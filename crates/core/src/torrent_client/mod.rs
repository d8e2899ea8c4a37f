//! Torrent client abstraction.
//!
//! The reconciliation engine only ever talks to a `TorrentClient`; the
//! qBittorrent Web API binding is one implementation and
//! `testing::MockTorrentClient` is another.

mod qbittorrent;
mod types;

pub use qbittorrent::QBittorrentClient;
pub use types::*;
