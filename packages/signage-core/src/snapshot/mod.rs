//! Snapshot parsing (C6) and the snapshot polling manager (C7).

pub mod manager;
pub mod parser;
pub mod types;

pub use manager::SnapshotManager;
pub use parser::parse_snapshot_response;
pub use types::{NormalizedSnapshot, PlaybackPlaylist, PlaylistMode, TimelineItem};
