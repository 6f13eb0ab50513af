pub mod features;
pub mod ids;
pub mod playlist;
pub mod track;

pub use features::Features;
pub use ids::TrackId;
pub use playlist::Playlist;
pub use track::{mtime_from_system_time, AudioFormat, Track, UNKNOWN};
