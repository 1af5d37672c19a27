pub mod reactor;

pub use reactor::FastTrackReactor;
