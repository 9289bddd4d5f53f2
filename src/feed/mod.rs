pub mod record_feed;

pub use record_feed::{RecordFeed, Snapshot, Subscription};
