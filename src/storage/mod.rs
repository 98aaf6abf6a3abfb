mod entries;
mod feeds;
mod schema;
mod types;

pub use schema::Database;
pub use types::{
    CandidateEntry, DatabaseError, Enclosure, Entry, EntryStatus, Feed, FeedState,
};
