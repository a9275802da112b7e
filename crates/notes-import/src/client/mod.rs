//! Client side of the import pipeline: upload, bounded polling and
//! materialization into the local note store

mod api;
mod materialize;
mod poll;
mod store;

pub use api::ImportClient;
pub use materialize::{run_import, ImportOutcome, Materializer};
pub use poll::{
    poll_until_terminal, poll_with_progress, PollOutcome, PollPolicy, StatusSource,
    NOT_FOUND_MESSAGE,
};
pub use store::{NoteStore, SqliteNoteStore};
