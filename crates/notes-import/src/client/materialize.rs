//! Turns a finished import into notes in the local store

use std::path::Path;

use super::api::ImportClient;
use super::poll::{poll_with_progress, PollOutcome, PollPolicy};
use super::store::NoteStore;
use crate::error::{Error, Result};
use crate::types::{ImportOptions, Note, NoteDraft, StatusResponse};

/// Final outcome of one import as seen by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Notes written to the local store
    Created(Vec<Note>),
    Failed(String),
    TimedOut,
    TransportError(String),
}

/// Writes drafts into a [`NoteStore`]
pub struct Materializer<'a> {
    store: &'a dyn NoteStore,
}

impl<'a> Materializer<'a> {
    pub fn new(store: &'a dyn NoteStore) -> Self {
        Self { store }
    }

    /// Create one note per draft with fresh local ids and open the last one
    pub async fn materialize(&self, drafts: &[NoteDraft]) -> Result<Vec<Note>> {
        let mut created = Vec::with_capacity(drafts.len());

        for (idx, draft) in drafts.iter().enumerate() {
            let title = if draft.title.is_empty() {
                format!("Imported note {}", idx + 1)
            } else {
                draft.title.clone()
            };
            let note = Note::new(title, draft.body.clone());
            self.store.insert(&note).await?;
            created.push(note);
        }

        if let Some(last) = created.last() {
            self.store.set_active(&last.id).await?;
        }

        tracing::info!("Materialized {} imported notes", created.len());
        Ok(created)
    }
}

/// Upload, poll and materialize one document
pub async fn run_import<F>(
    client: &ImportClient,
    store: &dyn NoteStore,
    path: &Path,
    options: ImportOptions,
    policy: &PollPolicy,
    on_snapshot: F,
) -> ImportOutcome
where
    F: FnMut(&StatusResponse) + Send,
{
    let id = match client.upload(path, options).await {
        Ok(id) => id,
        Err(Error::Transport(message)) => return ImportOutcome::TransportError(message),
        Err(e) => return ImportOutcome::Failed(e.to_string()),
    };
    tracing::info!("Import of {} queued as {}", path.display(), id);

    match poll_with_progress(client, &id, policy, on_snapshot).await {
        PollOutcome::Completed(drafts) => match Materializer::new(store).materialize(&drafts).await {
            Ok(notes) => ImportOutcome::Created(notes),
            Err(e) => ImportOutcome::Failed(format!("could not save imported notes: {}", e)),
        },
        PollOutcome::Failed(message) => ImportOutcome::Failed(message),
        PollOutcome::TimedOut => ImportOutcome::TimedOut,
        PollOutcome::TransportError(message) => ImportOutcome::TransportError(message),
    }
}
