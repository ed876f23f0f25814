//! Scripted in-memory `RemoteApi` for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use super::remote::{RemoteApi, RemoteError};
use crate::models::{Collection, Document, DocumentId, PullResponse};

#[derive(Default)]
struct FakeState {
    authenticated: bool,
    write_failures: VecDeque<RemoteError>,
    pull_failures: VecDeque<RemoteError>,
    probe_failure: Option<RemoteError>,
    refresh_fails: bool,
    refresh_count: usize,
    server_ids: bool,
    next_server_id: usize,
    pull_responses: HashMap<Collection, PullResponse>,
    created: Vec<(Collection, Document)>,
    replaced: Vec<(Collection, Document)>,
    deleted: Vec<(Collection, DocumentId)>,
    pulls: Vec<(Collection, i64)>,
}

pub struct FakeRemote {
    state: Mutex<FakeState>,
}

impl FakeRemote {
    /// Signed-in fake that accepts every request
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                authenticated: true,
                ..FakeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail_next_write(&self, error: RemoteError) {
        self.state().write_failures.push_back(error);
    }

    pub fn fail_next_pull(&self, error: RemoteError) {
        self.state().pull_failures.push_back(error);
    }

    pub fn fail_probe(&self, error: Option<RemoteError>) {
        self.state().probe_failure = error;
    }

    pub fn fail_refresh(&self, fails: bool) {
        self.state().refresh_fails = fails;
    }

    /// Answer inserts with a server-assigned id instead of echoing the client's
    pub fn assign_server_ids(&self) {
        self.state().server_ids = true;
    }

    pub fn sign_out(&self) {
        self.state().authenticated = false;
    }

    pub fn set_pull_response(&self, collection: Collection, response: PullResponse) {
        self.state().pull_responses.insert(collection, response);
    }

    pub fn refresh_count(&self) -> usize {
        self.state().refresh_count
    }

    pub fn created(&self) -> Vec<(Collection, Document)> {
        self.state().created.clone()
    }

    pub fn replaced(&self) -> Vec<(Collection, Document)> {
        self.state().replaced.clone()
    }

    pub fn deleted(&self) -> Vec<(Collection, DocumentId)> {
        self.state().deleted.clone()
    }

    pub fn pulls(&self) -> Vec<(Collection, i64)> {
        self.state().pulls.clone()
    }

    fn take_write_failure(&self) -> Result<(), RemoteError> {
        let mut state = self.state();
        if !state.authenticated {
            return Err(RemoteError::NotAuthenticated);
        }
        state.write_failures.pop_front().map_or(Ok(()), Err)
    }
}

impl RemoteApi for FakeRemote {
    fn is_authenticated(&self) -> bool {
        self.state().authenticated
    }

    async fn create(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<Option<Document>, RemoteError> {
        self.take_write_failure()?;
        let mut state = self.state();
        let mut canonical = document.clone();
        if state.server_ids {
            state.next_server_id += 1;
            canonical.id = DocumentId::from(format!("srv-{}", state.next_server_id));
        }
        state.created.push((collection, canonical.clone()));
        Ok(Some(canonical))
    }

    async fn replace(
        &self,
        collection: Collection,
        document: &Document,
    ) -> Result<Option<Document>, RemoteError> {
        self.take_write_failure()?;
        self.state().replaced.push((collection, document.clone()));
        Ok(Some(document.clone()))
    }

    async fn delete(&self, collection: Collection, id: &DocumentId) -> Result<(), RemoteError> {
        self.take_write_failure()?;
        self.state().deleted.push((collection, id.clone()));
        Ok(())
    }

    async fn pull(&self, collection: Collection, since: i64) -> Result<PullResponse, RemoteError> {
        let mut state = self.state();
        if let Some(error) = state.pull_failures.pop_front() {
            return Err(error);
        }
        state.pulls.push((collection, since));
        Ok(state
            .pull_responses
            .get(&collection)
            .cloned()
            .unwrap_or(PullResponse {
                changes: Vec::new(),
                timestamp: since,
                conflicts: Vec::new(),
            }))
    }

    async fn refresh_session(&self) -> Result<(), RemoteError> {
        let mut state = self.state();
        state.refresh_count += 1;
        if state.refresh_fails {
            return Err(RemoteError::Status {
                status: 401,
                message: "refresh token expired".to_string(),
            });
        }
        state.authenticated = true;
        Ok(())
    }

    fn end_session(&self) {
        self.state().authenticated = false;
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.state().probe_failure.clone().map_or(Ok(()), Err)
    }
}
