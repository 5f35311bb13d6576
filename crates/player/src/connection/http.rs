use std::{collections::HashMap, time::Instant};

use reqwest::{header::RANGE, Client};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};

use super::{Chunk, ChunkRequest, Completion, ConnectionManager, RequestHandle, RequestPurpose};
use crate::error::{PlayerError, PlayerResult};

struct Inflight {
    purpose: RequestPurpose,
    task: JoinHandle<()>,
}

/// Runs every request as a task on a tokio runtime.
///
/// Completions are queued on an unbounded channel and drained by [`poll`].
///
/// [`poll`]: ConnectionManager::poll
pub struct HttpConnectionManager {
    client: Client,
    runtime: Handle,

    next_handle: u64,
    inflight: HashMap<RequestHandle, Inflight>,

    sender: mpsc::UnboundedSender<Completion>,
    receiver: mpsc::UnboundedReceiver<Completion>,
}

impl HttpConnectionManager {
    pub fn new(client: Client, runtime: Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            client,
            runtime,
            next_handle: 0,
            inflight: HashMap::new(),
            sender,
            receiver,
        }
    }

    /// Uses the runtime of the calling context.
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current(client: Client) -> Self {
        Self::new(client, Handle::current())
    }

    pub fn inflight(&self) -> usize {
        self.inflight.len()
    }
}

impl ConnectionManager for HttpConnectionManager {
    fn submit(&mut self, request: ChunkRequest) -> RequestHandle {
        let handle = RequestHandle::new(self.next_handle);
        self.next_handle += 1;

        let client = self.client.clone();
        let sender = self.sender.clone();
        let purpose = request.purpose.clone();
        let task = self.runtime.spawn(async move {
            let result = fetch(&client, &request).await;
            if let Err(e) = &result {
                tracing::debug!(%handle, url = %request.url, "request failed: {e}");
            }
            // the receiver lives as long as the manager
            let _ = sender.send(Completion {
                handle,
                purpose: request.purpose,
                result,
            });
        });
        self.inflight.insert(handle, Inflight { purpose, task });
        handle
    }

    fn cancel(&mut self, handle: RequestHandle) {
        if let Some(inflight) = self.inflight.remove(&handle) {
            tracing::trace!(%handle, "request cancelled");
            inflight.task.abort();
        }
    }

    fn poll(&mut self) -> Option<Completion> {
        // collected before draining: a task queues its completion before it finishes
        let finished: Vec<RequestHandle> = self
            .inflight
            .iter()
            .filter(|(_, inflight)| inflight.task.is_finished())
            .map(|(handle, _)| *handle)
            .collect();

        while let Ok(completion) = self.receiver.try_recv() {
            // a completion may have been queued right before its cancellation
            if self.inflight.remove(&completion.handle).is_some() {
                return Some(completion);
            }
        }

        let handle = finished
            .into_iter()
            .find(|handle| self.inflight.contains_key(handle))?;
        let inflight = self.inflight.remove(&handle)?;
        tracing::warn!(%handle, "request task ended without a completion");
        Some(Completion {
            handle,
            purpose: inflight.purpose,
            result: Err(PlayerError::TaskFailed(format!("request {handle} was lost"))),
        })
    }
}

impl Drop for HttpConnectionManager {
    fn drop(&mut self) {
        for (_, inflight) in self.inflight.drain() {
            inflight.task.abort();
        }
    }
}

async fn fetch(client: &Client, request: &ChunkRequest) -> PlayerResult<Chunk> {
    let started = Instant::now();

    let mut builder = client.get(request.url.clone());
    if let Some(byte_range) = &request.byte_range {
        builder = builder.header(RANGE, byte_range.to_http_range()?);
    }

    let response = builder.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        if let Ok(body) = response.text().await {
            tracing::warn!("Error body: {body}");
        }
        return Err(PlayerError::HttpError(status));
    }

    let data = response.bytes().await?;
    Ok(Chunk {
        data,
        elapsed: started.elapsed(),
    })
}
