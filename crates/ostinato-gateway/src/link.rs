//! Shared engine session for the gateway process.
//!
//! One logical connection serves every request handler. It is established
//! lazily and re-established after loss, so an unreachable engine fails
//! the requests that hit it without taking the gateway down.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use ostinato_core::domain::WorkSubmission;
use ostinato_core::engine::Client;
use ostinato_core::ports::{ConnectError, Dispatcher, SubmitError, WorkHandle};

pub struct EngineLink {
    addr: String,
    client: Mutex<Option<Arc<Client>>>,
}

impl EngineLink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client: Mutex::new(None),
        }
    }

    async fn client(&self) -> Result<Arc<Client>, ConnectError> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(Client::connect(&self.addr).await?);
        info!(addr = %self.addr, "engine session established");
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn invalidate(&self) {
        let mut slot = self.client.lock().await;
        *slot = None;
    }
}

#[async_trait]
impl Dispatcher for EngineLink {
    async fn submit(&self, submission: WorkSubmission) -> Result<WorkHandle, SubmitError> {
        let client = self.client().await?;
        match client.submit(submission).await {
            Err(SubmitError::ConnectionLost) => {
                warn!(addr = %self.addr, "engine session lost, will reconnect on next request");
                self.invalidate().await;
                Err(SubmitError::ConnectionLost)
            }
            other => other,
        }
    }
}
