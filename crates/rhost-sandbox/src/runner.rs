//! Runner: the glue between a declared function and its environment.
//!
//! A [`Runner`] turns a job payload into bytes, picks an instance through
//! [`Environment::use_instance`], and hands back what the runnable delivered
//! through `return_result`.

use std::sync::Arc;

use crate::environment::Environment;
use crate::error::Result;
use crate::request::CoordinatedRequest;

/// Payload of one invocation.
#[derive(Debug, Clone)]
pub enum RunInput {
    /// Passed through unchanged.
    Bytes(Vec<u8>),
    /// Passed as its UTF-8 bytes.
    Text(String),
    /// Encoded as JSON.
    Json(serde_json::Value),
    /// Encoded as JSON and bound to the instance for `request_get_field`.
    Request(CoordinatedRequest),
}

impl From<Vec<u8>> for RunInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&[u8]> for RunInput {
    fn from(bytes: &[u8]) -> Self {
        Self::Bytes(bytes.to_vec())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for RunInput {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<CoordinatedRequest> for RunInput {
    fn from(request: CoordinatedRequest) -> Self {
        Self::Request(request)
    }
}

impl RunInput {
    fn into_parts(self) -> Result<(Vec<u8>, Option<CoordinatedRequest>)> {
        Ok(match self {
            Self::Bytes(bytes) => (bytes, None),
            Self::Text(text) => (text.into_bytes(), None),
            Self::Json(value) => (serde_json::to_vec(&value)?, None),
            Self::Request(request) => (request.to_json()?, Some(request)),
        })
    }
}

/// Binds one function to the environment hosting its module.
#[derive(Clone)]
pub struct Runner {
    env: Arc<Environment>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner").field("name", &self.name()).finish()
    }
}

impl Runner {
    pub fn new(env: Arc<Environment>) -> Self {
        Self { env }
    }

    /// Name of the function this runner serves.
    pub fn name(&self) -> &str {
        self.env.name()
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.env
    }

    /// Add one instance for one more concurrent worker.
    ///
    /// Call once per worker that will use this runner; the pool size follows
    /// worker concurrency, not load.
    pub fn on_start(&self) -> Result<()> {
        self.env.add_instance()?;
        Ok(())
    }

    /// Execute the function once and return the bytes it delivered.
    ///
    /// Blocks the calling thread for the length of the invocation.
    pub fn run(&self, input: impl Into<RunInput>) -> Result<Vec<u8>> {
        let (bytes, request) = input.into().into_parts()?;

        self.env.use_instance(|instance, token| {
            instance.bind_request(request);
            let outcome = instance.run_entry(&bytes, token);
            instance.bind_request(None);

            match &outcome {
                Ok(output) => tracing::debug!(
                    function = %self.name(),
                    instance = instance.index(),
                    output_size = output.len(),
                    "run complete"
                ),
                Err(e) => tracing::debug!(function = %self.name(), error = %e, "run failed"),
            }
            outcome
        })
    }
}
