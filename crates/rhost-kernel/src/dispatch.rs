//! Handler pipeline dispatch.
//!
//! A [`Dispatcher`] routes a [`CoordinatedRequest`] to the directive handler
//! whose method and resource match, then runs the handler's steps in order.
//! Every function in a group step runs concurrently on a blocking worker
//! thread against the same snapshot of the request; the pipeline advances
//! once all of them have finished.  Each function's output is stored in the
//! request state under the function's name, so later steps can read it
//! with `request_get_field`.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use rhost_directive::{Handler, ValidatedDirective};
use rhost_sandbox::{CoordinatedRequest, Runner, SandboxError};

use crate::error::{KernelError, Result};
use crate::registry::{RunnerRegistry, check_unique_names};

/// Input kind dispatched by [`Dispatcher`].
pub const REQUEST_INPUT: &str = "request";

/// Result of running a handler pipeline.
#[derive(Debug, Clone)]
pub struct Dispatched {
    /// Output of the last function executed.
    pub output: Vec<u8>,
    /// The request after the pipeline, with params filled in and every
    /// function's output in `state`.
    pub request: CoordinatedRequest,
}

/// Runs handler pipelines of a validated directive.
#[derive(Clone)]
pub struct Dispatcher {
    directive: Arc<ValidatedDirective>,
    registry: RunnerRegistry,
}

impl Dispatcher {
    /// Bind `directive` to the runners in `registry`.
    ///
    /// Every function the directive declares must already be registered,
    /// and no two may share a bare name.
    pub fn new(directive: ValidatedDirective, registry: RunnerRegistry) -> Result<Self> {
        check_unique_names(&directive)?;
        if let Some(missing) = directive.functions.iter().find(|f| !registry.contains(&f.name)) {
            return Err(KernelError::MissingRunnable {
                function: missing.name.clone(),
            });
        }

        Ok(Self {
            directive: Arc::new(directive),
            registry,
        })
    }

    pub fn directive(&self) -> &ValidatedDirective {
        &self.directive
    }

    pub fn registry(&self) -> &RunnerRegistry {
        &self.registry
    }

    /// Find the handler for `method` and `path` along with the path
    /// parameters its resource captures.
    pub fn route(&self, method: &str, path: &str) -> Option<(&Handler, BTreeMap<String, String>)> {
        self.directive
            .handlers
            .iter()
            .filter(|h| h.input.kind == REQUEST_INPUT && h.input.method.eq_ignore_ascii_case(method))
            .find_map(|h| match_resource(&h.input.resource, path).map(|params| (h, params)))
    }

    /// Run the pipeline matching `request`.
    pub async fn dispatch(&self, mut request: CoordinatedRequest) -> Result<Dispatched> {
        let (handler, params) =
            self.route(&request.method, request.path())
                .ok_or_else(|| KernelError::NoHandler {
                    method: request.method.clone(),
                    path: request.path().to_owned(),
                })?;
        request.params.extend(params);

        tracing::info!(
            request_id = %request.id,
            handler = %handler.input,
            steps = handler.steps.len(),
            "dispatching request"
        );

        let mut output = Vec::new();
        for (index, step) in handler.steps.iter().enumerate() {
            let runners = step
                .references()
                .iter()
                .map(|reference| {
                    let function = self.directive.function(reference)?;
                    Ok((function.name.clone(), self.registry.get(&function.name)?))
                })
                .collect::<Result<Vec<(String, Runner)>>>()?;

            let snapshot = request.clone();
            let results = join_all(runners.into_iter().map(|(name, runner)| {
                let input = snapshot.clone();
                async move {
                    let outcome = tokio::task::spawn_blocking(move || runner.run(input)).await;
                    (name, outcome)
                }
            }))
            .await;

            for (function, outcome) in results {
                let bytes = outcome?.map_err(|source| step_failed(index, &function, source))?;
                tracing::debug!(request_id = %request.id, step = index, function = %function, size = bytes.len(), "step output");
                output.clone_from(&bytes);
                request.state.insert(function, bytes);
            }
        }

        Ok(Dispatched { output, request })
    }

    /// Run a single function outside any pipeline.
    pub async fn run(&self, name: &str, request: CoordinatedRequest) -> Result<Vec<u8>> {
        run_blocking(self.registry.get(name)?, request).await
    }
}

/// Run `runner` on a blocking worker thread.
pub async fn run_blocking(runner: Runner, input: impl Into<rhost_sandbox::RunInput> + Send + 'static) -> Result<Vec<u8>> {
    let name = runner.name().to_owned();
    tokio::task::spawn_blocking(move || runner.run(input))
        .await?
        .map_err(|source| step_failed(0, &name, source))
}

fn step_failed(index: usize, function: &str, source: SandboxError) -> KernelError {
    tracing::warn!(step = index, function = %function, error = %source, "function failed");
    KernelError::StepFailed {
        index,
        function: function.to_owned(),
        source,
    }
}

/// Match `path` against a resource pattern, returning captured parameters.
///
/// Segments starting with `:` match any single segment.  Leading and
/// trailing slashes are ignored.
pub fn match_resource(pattern: &str, path: &str) -> Option<BTreeMap<String, String>> {
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if pattern.len() != path.len() {
        return None;
    }

    let mut params = BTreeMap::new();
    for (expected, actual) in pattern.iter().zip(&path) {
        match expected.strip_prefix(':') {
            Some(key) => {
                params.insert(key.to_owned(), (*actual).to_owned());
            }
            None if expected == actual => {}
            None => return None,
        }
    }
    Some(params)
}
