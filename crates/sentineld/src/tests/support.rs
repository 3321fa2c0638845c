//! Doubles for driving an [`crate::Application`] without sockets or signals.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sentinel_context::Context;
use sentinel_graph::{BoxError, Initializer};

use crate::SERVER;
use crate::server::{
    Request, RequestPipeline, Response, ServerError, ServerFactory, ServerParts, ServerRuntime,
    ShutdownSignal,
};

/// A request replayed once the server runs, optionally carrying a token
/// issued for `role`.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedRequest {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) role: Option<String>,
}

pub(crate) type Answers = Arc<Mutex<Vec<(String, Response)>>>;

/// Builds [`ScriptedRuntime`]s and counts how often it was asked to.
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    requests: Vec<ScriptedRequest>,
    answers: Answers,
    builds: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub(crate) fn new(requests: Vec<ScriptedRequest>) -> Self {
        Self {
            requests,
            ..Self::default()
        }
    }

    pub(crate) fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub(crate) fn answer(&self, path: &str) -> Option<Response> {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(answered, _)| answered == path)
            .map(|(_, response)| response.clone())
    }
}

impl ServerFactory for ScriptedFactory {
    fn build(&self, parts: ServerParts) -> Result<Box<dyn ServerRuntime>, ServerError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRuntime {
            address: parts.options.address().to_string(),
            pipeline: parts.into_pipeline(),
            requests: self.requests.clone(),
            answers: Arc::clone(&self.answers),
        }))
    }
}

/// Replays its scripted requests through the pipeline, then waits for shutdown.
struct ScriptedRuntime {
    address: String,
    pipeline: RequestPipeline,
    requests: Vec<ScriptedRequest>,
    answers: Answers,
}

impl ScriptedRuntime {
    fn request(&self, scripted: &ScriptedRequest) -> Request {
        let request = Request::new(&scripted.method, &scripted.path);
        let token = scripted.role.as_deref().and_then(|role| {
            self.pipeline
                .middleware()
                .auth
                .authenticator()
                .and_then(|authenticator| authenticator.issue("tester", role).ok())
        });
        if let Some(issued) = token {
            return request.with_header("Authorization", &format!("Bearer {}", issued.token));
        }
        request
    }
}

impl ServerRuntime for ScriptedRuntime {
    fn address(&self) -> String {
        self.address.clone()
    }

    fn run(&mut self, signal: &dyn ShutdownSignal) -> Result<(), ServerError> {
        let ctx = Context::background();
        for scripted in &self.requests {
            let response = self.pipeline.respond(&ctx, self.request(scripted));
            self.answers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((scripted.path.clone(), response));
        }
        signal.wait()?;
        Ok(())
    }
}

/// A user step that runs after the server has been built.
pub(crate) struct AfterServer {
    pub(crate) ran: Arc<AtomicUsize>,
}

impl Initializer for AfterServer {
    fn name(&self) -> &str {
        "after-server"
    }

    fn dependencies(&self) -> Vec<String> {
        vec![SERVER.to_owned()]
    }

    fn initialize(&mut self, _ctx: &Context) -> Result<(), BoxError> {
        self.ran.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
