//! In-process Copilot client for tests. Sessions replay a script of deltas and a final
//! message, and record what they were asked to do.
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::client::{
    CopilotClient, CopilotSession, EventHandler, SessionConfig, SessionEvent, EVENT_MESSAGE,
    EVENT_MESSAGE_DELTA,
};
use crate::providers::errors::ProviderError;

#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub deltas: Vec<String>,
    pub content: Option<String>,
    /// Tool calls to make through the session's handlers before replying.
    pub tool_calls: Vec<(String, Value)>,
    pub error: Option<String>,
    /// Never finish the turn; used to exercise early consumer drops.
    pub hang: bool,
}

impl MockScript {
    pub fn reply<S: Into<String>>(content: S) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn streaming<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let deltas: Vec<String> = deltas.into_iter().map(Into::into).collect();
        Self {
            content: Some(deltas.concat()),
            deltas,
            ..Default::default()
        }
    }

    pub fn with_tool_call<S: Into<String>>(mut self, name: S, args: Value) -> Self {
        self.tool_calls.push((name.into(), args));
        self
    }

    pub fn failing<S: Into<String>>(message: S) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct Recorded {
    configs: Vec<SessionConfig>,
    prompts: Vec<String>,
    tool_results: Vec<Value>,
}

pub struct MockCopilotClient {
    script: MockScript,
    models: Result<Vec<String>, String>,
    recorded: Arc<Mutex<Recorded>>,
    created: AtomicUsize,
    destroyed: Arc<AtomicUsize>,
}

impl MockCopilotClient {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            models: Ok(Vec::new()),
            recorded: Arc::default(),
            created: AtomicUsize::new(0),
            destroyed: Arc::default(),
        }
    }

    pub fn with_models<I: IntoIterator<Item = S>, S: Into<String>>(mut self, models: I) -> Self {
        self.models = Ok(models.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_models_error<S: Into<String>>(mut self, message: S) -> Self {
        self.models = Err(message.into());
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn sessions_destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn configs(&self) -> Vec<SessionConfig> {
        self.recorded.lock().unwrap().configs.clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.recorded.lock().unwrap().prompts.clone()
    }

    pub fn tool_results(&self) -> Vec<Value> {
        self.recorded.lock().unwrap().tool_results.clone()
    }
}

#[async_trait]
impl CopilotClient for MockCopilotClient {
    async fn create_session(
        &self,
        config: SessionConfig,
    ) -> Result<Arc<dyn CopilotSession>, ProviderError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().configs.push(config.clone());
        Ok(Arc::new(MockCopilotSession {
            id: format!("mock-session-{n}"),
            config,
            script: self.script.clone(),
            handlers: Mutex::new(Vec::new()),
            recorded: Arc::clone(&self.recorded),
            destroyed: Arc::clone(&self.destroyed),
            done: AtomicBool::new(false),
        }))
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        self.models.clone().map_err(ProviderError::Session)
    }
}

struct MockCopilotSession {
    id: String,
    config: SessionConfig,
    script: MockScript,
    handlers: Mutex<Vec<EventHandler>>,
    recorded: Arc<Mutex<Recorded>>,
    destroyed: Arc<AtomicUsize>,
    done: AtomicBool,
}

impl MockCopilotSession {
    fn emit(&self, event: SessionEvent) {
        let handlers = self.handlers.lock().unwrap().clone();
        for handler in handlers {
            handler(&event);
        }
    }
}

#[async_trait]
impl CopilotSession for MockCopilotSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn on(&self, handler: EventHandler) {
        self.handlers.lock().unwrap().push(handler);
    }

    async fn send_and_wait(&self, prompt: &str) -> Result<Option<SessionEvent>, ProviderError> {
        self.recorded.lock().unwrap().prompts.push(prompt.to_string());

        for (name, args) in &self.script.tool_calls {
            let handler = self
                .config
                .tools
                .iter()
                .find(|tool| &tool.name == name)
                .map(|tool| tool.handler.clone());
            let result = match handler {
                Some(handler) => handler(args.clone()).await,
                None => json!({ "error": format!("unknown tool {name}") }),
            };
            self.recorded.lock().unwrap().tool_results.push(result);
        }

        for delta in &self.script.deltas {
            self.emit(SessionEvent::new(
                EVENT_MESSAGE_DELTA,
                json!({ "deltaContent": delta }),
            ));
            tokio::task::yield_now().await;
        }

        if self.script.hang {
            futures::future::pending::<()>().await;
        }
        if let Some(error) = &self.script.error {
            return Err(ProviderError::Session(error.clone()));
        }

        Ok(self.script.content.as_ref().map(|content| {
            let event = SessionEvent::new(EVENT_MESSAGE, json!({ "content": content }));
            self.emit(event.clone());
            event
        }))
    }

    async fn destroy(&self) -> Result<(), ProviderError> {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
