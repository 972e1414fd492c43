//! Async Engine — turn runner + poller (spec §4.4).

pub mod hash;
pub mod poller;

use crate::providers::{DeferredStatus, GenerateOpts, Provider as ProviderClient, UpstreamError};
use crate::registry::{ModelRegistry, Provider};
use crate::rpc::error::GatewayError;
use crate::store::models::{Request, RequestStatus, Role};
use crate::store::Store;
use poller::BackoffSchedule;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const DEFAULT_MAX_HISTORY_MESSAGES: usize = 50;
const DEFAULT_OVERALL_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct RunTurnOpts {
    pub model: String,
    pub params: Value,
    pub max_history_messages: usize,
    pub overall_timeout_ms: u64,
}

impl Default for RunTurnOpts {
    fn default() -> Self {
        Self {
            model: String::new(),
            params: Value::Null,
            max_history_messages: DEFAULT_MAX_HISTORY_MESSAGES,
            overall_timeout_ms: DEFAULT_OVERALL_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TurnResult {
    Completed {
        text: String,
        request_id: i64,
        usage: Option<Value>,
    },
    Waiting {
        request_id: i64,
        provider_response_id: Option<String>,
    },
    Error {
        request_id: i64,
        err: GatewayError,
    },
}

pub struct AsyncEngine {
    store: Arc<Store>,
    registry: Arc<ModelRegistry>,
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl AsyncEngine {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ModelRegistry>,
        clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    ) -> Self {
        Self {
            store,
            registry,
            clients,
        }
    }

    fn client_for(&self, provider: Provider) -> Result<Arc<dyn ProviderClient>, GatewayError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| GatewayError::internal(format!("no client for provider {provider}")))
    }

    /// `runTurn(conversationId?, userText, opts) → TurnResult` (spec §4.4).
    pub async fn run_turn(
        &self,
        conversation_id: Option<i64>,
        user_text: &str,
        opts: RunTurnOpts,
    ) -> Result<TurnResult, GatewayError> {
        let descriptor = self.registry.resolve(&opts.model)?;
        let provider = descriptor.id.provider;
        let model_name = descriptor.id.name.clone();
        let client = self.client_for(provider)?;

        // Step 1: resolve or create the conversation, append the user message.
        let conversation = match conversation_id {
            Some(id) => match self.store.get_conversation(id).await.map_err(store_err)? {
                Some(c) => c,
                None => self
                    .store
                    .create_conversation(None, None)
                    .await
                    .map_err(store_err)?,
            },
            None => self
                .store
                .create_conversation(None, None)
                .await
                .map_err(store_err)?,
        };

        // Steps 2-3: build the candidate upstream input from trimmed history
        // plus this turn's new user message, and hash it, *before*
        // committing the append — a retry of the identical turn must hash
        // to the row already on file rather than growing the history and
        // missing its own cache hit (spec §4.4 Idempotence / §8 scenario 5).
        //
        // A retry of a turn still pending resolution is recognized by the
        // conversation's own tail: if the last message is already this
        // exact user turn (no assistant reply appended yet), this call
        // reuses that message instead of appending a second copy of it, so
        // its candidate input — and hash — land on the same row the first
        // call created. Once a turn has resolved and the assistant has
        // replied, an identical user_text is a new turn, not a retry, and
        // is appended and hashed as usual.
        let existing_history = self
            .store
            .list_messages(conversation.id, Some(opts.max_history_messages as i64))
            .await
            .map_err(store_err)?;
        let is_retry_of_last_turn = existing_history
            .last()
            .map(|m| m.role() == Role::User && m.content == user_text)
            .unwrap_or(false);

        let mut input: Vec<Value> = existing_history
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role().as_str(),
                    "content": m.content,
                })
            })
            .collect();
        if !is_retry_of_last_turn {
            input.push(serde_json::json!({ "role": "user", "content": user_text }));
        }
        if input.len() > opts.max_history_messages {
            input.drain(0..input.len() - opts.max_history_messages);
        }
        let input_value = Value::Array(input.clone());

        let full_model_id = descriptor.id.to_string();
        let computed_hash = hash::input_hash(&full_model_id, &input_value, &opts.params);
        let params_json = opts.params.to_string();

        // Step 4: upsert the request row. A hash already on file for this
        // conversation means this exact turn was already submitted; reuse
        // it without appending a duplicate user message.
        let request = match self
            .store
            .get_request_by_hash(conversation.id, &computed_hash)
            .await
            .map_err(store_err)?
        {
            Some(existing) => existing,
            None => {
                let message_id = if is_retry_of_last_turn {
                    existing_history.last().expect("checked above").id
                } else {
                    self.store
                        .append_message(conversation.id, Role::User, user_text, None)
                        .await
                        .map_err(store_err)?
                        .id
                };
                self.store
                    .upsert_request(
                        conversation.id,
                        message_id,
                        &full_model_id,
                        &params_json,
                        &computed_hash,
                    )
                    .await
                    .map_err(store_err)?
            }
        };

        // Step 5: cache hit.
        if request.status() == RequestStatus::Completed {
            return Ok(TurnResult::Completed {
                text: request.output_text.clone().unwrap_or_default(),
                request_id: request.id,
                usage: request
                    .usage_json
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok()),
            });
        }
        if request.status().is_error_terminal() {
            return Ok(TurnResult::Error {
                request_id: request.id,
                err: error_from_json(request.error_json.as_deref()),
            });
        }

        // Step 6: another caller is already driving this job.
        if request.provider_response_id.is_some() {
            return Ok(TurnResult::Waiting {
                request_id: request.id,
                provider_response_id: request.provider_response_id.clone(),
            });
        }

        // Step 7: this caller becomes the owner.
        self.store.mark_started(request.id).await.map_err(store_err)?;

        if !client.supports_deferred() {
            return self
                .run_degraded_sync(&request, &client, &model_name, input)
                .await;
        }

        let gen_opts = GenerateOpts::default();
        match client.start_deferred(&model_name, &input, &gen_opts).await {
            Ok((_provider_response_id, DeferredStatus::Completed { text, raw, usage })) => {
                self.persist_completion(&request, &conversation, &text, Some(&raw), usage.as_ref())
                    .await
            }
            Ok((_provider_response_id, DeferredStatus::Failed(message))) => {
                self.persist_failure(&request, RequestStatus::Failed, &message)
                    .await
            }
            Ok((provider_response_id, _queued_or_in_progress)) => {
                self.store
                    .save_in_progress(request.id, &provider_response_id)
                    .await
                    .map_err(store_err)?;
                self.poll_until_budget(
                    &request,
                    &conversation,
                    &client,
                    &provider_response_id,
                    Duration::from_millis(opts.overall_timeout_ms),
                )
                .await
            }
            Err(err) => {
                self.persist_failure(&request, RequestStatus::Failed, &err.to_string())
                    .await
            }
        }
    }

    /// `checkOrWait(requestId, waitMs) → {status, text?, usage?}` (spec
    /// §4.4): resumes the poll loop starting from the persisted
    /// `providerResponseId`.
    pub async fn check_or_wait(&self, request_id: i64, wait_ms: u64) -> Result<TurnResult, GatewayError> {
        let request = self
            .store
            .get_request(request_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| GatewayError::invalid_params(format!("unknown request_id {request_id}")))?;

        if request.status() == RequestStatus::Completed {
            return Ok(TurnResult::Completed {
                text: request.output_text.clone().unwrap_or_default(),
                request_id: request.id,
                usage: request
                    .usage_json
                    .as_deref()
                    .and_then(|s| serde_json::from_str(s).ok()),
            });
        }
        if request.status().is_error_terminal() {
            return Ok(TurnResult::Error {
                request_id: request.id,
                err: error_from_json(request.error_json.as_deref()),
            });
        }

        let Some(provider_response_id) = request.provider_response_id.clone() else {
            return Ok(TurnResult::Waiting {
                request_id: request.id,
                provider_response_id: None,
            });
        };

        let conversation = self
            .store
            .get_conversation(request.conversation_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| GatewayError::internal("conversation vanished under a live request"))?;

        let descriptor = self.registry.resolve(&request.model)?;
        let client = self.client_for(descriptor.id.provider)?;

        self.poll_until_budget(
            &request,
            &conversation,
            &client,
            &provider_response_id,
            Duration::from_millis(wait_ms),
        )
        .await
    }

    /// Step 8: sleep → query → persist loop, bounded by `budget`. If the
    /// budget elapses, returns `Waiting` without mutating `status`
    /// (step 9), so a later `check_or_wait` can resume it.
    async fn poll_until_budget(
        &self,
        request: &Request,
        conversation: &crate::store::models::Conversation,
        client: &Arc<dyn ProviderClient>,
        provider_response_id: &str,
        budget: Duration,
    ) -> Result<TurnResult, GatewayError> {
        let mut schedule = BackoffSchedule::default_schedule();
        let deadline = Instant::now() + budget;

        tokio::time::sleep(schedule.current_delay().min(budget)).await;

        loop {
            if Instant::now() >= deadline {
                return Ok(TurnResult::Waiting {
                    request_id: request.id,
                    provider_response_id: Some(provider_response_id.to_string()),
                });
            }

            let status = client
                .poll_deferred(provider_response_id)
                .await
                .map_err(map_upstream_error)?;

            match status {
                DeferredStatus::Completed { text, raw, usage } => {
                    return self
                        .persist_completion(request, conversation, &text, Some(&raw), usage.as_ref())
                        .await;
                }
                DeferredStatus::Failed(message) => {
                    return self
                        .persist_failure(request, RequestStatus::Failed, &message)
                        .await;
                }
                DeferredStatus::Cancelled => {
                    return self
                        .persist_failure(request, RequestStatus::Cancelled, "upstream job cancelled")
                        .await;
                }
                DeferredStatus::Expired => {
                    return self
                        .persist_failure(request, RequestStatus::Expired, "upstream job expired")
                        .await;
                }
                DeferredStatus::Queued => {
                    self.store
                        .update_status_only(request.id, RequestStatus::Queued)
                        .await
                        .map_err(store_err)?;
                }
                DeferredStatus::InProgress => {
                    self.store
                        .update_status_only(request.id, RequestStatus::InProgress)
                        .await
                        .map_err(store_err)?;
                }
            }

            schedule.advance();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(TurnResult::Waiting {
                    request_id: request.id,
                    provider_response_id: Some(provider_response_id.to_string()),
                });
            }
            tokio::time::sleep(schedule.current_delay().min(remaining)).await;
        }
    }

    /// Graceful degradation for providers without a deferred endpoint
    /// (spec §4.4 second paragraph / SPEC_FULL §C.3): a single synchronous
    /// call, still wrapped in the same dedup/persistence path.
    async fn run_degraded_sync(
        &self,
        request: &Request,
        client: &Arc<dyn ProviderClient>,
        model_name: &str,
        input: Vec<Value>,
    ) -> Result<TurnResult, GatewayError> {
        let prompt = input
            .iter()
            .filter_map(|m| m.get("content").and_then(|c| c.as_str()))
            .collect::<Vec<_>>()
            .join("\n\n");

        let conversation = self
            .store
            .get_conversation(request.conversation_id)
            .await
            .map_err(store_err)?
            .ok_or_else(|| GatewayError::internal("conversation vanished under a live request"))?;

        match client
            .generate_text(model_name, &prompt, &GenerateOpts::default())
            .await
        {
            Ok(text) => {
                self.persist_completion(request, &conversation, &text, None, None)
                    .await
            }
            Err(err) => {
                self.persist_failure(request, RequestStatus::Failed, &err.to_string())
                    .await
            }
        }
    }

    async fn persist_completion(
        &self,
        request: &Request,
        conversation: &crate::store::models::Conversation,
        text: &str,
        raw: Option<&Value>,
        usage: Option<&Value>,
    ) -> Result<TurnResult, GatewayError> {
        self.store
            .save_completion(
                request.id,
                conversation.id,
                text,
                raw.map(|v| v.to_string()).as_deref(),
                usage.map(|v| v.to_string()).as_deref(),
            )
            .await
            .map_err(store_err)?;

        Ok(TurnResult::Completed {
            text: text.to_string(),
            request_id: request.id,
            usage: usage.cloned(),
        })
    }

    async fn persist_failure(
        &self,
        request: &Request,
        status: RequestStatus,
        message: &str,
    ) -> Result<TurnResult, GatewayError> {
        let error_json = serde_json::json!({ "message": message }).to_string();
        self.store
            .save_failure(request.id, status, &error_json)
            .await
            .map_err(store_err)?;

        Ok(TurnResult::Error {
            request_id: request.id,
            err: GatewayError::provider_error(message.to_string()),
        })
    }
}

fn store_err(err: crate::store::StoreError) -> GatewayError {
    GatewayError::internal(err.to_string())
}

fn map_upstream_error(err: UpstreamError) -> GatewayError {
    match err {
        UpstreamError::Http { status: 401, .. } => GatewayError::auth_error("upstream authentication failed"),
        UpstreamError::Http { status: 429, .. } => GatewayError::rate_limit(None),
        UpstreamError::Http { status, body } => {
            GatewayError::provider_error(format!("upstream HTTP {status}: {body}"))
        }
        UpstreamError::Timeout => GatewayError::provider_error("request timed out"),
        UpstreamError::Network(msg) => GatewayError::provider_error(msg),
        UpstreamError::UnsupportedFormat => {
            GatewayError::provider_error("upstream does not support structured output")
        }
        UpstreamError::Other(msg) => GatewayError::provider_error(msg),
    }
}

fn error_from_json(error_json: Option<&str>) -> GatewayError {
    let message = error_json
        .and_then(|s| serde_json::from_str::<Value>(s).ok())
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| "request failed".to_string());
    GatewayError::provider_error(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderBinding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// A `Provider` double whose deferred behavior is scripted up front,
    /// so tests can drive `run_turn`/`check_or_wait` through the
    /// queued/in-progress/completed states without a real upstream.
    struct FakeProvider {
        deferred: bool,
        text_calls: AtomicUsize,
        start_calls: AtomicUsize,
        poll_calls: AtomicUsize,
        start_result: DeferredStatus,
        poll_script: StdMutex<std::collections::VecDeque<DeferredStatus>>,
    }

    impl FakeProvider {
        fn sync_text(text: &str) -> Self {
            Self {
                deferred: false,
                text_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                poll_calls: AtomicUsize::new(0),
                start_result: DeferredStatus::Completed {
                    text: text.to_string(),
                    raw: Value::Null,
                    usage: None,
                },
                poll_script: StdMutex::new(std::collections::VecDeque::new()),
            }
        }

        fn deferred_starting_in_progress(poll_script: Vec<DeferredStatus>) -> Self {
            Self {
                deferred: true,
                text_calls: AtomicUsize::new(0),
                start_calls: AtomicUsize::new(0),
                poll_calls: AtomicUsize::new(0),
                start_result: DeferredStatus::InProgress,
                poll_script: StdMutex::new(poll_script.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn generate_text(
            &self,
            _model: &str,
            _prompt: &str,
            _opts: &GenerateOpts,
        ) -> Result<String, UpstreamError> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            Ok("fake text reply".to_string())
        }

        async fn generate_structured(
            &self,
            _model: &str,
            _prompt: &str,
            _schema: &Value,
            _opts: &GenerateOpts,
        ) -> Result<Value, UpstreamError> {
            Err(UpstreamError::UnsupportedFormat)
        }

        fn supports_deferred(&self) -> bool {
            self.deferred
        }

        async fn start_deferred(
            &self,
            _model: &str,
            _input: &[Value],
            _opts: &GenerateOpts,
        ) -> Result<(String, DeferredStatus), UpstreamError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(("resp-1".to_string(), self.start_result.clone()))
        }

        async fn poll_deferred(&self, _provider_response_id: &str) -> Result<DeferredStatus, UpstreamError> {
            self.poll_calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.poll_script.lock().unwrap();
            Ok(script.pop_front().unwrap_or(DeferredStatus::InProgress))
        }
    }

    fn openai_registry() -> Arc<ModelRegistry> {
        let mut bindings = HashMap::new();
        bindings.insert(
            Provider::Openai,
            ProviderBinding {
                provider: Provider::Openai,
                api_key: "key".to_string(),
                base_url: None,
            },
        );
        Arc::new(ModelRegistry::new(bindings))
    }

    async fn engine_with(provider: Arc<FakeProvider>) -> (AsyncEngine, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        clients.insert(Provider::Openai, provider);
        let engine = AsyncEngine::new(store.clone(), openai_registry(), clients);
        (engine, store)
    }

    fn turn_opts() -> RunTurnOpts {
        RunTurnOpts {
            model: "openai:gpt-5".to_string(),
            overall_timeout_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn identical_turn_retried_before_resolution_dedupes() {
        let provider = Arc::new(FakeProvider::deferred_starting_in_progress(vec![]));
        let (engine, store) = engine_with(provider.clone()).await;

        let first = engine.run_turn(None, "hi", turn_opts()).await.unwrap();
        let TurnResult::Waiting { request_id: first_id, .. } = first else {
            panic!("expected Waiting from the first call, got {first:?}");
        };

        let request = store.get_request(first_id).await.unwrap().unwrap();
        let conversation_id = request.conversation_id;

        let second = engine
            .run_turn(Some(conversation_id), "hi", turn_opts())
            .await
            .unwrap();
        let TurnResult::Waiting { request_id: second_id, .. } = second else {
            panic!("expected Waiting from the retried call, got {second:?}");
        };

        assert_eq!(first_id, second_id);
        assert_eq!(provider.start_calls.load(Ordering::SeqCst), 1);

        let messages = store.list_messages(conversation_id, None).await.unwrap();
        assert_eq!(messages.len(), 1, "the retry must not append a duplicate user message");
    }

    #[tokio::test]
    async fn distinct_turns_after_completion_are_not_deduped() {
        let provider = Arc::new(FakeProvider::sync_text("first reply"));
        let (engine, store) = engine_with(provider.clone()).await;

        let first = engine.run_turn(None, "hi", turn_opts()).await.unwrap();
        let TurnResult::Completed { request_id: first_id, .. } = first else {
            panic!("expected Completed, got {first:?}");
        };
        let conversation_id = store.get_request(first_id).await.unwrap().unwrap().conversation_id;

        let second = engine
            .run_turn(Some(conversation_id), "hi", turn_opts())
            .await
            .unwrap();
        let TurnResult::Completed { request_id: second_id, .. } = second else {
            panic!("expected Completed, got {second:?}");
        };

        assert_ne!(first_id, second_id, "a second \"hi\" after the first resolved is a new turn");
        assert_eq!(provider.text_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_resumption_completes_after_check_or_wait() {
        let provider = Arc::new(FakeProvider::deferred_starting_in_progress(vec![
            DeferredStatus::InProgress,
            DeferredStatus::Completed {
                text: "resumed reply".to_string(),
                raw: Value::Null,
                usage: None,
            },
        ]));
        let (engine, store) = engine_with(provider.clone()).await;

        let first = engine.run_turn(None, "hi", turn_opts()).await.unwrap();
        let TurnResult::Waiting { request_id, .. } = first else {
            panic!("expected Waiting from the first call, got {first:?}");
        };

        let mut resumed = engine.check_or_wait(request_id, 10_000).await.unwrap();
        for _ in 0..5 {
            if matches!(resumed, TurnResult::Completed { .. }) {
                break;
            }
            resumed = engine.check_or_wait(request_id, 10_000).await.unwrap();
        }

        match resumed {
            TurnResult::Completed { text, request_id: completed_id, .. } => {
                assert_eq!(text, "resumed reply");
                assert_eq!(completed_id, request_id);
            }
            other => panic!("expected Completed after resumption, got {other:?}"),
        }

        let stored = store.get_request(request_id).await.unwrap().unwrap();
        assert_eq!(stored.status(), RequestStatus::Completed);
    }
}
