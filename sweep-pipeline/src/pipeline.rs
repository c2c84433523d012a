//! Query pipeline: generation, cache top-up, dispatch, merge, persist, emit.

use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroU32;
use std::pin::Pin;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, FuturesUnordered, Stream, StreamExt};
use serde::Serialize;
use serde_json::{Map, Value};
use sweep_backends::traits::{Backend, BackendReply, BackendRequest};
use sweep_cache::{CacheStore, ResponseCache, ResponseRecord};
use sweep_primitives::{ModelId, RateLimitTable};
use sweep_templates::{PermutationGenerator, Template, Variables};
use tracing::{debug, info, warn};

use crate::error::{BackendCallError, PipelineResult, QueryError, QueryOutcome};
use crate::scheduler::RateLimiter;
use crate::state::{PromptLifecycle, QueryState};

/// Lazy sequence of per-prompt outcomes produced by [`QueryPipeline::run`].
///
/// With a sequential rate-limit policy outcomes arrive in generation order.
/// With a concurrent policy cache hits arrive first, then backend results in
/// completion order.
pub type QueryStream = Pin<Box<dyn Stream<Item = QueryOutcome> + Send>>;

/// Model and sampling parameters for one run.
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySettings {
    model: ModelId,
    n: NonZeroU32,
    temperature: f32,
    params: Map<String, Value>,
}

impl QuerySettings {
    /// Requests `n` samples per prompt from `model` at the default temperature.
    #[must_use]
    pub fn new(model: ModelId, n: NonZeroU32) -> Self {
        Self {
            model,
            n,
            temperature: BackendRequest::DEFAULT_TEMPERATURE,
            params: Map::new(),
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Sets extra provider parameters forwarded with every call.
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    /// Returns the target model.
    #[must_use]
    pub const fn model(&self) -> &ModelId {
        &self.model
    }

    /// Returns the number of samples wanted per prompt.
    #[must_use]
    pub const fn n(&self) -> NonZeroU32 {
        self.n
    }

    /// Returns the sampling temperature.
    #[must_use]
    pub const fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Returns the extra provider parameters.
    #[must_use]
    pub const fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    fn wanted(&self) -> usize {
        usize::try_from(self.n.get()).unwrap_or(usize::MAX)
    }

    fn request(&self, prompt: &str, n: NonZeroU32) -> BackendRequest {
        BackendRequest::new(prompt, self.model.clone(), n)
            .with_temperature(self.temperature)
            .with_params(self.params.clone())
    }
}

/// Drives generated prompts through a backend with caching and rate limiting.
///
/// Each run owns its view of the cache store; two pipelines must not share a
/// store concurrently.
pub struct QueryPipeline {
    backend: Arc<dyn Backend>,
    store: Arc<dyn CacheStore>,
    rate_limits: RateLimitTable,
}

impl fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("backend", &self.backend.metadata().provider())
            .field("rate_limits", &self.rate_limits)
            .finish_non_exhaustive()
    }
}

impl QueryPipeline {
    /// Creates a pipeline over `backend`, caching into `store`. Every model is
    /// queried sequentially until [`with_rate_limits`](Self::with_rate_limits)
    /// says otherwise.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, store: Arc<dyn CacheStore>) -> Self {
        Self {
            backend,
            store,
            rate_limits: RateLimitTable::new(),
        }
    }

    /// Sets the per-model rate-limit table.
    #[must_use]
    pub fn with_rate_limits(mut self, rate_limits: RateLimitTable) -> Self {
        self.rate_limits = rate_limits;
        self
    }

    /// Returns the per-model rate-limit table.
    #[must_use]
    pub const fn rate_limits(&self) -> &RateLimitTable {
        &self.rate_limits
    }

    /// Starts a run and returns its outcome stream.
    ///
    /// The template is parsed, every prompt generated, and the cache loaded
    /// before this returns, so nothing is spent on a run that cannot proceed.
    /// Backend failures are yielded as [`QueryError::Backend`] and the run
    /// continues.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Template`](crate::PipelineError::Template) for a
    /// malformed template and [`PipelineError::Cache`](crate::PipelineError::Cache)
    /// when the cache cannot be loaded.
    pub async fn run(
        &self,
        template: &str,
        vars: &Variables,
        settings: &QuerySettings,
    ) -> PipelineResult<QueryStream> {
        let prompts = PermutationGenerator::new(template)?.generate(vars);

        let mut cache = ResponseCache::new(Arc::clone(&self.store));
        let cached = cache.len().await?;

        let limiter = RateLimiter::for_model(&self.rate_limits, settings.model());
        info!(
            model = %settings.model(),
            prompts = prompts.len(),
            cached,
            n = settings.n().get(),
            batch_size = limiter.policy().batch_size().get(),
            "starting query run"
        );

        let run = RunState {
            backend: Arc::clone(&self.backend),
            cache,
            limiter,
            settings: settings.clone(),
            pending: prompts.into_iter().enumerate().collect(),
            in_flight: FuturesUnordered::new(),
            dispatched: 0,
            succeeded: 0,
            failed: 0,
        };

        Ok(Box::pin(stream::unfold(run, |mut run| async move {
            let outcome = run.next_outcome().await?;
            Some((outcome, run))
        })))
    }

    /// Counts what a run would cost without calling the backend.
    ///
    /// Every generated prompt is counted on its own, so a prompt generated
    /// twice is counted twice.
    ///
    /// # Errors
    ///
    /// Same conditions as [`run`](Self::run).
    pub async fn estimate(
        &self,
        template: &str,
        vars: &Variables,
        settings: &QuerySettings,
    ) -> PipelineResult<QueryEstimate> {
        let prompts = PermutationGenerator::new(template)?.generate(vars);
        let mut cache = ResponseCache::new(Arc::clone(&self.store));
        let wanted = settings.wanted();

        let mut per_prompt = Vec::with_capacity(prompts.len());
        for template in &prompts {
            let prompt = template.body();
            let have = cache
                .get(&prompt)
                .await?
                .map_or(0, |record| record.responses().len());
            per_prompt.push(PromptEstimate {
                prompt,
                cached: have.min(wanted),
                missing: wanted.saturating_sub(have),
            });
        }

        let estimate = QueryEstimate::from_prompts(per_prompt);
        debug!(
            model = %settings.model(),
            prompts = estimate.prompts,
            calls = estimate.calls,
            samples = estimate.samples,
            "estimated query run"
        );
        Ok(estimate)
    }

    /// Resets the cache store to an empty map.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cache`](crate::PipelineError::Cache) when the
    /// store cannot be written.
    pub async fn clear_cache(&self) -> PipelineResult<()> {
        self.store.clear().await?;
        info!("response cache cleared");
        Ok(())
    }
}

/// Cost of a prospective run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueryEstimate {
    /// Number of generated prompts.
    pub prompts: usize,
    /// Prompts already fully answered by the cache.
    pub cached: usize,
    /// Backend calls the run would make.
    pub calls: usize,
    /// Samples the run would request in total.
    pub samples: usize,
    /// Breakdown per generated prompt, in generation order.
    pub per_prompt: Vec<PromptEstimate>,
}

impl QueryEstimate {
    fn from_prompts(per_prompt: Vec<PromptEstimate>) -> Self {
        let calls = per_prompt.iter().filter(|p| p.missing > 0).count();
        Self {
            prompts: per_prompt.len(),
            cached: per_prompt.len() - calls,
            calls,
            samples: per_prompt.iter().map(|p| p.missing).sum(),
            per_prompt,
        }
    }
}

/// One prompt's share of a [`QueryEstimate`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PromptEstimate {
    /// The fully substituted prompt.
    pub prompt: String,
    /// Usable cached samples.
    pub cached: usize,
    /// Samples that would be requested.
    pub missing: usize,
}

struct DispatchContext {
    lifecycle: PromptLifecycle,
    template: Template,
    prompt: String,
}

type CallResult = (DispatchContext, Result<BackendReply, BackendCallError>);

struct RunState {
    backend: Arc<dyn Backend>,
    cache: ResponseCache,
    limiter: RateLimiter,
    settings: QuerySettings,
    pending: VecDeque<(usize, Template)>,
    in_flight: FuturesUnordered<BoxFuture<'static, CallResult>>,
    dispatched: usize,
    succeeded: usize,
    failed: usize,
}

impl RunState {
    async fn next_outcome(&mut self) -> Option<QueryOutcome> {
        while let Some((index, template)) = self.pending.pop_front() {
            if let Some(outcome) = self.begin(index, template).await {
                return Some(self.tally(outcome));
            }
        }

        let Some((context, result)) = self.in_flight.next().await else {
            info!(
                model = %self.settings.model(),
                calls = self.dispatched,
                succeeded = self.succeeded,
                failed = self.failed,
                "query run complete"
            );
            return None;
        };
        let outcome = self.settle(context, result).await;
        Some(self.tally(outcome))
    }

    /// Checks the cache and either answers from it, calls the backend inline
    /// (sequential policy), or queues the call (concurrent policy, `None`).
    async fn begin(&mut self, index: usize, template: Template) -> Option<QueryOutcome> {
        let mut lifecycle = PromptLifecycle::new(index);
        let prompt = template.body();
        if !template.is_concrete() {
            warn!(prompt_index = index, unbound = ?template.vars(), "prompt still has placeholders");
        }

        advance(&mut lifecycle, QueryState::CacheCheck);
        let cached = match self.cache.get(&prompt).await {
            Ok(record) => record.cloned(),
            Err(source) => return Some(Err(QueryError::Lookup { prompt, source })),
        };

        let wanted = self.settings.wanted();
        let have = cached.as_ref().map_or(0, |record| record.responses().len());
        if let Some(record) = cached.filter(|record| record.responses().len() >= wanted) {
            advance(&mut lifecycle, QueryState::Satisfied);
            advance(&mut lifecycle, QueryState::Emitted);
            debug!(prompt_index = index, cached = have, "answered from cache");
            return Some(Ok(record.limited_to(wanted).with_provenance(
                template.fill_history().clone(),
                template.metavars().clone(),
            )));
        }

        advance(&mut lifecycle, QueryState::NeedsMore);
        let missing = missing_samples(self.settings.n(), have);
        let request = self.settings.request(&prompt, missing);
        advance(&mut lifecycle, QueryState::Dispatched);

        let query_index = self.dispatched;
        self.dispatched += 1;
        debug!(
            prompt_index = index,
            query_index,
            cached = have,
            missing = missing.get(),
            "requesting samples"
        );

        let call = self.dispatch(
            query_index,
            DispatchContext {
                lifecycle,
                template,
                prompt,
            },
            request,
        );
        if self.limiter.is_concurrent() {
            self.in_flight.push(call);
            return None;
        }

        let (context, result) = call.await;
        Some(self.settle(context, result).await)
    }

    fn dispatch(
        &self,
        query_index: usize,
        context: DispatchContext,
        request: BackendRequest,
    ) -> BoxFuture<'static, CallResult> {
        let backend = Arc::clone(&self.backend);
        let handle = self
            .limiter
            .spawn(query_index, async move { backend.call(request).await });

        Box::pin(async move {
            let prompt = context.prompt.clone();
            let result = match handle.await {
                Ok(reply) => reply.map_err(|source| BackendCallError::Failed { prompt, source }),
                Err(join) => Err(BackendCallError::Aborted {
                    prompt,
                    reason: join.to_string(),
                }),
            };
            (context, result)
        })
    }

    async fn settle(
        &mut self,
        context: DispatchContext,
        result: Result<BackendReply, BackendCallError>,
    ) -> QueryOutcome {
        let DispatchContext {
            mut lifecycle,
            template,
            prompt,
        } = context;
        let index = lifecycle.prompt_index();

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                advance(&mut lifecycle, QueryState::FailedSoft);
                advance(&mut lifecycle, QueryState::Emitted);
                warn!(prompt_index = index, error = %err, "backend call failed, continuing");
                return Err(err.into());
            }
        };

        let responses = self.backend.extract_responses(&reply.raw_response);
        let received = responses.len();
        let fresh = ResponseRecord::builder(prompt.clone(), self.settings.model().as_str())
            .query(reply.query)
            .responses(responses)
            .raw_response(reply.raw_response)
            .fill_history(template.fill_history().clone())
            .metavars(template.metavars().clone())
            .build();

        let merged = match self.cache.merge_in(fresh).await {
            Ok(merged) => merged,
            Err(source) => return Err(QueryError::Lookup { prompt, source }),
        };
        advance(&mut lifecycle, QueryState::Merged);
        let emitted = merged.limited_to(self.settings.wanted());

        match self.cache.persist().await {
            Ok(()) => {
                advance(&mut lifecycle, QueryState::Persisted);
                advance(&mut lifecycle, QueryState::Emitted);
                debug!(
                    prompt_index = index,
                    received,
                    total = merged.responses().len(),
                    "responses merged and persisted"
                );
                Ok(emitted)
            }
            Err(source) => {
                advance(&mut lifecycle, QueryState::Emitted);
                warn!(prompt_index = index, error = %source, "failed to persist response cache");
                Err(QueryError::Persist {
                    record: Box::new(emitted),
                    source,
                })
            }
        }
    }

    fn tally(&mut self, outcome: QueryOutcome) -> QueryOutcome {
        if outcome.is_ok() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        outcome
    }
}

fn advance(lifecycle: &mut PromptLifecycle, next: QueryState) {
    if let Err(err) = lifecycle.advance(next) {
        warn!(error = %err, "unexpected prompt state transition");
    }
}

/// Samples still needed when `have` of `n` are cached. Only meaningful for
/// `have < n`.
fn missing_samples(n: NonZeroU32, have: usize) -> NonZeroU32 {
    let have = u32::try_from(have).unwrap_or(u32::MAX);
    NonZeroU32::new(n.get().saturating_sub(have)).unwrap_or(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use sweep_backends::traits::{BackendMetadata, BackendResult};
    use sweep_cache::{CacheMap, VolatileCacheStore};

    struct Echo {
        metadata: BackendMetadata,
    }

    #[async_trait]
    impl Backend for Echo {
        fn metadata(&self) -> &BackendMetadata {
            &self.metadata
        }

        async fn call(&self, request: BackendRequest) -> BackendResult<BackendReply> {
            let responses: Vec<String> = (0..request.n().get())
                .map(|i| format!("{} #{i}", request.prompt()))
                .collect();
            Ok(BackendReply::new(request.to_payload(), json!(responses)))
        }
    }

    fn pipeline(store: Arc<VolatileCacheStore>) -> QueryPipeline {
        let backend = Arc::new(Echo {
            metadata: BackendMetadata::new("echo"),
        });
        QueryPipeline::new(backend, store)
    }

    fn settings(n: u32) -> QuerySettings {
        QuerySettings::new(ModelId::new("echo").unwrap(), NonZeroU32::new(n).unwrap())
    }

    fn cached(prompt: &str, count: usize) -> ResponseRecord {
        ResponseRecord::builder(prompt, "echo")
            .responses((0..count).map(|i| format!("old {i}")).collect())
            .build()
    }

    #[test]
    fn missing_samples_is_the_difference() {
        let n = NonZeroU32::new(5).unwrap();
        assert_eq!(missing_samples(n, 0).get(), 5);
        assert_eq!(missing_samples(n, 3).get(), 2);
    }

    #[test]
    fn settings_build_requests() {
        let mut params = Map::new();
        params.insert("max_tokens".to_owned(), json!(16));
        let settings = settings(4).with_temperature(0.2).with_params(params);

        let request = settings.request("hi", NonZeroU32::new(2).unwrap());
        assert_eq!(request.n().get(), 2);
        assert_eq!(request.model().as_str(), "echo");
        assert!((request.temperature() - 0.2).abs() < f32::EPSILON);
        assert_eq!(request.params()["max_tokens"], json!(16));
    }

    #[tokio::test]
    async fn estimate_counts_only_missing_samples() {
        let mut seeded = CacheMap::new();
        seeded.insert("Say a".to_owned(), cached("Say a", 3));
        seeded.insert("Say b".to_owned(), cached("Say b", 7));
        let pipeline = pipeline(Arc::new(VolatileCacheStore::with_entries(seeded)));

        let vars = Variables::new().with("x", vec!["a", "b", "c"]);
        let estimate = pipeline.estimate("Say ${x}", &vars, &settings(5)).await.unwrap();

        assert_eq!(estimate.prompts, 3);
        assert_eq!(estimate.cached, 1);
        assert_eq!(estimate.calls, 2);
        assert_eq!(estimate.samples, 2 + 5);
        assert_eq!(
            estimate.per_prompt[0],
            PromptEstimate {
                prompt: "Say a".to_owned(),
                cached: 3,
                missing: 2,
            }
        );
        assert_eq!(estimate.per_prompt[1].cached, 5);
    }

    #[tokio::test]
    async fn malformed_template_is_rejected_before_any_call() {
        let store = Arc::new(VolatileCacheStore::new());
        let err = pipeline(store.clone())
            .run("Say ${x", &Variables::new(), &settings(1))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, crate::PipelineError::Template(_)));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn sequential_run_emits_in_generation_order() {
        let store = Arc::new(VolatileCacheStore::new());
        let vars = Variables::new().with("x", vec!["a", "b", "c"]);
        let outcomes: Vec<_> = pipeline(store.clone())
            .run("Say ${x}", &vars, &settings(2))
            .await
            .unwrap()
            .collect()
            .await;

        let prompts: Vec<_> = outcomes
            .iter()
            .map(|outcome| outcome.as_ref().unwrap().prompt().to_owned())
            .collect();
        assert_eq!(prompts, ["Say a", "Say b", "Say c"]);
        assert_eq!(outcomes[0].as_ref().unwrap().responses(), ["Say a #0", "Say a #1"]);
        assert_eq!(store.save_count(), 3);
    }

    #[tokio::test]
    async fn cache_hit_carries_current_provenance_and_truncates() {
        let mut seeded = CacheMap::new();
        seeded.insert("Say a".to_owned(), cached("Say a", 4));
        let store = Arc::new(VolatileCacheStore::with_entries(seeded));

        let vars = Variables::new().with("x", "a");
        let outcomes: Vec<_> = pipeline(store.clone())
            .run("Say ${x}", &vars, &settings(2))
            .await
            .unwrap()
            .collect()
            .await;

        let record = outcomes[0].as_ref().unwrap();
        assert_eq!(record.responses(), ["old 0", "old 1"]);
        assert_eq!(record.fill_history()["x"], "a");
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn clear_cache_empties_the_store() {
        let mut seeded = CacheMap::new();
        seeded.insert("Say a".to_owned(), cached("Say a", 1));
        let store = Arc::new(VolatileCacheStore::with_entries(seeded));

        pipeline(store.clone()).clear_cache().await.unwrap();
        assert!(store.snapshot().await.is_empty());
    }
}
