//! Turn coordinator
//!
//! Orchestration core for one conversational turn. Per-turn state machine:
//!
//! `Received -> Extracting&Responding (parallel) -> ReflectionDecision ->
//! [Reflecting] -> GraphUpdating -> Completed`
//!
//! Every stage can fail independently; failures degrade that stage's
//! contribution (empty facts, fallback response, no insights) and are
//! recorded in the outcome's per-stage error list. `process` never returns
//! an error - a turn always yields a response and a graph delta, possibly
//! empty ones.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::constants::FALLBACK_RESPONSE;
use crate::errors::MemoryError;
use crate::graph::{GraphDelta, SharedGraph};
use crate::longterm::LongTermStore;
use crate::reflection::{ReflectionDecision, ReflectionPolicy};
use crate::types::{Fact, Insight};
use crate::validation::validate_owner_id;
use crate::workers::{call_with_retry, CompletionService, WorkerError};

/// One incoming conversational turn
#[derive(Debug, Clone)]
pub struct Turn {
    pub owner_id: String,
    pub text: String,
    pub session_id: Option<String>,
    pub turn_id: Uuid,
}

impl Turn {
    pub fn new(owner_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            text: text.into(),
            session_id: None,
            turn_id: Uuid::new_v4(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Stages of the per-turn state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStage {
    Received,
    Extracting,
    Responding,
    ReflectionDecision,
    Reflecting,
    GraphUpdating,
    Completed,
}

/// A stage failure recorded in the turn outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    pub stage: TurnStage,
    pub code: String,
    pub message: String,
}

impl StageError {
    fn new(stage: TurnStage, error: &MemoryError) -> Self {
        Self {
            stage,
            code: error.code().to_string(),
            message: error.message(),
        }
    }
}

/// Turn-level metadata echoed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnMetadata {
    pub owner_id: String,
    pub session_id: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Everything one turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub turn_id: Uuid,
    pub response: String,
    pub facts: Vec<Fact>,
    pub insights: Vec<Insight>,
    pub graph_delta: GraphDelta,
    pub stage_errors: Vec<StageError>,
    pub metadata: TurnMetadata,
}

/// Run a worker call under a per-attempt deadline with rate-limit retry
///
/// A deadline miss maps to [`WorkerError::DeadlineExceeded`], which is not
/// retryable - the coordinator treats it exactly like an explicit failure.
async fn run_with_deadline<T, F, Fut>(
    stage: &str,
    deadline: Duration,
    max_attempts: u32,
    call: F,
) -> Result<T, WorkerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, WorkerError>>,
{
    call_with_retry(stage, max_attempts, |_attempt| {
        let fut = call();
        async move {
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::DeadlineExceeded),
            }
        }
    })
    .await
}

/// The orchestration core: fans one turn out to the workers and folds the
/// results into the shared graph
pub struct TurnCoordinator {
    completion: Arc<dyn CompletionService>,
    longterm: Option<Arc<dyn LongTermStore>>,
    graph: SharedGraph,
    policy: ReflectionPolicy,
    config: EngineConfig,

    /// Detached reflection and long-term persistence tasks; drained by
    /// [`TurnCoordinator::shutdown`]
    background: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl TurnCoordinator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        longterm: Option<Arc<dyn LongTermStore>>,
        graph: SharedGraph,
        config: EngineConfig,
    ) -> Self {
        let policy = ReflectionPolicy::new(&config);
        Self {
            completion,
            longterm,
            graph,
            policy,
            config,
            background: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// The shared graph handle, for checkpointing and queries
    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// The reflection policy, for cache inspection
    pub fn policy(&self) -> &ReflectionPolicy {
        &self.policy
    }

    /// Process one turn end to end; never returns an error
    pub async fn process(&self, turn: Turn) -> TurnOutcome {
        let Turn {
            owner_id,
            text,
            session_id,
            turn_id,
        } = turn;

        // Owner isolation is non-negotiable: without an owner there is no
        // subgraph to write into.
        if let Err(e) = validate_owner_id(&owner_id) {
            let error = MemoryError::InvalidInput {
                field: "owner_id".to_string(),
                reason: e.to_string(),
            };
            return TurnOutcome {
                turn_id,
                response: FALLBACK_RESPONSE.to_string(),
                facts: Vec::new(),
                insights: Vec::new(),
                graph_delta: GraphDelta {
                    owner_id: owner_id.clone(),
                    ..Default::default()
                },
                stage_errors: vec![StageError::new(TurnStage::Received, &error)],
                metadata: TurnMetadata {
                    owner_id,
                    session_id,
                    completed_at: Utc::now(),
                },
            };
        }

        let deadline = Duration::from_secs(self.config.worker_deadline_secs);
        let max_attempts = self.config.worker_max_attempts;
        let mut stage_errors: Vec<StageError> = Vec::new();

        // Extraction and response run concurrently; neither blocks the other
        // and one's failure leaves the other's result intact.
        let (facts_result, response_result) = tokio::join!(
            run_with_deadline("extraction", deadline, max_attempts, || {
                self.completion.extract(&text, &owner_id, turn_id)
            }),
            run_with_deadline("response", deadline, max_attempts, || {
                self.completion.respond(&text, &owner_id)
            }),
        );

        let facts = match facts_result {
            Ok(facts) => facts,
            Err(e) => {
                let error = MemoryError::ExtractionFailure(e.to_string());
                tracing::warn!(owner_id = %owner_id, %e, "extraction degraded to empty fact set");
                stage_errors.push(StageError::new(TurnStage::Extracting, &error));
                Vec::new()
            }
        };
        let response = match response_result {
            Ok(response) => response,
            Err(e) => {
                let error = MemoryError::ResponseFailure(e.to_string());
                tracing::warn!(owner_id = %owner_id, %e, "response degraded to fallback notice");
                stage_errors.push(StageError::new(TurnStage::Responding, &error));
                FALLBACK_RESPONSE.to_string()
            }
        };

        // Best-effort secondary persistence; failures never surface
        if let (Some(store), false) = (&self.longterm, facts.is_empty()) {
            if store.is_configured() {
                let store = Arc::clone(store);
                let facts_to_write = facts.clone();
                let owner = owner_id.clone();
                self.track(tokio::spawn(async move {
                    match store.write(&facts_to_write, &owner).await {
                        Ok(count) if count > 0 => {
                            tracing::debug!(owner_id = %owner, count, "facts persisted to long-term store");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(owner_id = %owner, error = %e, "long-term persistence failed");
                        }
                    }
                }));
            }
        }

        // Reflection decision runs only after extraction settled; the cache
        // refresh comes after gathering so this turn's goals don't feed
        // their own bundle.
        let decision = self
            .policy
            .decide(self.longterm.as_deref(), &owner_id, &facts)
            .await;
        self.policy.refresh_cache(&owner_id, &facts);

        let (insights, graph_delta) = match decision {
            ReflectionDecision::Skip => {
                let delta = self.apply_graph_update(&facts, &[], &owner_id, &mut stage_errors);
                (Vec::new(), delta)
            }
            ReflectionDecision::Run(bundle) => {
                if self.config.synchronous_reflection {
                    let insights = match run_with_deadline(
                        "reflection",
                        deadline,
                        max_attempts,
                        || self.completion.reflect(&facts, &bundle, &owner_id),
                    )
                    .await
                    {
                        Ok(insights) => insights,
                        Err(e) => {
                            let error = MemoryError::ReflectionFailure(e.to_string());
                            tracing::warn!(owner_id = %owner_id, %e, "reflection failed; proceeding without insights");
                            stage_errors.push(StageError::new(TurnStage::Reflecting, &error));
                            Vec::new()
                        }
                    };
                    let delta =
                        self.apply_graph_update(&facts, &insights, &owner_id, &mut stage_errors);
                    (insights, delta)
                } else {
                    // Detached mode: the response returns now; reflection and
                    // the turn's single graph update complete in a tracked
                    // background task and feed only the graph, never the
                    // returned response text.
                    let completion = Arc::clone(&self.completion);
                    let graph = Arc::clone(&self.graph);
                    let facts_for_task = facts.clone();
                    let owner = owner_id.clone();
                    self.track(tokio::spawn(async move {
                        let insights = match run_with_deadline(
                            "reflection",
                            deadline,
                            max_attempts,
                            || completion.reflect(&facts_for_task, &bundle, &owner),
                        )
                        .await
                        {
                            Ok(insights) => insights,
                            Err(e) => {
                                tracing::warn!(owner_id = %owner, error = %e, "detached reflection failed");
                                Vec::new()
                            }
                        };
                        match graph.lock().update(&facts_for_task, &insights, &owner) {
                            Ok(delta) => {
                                tracing::debug!(
                                    owner_id = %owner,
                                    insights = insights.len(),
                                    nodes_added = delta.nodes_added.len(),
                                    edges_added = delta.edges_added.len(),
                                    "detached graph update applied"
                                );
                            }
                            Err(e) => {
                                tracing::error!(owner_id = %owner, error = %e, "detached graph update failed");
                            }
                        }
                    }));
                    let pending = GraphDelta {
                        owner_id: owner_id.clone(),
                        ..Default::default()
                    };
                    (Vec::new(), pending)
                }
            }
        };

        TurnOutcome {
            turn_id,
            response,
            facts,
            insights,
            graph_delta,
            stage_errors,
            metadata: TurnMetadata {
                owner_id,
                session_id,
                completed_at: Utc::now(),
            },
        }
    }

    /// Apply the turn's single graph update under the store's mutex
    fn apply_graph_update(
        &self,
        facts: &[Fact],
        insights: &[Insight],
        owner_id: &str,
        stage_errors: &mut Vec<StageError>,
    ) -> GraphDelta {
        match self.graph.lock().update(facts, insights, owner_id) {
            Ok(delta) => delta,
            Err(e) => {
                let error = MemoryError::GraphUpdateFailure(e.to_string());
                tracing::error!(owner_id, %e, "graph update failed");
                stage_errors.push(StageError::new(TurnStage::GraphUpdating, &error));
                GraphDelta {
                    owner_id: owner_id.to_string(),
                    ..Default::default()
                }
            }
        }
    }

    /// Checkpoint the graph to the configured path
    ///
    /// Persistence I/O failure here is fatal to the operation and surfaced;
    /// a corrupted or unwritten graph must not be silently accepted.
    pub fn checkpoint(&self) -> crate::errors::Result<()> {
        self.graph
            .lock()
            .save(&self.config.graph_path)
            .map_err(|e| MemoryError::GraphUpdateFailure(e.to_string()))?;
        Ok(())
    }

    /// Await all tracked background tasks (detached reflection, long-term
    /// persistence); call before dropping the coordinator on shutdown
    pub async fn shutdown(&self) {
        let handles: Vec<_> = self.background.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
    }

    fn track(&self, handle: tokio::task::JoinHandle<()>) {
        let mut tasks = self.background.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }
}
