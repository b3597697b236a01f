//! Orchestrator: the run loop that shepherds a user message through
//! rewrite, decomposition, parallel sub-runs, and final answer assembly.
//!
//! `process_user_message` returns a channel of streamed payloads; the last
//! one is always terminal (`AnswerWithSources`, `Disambiguation`, or
//! `Error`). Disambiguation persists the run to the state store and a
//! follow-up message on the same thread resumes it.

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

use crate::actors::model_gateway_actor::GatewayMsg;
use crate::actors::sql_exec_actor::SqlExecMsg;
use crate::agents::{
    answer, correction, disambiguation, generation, query_rewrite, schema_selection,
    AgentContext,
};
use crate::config::Text2SqlConfig;
use crate::protocol::{
    AnswerSource, DisambiguationQuestion, ErrorKind, OutboundPayload, SqlRows,
    UserMessagePayload,
};
use crate::router::{select_next_agent, RouteDecision};
use crate::run_state::{
    AgentId, AgentMessage, CacheCandidate, CacheHitKind, Run, SubQuestion, SubQuestionStatus,
    TerminationReason,
};
use crate::stores::query_cache::{CacheEntry, QueryCache};
use crate::stores::schema_index::SchemaIndex;
use crate::stores::state_store::StateStore;
use crate::stores::value_index::ValueIndex;
use crate::tool_registry::ToolContext;

/// Shared dependencies for every run.
#[derive(Clone)]
pub struct Orchestrator {
    pub gateway_tx: mpsc::Sender<GatewayMsg>,
    pub sql_tx: mpsc::Sender<SqlExecMsg>,
    pub schema_index: Arc<SchemaIndex>,
    pub value_index: Arc<ValueIndex>,
    pub query_cache: Arc<QueryCache>,
    pub state_store: Arc<StateStore>,
    pub config: Arc<Text2SqlConfig>,
}

impl Orchestrator {
    /// Process one user message on a thread. The returned receiver yields
    /// progress payloads and ends with a terminal payload.
    pub fn process_user_message(
        &self,
        thread_id: &str,
        payload: UserMessagePayload,
    ) -> mpsc::Receiver<OutboundPayload> {
        let (tx, rx) = mpsc::channel(32);
        let deps = self.clone();
        let thread_id = thread_id.to_string();

        tokio::spawn(async move {
            let cancel = Arc::new(AtomicBool::new(false));

            // Wall-clock guard: sets the cooperative cancel flag, checked
            // between agent invocations.
            let timer_cancel = cancel.clone();
            let timeout = Duration::from_secs(deps.config.run_timeout_seconds);
            let timer = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                timer_cancel.store(true, Ordering::SeqCst);
            });

            drive_run(deps, thread_id, payload, tx, cancel).await;
            timer.abort();
        });

        rx
    }
}

async fn emit(tx: &mpsc::Sender<OutboundPayload>, payload: OutboundPayload) {
    let _ = tx.send(payload).await;
}

async fn drive_run(
    deps: Orchestrator,
    thread_id: String,
    payload: UserMessagePayload,
    tx: mpsc::Sender<OutboundPayload>,
    cancel: Arc<AtomicBool>,
) {
    let tools = ToolContext {
        schema_index: deps.schema_index.clone(),
        value_index: deps.value_index.clone(),
        sql_tx: deps.sql_tx.clone(),
        engine: deps.config.target_engine,
        row_limit: deps.config.row_limit,
        tool_timeout: Duration::from_secs(deps.config.tool_timeout_seconds),
        use_column_value_store: deps.config.use_column_value_store,
        run_started_at: Utc::now(),
    };

    // Resume a suspended run when the thread has one; otherwise start fresh.
    let mut run = match deps.state_store.load(&thread_id).await {
        Some(mut suspended) => {
            println!("[Orchestrator] Resuming suspended thread {}", thread_id);
            let reply = payload.user_message.clone();
            for sub in suspended.awaiting_clarification() {
                sub.clarification_reply = Some(reply.clone());
                sub.flags.disambiguation_resolved = true;
                sub.pending_disambiguation.clear();
                sub.status = SubQuestionStatus::Pending;
                sub.push_message(AgentMessage::new(AgentId::User, reply.clone()));
            }
            suspended
        }
        None => {
            let mut run = Run::new(thread_id.clone(), payload.user_message.clone());
            run.chat_history = payload.chat_history.clone();
            run.injected_parameters = payload.injected_parameters.clone();
            run
        }
    };

    let ctx = AgentContext {
        gateway_tx: &deps.gateway_tx,
        tools: &tools,
        config: &deps.config,
    };

    // Query rewrite runs once per run; a resumed run keeps its decomposition.
    if run.rounds.is_empty() {
        emit(
            &tx,
            OutboundPayload::ProcessingUpdate {
                message: "Understanding your question...".to_string(),
            },
        )
        .await;

        let (rewrite, usage) =
            match query_rewrite::run(&ctx, &run.chat_history, &run.user_message).await {
                Ok(result) => result,
                Err(e) => {
                    emit(&tx, OutboundPayload::error(ErrorKind::Internal, e)).await;
                    return;
                }
            };

        run.run_thread.push(
            AgentMessage::new(
                AgentId::QueryRewrite,
                serde_json::to_string(&rewrite).unwrap_or_default(),
            )
            .with_usage(usage),
        );

        if rewrite.is_non_database() {
            let answer = rewrite.non_database_response.unwrap_or_else(|| {
                "I can only answer questions about the connected database.".to_string()
            });
            emit(
                &tx,
                OutboundPayload::AnswerWithSources {
                    answer,
                    sources: vec![],
                    follow_up_suggestions: None,
                },
            )
            .await;
            deps.state_store.clear(&thread_id).await;
            return;
        }

        run.combination_logic = Some(rewrite.combination_logic.clone());
        for (round_index, round) in rewrite.decomposed_user_messages.iter().enumerate() {
            let subs: Vec<SubQuestion> = round
                .iter()
                .filter(|text| !text.trim().is_empty())
                .map(|text| SubQuestion::new(text.clone(), round_index, run.id))
                .collect();
            if !subs.is_empty() {
                run.rounds.push(subs);
            }
        }

        if run.rounds.is_empty() {
            emit(
                &tx,
                OutboundPayload::AnswerWithSources {
                    answer: "I could not find a database question in your message.".to_string(),
                    sources: vec![],
                    follow_up_suggestions: None,
                },
            )
            .await;
            deps.state_store.clear(&thread_id).await;
            return;
        }
    }

    // Rounds run sequentially; sub-questions within a round in parallel.
    let semaphore = Arc::new(Semaphore::new(deps.config.max_parallel_subquestions));
    let total_rounds = run.rounds.len();

    for round_index in run.current_round..total_rounds {
        if cancel.load(Ordering::SeqCst) {
            break;
        }

        run.current_round = round_index;
        emit(
            &tx,
            OutboundPayload::ProcessingUpdate {
                message: format!(
                    "Answering {} sub-question(s) (round {}/{})...",
                    run.rounds[round_index].len(),
                    round_index + 1,
                    total_rounds
                ),
            },
        )
        .await;

        let prior_results = if round_index == 0 {
            None
        } else {
            Some(render_prior_results(&run, round_index))
        };
        let base_message_count = run.run_thread.len();
        let injected_parameters = run.injected_parameters.clone();
        let round_subs: Vec<SubQuestion> = run.rounds[round_index].drain(..).collect();

        let mut handles = Vec::new();
        for sub in round_subs {
            if matches!(
                sub.status,
                SubQuestionStatus::Succeeded | SubQuestionStatus::Failed
            ) {
                // Already settled before a suspension; carry through.
                handles.push(tokio::spawn(async move { sub }));
                continue;
            }

            let deps = deps.clone();
            let tools_run_started_at = tools.run_started_at;
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let prior_results = prior_results.clone();
            let tx = tx.clone();
            let injected = injected_parameters.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let tools = ToolContext {
                    schema_index: deps.schema_index.clone(),
                    value_index: deps.value_index.clone(),
                    sql_tx: deps.sql_tx.clone(),
                    engine: deps.config.target_engine,
                    row_limit: deps.config.row_limit,
                    tool_timeout: Duration::from_secs(deps.config.tool_timeout_seconds),
                    use_column_value_store: deps.config.use_column_value_store,
                    run_started_at: tools_run_started_at,
                };
                drive_sub_question(
                    sub,
                    &deps,
                    &tools,
                    base_message_count,
                    prior_results.as_deref(),
                    &injected,
                    &cancel,
                    &tx,
                )
                .await
            }));
        }

        // join_all keeps the round's original sub-question order regardless
        // of completion order.
        let mut finished = Vec::new();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(sub) => finished.push(sub),
                Err(e) => println!("[Orchestrator] Sub-question task panicked: {}", e),
            }
        }
        run.rounds[round_index] = finished;

        // Suspension: any sub-question waiting on the caller suspends the
        // whole run.
        let pending: Vec<DisambiguationQuestion> = run.rounds[round_index]
            .iter()
            .filter(|sub| sub.status == SubQuestionStatus::AwaitingClarification)
            .flat_map(|sub| sub.pending_disambiguation.clone())
            .collect();
        if !pending.is_empty() {
            if let Err(e) = deps.state_store.save(&run).await {
                println!("[Orchestrator] Failed to persist suspended run: {}", e);
            }
            emit(&tx, OutboundPayload::Disambiguation { questions: pending }).await;
            return;
        }

        // A round where nothing succeeded starves every later round.
        let any_succeeded = run.rounds[round_index]
            .iter()
            .any(|sub| sub.status == SubQuestionStatus::Succeeded);
        if !any_succeeded && round_index + 1 < total_rounds {
            break;
        }
    }

    let succeeded = run
        .rounds
        .iter()
        .flatten()
        .filter(|sub| sub.status == SubQuestionStatus::Succeeded)
        .count();

    if succeeded == 0 {
        let (kind, message) = if cancel.load(Ordering::SeqCst) {
            (
                ErrorKind::RunTimeout,
                "The run exceeded its time budget before any sub-question completed".to_string(),
            )
        } else {
            let first_error = run
                .rounds
                .iter()
                .flatten()
                .find_map(|sub| sub.error.clone())
                .unwrap_or_else(|| "no sub-question produced a result".to_string());
            (ErrorKind::SqlExecutionError, first_error)
        };
        run.termination_reason = Some(TerminationReason::UnrecoverableError);
        emit(&tx, OutboundPayload::error(kind, message)).await;
        deps.state_store.clear(&thread_id).await;
        return;
    }

    // Final answer assembly across every sub-question, in round+index order.
    emit(
        &tx,
        OutboundPayload::ProcessingUpdate {
            message: "Composing the final answer...".to_string(),
        },
    )
    .await;

    let outcome = match answer::run_agent(&ctx, &run).await {
        Ok(outcome) => outcome,
        Err(e) => {
            emit(&tx, OutboundPayload::error(ErrorKind::Internal, e)).await;
            deps.state_store.clear(&thread_id).await;
            return;
        }
    };

    let sources = build_sources(&run);
    write_cache_entries(&deps, &run).await;

    run.termination_reason = Some(TerminationReason::AnswerAndSourcesPresent);
    emit(
        &tx,
        OutboundPayload::AnswerWithSources {
            answer: outcome.answer,
            sources,
            follow_up_suggestions: outcome.follow_up_suggestions,
        },
    )
    .await;
    deps.state_store.clear(&thread_id).await;
}

/// Render settled `(sql, rows)` results from rounds before `round_index`
/// for injection into later-round generation prompts.
fn render_prior_results(run: &Run, round_index: usize) -> String {
    let mut sections = Vec::new();
    for round in run.rounds.iter().take(round_index) {
        for sub in round {
            if sub.status != SubQuestionStatus::Succeeded {
                continue;
            }
            if let (Some(sql), Some(rows)) = (&sub.resolved_sql, &sub.resolved_rows) {
                sections.push(format!(
                    "Sub-question: {}\nSQL: {}\n{}",
                    sub.text,
                    sql,
                    rows.to_markdown()
                ));
            }
        }
    }
    sections.join("\n\n")
}

/// One source per settled sub-question: successes carry their rows, failures
/// carry the error.
fn build_sources(run: &Run) -> Vec<AnswerSource> {
    run.rounds
        .iter()
        .flatten()
        .filter_map(|sub| match (&sub.resolved_sql, &sub.resolved_rows) {
            (Some(sql), Some(rows)) if sub.status == SubQuestionStatus::Succeeded => {
                Some(AnswerSource {
                    sql_query: sql.clone(),
                    sql_rows: SqlRows::Markdown(rows.to_markdown()),
                    error: None,
                })
            }
            _ => sub.error.as_ref().map(|error| AnswerSource {
                sql_query: sub.candidate_sql.clone().unwrap_or_default(),
                sql_rows: SqlRows::Rows(vec![]),
                error: Some(error.clone()),
            }),
        })
        .collect()
}

/// Write-through per the configured strategy. Failures are logged and never
/// fail the run.
async fn write_cache_entries(deps: &Orchestrator, run: &Run) {
    for sub in run.rounds.iter().flatten() {
        if sub.status != SubQuestionStatus::Succeeded {
            continue;
        }
        let (Some(sql), Some(rows)) = (&sub.resolved_sql, &sub.resolved_rows) else {
            continue;
        };
        let entry = CacheEntry {
            question_text: sub.text.clone(),
            sql_template: sql.clone(),
            schemas: sub.selected_schemas.iter().map(|e| e.fqn.clone()).collect(),
            pre_run_rows: deps
                .config
                .pre_run_query_cache
                .then(|| rows.clone()),
            created_at: Utc::now(),
        };
        if let Err(e) = deps.query_cache.record_success(entry).await {
            println!("[Orchestrator] Cache write failed (continuing): {}", e);
        }
    }
}

/// Drive one sub-question through the router until it settles or suspends.
#[allow(clippy::too_many_arguments)]
async fn drive_sub_question(
    mut sub: SubQuestion,
    deps: &Orchestrator,
    tools: &ToolContext,
    base_message_count: usize,
    prior_results: Option<&str>,
    injected_parameters: &std::collections::HashMap<String, serde_json::Value>,
    cancel: &AtomicBool,
    tx: &mpsc::Sender<OutboundPayload>,
) -> SubQuestion {
    let ctx = AgentContext {
        gateway_tx: &deps.gateway_tx,
        tools,
        config: &deps.config,
    };

    sub.status = SubQuestionStatus::Running;
    if sub.thread.is_empty() {
        sub.push_message(AgentMessage::new(AgentId::QueryRewrite, sub.text.clone()));
    }

    let cache: &QueryCache = &deps.query_cache;

    loop {
        if cancel.load(Ordering::SeqCst) {
            sub.status = SubQuestionStatus::Failed;
            sub.error = Some("cancelled".to_string());
            return sub;
        }

        let message_count = base_message_count + sub.message_count();
        let decision = select_next_agent(&sub, message_count, &deps.config);

        match decision {
            RouteDecision::Suspend => {
                sub.status = SubQuestionStatus::AwaitingClarification;
                return sub;
            }

            RouteDecision::Terminate(reason) => {
                match reason {
                    TerminationReason::AnswerAndSourcesPresent => {
                        sub.status = SubQuestionStatus::Succeeded;
                    }
                    TerminationReason::MaxMessages => {
                        sub.status = SubQuestionStatus::Failed;
                        sub.error = Some(format!(
                            "message budget of {} exhausted",
                            deps.config.max_messages
                        ));
                    }
                    TerminationReason::TerminateToken
                    | TerminationReason::UnrecoverableError => {
                        if sub.flags.validated && sub.resolved_rows.is_some() {
                            sub.status = SubQuestionStatus::Succeeded;
                        } else {
                            sub.status = SubQuestionStatus::Failed;
                            if sub.error.is_none() {
                                sub.error =
                                    Some("sub-question ended without a result".to_string());
                            }
                        }
                    }
                }
                return sub;
            }

            RouteDecision::Agent(AgentId::QueryRewrite) | RouteDecision::Agent(AgentId::User) => {
                // Rewrite happens at run level; the seed message stands in
                // for it here. Falling through to schema selection keeps the
                // sub-run moving if routing ever lands here.
                sub.push_message(AgentMessage::new(AgentId::QueryRewrite, sub.text.clone()));
            }

            RouteDecision::Agent(AgentId::Cache) => {
                sub.flags.cache_checked = true;
                let hit = cache.lookup(&sub.text, injected_parameters).await;
                match hit {
                    Some(hit) => {
                        let kind = if deps.config.pre_run_query_cache {
                            CacheHitKind::WithPreRun
                        } else {
                            CacheHitKind::NoPreRun
                        };
                        sub.flags.cache_hit = Some(kind);
                        for fqn in &hit.entry.schemas {
                            if let Some(entity) = deps.schema_index.get(fqn) {
                                sub.merge_schemas(vec![entity.clone()]);
                            }
                        }
                        sub.cache_candidate = Some(CacheCandidate {
                            sql: hit.rendered_sql.clone(),
                            kind,
                            pre_run_rows: hit.entry.pre_run_rows.clone(),
                        });
                        sub.push_message(AgentMessage::new(
                            AgentId::Cache,
                            format!(
                                "cache hit (score {:.2}): {}",
                                hit.score, hit.rendered_sql
                            ),
                        ));
                    }
                    None => {
                        sub.push_message(AgentMessage::new(AgentId::Cache, "cache miss"));
                    }
                }
            }

            RouteDecision::Agent(AgentId::SchemaSelection) => {
                match schema_selection::run(&ctx, &sub.text).await {
                    Ok(outcome) => {
                        sub.merge_schemas(outcome.entities);
                        // Selected schemas always pass through the
                        // disambiguation check before generation.
                        sub.flags.ambiguity_detected = true;
                        sub.push_message(
                            AgentMessage::new(AgentId::SchemaSelection, outcome.summary)
                                .with_usage(Some(outcome.usage)),
                        );
                    }
                    Err(e) => {
                        sub.error = Some(e);
                        sub.status = SubQuestionStatus::Failed;
                        return sub;
                    }
                }
            }

            RouteDecision::Agent(AgentId::Disambiguation) => {
                match disambiguation::run(&ctx, &sub.text, &sub.selected_schemas, None).await {
                    Ok((disambiguation::DisambiguationOutcome::Clear { mapping }, usage)) => {
                        sub.flags.disambiguation_resolved = true;
                        sub.resolved_mapping = Some(mapping.clone());
                        sub.push_message(
                            AgentMessage::new(
                                AgentId::Disambiguation,
                                format!("mappings resolved: {}", mapping),
                            )
                            .with_usage(usage),
                        );
                    }
                    Ok((
                        disambiguation::DisambiguationOutcome::NeedsClarification(questions),
                        usage,
                    )) => {
                        sub.pending_disambiguation = questions.clone();
                        sub.push_message(
                            AgentMessage::new(
                                AgentId::Disambiguation,
                                serde_json::to_string(&questions).unwrap_or_default(),
                            )
                            .with_usage(usage),
                        );
                        // Router sees unresolved disambiguation and suspends.
                    }
                    Err(e) => {
                        sub.error = Some(e);
                        sub.status = SubQuestionStatus::Failed;
                        return sub;
                    }
                }
            }

            RouteDecision::Agent(AgentId::SqlGeneration) => {
                let cached_sql = sub
                    .cache_candidate
                    .as_ref()
                    .filter(|c| c.kind == CacheHitKind::NoPreRun)
                    .map(|c| c.sql.clone());
                let request = generation::GenerationRequest {
                    sub_question: &sub.text,
                    schemas: &sub.selected_schemas,
                    mapping: sub.resolved_mapping.as_deref(),
                    clarification: sub.clarification_reply.as_deref(),
                    prior_results,
                    cached_sql: cached_sql.as_deref(),
                };
                match generation::run(&ctx, request).await {
                    Ok(outcome) => {
                        sub.merge_schemas(outcome.retrieved_entities);
                        sub.flags.sql_generated = outcome.sql.is_some();
                        sub.flags.correction_needed = false;
                        let content = match &outcome.sql {
                            Some(sql) => {
                                sub.candidate_sql = Some(sql.clone());
                                emit(
                                    tx,
                                    OutboundPayload::Thought {
                                        agent: AgentId::SqlGeneration.name().to_string(),
                                        content: sql.clone(),
                                    },
                                )
                                .await;
                                format!("generated SQL: {}", sql)
                            }
                            None => format!(
                                "generation failed: {}",
                                outcome.error.as_deref().unwrap_or("unknown")
                            ),
                        };
                        sub.push_message(
                            AgentMessage::new(AgentId::SqlGeneration, content)
                                .with_usage(Some(outcome.usage)),
                        );
                    }
                    Err(e) => {
                        sub.error = Some(e);
                        sub.status = SubQuestionStatus::Failed;
                        return sub;
                    }
                }
            }

            RouteDecision::Agent(AgentId::SqlCorrection) => {
                let candidate = sub
                    .candidate_sql
                    .clone()
                    .or_else(|| sub.cache_candidate.as_ref().map(|c| c.sql.clone()));
                let Some(candidate) = candidate else {
                    sub.error = Some("no SQL candidate to execute".to_string());
                    sub.push_message(AgentMessage::new(
                        AgentId::SqlCorrection,
                        "no SQL candidate to execute",
                    ));
                    continue;
                };

                match correction::run(&ctx, &sub.text, &candidate).await {
                    Ok(correction::CorrectionOutcome::Validated { sql, rows, usage }) => {
                        sub.flags.validated = true;
                        sub.resolved_sql = Some(sql.clone());
                        sub.resolved_rows = Some(rows);
                        sub.push_message(
                            AgentMessage::new(
                                AgentId::SqlCorrection,
                                format!("validated: {}", sql),
                            )
                            .with_usage(Some(usage)),
                        );
                    }
                    Ok(correction::CorrectionOutcome::Failed {
                        error,
                        details,
                        usage,
                    }) => {
                        sub.error = Some(format!("{} ({})", error, details));
                        sub.push_message(
                            AgentMessage::new(
                                AgentId::SqlCorrection,
                                format!("failed: {}", error),
                            )
                            .with_usage(Some(usage)),
                        );
                    }
                    Err(e) => {
                        sub.error = Some(e);
                        sub.status = SubQuestionStatus::Failed;
                        return sub;
                    }
                }
            }

            RouteDecision::Agent(AgentId::Answer) => {
                // Sub-run level: the answer agent proper runs once at the
                // run level. Reaching here marks the sub-question settled.
                sub.push_message(AgentMessage::new(AgentId::Answer, "sub-question answered"));
            }
        }
    }
}
