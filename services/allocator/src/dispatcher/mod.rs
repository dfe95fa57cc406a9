//! Allocation dispatcher.
//!
//! Routes each inbound message by kind. Allocation requests go to the
//! strategy resolved from the registry; capacity reports and returns go to
//! the ledger; capacity queries go to the aggregator. Every message that
//! expects a reply gets exactly one.
//!
//! The dispatcher never writes the ledger on behalf of an allocation.

mod worker;

pub use worker::{AllocatorHandle, HandleError, Job, RequestWorkerPool};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hostalloc_id::{HostId, RequestId};
use hostalloc_messages::{
    AllocateHost, AllocateHostDryRunReply, AllocateHostReply, AllocatorStrategiesReply,
    CpuMemoryCapacityReply, GetCpuMemoryCapacity, Message, Reply, ReportHostCapacity,
    RequestEnvelope,
};
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

use crate::capacity::{CapacityAggregator, CapacityScope};
use crate::ledger::CapacityLedger;
use crate::strategy::{
    completion, AllocationError, AllocationSpec, Completion, StrategyRegistry, StrategyType,
};

/// Where the reply for a message goes. `None` for fire-and-forget callers.
pub type ReplyTo = Option<oneshot::Sender<Reply>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherConfig {
    /// How long a strategy may take before the request fails. Unbounded
    /// when unset.
    pub strategy_timeout: Option<Duration>,
}

#[derive(Clone)]
pub struct AllocationDispatcher {
    ledger: CapacityLedger,
    aggregator: Arc<CapacityAggregator>,
    registry: StrategyRegistry,
    config: DispatcherConfig,
}

impl AllocationDispatcher {
    pub fn new(
        ledger: CapacityLedger,
        aggregator: Arc<CapacityAggregator>,
        registry: StrategyRegistry,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            ledger,
            aggregator,
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &CapacityLedger {
        &self.ledger
    }

    /// Handles one message. Allocation replies may be sent after this
    /// returns, from the task that observes the strategy's completion.
    #[instrument(
        name = "dispatch",
        skip_all,
        fields(request_id = %envelope.request_id, kind = %envelope.kind())
    )]
    pub async fn dispatch(&self, envelope: RequestEnvelope, reply_to: ReplyTo) {
        debug!(queued_ms = envelope.queued_ms(Utc::now()), "Dequeued request");
        let RequestEnvelope {
            request_id,
            message,
            ..
        } = envelope;

        match message {
            Message::AllocateHost(request) => self.handle_allocate(request_id, request, reply_to),
            Message::ReportHostCapacity(report) => self.handle_report(report).await,
            Message::ReturnHostCapacity(ret) => {
                self.handle_return(&ret.host_id, ret.cpu, ret.memory).await
            }
            Message::GetCpuMemoryCapacity(query) => {
                let reply = self.handle_query(query).await;
                send_reply(reply_to, Reply::CpuMemoryCapacity(reply));
            }
            Message::GetAllocatorStrategies => {
                let reply = AllocatorStrategiesReply {
                    strategies: self.registry.exposed_types(),
                };
                send_reply(reply_to, Reply::AllocatorStrategies(reply));
            }
        }
    }

    /// Dispatches a message and waits for its reply, if it has one.
    pub async fn call(&self, message: Message) -> Option<Reply> {
        let expects_reply = message.expects_reply();
        let (tx, rx) = oneshot::channel();
        self.dispatch(RequestEnvelope::new(message), Some(tx)).await;
        if !expects_reply {
            return None;
        }
        rx.await.ok()
    }

    fn handle_allocate(&self, request_id: RequestId, request: AllocateHost, reply_to: ReplyTo) {
        let dry_run = request.dry_run;
        let strategy_type = StrategyType::new(request.strategy_type.as_str());

        let factory = match self.registry.resolve(&strategy_type) {
            Ok(factory) => factory,
            Err(e) => {
                warn!(strategy_type = %strategy_type, "Allocation failed: unknown strategy type");
                let error = e.to_error_code();
                let reply = if dry_run {
                    Reply::AllocateHostDryRun(AllocateHostDryRunReply::failure(error))
                } else {
                    Reply::AllocateHost(AllocateHostReply::failure(error))
                };
                send_reply(reply_to, reply);
                return;
            }
        };

        let timeout = self.config.strategy_timeout;
        let span = info_span!("allocation", strategy_type = %strategy_type, dry_run);

        // Factory and strategy code only ever runs on the relay task.
        let prepare = move || {
            let mut spec = AllocationSpec::from_request(request_id, &request);
            factory.marshal_spec(&mut spec, &request);
            debug!(
                cpu = spec.cpu,
                memory = spec.memory,
                "Strategy resolved, evaluating"
            );
            (factory.strategy(), spec)
        };

        if dry_run {
            tokio::spawn(
                async move {
                    let outcome = evaluate(
                        |c| {
                            let (strategy, spec) = prepare();
                            strategy.dry_run(spec, c)
                        },
                        timeout,
                    )
                    .await;
                    let reply = match outcome {
                        Ok(hosts) => {
                            info!(candidates = hosts.len(), "Dry run succeeded");
                            AllocateHostDryRunReply::success(hosts)
                        }
                        Err(e) => {
                            warn!(error = %e, "Dry run failed");
                            AllocateHostDryRunReply::failure(e.to_error_code())
                        }
                    };
                    send_reply(reply_to, Reply::AllocateHostDryRun(reply));
                }
                .instrument(span),
            );
        } else {
            tokio::spawn(
                async move {
                    let outcome = evaluate(
                        |c| {
                            let (strategy, spec) = prepare();
                            strategy.allocate(spec, c)
                        },
                        timeout,
                    )
                    .await;
                    let reply = match outcome {
                        Ok(host) => {
                            info!(host_id = %host.host_id, "Allocation succeeded");
                            AllocateHostReply::success(host)
                        }
                        Err(e) => {
                            warn!(error = %e, "Allocation failed");
                            AllocateHostReply::failure(e.to_error_code())
                        }
                    };
                    send_reply(reply_to, Reply::AllocateHost(reply));
                }
                .instrument(span),
            );
        }
    }

    async fn handle_report(&self, report: ReportHostCapacity) {
        if let Err(e) = self.ledger.report_capacity(&report).await {
            error!(host_id = %report.host_id, error = %e, "Failed to record capacity report");
        }
    }

    async fn handle_return(&self, host_id: &HostId, cpu: i64, memory: i64) {
        if let Err(e) = self.ledger.return_capacity(host_id, cpu, memory).await {
            error!(host_id = %host_id, error = %e, "Failed to return host capacity");
        }
    }

    async fn handle_query(&self, query: GetCpuMemoryCapacity) -> CpuMemoryCapacityReply {
        let result = match CapacityScope::from_query(query) {
            Ok(scope) => self.aggregator.query_capacity(&scope).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(capacity) => CpuMemoryCapacityReply::success(capacity),
            Err(e) => {
                warn!(error = %e, "Capacity query failed");
                CpuMemoryCapacityReply::failure(e.to_error_code())
            }
        }
    }
}

/// Hands a fresh completion to a strategy entry point and waits for the
/// outcome. A panic inside the strategy fails this request only.
async fn evaluate<T>(
    invoke: impl FnOnce(Completion<T>),
    timeout: Option<Duration>,
) -> Result<T, AllocationError> {
    let (completion, pending) = completion::channel();
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| invoke(completion))) {
        error!(panic = panic_message(payload.as_ref()), "Strategy panicked");
        return Err(AllocationError::Panicked);
    }
    pending.wait_with_deadline(timeout).await
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

fn send_reply(reply_to: ReplyTo, reply: Reply) {
    if let Some(tx) = reply_to {
        if tx.send(reply).is_err() {
            debug!("Reply receiver dropped before the reply was sent");
        }
    }
}
