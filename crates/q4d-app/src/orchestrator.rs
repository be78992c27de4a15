//! Composition of bus, intake, dispatcher and label publishing.
//!
//! # Design
//! - Start order: dispatcher, intake, bus connection, inbound subscription,
//!   outcome pump. A failure part way tears down what already started.
//! - Stop order: intake, dispatcher drain, outcome pump, bus. Labels for jobs
//!   that finish during the drain still go out before the bus closes.
//! - Jobs ended by shutdown are never labelled; they were not attempted to
//!   completion.

use std::sync::Arc;
use std::time::Duration;

use q4d_bus::{BusClient, BusConnector, BusHandle, BusOptions, MessageHandler, Qos};
use q4d_config::LabelSettings;
use q4d_core::{
    FailureCause, JobKey, JobReport, Label, LabelMessage, TransferExecutor, TypeResolver,
};
use q4d_dispatch::{Dispatcher, DispatcherSettings, ShutdownSummary};
use q4d_telemetry::Metrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::intake::EventIntake;

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Topic carrying finished-torrent events.
    pub inbound_topic: String,
    /// Topic receiving label updates.
    pub label_topic: String,
    /// Label publishing switches.
    pub labels: LabelSettings,
    /// Worker pool sizing and retry budget.
    pub dispatcher: DispatcherSettings,
    /// Bus supervisor tuning.
    pub bus: BusOptions,
}

/// Running pipeline.
pub struct Orchestrator {
    bus: BusHandle,
    dispatcher: Arc<Dispatcher>,
    intake: Arc<EventIntake>,
    pump: JoinHandle<()>,
    finish: oneshot::Sender<()>,
    metrics: Metrics,
}

impl Orchestrator {
    /// Start the worker pool, connect to the bus and subscribe to the
    /// inbound topic.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Bus`] when no connection could be made and
    /// [`AppError::Subscribe`] when the inbound topic is refused.
    pub async fn start(
        settings: OrchestratorSettings,
        connector: Arc<dyn BusConnector>,
        executor: Arc<dyn TransferExecutor>,
        resolver: TypeResolver,
        metrics: Metrics,
    ) -> AppResult<Self> {
        let (reports_tx, reports) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::start(
            settings.dispatcher,
            executor,
            reports_tx,
            metrics.clone(),
        ));
        let intake = Arc::new(EventIntake::new(
            Arc::new(resolver),
            Arc::clone(&dispatcher),
        ));
        let handler: Arc<dyn MessageHandler> = intake.clone();

        let bus = match BusClient::connect(settings.bus, connector, handler, metrics.clone()).await
        {
            Ok(bus) => bus,
            Err(err) => {
                dispatcher.shutdown(Duration::ZERO).await;
                return Err(AppError::bus("bus.connect", err));
            }
        };
        if let Err(err) = bus
            .subscribe(settings.inbound_topic.clone(), Qos::ExactlyOnce)
            .await
        {
            bus.disconnect().await;
            dispatcher.shutdown(Duration::ZERO).await;
            return Err(AppError::subscribe(&settings.inbound_topic, err));
        }

        let (finish, finished) = oneshot::channel();
        let pump = OutcomePump {
            bus: bus.clone(),
            label_topic: settings.label_topic.clone(),
            labels: settings.labels,
            metrics: metrics.clone(),
        }
        .spawn(reports, finished);

        info!(
            inbound_topic = %settings.inbound_topic,
            label_topic = %settings.label_topic,
            workers = settings.dispatcher.workers.get(),
            queue_capacity = settings.dispatcher.queue_capacity,
            max_attempts = settings.dispatcher.max_attempts.get(),
            labelling = settings.labels.enabled,
            "Orchestrator started"
        );
        Ok(Self {
            bus,
            dispatcher,
            intake,
            pump,
            finish,
            metrics,
        })
    }

    /// Bus connection used by the pipeline.
    #[must_use]
    pub const fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Current dispatcher counts.
    #[must_use]
    pub fn stats(&self) -> q4d_dispatch::DispatcherStats {
        self.dispatcher.stats()
    }

    /// Stop intake, drain the dispatcher for up to `grace`, flush pending
    /// label updates, then disconnect from the bus.
    pub async fn stop(self, grace: Duration) -> ShutdownSummary {
        info!(grace_secs = grace.as_secs_f64(), "Orchestrator stopping");
        self.intake.stop();

        let summary = self.dispatcher.shutdown(grace).await;
        if summary.aborted.is_empty() {
            info!(
                discarded = summary.discarded.len(),
                "Running transfers settled within the grace period"
            );
        } else {
            warn!(
                aborted = summary.aborted.len(),
                jobs = %join_keys(&summary.aborted),
                discarded = summary.discarded.len(),
                "Transfers still running when the grace period expired were aborted"
            );
        }

        let _ = self.finish.send(());
        if let Err(err) = self.pump.await {
            error!(error = %err, "Outcome pump failed");
        }
        self.bus.disconnect().await;

        let snapshot = self.metrics.snapshot();
        info!(
            succeeded = snapshot.jobs_succeeded_total,
            failed = snapshot.jobs_failed_total,
            retries = snapshot.job_retries_total,
            reconnects = snapshot.bus_reconnects_total,
            "Orchestrator stopped"
        );
        match self.metrics.render() {
            Ok(exposition) => debug!(metrics = %exposition, "Final metrics"),
            Err(err) => warn!(error = %err, "Final metrics could not be rendered"),
        }
        summary
    }
}

fn join_keys(keys: &[JobKey]) -> String {
    keys.iter().map(JobKey::as_str).collect::<Vec<_>>().join(",")
}

/// Logs terminal outcomes and publishes label updates.
struct OutcomePump {
    bus: BusHandle,
    label_topic: String,
    labels: LabelSettings,
    metrics: Metrics,
}

impl OutcomePump {
    fn spawn(
        self,
        reports: mpsc::UnboundedReceiver<JobReport>,
        finish: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(reports, finish))
    }

    async fn run(
        self,
        reports: mpsc::UnboundedReceiver<JobReport>,
        mut finish: oneshot::Receiver<()>,
    ) {
        let mut stream = UnboundedReceiverStream::new(reports);
        loop {
            tokio::select! {
                biased;
                report = stream.next() => match report {
                    Some(report) => self.handle(report).await,
                    None => break,
                },
                _ = &mut finish => {
                    let mut remaining = stream.into_inner();
                    while let Ok(report) = remaining.try_recv() {
                        self.handle(report).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle(&self, report: JobReport) {
        let job = &report.job;
        match &report.failure {
            None => info!(
                job_id = %job.id(),
                job_key = %job.key(),
                source = job.source_path(),
                destination = %job.destination_dir().display(),
                attempt = job.attempt(),
                "Transfer succeeded"
            ),
            Some(cause) => error!(
                job_id = %job.id(),
                job_key = %job.key(),
                source = job.source_path(),
                destination = %job.destination_dir().display(),
                attempt = job.attempt(),
                cause = %cause,
                "Transfer failed"
            ),
        }

        let Some(label) = self.label_for(&report) else {
            return;
        };
        let message = LabelMessage::new(job.payload_hash(), label);
        match self
            .bus
            .publish(&self.label_topic, message.encode(), Qos::ExactlyOnce)
            .await
        {
            Ok(()) => {
                self.metrics.inc_label_published(label.as_str());
                info!(
                    job_key = %job.key(),
                    label = label.as_str(),
                    topic = %self.label_topic,
                    "Label update published"
                );
            }
            Err(err) => warn!(
                job_key = %job.key(),
                label = label.as_str(),
                error = %err,
                "Label update not published"
            ),
        }
    }

    fn label_for(&self, report: &JobReport) -> Option<Label> {
        if !self.labels.enabled || !report.job.has_hash() {
            return None;
        }
        match &report.failure {
            None => Some(Label::Done),
            Some(FailureCause::Shutdown | FailureCause::Aborted) => None,
            Some(_) if self.labels.label_failures => Some(Label::Nope),
            Some(_) => None,
        }
    }
}
