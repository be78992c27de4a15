//! Dependency wiring and process lifecycle.
//!
//! # Design
//! - Configuration loads before logging so the configured level applies from
//!   the first line; load errors are returned to `main` and printed there.
//! - The pipeline runs until SIGINT or SIGTERM. In dry-run mode it runs
//!   until standard input reaches end of file instead.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use q4d_bus::{BusConnector, BusOptions, MemoryBroker, MqttConnector, MqttSettings};
use q4d_config::{ClientConfig, load_config, load_type_mapping};
use q4d_core::{TransferExecutor, TransferOutcome, TransferRequest, TypeResolver};
use q4d_dispatch::DispatcherSettings;
use q4d_telemetry::{
    LogFormat, LoggingConfig, Metrics, ProcessSpanGuard, build_sha, init_logging, record_mode,
};
use q4d_transfer::{LftpConfig, LftpExecutor};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::Cli;
use crate::error::{AppError, AppResult};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};

/// What ends the running pipeline.
enum ShutdownTrigger {
    Signals,
    Stdin(MemoryBroker),
}

/// Dependencies required to start the pipeline.
pub(crate) struct BootstrapDependencies {
    config: ClientConfig,
    resolver: TypeResolver,
    metrics: Metrics,
    connector: Arc<dyn BusConnector>,
    executor: Arc<dyn TransferExecutor>,
    trigger: ShutdownTrigger,
}

impl BootstrapDependencies {
    /// Build production (or dry-run) dependencies from loaded configuration.
    pub(crate) fn new(config: ClientConfig, mapping: &Path, dry_run: bool) -> AppResult<Self> {
        let entries = load_type_mapping(mapping, config.destinations.base.as_deref())
            .map_err(|err| AppError::config("type_mapping.load", err))?
            .into_entries();
        info!(
            path = %mapping.display(),
            categories = entries.len(),
            "Category mapping loaded"
        );
        let resolver = TypeResolver::new(entries, config.destinations.default.clone());
        let metrics =
            Metrics::new().map_err(|err| AppError::telemetry("telemetry.metrics", err))?;

        let (connector, executor, trigger): (
            Arc<dyn BusConnector>,
            Arc<dyn TransferExecutor>,
            ShutdownTrigger,
        ) = if dry_run {
            let broker = MemoryBroker::new();
            (
                Arc::new(broker.clone()),
                Arc::new(DryRunExecutor),
                ShutdownTrigger::Stdin(broker),
            )
        } else {
            (
                Arc::new(MqttConnector::new(mqtt_settings(&config))),
                Arc::new(LftpExecutor::new(lftp_config(&config))),
                ShutdownTrigger::Signals,
            )
        };

        Ok(Self {
            config,
            resolver,
            metrics,
            connector,
            executor,
            trigger,
        })
    }
}

/// Entry point for the client boot sequence.
///
/// # Errors
///
/// Returns an error if configuration, logging, the category mapping or the
/// bus connection cannot be set up.
pub async fn run_app(cli: Cli) -> AppResult<()> {
    let config =
        load_config(cli.config.as_deref()).map_err(|err| AppError::config("config.load", err))?;
    let logging = LoggingConfig {
        level: cli.log_level(&config.log_level),
        format: cli.log_format.unwrap_or_else(LogFormat::infer),
        build_sha: build_sha(),
    };
    init_logging(&logging).map_err(|err| AppError::telemetry("telemetry.init", err))?;
    let _context = ProcessSpanGuard::enter("bootstrap");

    info!(
        bus = %format!("{}:{}", config.bus.host, config.bus.port),
        transfer_host = %config.transfer.host,
        dry_run = cli.dry_run,
        "Q4D client bootstrap starting"
    );
    let dependencies = BootstrapDependencies::new(config, &cli.type_mapping, cli.dry_run)?;
    run_app_with(dependencies).await
}

/// Boot sequence over injected dependencies.
pub(crate) async fn run_app_with(dependencies: BootstrapDependencies) -> AppResult<()> {
    let BootstrapDependencies {
        config,
        resolver,
        metrics,
        connector,
        executor,
        trigger,
    } = dependencies;

    let orchestrator = Orchestrator::start(
        orchestrator_settings(&config),
        connector,
        executor,
        resolver,
        metrics,
    )
    .await?;
    record_mode("running");

    let waited = match trigger {
        ShutdownTrigger::Signals => wait_for_signal().await,
        ShutdownTrigger::Stdin(broker) => {
            let stdin = BufReader::new(tokio::io::stdin());
            feed_lines(stdin, &broker, &config.bus.inbound_topic)
                .await
                .map(|fed| info!(events = fed, "Standard input closed"))
                .map_err(|err| AppError::io("stdin.read", err))
        }
    };

    record_mode("stopping");
    orchestrator.stop(config.shutdown_grace).await;
    waited
}

/// Translate loaded configuration into pipeline settings.
pub(crate) fn orchestrator_settings(config: &ClientConfig) -> OrchestratorSettings {
    OrchestratorSettings {
        inbound_topic: config.bus.inbound_topic.clone(),
        label_topic: config.bus.label_topic.clone(),
        labels: config.labels,
        dispatcher: DispatcherSettings {
            workers: config.dispatch.workers,
            queue_capacity: config.dispatch.queue_capacity(),
            max_attempts: config.dispatch.max_attempts,
            segments: config.transfer.segments,
        },
        bus: BusOptions {
            startup_retries: config.bus.startup_retries,
            publish_timeout: config.bus.publish_timeout,
            ..BusOptions::default()
        },
    }
}

fn mqtt_settings(config: &ClientConfig) -> MqttSettings {
    MqttSettings {
        host: config.bus.host.clone(),
        port: config.bus.port,
        client_id: config.bus.client_id.clone(),
        user: config.bus.user.clone(),
        password: config.bus.password.clone(),
        keep_alive: config.bus.keep_alive,
        persistent_session: config.bus.persistent_session,
    }
}

fn lftp_config(config: &ClientConfig) -> LftpConfig {
    let mut lftp = LftpConfig::new(
        config.transfer.host.clone(),
        config.transfer.creds.clone(),
        config.transfer.threads,
    );
    lftp.program.clone_from(&config.transfer.tool);
    lftp.job_timeout = config.transfer.job_timeout;
    lftp
}

#[cfg(unix)]
async fn wait_for_signal() -> AppResult<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).map_err(AppError::signal)?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.map_err(AppError::signal)?;
            info!("Interrupt received; shutting down");
        }
        _ = terminate.recv() => info!("Termination requested; shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> AppResult<()> {
    tokio::signal::ctrl_c().await.map_err(AppError::signal)?;
    info!("Interrupt received; shutting down");
    Ok(())
}

/// Deliver each non-blank line of `reader` to `topic` on the memory broker.
///
/// Returns the number of lines delivered.
async fn feed_lines<R>(reader: R, broker: &MemoryBroker, topic: &str) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut fed = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if broker.deliver(topic, line.as_bytes()) == 0 {
            warn!(topic, "No subscriber for dry-run event");
        }
        fed += 1;
    }
    Ok(fed)
}

/// Executor that logs the transfer it would run and reports success.
#[derive(Debug, Clone, Copy, Default)]
struct DryRunExecutor;

#[async_trait]
impl TransferExecutor for DryRunExecutor {
    async fn execute(&self, request: &TransferRequest) -> TransferOutcome {
        info!(
            job_key = %request.key,
            attempt = request.attempt,
            source = %request.source_path,
            destination = %request.destination_dir.display(),
            segments = request.segments.get(),
            "Dry run: transfer skipped"
        );
        debug!(job_id = %request.job_id, "Dry run transfer reported as success");
        TransferOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, anyhow};
    use chrono::Utc;
    use q4d_bus::Qos;
    use q4d_config::{
        BusSettings, DestinationSettings, DispatchSettings, LabelSettings, TransferSettings,
    };
    use q4d_core::{Event, Job};
    use std::num::{NonZeroU32, NonZeroUsize};
    use std::time::Duration;

    fn client_config() -> Result<ClientConfig> {
        Ok(ClientConfig {
            bus: BusSettings {
                host: "broker".into(),
                port: 1883,
                user: "u".into(),
                password: "p".into(),
                client_id: "q4d-client".into(),
                inbound_topic: "Down".into(),
                label_topic: "Label".into(),
                persistent_session: true,
                keep_alive: Duration::from_secs(30),
                startup_retries: 0,
                publish_timeout: Duration::from_secs(2),
            },
            transfer: TransferSettings {
                host: "seedbox".into(),
                creds: "u:p".into(),
                threads: NonZeroU32::new(3).ok_or_else(|| anyhow!("zero"))?,
                segments: NonZeroU32::new(4).ok_or_else(|| anyhow!("zero"))?,
                tool: "/usr/local/bin/lftp".into(),
                job_timeout: Some(Duration::from_secs(600)),
            },
            dispatch: DispatchSettings {
                workers: NonZeroUsize::new(3).ok_or_else(|| anyhow!("zero"))?,
                queue_multiplier: NonZeroUsize::new(4).ok_or_else(|| anyhow!("zero"))?,
                max_attempts: NonZeroU32::new(2).ok_or_else(|| anyhow!("zero"))?,
            },
            labels: LabelSettings {
                enabled: true,
                label_failures: false,
            },
            destinations: DestinationSettings::default(),
            shutdown_grace: Duration::from_millis(200),
            log_level: "info".into(),
        })
    }

    #[test]
    fn settings_follow_configuration() -> Result<()> {
        let config = client_config()?;
        let settings = orchestrator_settings(&config);
        assert_eq!(settings.dispatcher.workers.get(), 3);
        assert_eq!(settings.dispatcher.queue_capacity, 12);
        assert_eq!(settings.dispatcher.segments.get(), 4);
        assert_eq!(settings.bus.publish_timeout, Duration::from_secs(2));
        assert_eq!(settings.inbound_topic, "Down");

        let lftp = lftp_config(&config);
        assert_eq!(lftp.program, "/usr/local/bin/lftp");
        assert_eq!(lftp.job_timeout, Some(Duration::from_secs(600)));
        assert_eq!(mqtt_settings(&config).client_id, "q4d-client");
        Ok(())
    }

    #[test]
    fn missing_mapping_is_a_config_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let result = BootstrapDependencies::new(
            client_config()?,
            &dir.path().join("absent.json"),
            true,
        );
        assert!(matches!(result, Err(AppError::Config { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn feed_lines_skips_blank_lines() -> Result<()> {
        let broker = MemoryBroker::new();
        let mut session = broker.connect().await?;
        session.subscribe("Down", Qos::ExactlyOnce).await?;

        let input: &[u8] = b"/a\tabc\tTV\n\n   \n/b\tdef\tTV\n";
        assert_eq!(feed_lines(input, &broker, "Down").await?, 2);

        let first = tokio::time::timeout(Duration::from_secs(1), session.next_message()).await??;
        assert_eq!(first.payload, b"/a\tabc\tTV");
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_processes_events_until_input_ends() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mapping = dir.path().join("types.json");
        std::fs::write(&mapping, serde_json::json!({ "TV": "/media/tv" }).to_string())?;

        let dependencies = BootstrapDependencies::new(client_config()?, &mapping, true)?;
        let ShutdownTrigger::Stdin(broker) = &dependencies.trigger else {
            return Err(anyhow!("dry run must read standard input"));
        };
        let broker = broker.clone();
        let settings = orchestrator_settings(&dependencies.config);
        let orchestrator = Orchestrator::start(
            settings,
            dependencies.connector,
            dependencies.executor,
            dependencies.resolver,
            dependencies.metrics,
        )
        .await?;

        let input: &[u8] = b"/seed/show\tabc123\tTV\n";
        feed_lines(input, &broker, "Down").await?;
        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.published().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;
        orchestrator.stop(Duration::from_secs(1)).await;

        assert_eq!(broker.published()[0].payload, b"abc123\tDONE");
        Ok(())
    }

    #[tokio::test]
    async fn dry_run_executor_reports_success() -> Result<()> {
        let event = Event::decode(b"/seed/a\tabc\tTV", Utc::now())?;
        let job = Job::from_event(&event, "/media/tv");
        let request = TransferRequest::for_job(&job, NonZeroU32::MIN);
        assert_eq!(DryRunExecutor.execute(&request).await, TransferOutcome::Success);
        Ok(())
    }
}
