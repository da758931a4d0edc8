//! Prometheus exporter for Zigbee2MQTT telemetry.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use mqtt_exporter::{ExporterConfig, HttpServer, MetricCollector, MetricRegistry, MqttSubscriber};
use mqtt_exporter_common::{MessageDecoder, TopicNamespace, init_tracing, normalize_level};

/// Prometheus exporter for Zigbee2MQTT telemetry.
#[derive(Parser, Debug)]
#[command(name = "mqtt-exporter")]
#[command(about = "Export Zigbee2MQTT device telemetry as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config and PROMETHEUS_PORT).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides LOG_LEVEL.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration: defaults < file < environment < CLI
    let mut config = if let Some(config_path) = &args.config {
        ExporterConfig::load_from_file(config_path)?
    } else {
        ExporterConfig::default()
    };
    config.apply_process_env()?;

    if let Some(listen) = args.listen {
        config.prometheus.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = normalize_level(&level)?;
    }
    config.validate()?;

    init_tracing(&config.logging)?;

    info!("Starting MQTT exporter");

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // The registry is shared by the subscriber (writer) and HTTP server (reader)
    let registry = Arc::new(MetricRegistry::new(
        config.prometheus.prefix.clone(),
        config.prometheus.device_label.clone(),
    ));
    let namespace = TopicNamespace::new(config.mqtt.topic_namespace.clone())?;
    let collector = Arc::new(MetricCollector::new(
        MessageDecoder::new(namespace),
        registry.clone(),
    ));

    // Bind before consuming anything so an unusable port stops startup.
    let http_server = HttpServer::bind(
        collector.clone(),
        config.prometheus.listen_addr()?,
        &config.prometheus.path,
    )
    .await?;
    let subscriber = MqttSubscriber::new(collector.clone(), config.mqtt.clone());

    // Start subscriber
    let subscriber_shutdown = shutdown_rx.clone();
    let subscriber_task = tokio::spawn(async move {
        if let Err(e) = subscriber.run(subscriber_shutdown).await {
            error!("Subscriber error: {}", e);
        }
    });

    // Start HTTP server
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.run(http_shutdown).await {
            error!("Metrics endpoint error: {:#}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("Received SIGINT, stopping MQTT exporter");
        }
        _ = terminate() => {
            warn!("Received SIGTERM, stopping MQTT exporter");
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Wait for tasks to complete
    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        let _ = subscriber_task.await;
        let _ = http_task.await;
    })
    .await;

    // Print final stats
    let stats = collector.stats();
    info!(
        messages_received = stats.messages_received,
        messages_rejected = stats.messages_rejected,
        fields_recorded = stats.fields_recorded,
        fields_skipped = stats.fields_skipped,
        instruments = registry.instrument_count(),
        "Final statistics"
    );

    info!("Exporter stopped");
    Ok(())
}

/// Resolve when SIGTERM is received; never resolves on non-unix targets.
async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
