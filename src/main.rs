use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trueflow::{
    cli::Cli,
    client::{ClientCommand, TraceSocketClient},
    config::TraceFlowConfig,
    dead_code::DeadCodeReport,
    dispatch::UiQueue,
    event::TraceEvent,
    filter::EventFilter,
    hub::HubClient,
    pipeline::EventIngestionPipeline,
    service::TraceQueryService,
    sink::{DisconnectReason, TraceEventSink},
};

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Terminal host: one status line per refresh, stop flag on disconnect
#[derive(Default)]
struct ConsoleHost {
    pipeline: OnceLock<Weak<EventIngestionPipeline>>,
    service: OnceLock<Arc<TraceQueryService>>,
    publish_updates: bool,
    disconnected: AtomicBool,
}

impl TraceEventSink for ConsoleHost {
    fn on_connected(&self, peer: &str) {
        eprintln!("Connected to trace server at {peer}");
    }

    fn on_disconnected(&self, reason: &DisconnectReason) {
        eprintln!("Trace stream ended: {reason}");
        self.disconnected.store(true, Ordering::SeqCst);
    }

    fn on_error(&self, error: &str) {
        warn!(error, "trace connection error");
    }

    fn on_refresh(&self) {
        let Some(pipeline) = self.pipeline.get().and_then(Weak::upgrade) else {
            return;
        };
        let stats = pipeline.stats();
        let dead = pipeline.dead_code_report();
        eprintln!(
            "[trueflow] calls={} completed={} total={:.1}ms pending={} roots={} dead={}/{}",
            stats.calls,
            stats.completed_calls,
            stats.total_duration_ms,
            stats.pending_calls,
            stats.root_calls,
            dead.dead_count,
            dead.total_defined,
        );
        if self.publish_updates {
            if let Some(service) = self.service.get() {
                service.publish_update();
            }
        }
    }

    fn on_cycle_complete(&self, event: &TraceEvent) {
        info!(session = %event.session_id, "trace cycle complete");
    }
}

fn print_dead_code(report: &DeadCodeReport) {
    eprintln!();
    eprintln!("Dead Code Report");
    eprintln!("════════════════════════════════════════");
    if !report.has_registry {
        eprintln!("No function registry received; every observed function counts as defined.");
    }
    eprintln!(
        "Defined: {}  Called: {}  Dead: {} ({:.1}%)",
        report.total_defined, report.total_called, report.dead_count, report.dead_percentage
    );
    for status in report.functions.iter().filter(|f| !f.alive) {
        match (&status.file, status.line) {
            (Some(file), Some(line)) => eprintln!("  {}  ({file}:{line})", status.function_key),
            _ => eprintln!("  {}", status.function_key),
        }
    }
}

fn load_config(args: &Cli) -> Result<TraceFlowConfig> {
    let mut config = match &args.config {
        Some(path) => TraceFlowConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => TraceFlowConfig::default(),
    };
    config.apply_env_overrides();
    args.apply_to(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    if args.top == 0 {
        bail!("Invalid value for --top: 0 (must be >= 1)");
    }

    init_tracing(args.debug);

    let config = load_config(&args)?;
    let filter = EventFilter::from_rules(&config.filter)?;

    let queue = UiQueue::new();
    let host = Arc::new(ConsoleHost {
        publish_updates: config.hub.publish_updates,
        ..ConsoleHost::default()
    });
    let pipeline = Arc::new(EventIngestionPipeline::new(
        &config.pipeline,
        filter,
        Arc::new(queue.clone()),
        host.clone(),
    ));
    let _ = host.pipeline.set(Arc::downgrade(&pipeline));

    let hub = if args.hub_enabled() {
        let hub = HubClient::from_config(config.hub.clone(), Arc::new(queue.clone()))?;
        let service = TraceQueryService::attach(Arc::clone(&pipeline), &hub);
        let _ = host.service.set(service);
        if hub.connect() {
            info!(url = %hub.url(), instance = %hub.instance_id(), "joined hub");
        } else {
            warn!(url = %hub.url(), "hub unavailable, continuing without it");
        }
        Some(hub)
    } else {
        None
    };

    let client = TraceSocketClient::new(
        pipeline.clone(),
        Duration::from_millis(config.trace.connect_timeout_ms),
    );
    client
        .connect(&config.trace.host, config.trace.port)
        .with_context(|| {
            format!(
                "Failed to connect to trace server at {}:{}",
                config.trace.host, config.trace.port
            )
        })?;
    if let Err(e) = client.send_command(ClientCommand::GetRegistry) {
        warn!(error = %e, "could not request function registry");
    }

    queue.run_until(Duration::from_millis(100), || {
        host.disconnected.load(Ordering::SeqCst)
    });

    client.disconnect();
    if let Some(hub) = &hub {
        hub.disconnect();
    }

    if args.summary {
        pipeline.print_summary(args.top);
        print_dead_code(&pipeline.dead_code_report());
    }

    Ok(())
}
