mod config;
mod constants;
mod control;
mod host;
mod results;
#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;

use config::AgentConfig;
use flow_engine::{EngineOptions, FlowEngineError, Project, ProjectDefinition, StepRegistry};
use host::{EngineHost, HostServices, HttpNotifier, LogNotifier, Notifier, SnapshotCache};
use results::{DrainOptions, HttpResultTransport, LogResultTransport, ResultDrain, ResultTransport};

/// Errors loading the startup project
#[derive(Debug, thiserror::Error)]
enum ProjectLoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse project: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid project: {0}")]
    Invalid(#[from] FlowEngineError),
}

async fn load_project(path: &Path, registry: &StepRegistry) -> Result<Project, ProjectLoadError> {
    let contents = tokio::fs::read_to_string(path).await?;
    let definition: ProjectDefinition = serde_json::from_str(&contents)?;
    Ok(Project::from_definition(definition, registry)?)
}

fn result_transport(config: &AgentConfig) -> Arc<dyn ResultTransport> {
    let Some(endpoint) = &config.results.endpoint else {
        log::warn!("No result service configured; results will only be logged");
        return Arc::new(LogResultTransport);
    };
    match HttpResultTransport::new(endpoint.as_str(), config.results.request_timeout()) {
        Ok(transport) => {
            log::info!("Shipping results to {}", endpoint);
            Arc::new(transport)
        }
        Err(e) => {
            log::error!("Cannot reach result service {}: {}; results will only be logged", endpoint, e);
            Arc::new(LogResultTransport)
        }
    }
}

fn notifier(config: &AgentConfig) -> Arc<dyn Notifier> {
    let Some(endpoint) = &config.notifications.endpoint else {
        return Arc::new(LogNotifier);
    };
    match HttpNotifier::new(
        endpoint.as_str(),
        config.agent.id.as_str(),
        config.results.request_timeout(),
    ) {
        Ok(notifier) => Arc::new(notifier),
        Err(e) => {
            log::error!("Cannot create notifier for {}: {}; notifications will only be logged", endpoint, e);
            Arc::new(LogNotifier)
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("Flow agent starting...");

    let config_path = AgentConfig::resolve_path(std::env::args().nth(1));
    if !config_path.exists() {
        if let Err(e) = AgentConfig::default().save(&config_path).await {
            log::warn!("Failed to write default configuration to {:?}: {}", config_path, e);
        }
    }
    let config = match AgentConfig::load(&config_path).await {
        Ok(config) => {
            log::info!("Configuration loaded from {:?}", config_path);
            config
        }
        Err(e) => {
            log::warn!("Failed to load configuration from {:?}: {}. Using defaults.", config_path, e);
            AgentConfig::default()
        }
    };

    let drain = ResultDrain::start(
        DrainOptions {
            agent_id: config.agent.id.clone(),
            chunk_bytes: config.results.chunk_bytes,
            preview_max_pixels: config.results.preview_max_pixels,
        },
        result_transport(&config),
    );
    let host = Arc::new(EngineHost::new(HostServices {
        registry: Arc::new(StepRegistry::with_builtin_steps()),
        drain: Arc::new(drain),
        notifier: notifier(&config),
        cache: Arc::new(SnapshotCache::new(config.cache.capacity)),
        engine_options: EngineOptions {
            iteration_interval: config.iteration_interval(),
        },
    }));

    if let Some(path) = &config.project {
        match load_project(path, host.registry()).await {
            Ok(project) => {
                host.try_activate_project(project).await;
            }
            Err(e) => log::error!("Failed to load project {:?}: {}", path, e),
        }
    }

    let server = match control::start_server(Arc::clone(&host), &config.control.bind_address()).await {
        Ok((_, handle)) => handle,
        Err(e) => {
            log::error!(
                "Failed to bind control surface on {}: {}",
                config.control.bind_address(),
                e
            );
            host.shutdown().await;
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for the shutdown signal: {}", e);
    }
    log::info!("Shutdown requested");

    server.abort();
    host.shutdown().await;
    log::info!("Flow agent stopped");
}
