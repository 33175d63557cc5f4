//! Flexdisco entry point: one discovery pass, configurations on stdout.

use std::sync::Arc;

use log::{error, info, warn};

use flexdisco::runtime::{ContainerRuntime, DockerRuntime};
use flexdisco::{Config, Discovery, TemplateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!("Starting container discovery with config: {:?}", cfg);

    let templates = match TemplateStore::load_dir(&cfg.template_dir) {
        Ok(templates) => templates,
        Err(e) => {
            warn!("Unable to load discovery templates: {}", e);
            TemplateStore::default()
        }
    };

    // Container Runtime (Docker)
    let runtime: Arc<dyn ContainerRuntime> = match DockerRuntime::connect(&cfg).await {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            error!("Unable to set docker client: {}", e);
            println!("[]");
            return Ok(());
        }
    };

    let mut discovery = Discovery::new(
        runtime,
        cfg.settings(),
        templates,
        cfg.container_id.clone(),
    );
    let mut configs = Vec::new();
    let summary = discovery.run(&mut configs).await;
    info!(
        "Discovered {} configs across {} containers (agent container: {})",
        summary.emitted,
        summary.containers,
        summary.self_id.as_deref().unwrap_or("unknown")
    );

    print!("{}", serde_yaml::to_string(&configs)?);
    Ok(())
}
