use crate::root::base_dir;
use anyhow::Context;
use killswitch_core::config::Config;
use killswitch_server::AppState;
use std::path::Path;

pub fn run(config_path: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let mut config = Config::load(config_path).context("failed to load config")?;
    if let Some(port) = port {
        config.server.port = port;
    }
    for w in config.validate() {
        tracing::warn!(level = ?w.level, "{}", w.message);
    }
    if config.has_errors() {
        anyhow::bail!("config validation found errors; run 'killswitch config validate'");
    }

    let base = base_dir(config_path);
    let state = AppState::from_config(&config, &base).context("failed to open kill-switch state")?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let addr = format!("{}:{}", config.server.bind, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local = listener.local_addr()?;
        eprintln!("killswitch listening on http://{local}");
        killswitch_server::serve_on(state, listener).await
    })
}
