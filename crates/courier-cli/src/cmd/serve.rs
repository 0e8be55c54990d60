use anyhow::Context;
use courier_core::config::Config;
use std::path::Path;

pub fn run(root: &Path, port: Option<u16>) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let port = port.unwrap_or(config.server.port);
    let root = root.to_path_buf();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(courier_server::serve(root, port))
}
