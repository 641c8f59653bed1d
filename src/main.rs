use anyhow::{ensure, Context, Result};
use clap::Parser;

use seg_pred::{init_tracing, Config, OnnxBuilderLoader, Orchestrator};

fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing();

    ensure!(
        config.bui_dir.is_dir(),
        "Builder directory does not exist: {}",
        config.bui_dir.display()
    );
    ensure!(
        config.eval_only || config.dir_in.exists(),
        "Input path does not exist: {}",
        config.dir_in.display()
    );

    let orchestrator = Orchestrator::new(OnnxBuilderLoader::new(config.device_id));
    orchestrator
        .run(&config)
        .with_context(|| format!("Failed to run {:?}", config.name))
}
