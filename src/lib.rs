pub mod builder_config;
pub mod config;
pub mod errors;
pub mod io;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod traits;

pub mod mocks;

pub use builder_config::BuilderConfig;
pub use config::{Config, Operation};
pub use errors::{PredError, Result};
pub use model::{OnnxBuilder, OnnxBuilderLoader};
pub use orchestrator::{EvalReport, Orchestrator, SingleEvalReport};
pub use traits::*;

/// Installs the tracing subscriber, filtered by `RUST_LOG` (`info` when unset).
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
