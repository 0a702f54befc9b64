use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::contract::lib::{Error, Result};

/// Handle for swapping the operator's log filter at runtime.
#[derive(Clone)]
pub struct LogLevelHandle {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogLevelHandle {
    pub fn set_directive(&self, directive: &str) -> Result<()> {
        let filter = EnvFilter::try_new(directive).map_err(|e| Error::TracingError(e.to_string()))?;
        self.handle
            .reload(filter)
            .map_err(|e| Error::TracingError(e.to_string()))
    }

    pub fn current_directive(&self) -> Option<String> {
        self.handle.with_current(|filter| filter.to_string()).ok()
    }
}

/// Initialize tracing. `RUST_LOG` seeds the filter, defaulting to `info`.
pub fn init() -> Result<LogLevelHandle> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| Error::TracingError(e.to_string()))?;
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init()
        .map_err(|e| Error::TracingError(e.to_string()))?;

    Ok(LogLevelHandle { handle })
}
