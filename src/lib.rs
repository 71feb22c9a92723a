pub mod blob;
pub mod config;
pub mod feedback;
pub mod models;
pub mod preview;
pub mod progress;
pub mod reconcile;
pub mod registry;
pub mod review; // Reviewer decisions
pub mod transport;
pub mod upload; // Subject uploads and submission
pub mod validator;

pub use config::{BulkReconcileMode, ClientConfig};
pub use feedback::ActionFeedback;
pub use preview::PreviewViewer;
pub use registry::DocumentRegistry;
pub use review::ReviewWorkflow;
pub use transport::{DocumentTransport, HttpDocumentTransport, MockTransport};
pub use upload::UploadWorkflow;

use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber. `RUST_LOG` wins over the default
/// filter. Calling it twice is harmless.
pub fn init_tracing() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} credentials v{}", config::APP_NAME, config::APP_VERSION);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_tracing_is_idempotent() {
        super::init_tracing();
        super::init_tracing();
    }
}
