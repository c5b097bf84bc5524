use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag flipped when the process receives SIGINT or SIGTERM. Workers check
/// it between jobs so an in-flight micro-batch always runs to completion.
#[derive(Clone, Debug)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Spawn the signal listener and return the shared flag.
pub fn watch() -> Shutdown {
    let flag = Arc::new(AtomicBool::new(false));
    let task_flag = flag.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        task_flag.store(true, Ordering::SeqCst);
    });

    Shutdown { flag }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::warn!("signal received, finishing in-flight work before exit");
}
