pub mod builders;
pub mod fake_backend;

use std::sync::{Arc, Once};
use std::time::Duration;

use rulesched::engine::SchedulerOptions;
use rulesched::fs::mock::MockFileSystem;
use rulesched::job::JobManager;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// - Uses `with_test_writer()`, so logs are captured per-test.
/// - The Rust test harness only prints captured output for **failing** tests
///   (unless you run with `-- --nocapture`).
///
/// Enable levels with e.g.:
/// `RUST_LOG=rulesched=debug cargo test`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Scheduler options with short sleeps so tests never stall.
pub fn fast_options() -> SchedulerOptions {
    SchedulerOptions {
        wakeup: Duration::from_secs(3600),
        max_pending: 1000,
        backpressure_sleep: Duration::from_millis(10),
        shuffle: false,
        input_id_types: None,
    }
}

/// Job manager writing artifacts to an in-memory filesystem.
pub fn mock_job_manager(fs: &MockFileSystem) -> JobManager {
    JobManager::new("out", true, Arc::new(fs.clone()))
}

/// Run a future with a 5-second timeout.
#[allow(dead_code)]
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}
