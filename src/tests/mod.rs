pub mod models;

mod steady;

use std::sync::Once;

static TRACING: Once = Once::new();

/// Installs the fmt subscriber once per test binary so the engine's
/// `tracing` output surfaces under `--nocapture`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}
