//! Test doubles for the bridge: a scripted native library and a recording host runtime.
//!
//! The bridge registry is process-wide, so each test binary shares one [`Fixture`]. Doubles key
//! their bookkeeping by thread, which keeps concurrently running tests from observing each other.

mod engine;
mod runtime;

use std::sync::{Arc, OnceLock};

use uc_bridge::{registry, Bridge, BridgeConfig};

pub use crate::engine::{Event, Op, ScriptedEngine, ScriptedLibrary, PAGE_SIZE};
pub use crate::runtime::{attach_balanced, Handler, RecordingRuntime, RuntimeEvent};

pub struct Fixture {
    pub bridge: &'static Bridge,
    pub library: Arc<ScriptedLibrary>,
    pub runtime: Arc<RecordingRuntime>,
}

static FIXTURE: OnceLock<Fixture> = OnceLock::new();

/// The process-wide fixture, installed with the default configuration on first use.
pub fn fixture() -> &'static Fixture {
    fixture_with(BridgeConfig::default)
}

/// The process-wide fixture. `config` is only consulted by the call that installs it.
pub fn fixture_with(config: impl FnOnce() -> BridgeConfig) -> &'static Fixture {
    FIXTURE.get_or_init(|| {
        init_tracing();
        let library = Arc::new(ScriptedLibrary::new());
        let runtime = Arc::new(RecordingRuntime::new());
        let bridge = registry::install(library.clone(), runtime.clone(), config())
            .expect("bridge registry installed twice in one test process");
        Fixture {
            bridge,
            library,
            runtime,
        }
    })
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
