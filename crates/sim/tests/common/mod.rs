//! Common test utilities

#![allow(dead_code)]

use cardglitch_core::{SessionConfig, StatusWord};
use cardglitch_sim::{CardProfile, SimSession, Simulator};
use tracing_subscriber::EnvFilter;

pub const SW_OK: StatusWord = StatusWord::new(0x90, 0x00);

/// Per-byte waiting time used for exchanges in tests
pub const APDU_TIMEOUT_MS: u32 = 20;

/// Route engine logs through the test harness; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Short timeouts so negative tests finish quickly
pub fn test_config() -> SessionConfig {
    SessionConfig::default()
        .with_atr_timeouts(50, 10)
        .with_apdu_timeout_ms(APDU_TIMEOUT_MS)
}

/// Simulator plus a powered session that has read its ATR
pub fn ready_session(profile: CardProfile) -> (Simulator, SimSession) {
    init_tracing();
    let sim = Simulator::new(profile);
    let mut session = sim.session(test_config());
    session.power_on();
    session.acquire_atr().expect("ATR acquisition rejected");
    (sim, session)
}
