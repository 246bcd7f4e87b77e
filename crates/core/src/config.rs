//! Session configuration

use crate::convention::Convention;

/// Card clock of the reference glitcher board (14.31818 MHz / 4)
pub const DEFAULT_CARD_CLOCK_HZ: u32 = 3_579_545;

/// Clocks per ETU before negotiation
pub const ATR_CLOCKS_PER_ETU: u32 = 372;

/// What a receive transfer reports when a data byte times out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RxTimeoutPolicy {
    /// Report `StatusWord::RECEIVE_TIMEOUT`
    #[default]
    Sentinel,
    /// Treat the last two buffered bytes as SW1 SW2 when they look like one
    ///
    /// Some cards answer with fewer data bytes than P3 and append the status
    /// word straight after, without a procedure byte.
    SynthesizeFromTrailing,
}

/// Configuration options for a card session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Frequency of the clock fed to the card
    pub card_clock_hz: u32,

    /// Delay before every guarded byte written to the card
    pub guard_time_us: u32,

    /// How long reset is held before Vcc is applied
    pub reset_hold_ms: u32,

    /// Initial ATR deadline
    pub atr_timeout_ms: u32,

    /// Minimum time left on the ATR deadline after each received byte
    pub atr_extend_ms: u32,

    /// Per-byte waiting time during APDU exchanges
    pub apdu_timeout_ms: u32,

    /// How long power-down waits for the clock line to read low
    pub clock_stop_timeout_ms: u32,

    /// Behaviour when a receive transfer times out
    pub rx_timeout_policy: RxTimeoutPolicy,

    /// Convention assumed before TS is seen
    pub initial_convention: Convention,

    /// Fire the trigger output when the first ATR byte arrives
    pub trigger_on_atr: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            card_clock_hz: DEFAULT_CARD_CLOCK_HZ,
            // 372 / 3.579545 MHz is about 104 us per ETU
            guard_time_us: 104 * 5,
            // 40,000 card clocks
            reset_hold_ms: 12,
            // slow pay-TV cards take close to a second to answer
            atr_timeout_ms: 1000,
            atr_extend_ms: 10,
            // WT = 10 * 960 * 372 / 3.579545 MHz
            apdu_timeout_ms: 1000,
            clock_stop_timeout_ms: 10,
            rx_timeout_policy: RxTimeoutPolicy::Sentinel,
            initial_convention: Convention::Direct,
            trigger_on_atr: false,
        }
    }
}

impl SessionConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Baud rate used for the ATR and until negotiation succeeds
    pub const fn atr_baud(&self) -> u32 {
        self.card_clock_hz / ATR_CLOCKS_PER_ETU
    }

    /// Set the card clock frequency
    pub const fn with_card_clock_hz(mut self, hz: u32) -> Self {
        self.card_clock_hz = hz;
        self
    }

    /// Set the guard time
    pub const fn with_guard_time_us(mut self, us: u32) -> Self {
        self.guard_time_us = us;
        self
    }

    /// Set the reset hold time
    pub const fn with_reset_hold_ms(mut self, ms: u32) -> Self {
        self.reset_hold_ms = ms;
        self
    }

    /// Set the ATR deadline and its per-byte extension
    pub const fn with_atr_timeouts(mut self, timeout_ms: u32, extend_ms: u32) -> Self {
        self.atr_timeout_ms = timeout_ms;
        self.atr_extend_ms = extend_ms;
        self
    }

    /// Set the APDU per-byte waiting time
    pub const fn with_apdu_timeout_ms(mut self, ms: u32) -> Self {
        self.apdu_timeout_ms = ms;
        self
    }

    /// Set how long power-down waits for the clock to read low
    pub const fn with_clock_stop_timeout_ms(mut self, ms: u32) -> Self {
        self.clock_stop_timeout_ms = ms;
        self
    }

    /// Set the receive timeout policy
    pub const fn with_rx_timeout_policy(mut self, policy: RxTimeoutPolicy) -> Self {
        self.rx_timeout_policy = policy;
        self
    }

    /// Set the convention assumed before TS
    pub const fn with_initial_convention(mut self, convention: Convention) -> Self {
        self.initial_convention = convention;
        self
    }

    /// Set whether the first ATR byte fires the trigger output
    pub const fn with_trigger_on_atr(mut self, enabled: bool) -> Self {
        self.trigger_on_atr = enabled;
        self
    }
}
