use crate::transaction::TimerSettings;

/// Process-level knobs, fixed at endpoint construction.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Value of the User-Agent / Server header on generated messages.
    pub user_agent: String,
    /// Max-Forwards on generated requests.
    pub max_forwards: u8,
    /// Whether INVITE server transactions answer 100 Trying on their
    /// own after 200 ms.
    pub auto_100_trying: bool,
    /// Whether outbound resolution walks NAPTR/SRV before A/AAAA.
    pub srv_resolution: bool,
    /// Default timer values for new transactions.
    pub timers: TimerSettings,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            user_agent: format!("sipline/{}", env!("CARGO_PKG_VERSION")),
            max_forwards: 70,
            auto_100_trying: true,
            srv_resolution: true,
            timers: TimerSettings::default(),
        }
    }
}
