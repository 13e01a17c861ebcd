//! Metric names recorded when the `metrics` feature is enabled.

pub mod channels {
    /// Number of channels currently in the registry
    pub const OPEN: &str = "dashlive_channels_open";
    /// Channel state transitions, labelled by target state
    pub const TRANSITIONS_TOTAL: &str = "dashlive_channel_transitions_total";
    /// Pushes received for channels with no open subscription
    pub const OUT_OF_BAND_TOTAL: &str = "dashlive_out_of_band_publications_total";
}
