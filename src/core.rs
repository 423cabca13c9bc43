pub mod forecast;
pub mod sequencer;
pub mod series;
pub mod soc;
pub mod telemetry;
