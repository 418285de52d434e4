pub mod envelope;
pub mod job;
pub mod message;
pub mod remote;
pub mod telemetry;
pub mod view;
