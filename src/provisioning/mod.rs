pub mod failover;
pub mod netwatch;
pub mod orchestrator;

pub use failover::{FailoverError, FailoverService, ModeSwitch, RadiusStatus};
pub use orchestrator::{Orchestrator, ProvisionError, ProvisionOutcome, StepResult};
