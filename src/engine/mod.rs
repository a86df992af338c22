pub mod orchestrator;
pub mod reassignment;

pub use orchestrator::{
    ClassificationReport, FleetSummary, MachineSnapshot, Orchestrator, OrchestratorConfig,
};
pub use reassignment::{Assignment, ReassignmentOutcome, ReassignmentScheduler};
