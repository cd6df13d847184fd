mod config;
mod controller;
mod error;
mod progress;
mod run;
mod schedule;
mod signal;

pub use config::{RampMode, RunConfig, ScenarioKind, Stage, TargetConfig, ThinkTime};
pub use controller::{
    ControllerOptions, ControllerOutcome, ControllerState, RampController, StopReason,
};
pub use error::{Error, Result};
pub use progress::{ProgressFn, ProgressUpdate, StageProgress};
pub use run::{Coordinator, MetricSummary, RunReport};
pub use schedule::{RampingSchedule, StageSnapshot};
pub use signal::TerminationSignal;
