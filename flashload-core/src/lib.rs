pub mod http;
pub mod request_metrics;
pub mod runner;
pub mod scenario;
pub mod thresholds;

pub use self::http::{HttpClient, HttpRequest, HttpResponse, HttpTransportErrorKind, Transport};
pub use runner::{Coordinator, RunConfig, RunReport, StopReason, TerminationSignal};
