//! Defines the core structures and internal abstractions for dockyard.
//! This is really an internal-only crate for dockyard and not meant as a
//! standard library.

pub mod config;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod pipeline;
pub mod publication;
pub mod registry;
pub mod status;
pub mod subprocess;

pub use config::Config;
pub use correlation::CorrelationId;
pub use dispatch::{EventDispatcher, VcsEvent, WebhookInterpreter};
pub use error::{DeployError, DockyardError, SubprocessError};
pub use pipeline::{BuildOutcome, BuildPipeline, BuildRequest, DeploymentKey, ReportingContext};
pub use publication::PublicationTransaction;
pub use registry::{DeploymentHandle, Registry};
pub use status::{ReportedState, StatusReporter};
pub use subprocess::{RunOptions, RunOutput, SubprocessRunner};
