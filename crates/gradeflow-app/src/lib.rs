// Library root: the grading session, coordinator, provider registry and
// backend client, exposed for the binary and the integration tests.

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod session;

pub use backend::{Backend, BackendError, BackendGrader, HttpBackend};
pub use coordinator::{BatchFailure, BatchReport, GradingCoordinator, GradingProgress};
pub use error::GradeError;
pub use registry::{FixedProvider, ProviderRegistry, ProviderResolver};
pub use session::GradingSession;
