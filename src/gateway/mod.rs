//! Gateway server implementation

pub mod enforce;
mod router;
mod server;

pub use enforce::{EnforcementRequest, Outcome, PolicyEnforcementPoint};
pub use router::{AppState, REQUEST_ID_HEADER, create_router};
pub use server::Gateway;
