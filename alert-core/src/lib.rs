pub mod config;
pub mod decision;
pub mod entities;
pub mod error;
pub mod event_log;
pub mod platform;
pub mod report;
pub mod router;
pub mod scope;
pub mod search;
pub mod workspace;

pub use config::{PlatformConfig, RouterConfig};
pub use decision::{Decision, Issue, SessionContext};
pub use report::Report;
pub use router::AlertRouter;
pub use workspace::Workspace;
