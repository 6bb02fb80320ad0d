pub mod adapter;
pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod flow;
pub mod import;
pub mod index;
pub mod model;

pub use adapter::{AdapterRegistry, ConvertOptions, SessionAdapter};
pub use archive::ArchiveLayout;
pub use config::Config;
pub use error::{RcmError, Result};
pub use flow::{FlowEngine, TransitionRequest, VersionControl};
pub use index::{IndexQuery, SessionIndex};
pub use model::{CanonicalRecord, FlowState, Platform};
