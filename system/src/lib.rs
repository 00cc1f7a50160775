pub extern crate serde;
pub extern crate serde_json;

pub mod arbiter;
pub mod config;
pub mod error;
pub mod hub;
pub mod initializer;
pub mod memory_buffer;
pub mod memory_store;
pub mod message;
pub mod path;
pub mod presence;
pub mod resolver;
pub mod rules;
pub mod run_results;
pub mod session;
pub mod settings;
pub mod traits;
pub mod tree;
pub mod types;

pub use arbiter::{ArbiterPhase, Operation, PermissionArbiter};
pub use config::SessionConfig;
pub use error::{SessionError, StoreError};
pub use hub::{HubStats, Outbox, StoreHub};
pub use initializer::{InitializationCoordinator, SeedOutcome};
pub use memory_buffer::{MemoryBuffer, MemoryBufferEngine, MemoryBufferHub};
pub use memory_store::{MemoryBackend, MemoryStore};
pub use message::*;
pub use path::{Patch, PathError, StorePath, WorkspacePaths};
pub use presence::PresenceTracker;
pub use resolver::{resolve_workspace, ResolvedWorkspace};
pub use rules::AccessRules;
pub use run_results::{RunResult, RunResults, MAX_RESULT_SLOTS};
pub use session::{Session, SessionNotice};
pub use settings::{ProblemData, Sample, SettingsChange, UserRecord, WorkspaceSettings};
pub use traits::{BufferEngine, DocumentStore, SharedBuffer};
pub use tree::StoreTree;
pub use types::*;
