//! Persona Flux - On-device visitor persona classifier
//!
//! Flux watches a single page session and decides what kind of visitor it is
//! looking at: a value seeker comparing prices, a solution seeker reading
//! feature pages, a trust seeker after case studies, a ready buyer about to
//! sign up, or an explorer nobody can tell yet. The decision flows through a
//! deterministic pipeline: instant signals → behavior metering → scoring →
//! classification → telemetry and content switching.
//!
//! ## Modules
//!
//! - **Tracker**: [`PersonaTracker`] owns one page session and is driven by
//!   host events and timers
//! - **Host**: collaborator traits (clock, storage, transport, variant API,
//!   content surface) with in-memory implementations
//! - **Replay**: recorded sessions ([`schema`]) replayed through a tracker
//!   ([`pipeline`])

pub mod config;
pub mod context;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod features;
pub mod host;
pub mod meter;
pub mod navigation;
pub mod normalizer;
pub mod pipeline;
pub mod scheduler;
pub mod schema;
pub mod signals;
pub mod snapshot;
pub mod state;
pub mod switcher;
pub mod tracker;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::{PersonaConfig, TrackerConfig};
pub use error::PersonaError;
pub use pipeline::{replay_session, ReplayProcessor, ReplayReport};
pub use tracker::{HostBindings, PersonaTracker};
pub use types::{CategoryScores, Persona, PersonaEvent, PersonaView};

// Schema exports
pub use schema::{RecordedSession, SessionReader, SCHEMA_VERSION};

/// Library version stamped on replay reports
pub const PERSONA_FLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for replay reports
pub const PRODUCER_NAME: &str = "persona-flux";
