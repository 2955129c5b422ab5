//! Substance-name entity resolution.
//!
//! Maps free-text, noisy substance names from uploaded reports onto a
//! fixed taxonomy of standard substance ids.
//!
//! # Architecture
//!
//! ```text
//! Raw substance name
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  TextEncoder (multilingual-e5-small)    │
//! │  "query: liquified natural gas"         │
//! │     → [384 dims, unit length]           │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  SubstanceIndex (exact inner product)   │
//! │  → top-5 candidates with similarities   │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Score fusion + confidence banding      │
//! │  w1·top1 + w2·margin → mapped /         │
//! │  needs_review / not_mapped              │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  CertificationStore (audit trail)       │
//! │  AI fields write-once; human review     │
//! │  moves only the final_* fields          │
//! └─────────────────────────────────────────┘
//! ```
//!
//! The encoder and index are built once at startup and shared immutably
//! across requests. Fusion weights and band thresholds come from the
//! offline calibration pipeline (`substance-trainer`) and are injected
//! as configuration.

pub mod config;
pub mod encoder;
pub mod error;
pub mod fusion;
pub mod index;
pub mod reference;
pub mod service;
pub mod store;
pub mod tabular;
pub mod types;

pub use config::{BandThresholds, FusionWeights, MapperConfig};
pub use encoder::{CandleEncoder, EmbedRole, LexicalEncoder, TextEncoder};
pub use error::{MapperError, Result};
pub use index::SubstanceIndex;
pub use service::MappingService;
pub use store::{CertificationStore, MemoryCertificationStore, PgCertificationStore};
pub use types::{
    Candidate, Certification, CertificationItem, ConfidenceBand, Correction, FileMappingResult,
    MappingResult, MappingStatus, StandardSubstance,
};
