//! Tiered ETL: moves aged partitions from each store into the next one in a
//! PV's chain.
//!
//! A pass runs [`discover`] for each stage of a chain, appends the candidates
//! into the destination (reduced or converted when the destination asks for
//! it), then deletes them from the source. Administrative variants on
//! [`EtlExecutor`] move data on demand. [`EtlScheduler`] drives passes from a
//! background thread.

mod admin;
mod candidate;
mod executor;
mod flags;
mod gating;
mod ledger;
mod metrics;
mod scheduler;
mod stage;

pub use admin::{AdminResponse, AdminStatus};
pub use candidate::{discover, Discovery, EtlCandidate};
pub use executor::{EtlExecutor, JobReport, PassSummary, CONSOLIDATION_LOOKAHEAD_SECS};
pub use flags::NamedFlags;
pub use gating::{GatingInterval, GatingIntervals, DEFAULT_GATING_CAPACITY};
pub use ledger::{Ledger, DEFAULT_LEDGER_FILE};
pub use metrics::{MetricsReport, StageMetrics};
pub use scheduler::EtlScheduler;
pub use stage::EtlStage;
