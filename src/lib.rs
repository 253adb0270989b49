//! Typeweld: runtime type observations welded into Python sources.
//!
//! Merges call shapes collected at runtime into one canonical signature
//! per function, then patches the source files with type annotations as
//! pure insertions, either as `# type:` comments or inline PEP 526
//! annotations. Unannotated bytes are never rewritten or reformatted.

pub mod batch;
pub mod cst;
pub mod diff;
pub mod error;
pub mod merge;
pub mod parse;
pub mod patch;
pub mod plan;
pub mod sites;
pub mod types;

pub use batch::{dump_annotations, run_batch, BatchOptions, BatchReport};
pub use error::{ExitStatus, WeldError};
pub use merge::{merge_records, CallSiteKey, MergedSignature};
pub use parse::{load_observations, parse_type_comment, ObservationRecord};
pub use plan::{FilePlan, SkipReason, Style};
pub use sites::SiteIndex;
pub use types::{MergeOptions, TypeDescriptor};
