//! Pure conversion logic for the legacy record migration.
//!
//! Nothing in this crate touches the filesystem or spawns tasks:
//!
//! - [`error`]: the classified per-record error taxonomy.
//! - [`record`]: raw legacy records, revisions, and the structured form.
//! - [`rules`]: legacy field rules and the registry that applies them.
//! - [`resolver`]: authoritative revision selection and conversion.
//! - [`transform`]: the target record shape handed to loaders.

pub mod error;
pub mod record;
pub mod resolver;
pub mod rules;
pub mod transform;
pub mod types;

pub use error::{ClassifiedError, CoreError, ErrorDetails};
pub use record::{RawLegacyRecord, Revision, StructuredRecord};
pub use resolver::{ResolvedRecord, RevisionResolver};
pub use transform::{Decision, RecordTransformer, TargetRecord, TransformOptions, TransformOutput};
