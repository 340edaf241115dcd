//! C8 Artifact Layout Writer plus the counter-file parsers and the
//! `validate_npz`/`sanity` verbs that read archives back.

pub mod archive;
pub mod layout;
pub mod metadata;
pub mod parse;
pub mod sanity;

pub use archive::{ArchiveError, ArchiveName, Role};
pub use layout::{ArtifactError, PairArtifactInputs, PairArtifactResult};
pub use sanity::{ExperimentReport, SanityError};
