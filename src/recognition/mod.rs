pub mod client;
pub mod consensus;
pub mod enrich;
pub mod request;
pub mod response;
pub mod unify;

pub use client::{RecognitionClient, RecognitionError, RecognitionService, RecognitionSession};
pub use consensus::{recognize_consensus, ConsensusOutcome};
pub use response::{Recognition, TrackSummary};
pub use unify::unify;
