//! The Semantic Router (§4.7) and context-curation prompt helpers (§4.4).
//!
//! Routing: rank every registered handler by embedding similarity, mask the
//! ranked list against the caller's permitted-handler set, then form-fill
//! only the best allowed candidate — falling back down the masked list on
//! failure rather than denying the request outright.
//!
//! Curation: `conduit-kernel`'s context store exposes metadata only; the
//! prompt/parse helpers here are for an external curator collaborator that
//! decides fold/evict/unfold, never for the store to decide on its own.

pub mod curation;
pub mod embedding;
pub mod form_filler;
pub mod semantic_router;
pub mod tfidf;

pub use curation::{build_curation_prompt, parse_curation_response, CurationDecision, CURATION_SYSTEM};
pub use embedding::{cosine_similarity, Embedding, EmbeddingIndex, EmbeddingProvider, MatchResult};
pub use form_filler::{CloudFormFiller, FormFillResult, FormFillStrategy};
pub use semantic_router::{DispatchPlan, HandlerMetadata, RouteOutcome, SemanticRouter};
pub use tfidf::TfIdfProvider;
