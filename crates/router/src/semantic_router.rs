//! The Semantic Router (§4.7): rank → mask → select → fill → emit.
//!
//! `EmbeddingIndex::rank` is structural-security-agnostic — it scores every
//! registered handler regardless of profile. The router is what applies the
//! mask: it intersects the ranked list with `SecurityResolver::allowed_handlers`
//! before the form filler ever sees a candidate, and walks the masked list in
//! score order so a working second choice is preferred over a denial.

use std::sync::Arc;

use conduit_config::Organism;
use conduit_events::DispatchError;
use conduit_security::SecurityResolver;

use crate::embedding::{Embedding, EmbeddingIndex, EmbeddingProvider};
use crate::form_filler::{FormFillResult, FormFillStrategy};

/// A handler's routing-relevant metadata, registered into the router
/// alongside its embedding.
#[derive(Debug, Clone)]
pub struct HandlerMetadata {
    pub name: String,
    pub description: String,
    pub request_schema: String,
}

/// A fully resolved dispatch: which handler, which payload, ready to submit.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub handler: String,
    pub payload_tag: String,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum RouteOutcome {
    Dispatched(DispatchPlan),
    /// No handler scored at or above the similarity threshold.
    NoMatch,
    /// At least one allowed candidate existed, but every one failed to fill.
    AllCandidatesFailed { attempts: Vec<(String, String)> },
}

pub struct SemanticRouter {
    index: EmbeddingIndex,
    provider: Arc<dyn EmbeddingProvider>,
    metadata: std::collections::HashMap<String, HandlerMetadata>,
    filler: Arc<dyn FormFillStrategy>,
}

impl SemanticRouter {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        filler: Arc<dyn FormFillStrategy>,
        threshold: f32,
    ) -> Self {
        Self {
            index: EmbeddingIndex::new(threshold),
            provider,
            metadata: std::collections::HashMap::new(),
            filler,
        }
    }

    /// Register every listener in the organism that has a request schema —
    /// listeners with no request schema (e.g. pure sinks) take no natural-
    /// language input and are not routing candidates. Embeds each listener's
    /// `semantic_description`, falling back to `description`.
    pub fn register_tools(&mut self, organism: &Organism) {
        for listener in organism.listeners() {
            let Some(request_schema) = &listener.request_schema else {
                continue;
            };
            let text = listener
                .semantic_description
                .as_deref()
                .unwrap_or(&listener.description);
            let embedding = self.provider.embed(text);
            self.index.register(&listener.name, embedding);
            self.metadata.insert(
                listener.name.clone(),
                HandlerMetadata {
                    name: listener.name.clone(),
                    description: listener.description.clone(),
                    request_schema: request_schema.clone(),
                },
            );
        }
    }

    fn embed_query(&self, text: &str) -> Embedding {
        self.provider.embed(text)
    }

    /// Rank → mask → select → fill → emit. `request_text` is the natural-
    /// language request; `profile` gates which handlers are reachable.
    pub async fn route(
        &self,
        request_text: &str,
        profile: &str,
        security: &SecurityResolver,
    ) -> Result<RouteOutcome, DispatchError> {
        let allowed = security.allowed_handlers(profile)?;
        if allowed.is_empty() {
            return Ok(RouteOutcome::NoMatch);
        }

        let query = self.embed_query(request_text);
        let ranked = self.index.rank(&query);

        let masked: Vec<_> = ranked
            .into_iter()
            .filter(|m| allowed.iter().any(|a| *a == m.name))
            .collect();

        if masked.is_empty() {
            return Ok(RouteOutcome::NoMatch);
        }

        let mut attempts = Vec::new();
        for candidate in masked {
            let Some(meta) = self.metadata.get(&candidate.name) else {
                continue;
            };

            match self
                .filler
                .fill(&meta.request_schema, &meta.description, request_text)
                .await
            {
                FormFillResult::Success { xml } => {
                    return Ok(RouteOutcome::Dispatched(DispatchPlan {
                        handler: meta.name.clone(),
                        payload_tag: meta.request_schema.clone(),
                        payload: xml.into_bytes(),
                    }));
                }
                FormFillResult::Failed { reason } => {
                    attempts.push((meta.name.clone(), reason));
                }
            }
        }

        Ok(RouteOutcome::AllCandidatesFailed { attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tfidf::TfIdfProvider;
    use async_trait::async_trait;
    use conduit_config::parse_organism;

    fn sample_organism() -> Organism {
        parse_organism(
            r#"
root_profile: default
listeners:
  - name: file-erase
    payload_tags: ["FileEraseRequest"]
    request_schema: FileEraseRequest
    description: delete temp files and clean up disk space
    semantic_description: delete temp files and clean up disk space
  - name: file-write
    payload_tags: ["FileWriteRequest"]
    request_schema: FileWriteRequest
    description: write or overwrite file contents
    semantic_description: write or overwrite file contents
  - name: file-read
    payload_tags: ["FileReadRequest"]
    request_schema: FileReadRequest
    response_schema: FileReadResponse
    description: read file contents from disk
    semantic_description: read file contents from disk
profiles:
  - name: researcher
    permitted_listeners: ["file-read"]
    retention: retain_forever
  - name: coding
    permitted_listeners: ["file-erase", "file-write", "file-read"]
    retention: retain_forever
"#,
        )
        .unwrap()
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl FormFillStrategy for AlwaysSucceeds {
        async fn fill(&self, schema_ref: &str, _description: &str, _request_text: &str) -> FormFillResult {
            FormFillResult::Success {
                xml: format!("<{schema_ref}/>"),
            }
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl FormFillStrategy for AlwaysFails {
        async fn fill(&self, _schema_ref: &str, _description: &str, _request_text: &str) -> FormFillResult {
            FormFillResult::Failed {
                reason: "simulated failure".to_string(),
            }
        }
    }

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(TfIdfProvider::from_corpus(&[
            "delete temp files and clean up disk space",
            "write or overwrite file contents",
            "read file contents from disk",
        ]))
    }

    #[tokio::test]
    async fn masked_top_candidate_falls_through_to_allowed_third_choice() {
        let organism = sample_organism();
        let security = SecurityResolver::from_organism(&organism);
        let mut router = SemanticRouter::new(provider(), Arc::new(AlwaysSucceeds), 0.0);
        router.register_tools(&organism);

        let outcome = router
            .route("delete temp files", "researcher", &security)
            .await
            .unwrap();

        match outcome {
            RouteOutcome::Dispatched(plan) => assert_eq!(plan.handler, "file-read"),
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn top_allowed_candidate_wins_when_permitted() {
        let organism = sample_organism();
        let security = SecurityResolver::from_organism(&organism);
        let mut router = SemanticRouter::new(provider(), Arc::new(AlwaysSucceeds), 0.0);
        router.register_tools(&organism);

        let outcome = router
            .route("delete temp files", "coding", &security)
            .await
            .unwrap();

        match outcome {
            RouteOutcome::Dispatched(plan) => assert_eq!(plan.handler, "file-erase"),
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_allowed_set_yields_no_match() {
        let organism = parse_organism(
            r#"
root_profile: empty
listeners:
  - name: file-read
    payload_tags: ["FileReadRequest"]
    request_schema: FileReadRequest
    description: read files
profiles:
  - name: empty
    permitted_listeners: []
    retention: retain_forever
"#,
        )
        .unwrap();
        let security = SecurityResolver::from_organism(&organism);
        let mut router = SemanticRouter::new(provider(), Arc::new(AlwaysSucceeds), 0.0);
        router.register_tools(&organism);

        let outcome = router.route("read a file", "empty", &security).await.unwrap();
        assert!(matches!(outcome, RouteOutcome::NoMatch));
    }

    #[tokio::test]
    async fn all_candidates_failing_reports_attempts() {
        let organism = sample_organism();
        let security = SecurityResolver::from_organism(&organism);
        let mut router = SemanticRouter::new(provider(), Arc::new(AlwaysFails), 0.0);
        router.register_tools(&organism);

        let outcome = router
            .route("delete temp files", "coding", &security)
            .await
            .unwrap();

        match outcome {
            RouteOutcome::AllCandidatesFailed { attempts } => assert!(!attempts.is_empty()),
            other => panic!("expected all-failed, got {other:?}"),
        }
    }
}
