//! Router stages exercised one at a time.

use super::support::*;
use crate::faq::{FaqCatalog, FaqMatcher};
use crate::router::{QueryRouter, RouteStage, NO_INFORMATION_ANSWER};
use crate::types::{AnswerSource, ChatResponse, RetrievalResult, Role, ScoredDocument, Turn};
use std::sync::Arc;

fn router_for(h: &Harness) -> QueryRouter {
    let catalog = FaqCatalog::from_entries(password_faq()).unwrap();
    QueryRouter::new(
        Arc::clone(h.engine.cache()),
        Arc::new(FaqMatcher::new(catalog, 0.8)),
        Arc::clone(h.engine.retriever()),
        Arc::clone(h.engine.generator()),
        Arc::clone(h.engine.store()),
        4,
    )
}

#[test]
fn test_stage_names() {
    assert_eq!(RouteStage::CheckCache.name(), "check_cache");
    assert_eq!(
        RouteStage::Generate(RetrievalResult::default()).name(),
        "generate"
    );
}

#[tokio::test]
async fn test_cache_miss_moves_to_faq() {
    let h = harness();
    let router = router_for(&h);
    assert_eq!(router.check_cache("when are exams"), RouteStage::MatchFaq);
}

#[tokio::test]
async fn test_cache_hit_responds_without_citations() {
    let h = harness();
    let router = router_for(&h);
    h.engine.cache().put_response(
        "when are exams",
        ChatResponse::new("Last week.", AnswerSource::Rag, 0.6, vec!["exams".to_string()]),
    );

    match router.check_cache("when are exams") {
        RouteStage::Respond(response) => {
            assert_eq!(response.source, AnswerSource::Cache);
            assert_eq!(response.answer, "Last week.");
            assert_eq!(response.confidence, 0.6);
            assert!(response.citations.is_empty());
        }
        other => panic!("unexpected stage {}", other.name()),
    }
}

#[tokio::test]
async fn test_blank_query_responds_immediately() {
    let h = harness();
    let router = router_for(&h);

    let response = router.route(&request("  ?! ")).await;
    assert_eq!(response.source, AnswerSource::Fallback);
    assert_eq!(response.answer, NO_INFORMATION_ANSWER);
    assert_eq!(h.engine.embedder().provider_calls(), 0);
}

#[tokio::test]
async fn test_faq_stage() {
    let h = harness();
    let router = router_for(&h);

    match router.match_faq("How can I reset my password?") {
        RouteStage::Respond(response) => {
            assert_eq!(response.source, AnswerSource::Faq);
            assert!(response.confidence >= 0.8);
        }
        other => panic!("unexpected stage {}", other.name()),
    }
    assert_eq!(router.match_faq("what is the refund policy"), RouteStage::RetrieveVector);
}

#[tokio::test]
async fn test_retrieve_stage_without_index_responds_with_fallback() {
    let h = harness();
    let router = router_for(&h);

    match router.retrieve_vector("when are exams scheduled").await {
        RouteStage::Respond(response) => {
            assert_eq!(response.source, AnswerSource::Fallback);
            assert_eq!(response.confidence, 0.0);
        }
        other => panic!("unexpected stage {}", other.name()),
    }
}

#[tokio::test]
async fn test_retrieve_stage_hands_hits_to_generation() {
    let h = harness();
    h.objects.put("docs/exams/schedule.md", EXAM_DOC);
    h.engine.sync_and_refresh().await.unwrap();
    let router = router_for(&h);

    match router.retrieve_vector("when are exams scheduled").await {
        RouteStage::Generate(result) => {
            assert_eq!(result.document_ids(), vec!["exams/schedule"]);
        }
        other => panic!("unexpected stage {}", other.name()),
    }
}

#[tokio::test]
async fn test_generate_stage_caches_rag_answer() {
    let h = harness();
    h.objects.put("docs/exams/schedule.md", EXAM_DOC);
    h.engine.sync_and_refresh().await.unwrap();
    let router = router_for(&h);

    let retrieval = RetrievalResult {
        hits: vec![ScoredDocument {
            document_id: "exams/schedule".to_string(),
            score: 0.7,
        }],
    };
    let req = request("when are exams scheduled").with_history(vec![Turn {
        role: Role::User,
        content: "Hi, I have a question about exams.".to_string(),
    }]);

    let epoch = h.engine.cache().response_epoch();
    match router.generate(&req, "when are exams scheduled", retrieval, epoch).await {
        RouteStage::Respond(response) => {
            assert_eq!(response.source, AnswerSource::Rag);
            assert_eq!(response.confidence, 0.7);
            assert_eq!(response.citations, vec!["exams/schedule"]);
        }
        other => panic!("unexpected stage {}", other.name()),
    }

    assert!(h.llm.last_prompt().unwrap().contains("question about exams"));
    assert!(h.engine.cache().get_response("when are exams scheduled").is_some());
}

#[tokio::test]
async fn test_generate_stage_skips_removed_documents() {
    let h = harness();
    let router = router_for(&h);

    let retrieval = RetrievalResult {
        hits: vec![ScoredDocument {
            document_id: "gone".to_string(),
            score: 0.9,
        }],
    };

    match router.generate(&request("anything"), "anything", retrieval, 0).await {
        RouteStage::Respond(response) => {
            assert_eq!(response.source, AnswerSource::Fallback);
            assert!(response.citations.is_empty());
        }
        other => panic!("unexpected stage {}", other.name()),
    }
    assert_eq!(h.llm.calls(), 0);
}

#[tokio::test]
async fn test_generate_stage_does_not_cache_across_a_clear() {
    let h = harness();
    h.objects.put("docs/exams/schedule.md", EXAM_DOC);
    h.engine.sync_and_refresh().await.unwrap();
    let router = router_for(&h);

    let retrieval = RetrievalResult {
        hits: vec![ScoredDocument {
            document_id: "exams/schedule".to_string(),
            score: 0.7,
        }],
    };

    // The knowledge base changes between retrieval and generation.
    let epoch = h.engine.cache().response_epoch();
    h.engine.cache().clear_responses();

    match router
        .generate(&request("when are exams scheduled"), "when are exams scheduled", retrieval, epoch)
        .await
    {
        RouteStage::Respond(response) => assert_eq!(response.source, AnswerSource::Rag),
        other => panic!("unexpected stage {}", other.name()),
    }
    assert!(h.engine.cache().get_response("when are exams scheduled").is_none());
}
