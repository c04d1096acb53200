//! Direct track workflow and race behavior
//!
//! The direct track skips intake and invitations: both members write
//! perspectives in parallel, then review a synthesis. These tests lean
//! on the in-memory stores' conditional updates to exercise the races
//! the workflow is built around.

use std::sync::Arc;

use accord_common::Error;
use accord_dialogues::{
    AgreementEvent, AgreementKind, Couple, DetailLevel, DialogueEngine, DialogueStatus,
    DialogueStores, Outcome, Track, Visibility,
};
use accord_llm::MockLlmService;
use accord_realtime::NullBroadcaster;
use uuid::Uuid;

struct World {
    engine: DialogueEngine,
    stores: DialogueStores,
    llm: Arc<MockLlmService>,
}

fn world() -> World {
    let stores = DialogueStores::in_memory();
    let llm = Arc::new(MockLlmService::new());
    let engine = DialogueEngine::new(
        stores.clone(),
        llm.clone(),
        Arc::new(NullBroadcaster::new()),
    );
    World {
        engine,
        stores,
        llm,
    }
}

async fn active_couple(stores: &DialogueStores) -> (Uuid, Uuid) {
    let creator = Uuid::new_v4();
    let partner = Uuid::new_v4();
    let couple = Couple::new(creator).unwrap();
    stores.couples.insert(&couple).await.unwrap();
    stores
        .couples
        .link_partner(couple.id, partner)
        .await
        .unwrap()
        .unwrap();
    (creator, partner)
}

async fn conversation_with_synthesis(w: &World) -> (Uuid, Uuid, Uuid) {
    let (creator, partner) = active_couple(&w.stores).await;
    let conv = w
        .engine
        .create_conversation(
            creator,
            "chores".to_string(),
            Track::Direct,
            Visibility::Shared,
        )
        .await
        .unwrap();

    for (user, text) in [(creator, "I do most of the cleanup"), (partner, "I cook every night")] {
        w.engine
            .save_perspective(user, conv.id, text.to_string())
            .await
            .unwrap();
        w.engine.submit_perspective(user, conv.id).await.unwrap();
    }

    w.llm.push_response("You each carry a different load.");
    w.engine.request_synthesis(creator, conv.id).await.unwrap();
    (conv.id, creator, partner)
}

#[test_log::test(tokio::test)]
async fn test_invitations_have_no_place_on_the_direct_track() {
    let w = world();
    let (creator, partner) = active_couple(&w.stores).await;
    let conv = w
        .engine
        .create_conversation(
            creator,
            "chores".to_string(),
            Track::Direct,
            Visibility::Shared,
        )
        .await
        .unwrap();
    assert_eq!(conv.status, DialogueStatus::Created);

    let result = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Full)
        .await;
    assert!(matches!(result, Err(Error::InvalidTransition { .. })));
}

#[test_log::test(tokio::test)]
async fn test_concurrent_submissions_settle_on_submitted() {
    let w = world();
    let (creator, partner) = active_couple(&w.stores).await;
    let conv = w
        .engine
        .create_conversation(
            creator,
            "chores".to_string(),
            Track::Direct,
            Visibility::Shared,
        )
        .await
        .unwrap();

    w.engine
        .save_perspective(creator, conv.id, "mine".to_string())
        .await
        .unwrap();
    w.engine
        .save_perspective(partner, conv.id, "yours".to_string())
        .await
        .unwrap();

    let (a, b) = tokio::join!(
        w.engine.submit_perspective(creator, conv.id),
        w.engine.submit_perspective(partner, conv.id),
    );
    a.unwrap();
    b.unwrap();

    let conv = w.engine.get_conversation(creator, conv.id).await.unwrap();
    assert_eq!(conv.status, DialogueStatus::Submitted);
}

#[test_log::test(tokio::test)]
async fn test_direct_synthesis_moves_through_review_to_discussion() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;

    let conv = w.engine.get_conversation(creator, conv_id).await.unwrap();
    assert_eq!(conv.status, DialogueStatus::Synthesis);

    let first = w
        .engine
        .accept_synthesis(creator, conv_id)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(first.status, DialogueStatus::Review);
    assert!(first.accepted_by_creator);
    assert!(!first.accepted_by_partner);

    let second = w
        .engine
        .accept_synthesis(partner, conv_id)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(second.status, DialogueStatus::Discussion);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_dual_accept_lands_in_discussion() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;

    let (a, b) = tokio::join!(
        w.engine.accept_synthesis(creator, conv_id),
        w.engine.accept_synthesis(partner, conv_id),
    );
    a.unwrap();
    b.unwrap();

    let conv = w.engine.get_conversation(creator, conv_id).await.unwrap();
    assert_eq!(conv.status, DialogueStatus::Discussion);
    assert!(conv.accepted_by_creator);
    assert!(conv.accepted_by_partner);
}

#[test_log::test(tokio::test)]
async fn test_repeat_accept_by_the_same_member_is_a_noop() {
    let w = world();
    let (conv_id, creator, _) = conversation_with_synthesis(&w).await;

    let first = w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    assert!(!first.is_noop());

    let repeat = w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    assert_eq!(repeat, Outcome::NoOp);
}

#[test_log::test(tokio::test)]
async fn test_rejection_resets_acceptance_and_feeds_the_next_synthesis() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;

    w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    let rejected = w
        .engine
        .reject_synthesis(partner, conv_id, "Too abstract".to_string())
        .await
        .unwrap();
    assert_eq!(rejected.status, DialogueStatus::Review);
    assert!(!rejected.accepted_by_creator);
    assert!(!rejected.accepted_by_partner);

    // A second rejection before a new synthesis is refused
    let double = w
        .engine
        .reject_synthesis(creator, conv_id, "Me too".to_string())
        .await;
    assert!(matches!(double, Err(Error::InvalidTransition { .. })));

    w.llm.push_response("Concrete this time: dishes and cooking.");
    let regenerated = w.engine.request_synthesis(partner, conv_id).await.unwrap();
    assert_eq!(
        regenerated.synthesis.as_deref(),
        Some("Concrete this time: dishes and cooking.")
    );
    assert!(regenerated.rejection_feedback.is_none());
}

#[test_log::test(tokio::test)]
async fn test_first_agreement_moves_discussion_to_commitments() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;
    w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    w.engine.accept_synthesis(partner, conv_id).await.unwrap();

    let agreement = w
        .engine
        .create_agreement(
            partner,
            conv_id,
            AgreementKind::Compromise,
            "Split the cleanup".to_string(),
            None,
        )
        .await
        .unwrap();

    let conv = w.engine.get_conversation(creator, conv_id).await.unwrap();
    assert_eq!(conv.status, DialogueStatus::Commitments);

    // A repeated accept has no rule from the accepted state
    w.engine
        .update_agreement_status(creator, agreement.id, AgreementEvent::Accept)
        .await
        .unwrap();
    let stale = w
        .engine
        .update_agreement_status(partner, agreement.id, AgreementEvent::Accept)
        .await;
    assert!(matches!(stale, Err(Error::InvalidTransition { .. })));
}

#[test_log::test(tokio::test)]
async fn test_resolution_survives_a_dead_gateway() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;
    w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    w.engine.accept_synthesis(partner, conv_id).await.unwrap();

    w.llm.set_unavailable(true);
    let resolved = w
        .engine
        .resolve(creator, conv_id, "We split the chores".to_string())
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(resolved.status, DialogueStatus::Resolved);
    assert_eq!(
        resolved.resolution_notes.as_deref(),
        Some("We split the chores")
    );

    // No extracted artifacts, and no error either
    let agreements = w
        .stores
        .agreements
        .list_by_conversation(conv_id)
        .await
        .unwrap();
    assert!(agreements.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_garbage_extraction_output_is_swallowed() {
    let w = world();
    let (conv_id, creator, partner) = conversation_with_synthesis(&w).await;
    w.engine.accept_synthesis(creator, conv_id).await.unwrap();
    w.engine.accept_synthesis(partner, conv_id).await.unwrap();

    w.llm.push_response("I could not find any agreements, sorry!");
    let resolved = w
        .engine
        .resolve(partner, conv_id, "done".to_string())
        .await
        .unwrap();
    assert!(!resolved.is_noop());

    assert!(w
        .stores
        .agreements
        .list_by_conversation(conv_id)
        .await
        .unwrap()
        .is_empty());
}
