//! Visibility rules across the engine surface
//!
//! Unsubmitted perspectives, private conversations and creator-only
//! system messages must never leak to the other partner, whatever path
//! the reader takes through the engine.

use std::sync::Arc;

use accord_common::Error;
use accord_dialogues::{
    Couple, DetailLevel, DialogueEngine, DialogueStores, Message, MessageAudience, SenderType,
    Track, Visibility,
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

#[test_log::test(tokio::test)]
async fn test_unsubmitted_perspective_is_invisible_to_the_partner() {
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
        .save_perspective(creator, conv.id, "my honest draft".to_string())
        .await
        .unwrap();

    // The author sees their own draft
    let creator_view = w.engine.get_perspectives(creator, conv.id).await.unwrap();
    let own = creator_view
        .iter()
        .find(|p| p.user_id == creator)
        .unwrap();
    assert_eq!(own.content.as_deref(), Some("my honest draft"));

    // The partner sees the row exists, never the content
    let partner_view = w.engine.get_perspectives(partner, conv.id).await.unwrap();
    let theirs = partner_view
        .iter()
        .find(|p| p.user_id == creator)
        .unwrap();
    assert!(theirs.content.is_none());
    assert!(!theirs.submitted);
}

#[test_log::test(tokio::test)]
async fn test_one_sided_submission_keeps_the_gate_closed() {
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
        .save_perspective(creator, conv.id, "submitted early".to_string())
        .await
        .unwrap();
    w.engine.submit_perspective(creator, conv.id).await.unwrap();

    // Submitted, but the partner has not: still hidden
    let partner_view = w.engine.get_perspectives(partner, conv.id).await.unwrap();
    let theirs = partner_view
        .iter()
        .find(|p| p.user_id == creator)
        .unwrap();
    assert!(theirs.content.is_none());
    assert!(theirs.submitted);

    // Both in: the gate opens for both readers
    w.engine
        .save_perspective(partner, conv.id, "mine too".to_string())
        .await
        .unwrap();
    w.engine.submit_perspective(partner, conv.id).await.unwrap();

    let partner_view = w.engine.get_perspectives(partner, conv.id).await.unwrap();
    let theirs = partner_view
        .iter()
        .find(|p| p.user_id == creator)
        .unwrap();
    assert_eq!(theirs.content.as_deref(), Some("submitted early"));
}

#[test_log::test(tokio::test)]
async fn test_private_conversation_hides_messages_from_the_partner() {
    let w = world();
    let (creator, partner) = active_couple(&w.stores).await;

    // Guided intake stays private while the creator works alone
    let conv = w
        .engine
        .create_conversation(
            creator,
            "communication".to_string(),
            Track::Guided,
            Visibility::Private,
        )
        .await
        .unwrap();

    w.llm.push_response("Tell me more about that.");
    w.engine
        .send_message(creator, conv.id, "Here is my side of it".to_string())
        .await
        .unwrap();

    // The partner can see the conversation exists, but no messages
    w.engine.get_conversation(partner, conv.id).await.unwrap();
    let partner_view = w.engine.list_messages(partner, conv.id).await.unwrap();
    assert!(partner_view.is_empty());

    let creator_view = w.engine.list_messages(creator, conv.id).await.unwrap();
    assert_eq!(creator_view.len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_creator_only_messages_stay_with_the_creator() {
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

    let notice = Message::new_system(
        conv.id,
        "Your partner declined the invitation.".to_string(),
        MessageAudience::CreatorOnly,
        1,
    )
    .unwrap();
    w.stores.messages.insert(&notice).await.unwrap();

    let creator_view = w.engine.list_messages(creator, conv.id).await.unwrap();
    assert_eq!(creator_view.len(), 1);
    assert_eq!(creator_view[0].sender_type, SenderType::System);

    let partner_view = w.engine.list_messages(partner, conv.id).await.unwrap();
    assert!(partner_view.is_empty());
}

#[test_log::test(tokio::test)]
async fn test_outsiders_are_rejected_everywhere() {
    let w = world();
    let (creator, _) = active_couple(&w.stores).await;
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

    let outsider = Uuid::new_v4();
    assert!(matches!(
        w.engine.get_conversation(outsider, conv.id).await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        w.engine.list_messages(outsider, conv.id).await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        w.engine.get_perspectives(outsider, conv.id).await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        w.engine
            .save_perspective(outsider, conv.id, "sneaky".to_string())
            .await,
        Err(Error::Unauthorized(_))
    ));
    assert!(matches!(
        w.engine
            .invite_partner(creator, conv.id, outsider, DetailLevel::Minimal)
            .await,
        Err(Error::Validation(_))
    ));
}
