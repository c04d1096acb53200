//! Guided track end-to-end workflow
//!
//! Drives one conversation from solo intake through invitation,
//! partner join, synthesis review and resolution, against in-memory
//! stores, a scripted mock gateway and a real channel broadcaster.

use std::sync::Arc;

use accord_common::Error;
use accord_dialogues::{
    ActivityKind, AgreementEvent, AgreementKind, AgreementStatus, DetailLevel, DialogueEngine,
    DialogueStatus, DialogueStores, Outcome, SenderType, Track, Visibility,
};
use accord_llm::MockLlmService;
use accord_realtime::{ChannelBroadcaster, EventName, RoomId};
use uuid::Uuid;

struct World {
    engine: DialogueEngine,
    stores: DialogueStores,
    llm: Arc<MockLlmService>,
    broadcaster: Arc<ChannelBroadcaster>,
}

fn world() -> World {
    let stores = DialogueStores::in_memory();
    let llm = Arc::new(MockLlmService::new());
    let broadcaster = Arc::new(ChannelBroadcaster::new());
    let engine = DialogueEngine::new(stores.clone(), llm.clone(), broadcaster.clone());
    World {
        engine,
        stores,
        llm,
        broadcaster,
    }
}

#[test_log::test(tokio::test)]
async fn test_guided_workflow_from_intake_to_resolution() {
    let w = world();
    let creator = Uuid::new_v4();
    let partner = Uuid::new_v4();

    // Solo intake: no couple exists yet
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
    assert_eq!(conv.status, DialogueStatus::Intake);
    assert!(conv.couple_id.is_none());

    let mut room = w.broadcaster.subscribe(RoomId::for_conversation(conv.id));

    // First message opens clarification and draws an AI reply
    w.llm.push_response("What usually sets the argument off?");
    let appended = w
        .engine
        .send_message(creator, conv.id, "We keep talking past each other".to_string())
        .await
        .unwrap();
    assert_eq!(appended.len(), 2);
    assert_eq!(appended[1].sender_type, SenderType::Ai);
    assert_eq!(
        w.engine
            .get_conversation(creator, conv.id)
            .await
            .unwrap()
            .status,
        DialogueStatus::Clarifying
    );

    // Confirm intake, then invite the partner
    let confirmed = w.engine.confirm_intake(creator, conv.id).await.unwrap();
    assert_eq!(confirmed.applied().unwrap().status, DialogueStatus::Confirmed);

    let invitation = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Summary)
        .await
        .unwrap();
    assert_eq!(
        w.engine
            .get_conversation(creator, conv.id)
            .await
            .unwrap()
            .status,
        DialogueStatus::InviteSent
    );

    // A second invitation while one is pending is refused
    let duplicate = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Full)
        .await;
    assert!(matches!(duplicate, Err(Error::Validation(_))));

    // Partner declines: creator gets a private notice, state holds
    let declined = w
        .engine
        .respond_invitation(partner, invitation.id, false)
        .await
        .unwrap();
    assert!(!declined.is_noop());
    assert_eq!(
        w.engine
            .get_conversation(creator, conv.id)
            .await
            .unwrap()
            .status,
        DialogueStatus::InviteSent
    );
    let creator_view = w.engine.list_messages(creator, conv.id).await.unwrap();
    assert!(creator_view
        .iter()
        .any(|m| m.sender_type == SenderType::System));

    // Responding twice to the same invitation is a harmless no-op
    let again = w
        .engine
        .respond_invitation(partner, invitation.id, true)
        .await
        .unwrap();
    assert_eq!(again, Outcome::NoOp);

    // Re-invite after the decline, partner accepts this time
    let invitation = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Summary)
        .await
        .unwrap();
    w.llm.push_response("Welcome! Here is how this works.");
    let accepted = w
        .engine
        .respond_invitation(partner, invitation.id, true)
        .await
        .unwrap();
    assert!(!accepted.is_noop());

    let conv_now = w.engine.get_conversation(partner, conv.id).await.unwrap();
    assert_eq!(conv_now.status, DialogueStatus::PartnerJoined);
    assert_eq!(conv_now.visibility, Visibility::Shared);
    let couple_id = conv_now.couple_id.expect("couple materializes on accept");
    let couple = w.stores.couples.find(couple_id).await.unwrap().unwrap();
    assert_eq!(couple.partner_user_id, Some(partner));

    // Partner's first message opens the live dialogue
    w.engine
        .send_message(partner, conv.id, "Thanks for inviting me".to_string())
        .await
        .unwrap();
    assert_eq!(
        w.engine
            .get_conversation(partner, conv.id)
            .await
            .unwrap()
            .status,
        DialogueStatus::Active
    );

    // The decline notice stays with the creator even after the
    // conversation turned shared
    let partner_view = w.engine.list_messages(partner, conv.id).await.unwrap();
    assert!(partner_view
        .iter()
        .all(|m| m.sender_type != SenderType::System));

    // Synthesis, rejection with feedback, regeneration, dual accept
    w.llm.push_response("You both want to be heard first.");
    let synthesized = w.engine.request_synthesis(creator, conv.id).await.unwrap();
    assert_eq!(synthesized.status, DialogueStatus::Review);
    assert_eq!(
        synthesized.synthesis.as_deref(),
        Some("You both want to be heard first.")
    );

    let rejected = w
        .engine
        .reject_synthesis(partner, conv.id, "It skips my side entirely".to_string())
        .await
        .unwrap();
    assert_eq!(rejected.status, DialogueStatus::Review);
    assert!(rejected.rejection_feedback.is_some());

    // Accepting while a rejection is pending a new synthesis is refused
    let premature = w.engine.accept_synthesis(creator, conv.id).await;
    assert!(matches!(premature, Err(Error::InvalidTransition { .. })));

    w.llm.push_response("Heard: both sides, fully this time.");
    let regenerated = w.engine.request_synthesis(partner, conv.id).await.unwrap();
    assert!(regenerated.rejection_feedback.is_none());
    assert!(!regenerated.accepted_by_creator);
    assert!(!regenerated.accepted_by_partner);

    let first = w
        .engine
        .accept_synthesis(creator, conv.id)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(first.status, DialogueStatus::Review);

    let second = w
        .engine
        .accept_synthesis(partner, conv.id)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(second.status, DialogueStatus::Discussion);

    // Agreements live their own lifecycle inside the discussion
    let agreement = w
        .engine
        .create_agreement(
            creator,
            conv.id,
            AgreementKind::Request,
            "Pause before answering".to_string(),
            Some("Count to three before replying".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(agreement.status, AgreementStatus::Proposed);

    let accepted = w
        .engine
        .update_agreement_status(partner, agreement.id, AgreementEvent::Accept)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(accepted.status, AgreementStatus::Accepted);

    let started = w
        .engine
        .update_agreement_status(partner, agreement.id, AgreementEvent::Start)
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(started.status, AgreementStatus::InProgress);

    // Resolution extracts terminal agreements from the summary
    w.llm.push_response(
        r#"[{"kind": "compromise", "title": "Alternate who speaks first"}]"#,
    );
    let resolved = w
        .engine
        .resolve(creator, conv.id, "We agreed to take turns".to_string())
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(resolved.status, DialogueStatus::Resolved);
    assert!(resolved.resolved_at.is_some());

    let agreements = w
        .stores
        .agreements
        .list_by_conversation(conv.id)
        .await
        .unwrap();
    assert_eq!(agreements.len(), 2);
    assert!(agreements
        .iter()
        .any(|a| a.title == "Alternate who speaks first" && a.proposed_by.is_none()));

    // Terminal state refuses further content and a second resolve;
    // only a lost concurrent update reads as a no-op
    let late = w
        .engine
        .send_message(creator, conv.id, "one more thing".to_string())
        .await;
    assert!(matches!(late, Err(Error::InvalidTransition { .. })));
    let again = w
        .engine
        .resolve(partner, conv.id, "again".to_string())
        .await;
    assert!(matches!(again, Err(Error::InvalidTransition { .. })));

    // The conversation room saw the synthesis stream and status changes
    let mut saw_chunk = false;
    let mut saw_status = false;
    while let Ok(envelope) = room.try_recv() {
        match envelope.event {
            EventName::SynthesisChunk => saw_chunk = true,
            EventName::ConversationStatusChanged => saw_status = true,
            _ => {}
        }
    }
    assert!(saw_chunk);
    assert!(saw_status);
}

#[test_log::test(tokio::test)]
async fn test_invitation_is_bound_to_the_invitee() {
    let w = world();
    let creator = Uuid::new_v4();
    let partner = Uuid::new_v4();
    let stranger = Uuid::new_v4();

    let conv = w
        .engine
        .create_conversation(
            creator,
            "chores".to_string(),
            Track::Guided,
            Visibility::Private,
        )
        .await
        .unwrap();
    w.engine
        .send_message(creator, conv.id, "It is about the dishes".to_string())
        .await
        .unwrap();
    w.engine.confirm_intake(creator, conv.id).await.unwrap();

    // Only the creator may invite
    let not_creator = w
        .engine
        .invite_partner(partner, conv.id, stranger, DetailLevel::Minimal)
        .await;
    assert!(matches!(not_creator, Err(Error::Unauthorized(_))));

    let invitation = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Minimal)
        .await
        .unwrap();

    // Only the invitee may respond
    let wrong_user = w
        .engine
        .respond_invitation(stranger, invitation.id, true)
        .await;
    assert!(matches!(wrong_user, Err(Error::Unauthorized(_))));
}

#[test_log::test(tokio::test)]
async fn test_onboarding_gateway_failure_does_not_block_join() {
    let w = world();
    let creator = Uuid::new_v4();
    let partner = Uuid::new_v4();

    let conv = w
        .engine
        .create_conversation(
            creator,
            "money".to_string(),
            Track::Guided,
            Visibility::Private,
        )
        .await
        .unwrap();
    w.engine
        .send_message(creator, conv.id, "We disagree on the budget".to_string())
        .await
        .unwrap();
    w.engine.confirm_intake(creator, conv.id).await.unwrap();
    let invitation = w
        .engine
        .invite_partner(creator, conv.id, partner, DetailLevel::Full)
        .await
        .unwrap();

    // The intake clarification already produced one AI reply
    let ai_before = w
        .engine
        .list_messages(creator, conv.id)
        .await
        .unwrap()
        .iter()
        .filter(|m| m.sender_type == SenderType::Ai)
        .count();

    // Gateway down at join time: the accept still lands
    w.llm.set_unavailable(true);
    let accepted = w
        .engine
        .respond_invitation(partner, invitation.id, true)
        .await
        .unwrap();
    assert!(!accepted.is_noop());

    let conv_now = w.engine.get_conversation(partner, conv.id).await.unwrap();
    assert_eq!(conv_now.status, DialogueStatus::PartnerJoined);

    // No onboarding message was added, but the join itself survived
    let ai_after = w
        .engine
        .list_messages(partner, conv.id)
        .await
        .unwrap()
        .iter()
        .filter(|m| m.sender_type == SenderType::Ai)
        .count();
    assert_eq!(ai_after, ai_before);
}

#[test_log::test(tokio::test)]
async fn test_presence_signals_reach_the_room_without_persisting() {
    let w = world();
    let creator = Uuid::new_v4();

    let conv = w
        .engine
        .create_conversation(
            creator,
            "chores".to_string(),
            Track::Guided,
            Visibility::Private,
        )
        .await
        .unwrap();
    let mut room = w.broadcaster.subscribe(RoomId::for_conversation(conv.id));

    w.engine
        .record_activity(creator, conv.id, ActivityKind::Typing)
        .await
        .unwrap();

    let envelope = room.recv().await.unwrap();
    assert_eq!(envelope.event, EventName::PartnerActivity);
    assert_eq!(envelope.payload["kind"], "typing");
    assert_eq!(envelope.exclude_actor, Some(creator));

    // Nothing landed in the transcript
    assert!(w
        .engine
        .list_messages(creator, conv.id)
        .await
        .unwrap()
        .is_empty());
}
