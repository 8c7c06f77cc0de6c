mod support;

use inkwell_share::{FailureReason, ShareConfig, ShareError, SharingBackend};
use inkwell_types::EntryId;
use pretty_assertions::assert_eq;
use std::time::{Duration, Instant};
use support::{RecordingBackend, fast_config, init_tracing, user};

// --- Tag CRUD ---

#[tokio::test]
async fn create_find_and_rename() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;

    let tag = alice.tags.create_tag("  Deep Work ", None).await.unwrap();
    assert_eq!(tag.name, "Deep Work");
    assert_eq!(tag.slug, "deep-work");
    assert_eq!(tag.color, inkwell_share::palette_color("Deep Work"));

    let found = alice.tags.find_tag_by_name("deep work").await.unwrap();
    assert_eq!(found.map(|t| t.id), Some(tag.id));

    let err = alice.tags.create_tag("DEEP WORK", None).await.unwrap_err();
    assert!(matches!(err, ShareError::Conflict(_)));
    let err = alice.tags.create_tag("   ", None).await.unwrap_err();
    assert!(matches!(err, ShareError::InvalidInput(_)));

    let renamed = alice
        .tags
        .update_tag(tag.id, Some("Focus"), Some("#000000"))
        .await
        .unwrap();
    assert_eq!(renamed.slug, "focus");
    assert_eq!(renamed.color, "#000000");
    assert_eq!(alice.tags.list_tags().await.unwrap(), vec![renamed]);
}

#[tokio::test]
async fn names_without_ascii_letters_get_distinct_slugs() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;

    let diary = alice.tags.create_tag("日記", None).await.unwrap();
    let cpp = alice.tags.create_tag("C++", None).await.unwrap();
    let csharp = alice.tags.create_tag("C#", None).await.unwrap();
    assert!(!diary.slug.is_empty());
    assert_ne!(cpp.slug, csharp.slug);
    assert!(diary.slug.is_ascii());

    let found = alice.tags.find_tag_by_name("c#").await.unwrap();
    assert_eq!(found.map(|t| t.id), Some(csharp.id));
    assert_eq!(alice.tags.list_tags().await.unwrap().len(), 3);
}

#[tokio::test]
async fn only_the_owner_manages_a_tag() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let carol = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;

    let err = bob.tags.add_member(team.id, carol.id).await.unwrap_err();
    assert!(matches!(err, ShareError::Forbidden(_)));
    let err = bob.tags.delete_tag(team.id).await.unwrap_err();
    assert!(matches!(err, ShareError::Forbidden(_)));

    let err = alice.tags.add_member(team.id, alice.id).await.unwrap_err();
    assert!(matches!(err, ShareError::InvalidInput(_)));

    let err = alice
        .tags
        .add_member(inkwell_types::TagId::new(), bob.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ShareError::NotFound(_)));
}

// --- Join ---

#[tokio::test]
async fn joining_grants_entries_already_shared_under_the_tag() {
    init_tracing();
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;

    let (entry, encrypted) = alice.write_entry("t", "before you joined").await;
    alice
        .coordinator
        .share_entry(entry.id, &[team.id], &encrypted.wrapped_key())
        .await
        .unwrap();

    let change = alice.tags.add_member(team.id, bob.id).await.unwrap();
    assert_eq!(change.user_tag.map(|m| m.target_id), Some(bob.id));
    assert_eq!(change.propagation.granted, vec![entry.id]);
    assert!(change.propagation.is_complete());

    let opened = bob
        .coordinator
        .open_shared_entry(&encrypted, entry.id, &alice.public_key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened.content, "before you joined");

    // Joining again is harmless.
    let again = alice.tags.add_member(team.id, bob.id).await.unwrap();
    assert!(again.propagation.granted.is_empty());
    assert_eq!(again.propagation.retained, vec![entry.id]);
}

#[tokio::test]
async fn join_reports_entries_without_owner_row() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;

    let orphan = EntryId::new();
    backend.link_entry_tags(orphan, &[team.id]).await.unwrap();

    let change = alice.tags.add_member(team.id, bob.id).await.unwrap();
    assert!(change.propagation.granted.is_empty());
    assert_eq!(change.propagation.failures.len(), 1);
    assert_eq!(change.propagation.failures[0].entry_id, orphan);
    assert_eq!(
        change.propagation.failures[0].reason,
        FailureReason::MissingOwnerKey
    );
}

#[tokio::test]
async fn failed_join_propagation_keeps_membership() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;

    backend.fail_snapshots(true);
    let change = alice.tags.add_member(team.id, bob.id).await.unwrap();
    assert!(change.propagation.aborted.is_some());
    assert!(!change.propagation.is_complete());
    assert_eq!(alice.tags.list_members(team.id).await.unwrap().len(), 1);
}

// --- Leave ---

#[tokio::test]
async fn leaving_keeps_entries_covered_by_another_tag() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;
    let family = alice.tag("Family").await;
    for tag in [team.id, family.id] {
        alice.tags.add_member(tag, bob.id).await.unwrap();
    }

    let (both, both_enc) = alice.write_entry("both", "c").await;
    let (team_only, team_enc) = alice.write_entry("team only", "c").await;
    alice
        .coordinator
        .share_entry(both.id, &[team.id, family.id], &both_enc.wrapped_key())
        .await
        .unwrap();
    alice
        .coordinator
        .share_entry(team_only.id, &[team.id], &team_enc.wrapped_key())
        .await
        .unwrap();

    let change = alice.tags.remove_member(team.id, bob.id).await.unwrap();
    assert!(change.user_tag.is_some());
    assert_eq!(change.propagation.revoked, vec![team_only.id]);
    assert_eq!(change.propagation.retained, vec![both.id]);

    assert!(alice.coordinator.has_access(both.id, bob.id).await.unwrap());
    assert!(!alice.coordinator.has_access(team_only.id, bob.id).await.unwrap());
    assert!(alice.tags.list_members(team.id).await.unwrap().is_empty());
    assert_eq!(alice.tags.list_user_tags(bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn snapshot_runs_before_membership_removal() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;
    alice.tags.add_member(team.id, bob.id).await.unwrap();
    let (entry, encrypted) = alice.write_entry("t", "c").await;
    alice
        .coordinator
        .share_entry(entry.id, &[team.id], &encrypted.wrapped_key())
        .await
        .unwrap();

    // A failed snapshot leaves everything as it was.
    backend.fail_snapshots(true);
    backend.clear_calls();
    let err = alice.tags.remove_member(team.id, bob.id).await.unwrap_err();
    assert!(matches!(err, ShareError::Backend(_)));
    assert_eq!(backend.count("remove_user_tag"), 0);
    assert_eq!(alice.tags.list_members(team.id).await.unwrap().len(), 1);
    assert!(alice.coordinator.has_access(entry.id, bob.id).await.unwrap());

    backend.fail_snapshots(false);
    backend.clear_calls();
    let change = alice.tags.remove_member(team.id, bob.id).await.unwrap();
    assert_eq!(change.propagation.revoked, vec![entry.id]);

    let snapshot = backend.position("shared_entries_for_member").unwrap();
    let removal = backend.position("remove_user_tag").unwrap();
    let revoke = backend.position("delete_access_keys").unwrap();
    assert!(snapshot < removal);
    assert!(removal < revoke);
}

#[tokio::test]
async fn leaving_never_touches_own_entries() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;
    alice.tags.add_member(team.id, bob.id).await.unwrap();

    // Bob's own entry, linked under Alice's tag.
    let (own, _) = bob.write_entry("mine", "c").await;
    backend.link_entry_tags(own.id, &[team.id]).await.unwrap();

    let change = alice.tags.remove_member(team.id, bob.id).await.unwrap();
    assert_eq!(change.propagation.retained, vec![own.id]);
    assert!(alice.coordinator.has_access(own.id, bob.id).await.unwrap());
}

// --- Delete ---

#[tokio::test]
async fn deleting_a_tag_revokes_what_it_shared() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), ShareConfig::default()).await;
    let bob = user(backend.clone(), ShareConfig::default()).await;
    let carol = user(backend.clone(), ShareConfig::default()).await;
    let team = alice.tag("Team").await;
    for member in [bob.id, carol.id] {
        alice.tags.add_member(team.id, member).await.unwrap();
    }
    let (entry, encrypted) = alice.write_entry("t", "c").await;
    alice
        .coordinator
        .share_entry(entry.id, &[team.id], &encrypted.wrapped_key())
        .await
        .unwrap();
    assert_eq!(backend.access_key_count().await, 3);

    let report = alice.tags.delete_tag(team.id).await.unwrap();
    assert_eq!(report.revoked, vec![entry.id, entry.id]);
    assert!(report.is_complete());

    assert!(alice.tags.get_tag(team.id).await.unwrap().is_none());
    assert!(alice.tags.list_user_tags(bob.id).await.unwrap().is_empty());
    assert_eq!(backend.access_key_count().await, 1);
    assert!(alice.coordinator.has_access(entry.id, alice.id).await.unwrap());
}

// --- Timeouts ---

#[tokio::test]
async fn stalled_membership_call_times_out() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), fast_config()).await;
    let bob = user(backend.clone(), fast_config()).await;
    let team = alice.tag("Team").await;

    backend.slow_call("add_user_tag", Duration::from_secs(3));
    let started = Instant::now();
    let err = alice.tags.add_member(team.id, bob.id).await.unwrap_err();
    assert!(matches!(err, ShareError::Timeout(_)));
    assert!(started.elapsed() < Duration::from_millis(2500));
}

#[tokio::test]
async fn stalled_tag_lookups_time_out() {
    let backend = RecordingBackend::new();
    let alice = user(backend.clone(), fast_config()).await;
    let team = alice.tag("Team").await;

    backend.slow_call("get_tag", Duration::from_secs(3));
    let err = alice.tags.delete_tag(team.id).await.unwrap_err();
    assert!(matches!(err, ShareError::Timeout(_)));
    assert_eq!(backend.count("delete_tag"), 0);

    backend.slow_call("list_tags", Duration::from_secs(3));
    let err = alice.tags.find_tag_by_name("team").await.unwrap_err();
    assert!(matches!(err, ShareError::Timeout(_)));
}
