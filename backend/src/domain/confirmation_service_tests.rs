//! Tests for link preview and confirmation.

use chrono::Duration;
use rstest::rstest;
use url::Url;

use super::*;
use crate::domain::ports::{AuditLogRepository, AuditQuery};
use crate::domain::{ErrorCode, TokenPurpose};
use crate::test_support::{CONFIRM_LIMIT, Harness, draft};

fn client(ip: &str) -> ClientContext {
    ClientContext {
        ip: Some(ip.to_owned()),
        user_agent: Some("Mail/1.0".to_owned()),
    }
}

/// Pull the confirmation token out of the last email's text body.
fn emailed_token(harness: &Harness) -> String {
    let email = harness.transport.sent().pop().expect("an email was sent");
    let link = email
        .text
        .lines()
        .find(|line| line.contains("/operator/confirm?"))
        .expect("confirmation link in text");
    let url = Url::parse(link.trim()).expect("link parses");
    url.query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .expect("token parameter")
}

async fn sent_request(harness: &Harness) -> (DeletionRequestId, String) {
    let request = harness
        .lifecycle
        .create(draft("privacy@acme.example"), Actor::Admin)
        .await
        .expect("create");
    harness
        .dispatcher
        .send_initial(&request.id, Actor::Admin)
        .await
        .expect("initial send");
    (request.id, emailed_token(harness))
}

async fn load(harness: &Harness, id: &DeletionRequestId) -> DeletionRequest {
    harness
        .lifecycle
        .repository()
        .find_by_id(id)
        .await
        .expect("lookup")
        .expect("exists")
}

async fn confirmations_audited(harness: &Harness, id: DeletionRequestId) -> usize {
    AuditLogRepository::list(
        harness.store.as_ref(),
        AuditQuery {
            deletion_request_id: Some(id),
            limit: 100,
        },
    )
    .await
    .expect("audit")
    .iter()
    .filter(|entry| entry.action == AuditAction::OperatorConfirmed)
    .count()
}

#[rstest]
#[tokio::test]
async fn confirm_consumes_token_and_transitions() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;

    let receipt = harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect("confirmation succeeds");

    assert_eq!(receipt.deletion_request_id, id);
    assert_eq!(receipt.status, RequestStatus::OperatorConfirmed);
    let request = load(&harness, &id).await;
    assert_eq!(request.status, RequestStatus::OperatorConfirmed);
    assert_eq!(request.button_confirmed_at, Some(receipt.confirmed_at));
    let record = request.confirmation.expect("token record");
    assert!(record.used);
    assert_eq!(record.used_from_ip.as_deref(), Some("198.51.100.7"));

    let entries = AuditLogRepository::list(
        harness.store.as_ref(),
        AuditQuery {
            deletion_request_id: Some(id),
            limit: 1,
        },
    )
    .await
    .expect("audit");
    let entry = entries.first().expect("confirmation audited");
    assert_eq!(entry.action, AuditAction::OperatorConfirmed);
    assert_eq!(entry.actor, Actor::Operator);
    assert_eq!(entry.source_ip.as_deref(), Some("198.51.100.7"));
    assert_eq!(entry.user_agent.as_deref(), Some("Mail/1.0"));
}

#[rstest]
#[tokio::test]
async fn second_use_is_a_conflict_without_side_effects() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect("first use");
    let before = load(&harness, &id).await;

    let err = harness
        .confirmations
        .confirm(&token, &client("198.51.100.8"))
        .await
        .expect_err("second use");

    assert_eq!(err.code(), ErrorCode::Conflict);
    assert_eq!(load(&harness, &id).await, before);
    assert_eq!(confirmations_audited(&harness, id).await, 1);
}

#[rstest]
#[tokio::test]
async fn preview_leaves_token_unused() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;

    let preview = harness
        .confirmations
        .preview(&token, &client("198.51.100.7"))
        .await
        .expect("preview");
    assert_eq!(preview.deletion_request_id, id);
    assert_eq!(preview.broker_name, "Acme Data");

    let request = load(&harness, &id).await;
    assert_eq!(request.status, RequestStatus::SentInitial);
    assert!(!request.confirmation.expect("record").used);

    harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect("confirm after preview");
    let err = harness
        .confirmations
        .preview(&token, &client("198.51.100.7"))
        .await
        .expect_err("preview of used token");
    assert_eq!(err.code(), ErrorCode::Conflict);
}

#[rstest]
#[tokio::test]
async fn expired_link_is_invalid() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    harness.clock.advance_days(46);

    let err = harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect_err("expired");

    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(load(&harness, &id).await.status, RequestStatus::SentInitial);
}

#[rstest]
#[case::garbage("definitely-not-a-token")]
#[case::empty("")]
#[tokio::test]
async fn unusable_tokens_share_one_answer(#[case] token: &str) {
    let harness = Harness::new();
    sent_request(&harness).await;

    let err = harness
        .confirmations
        .confirm(token, &client("198.51.100.7"))
        .await
        .expect_err("refused");

    assert_eq!(err.code(), ErrorCode::InvalidRequest);
    assert_eq!(err.message(), INVALID_LINK);
}

#[rstest]
#[tokio::test]
async fn token_for_request_never_emailed_is_invalid() {
    let harness = Harness::new();
    let request = harness
        .lifecycle
        .create(draft("privacy@acme.example"), Actor::Admin)
        .await
        .expect("create");
    let issued = harness
        .codec
        .issue(request.id, TokenPurpose::ConfirmDeletion, Duration::days(1));

    let err = harness
        .confirmations
        .confirm(&issued.token, &client("198.51.100.7"))
        .await
        .expect_err("no record");

    assert_eq!(err.code(), ErrorCode::InvalidRequest);
}

#[rstest]
#[tokio::test]
async fn rate_limit_applies_before_verification() {
    let harness = Harness::new();
    let (_, token) = sent_request(&harness).await;
    let attacker = client("203.0.113.9");
    for _ in 0..CONFIRM_LIMIT {
        let err = harness
            .confirmations
            .preview("guess", &attacker)
            .await
            .expect_err("bad guess");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
    }

    let err = harness
        .confirmations
        .confirm(&token, &attacker)
        .await
        .expect_err("limited even with a valid token");
    assert_eq!(err.code(), ErrorCode::TooManyRequests);

    harness
        .confirmations
        .preview(&token, &client("203.0.113.10"))
        .await
        .expect("other clients are unaffected");

    harness.clock.advance_seconds(60);
    harness
        .confirmations
        .confirm(&token, &attacker)
        .await
        .expect("next window admits the client");
}

#[rstest]
#[tokio::test]
async fn escalated_request_can_still_be_confirmed() {
    let harness = Harness::new();
    let (id, _) = sent_request(&harness).await;
    harness
        .dispatcher
        .send_follow_up(&id, Actor::Scheduler)
        .await
        .expect("follow-up");
    harness
        .dispatcher
        .send_escalation(&id, Actor::Scheduler)
        .await
        .expect("escalation");
    let token = emailed_token(&harness);

    let receipt = harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect("confirm");

    assert_eq!(receipt.status, RequestStatus::OperatorConfirmed);
}

#[rstest]
#[tokio::test]
async fn confirmation_after_resolution_is_recorded_without_transition() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    harness
        .lifecycle
        .apply(&id, Actor::Webhook, |request, _| {
            let mut next = request.clone();
            next.transition_to(RequestStatus::Resolved)
                .map_err(|err| Error::conflict(err.to_string()))?;
            Ok(Decision::write(next, Vec::new(), ()))
        })
        .await
        .expect("resolve");

    let receipt = harness
        .confirmations
        .confirm(&token, &client("198.51.100.7"))
        .await
        .expect("confirm");

    assert_eq!(receipt.status, RequestStatus::Resolved);
    let request = load(&harness, &id).await;
    assert!(request.button_confirmed_at.is_some());
    assert!(request.confirmation.expect("record").used);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_confirmations_succeed_exactly_once() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let service = harness.confirmations.clone();
            let token = token.clone();
            tokio::spawn(async move {
                service
                    .confirm(&token, &client(&format!("198.51.100.{n}")))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut conflicted = 0;
    for handle in handles {
        match handle.await.expect("task joins") {
            Ok(_) => succeeded += 1,
            Err(err) => {
                assert_eq!(err.code(), ErrorCode::Conflict);
                conflicted += 1;
            }
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(conflicted, 7);
    assert_eq!(confirmations_audited(&harness, id).await, 1);
}
