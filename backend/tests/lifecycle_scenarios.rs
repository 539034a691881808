//! End-to-end lifecycle scenarios driven through the HTTP surface and the
//! scheduler with a hand-moved clock.

mod support;

use actix_web::http::StatusCode;
use actix_web::test as actix_test;
use serde_json::{Value, json};

use erasure_engine::domain::ports::{InboundEmailQuery, InboundEmailRepository};
use erasure_engine::domain::{Actor, ReplyIntent, RequestStatus};

use support::{BROKER_DPO, Engine, REGULATOR, admin_auth, confirm_uri, confirmation_token};

#[actix_web::test]
async fn admin_created_request_is_confirmed_by_the_operator_link() {
    let engine = Engine::new();
    let app = actix_test::init_service(engine.app()).await;

    let create = actix_test::TestRequest::post()
        .uri("/admin/deletion-requests")
        .insert_header(admin_auth())
        .set_json(json!({
            "userId": uuid::Uuid::new_v4(),
            "brokerName": "Acme Data",
            "brokerUrl": "https://acme.example",
            "operatorEmail": BROKER_DPO,
            "personalDataCategories": ["email"],
            "sendInitial": true,
        }))
        .to_request();
    let response = actix_test::call_service(&app, create).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = actix_test::read_body_json(response).await;
    assert_eq!(created["status"], "sent_initial");
    let id = created["id"].as_str().expect("id").to_owned();

    let email = engine.outbox.last().expect("initial email sent");
    assert_eq!(email.to, BROKER_DPO);
    let token = confirmation_token(&email);

    let confirm = actix_test::TestRequest::post()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, confirm).await;
    assert_eq!(response.status(), StatusCode::OK);
    let receipt: Value = actix_test::read_body_json(response).await;
    assert_eq!(receipt["status"], "operator_confirmed");
    assert_eq!(receipt["deletionRequestId"], id.as_str());

    let replay = actix_test::TestRequest::post()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, replay).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let view = actix_test::TestRequest::get()
        .uri(&format!("/admin/deletion-requests/{id}"))
        .insert_header(admin_auth())
        .to_request();
    let body: Value = actix_test::call_and_read_body_json(&app, view).await;
    assert_eq!(body["status"], "operator_confirmed");
    assert!(body["buttonConfirmedAt"].is_string());
    assert_eq!(body["confirmation"]["used"], true);

    let audit = actix_test::TestRequest::get()
        .uri(&format!("/admin/audit?deletionRequestId={id}"))
        .insert_header(admin_auth())
        .to_request();
    let entries: Vec<Value> = actix_test::call_and_read_body_json(&app, audit).await;
    let confirmation = entries
        .iter()
        .find(|entry| entry["action"] == "operator_confirmed")
        .expect("confirmation audited");
    assert_eq!(confirmation["actor"], "operator");
}

#[tokio::test]
async fn unanswered_request_is_followed_up_then_escalated() {
    let engine = Engine::new();
    let request = engine.sent_request().await;
    assert_eq!(request.status, RequestStatus::SentInitial);

    engine.clock.advance_days(35);
    let report = engine.scheduler.run_once().await.expect("first pass");
    assert_eq!(report.follow_ups_sent, 1);

    let followed = engine.request(&request.id).await;
    assert_eq!(followed.status, RequestStatus::FollowedUp);
    assert!(followed.follow_up_sent_at.is_some());
    assert!(followed.escalation_sent_at.is_none());

    engine.clock.advance_days(30);
    let report = engine.scheduler.run_once().await.expect("second pass");
    assert_eq!(report.escalations_sent, 1);

    let escalated = engine.request(&request.id).await;
    assert_eq!(escalated.status, RequestStatus::Escalated);
    assert!(escalated.escalation_sent_at.is_some());

    let escalation = engine.outbox.last().expect("escalation email");
    assert_eq!(escalation.cc, vec![REGULATOR.to_owned()]);
    assert_eq!(engine.outbox.messages().len(), 3);

    let quiet = engine.scheduler.run_once().await.expect("third pass");
    assert_eq!(quiet.escalations_sent + quiet.follow_ups_sent, 0);
    assert_eq!(engine.outbox.messages().len(), 3);
}

#[tokio::test]
async fn repeated_follow_up_reuses_the_message_id() {
    let engine = Engine::new();
    let request = engine.sent_request().await;

    let first = engine
        .dispatcher
        .send_follow_up(&request.id, Actor::Admin)
        .await
        .expect("follow-up sent");
    let second = engine
        .dispatcher
        .send_follow_up(&request.id, Actor::Admin)
        .await
        .expect("follow-up repeated");

    assert_eq!(first, second);
    assert_eq!(engine.outbox.messages().len(), 2);
}

#[actix_web::test]
async fn reply_threaded_on_the_initial_email_resolves_the_request() {
    let engine = Engine::new();
    let request = engine.sent_request().await;
    let initial_id = request
        .initial_message_id
        .clone()
        .expect("initial message id recorded");
    let app = actix_test::init_service(engine.app()).await;

    let delivery = actix_test::TestRequest::post()
        .uri("/webhook/email")
        .set_json(json!([{
            "email": BROKER_DPO,
            "subject": "Re: Personal data erasure request",
            "text": "We have deleted your personal data as requested.",
            "headers": { "In-Reply-To": initial_id },
        }]))
        .to_request();
    let receipt: Value = actix_test::call_and_read_body_json(&app, delivery).await;
    assert_eq!(receipt, json!({ "accepted": 1 }));

    let resolved = engine.request(&request.id).await;
    assert_eq!(resolved.status, RequestStatus::Resolved);
    assert!(resolved.last_reply_at.is_some());

    let stored = engine
        .store
        .list(InboundEmailQuery {
            uncorrelated_only: false,
            limit: 10,
        })
        .await
        .expect("inbound list");
    let reply = stored.first().expect("reply persisted");
    assert_eq!(reply.parsed_status, ReplyIntent::Deleted);
    assert_eq!(reply.deletion_request_id, Some(request.id));
}

#[actix_web::test]
async fn reply_matching_nothing_is_kept_for_triage() {
    let engine = Engine::new();
    let request = engine.sent_request().await;
    let app = actix_test::init_service(engine.app()).await;

    let delivery = actix_test::TestRequest::post()
        .uri("/webhook/email")
        .set_json(json!([{
            "email": "someone@elsewhere.example",
            "subject": "Hello",
            "text": "Your data has been deleted.",
            "headers": { "In-Reply-To": "<unknown@elsewhere.example>" },
        }]))
        .to_request();
    let receipt: Value = actix_test::call_and_read_body_json(&app, delivery).await;
    assert_eq!(receipt, json!({ "accepted": 1 }));

    let triage = actix_test::TestRequest::get()
        .uri("/admin/inbound-emails?uncorrelated=true")
        .insert_header(admin_auth())
        .to_request();
    let emails: Vec<Value> = actix_test::call_and_read_body_json(&app, triage).await;
    assert_eq!(emails.len(), 1);
    assert!(emails[0]["deletionRequestId"].is_null());

    let untouched = engine.request(&request.id).await;
    assert_eq!(untouched.status, RequestStatus::SentInitial);
}

#[tokio::test]
async fn reply_suppresses_the_follow_up() {
    let engine = Engine::new();
    let request = engine.sent_request().await;
    let tracking = request.tracking_id.to_string();

    engine
        .ingestor
        .ingest(
            json!([{
                "email": BROKER_DPO,
                "subject": "Re: erasure",
                "text": "Please provide proof of identity before we continue.",
                "headers": { "X-Track-ID": tracking },
            }])
            .to_string()
            .as_bytes(),
        )
        .await
        .expect("reply ingested");

    engine.clock.advance_days(35);
    let report = engine.scheduler.run_once().await.expect("pass");

    assert_eq!(report.follow_ups_sent, 0);
    assert_eq!(
        engine.request(&request.id).await.status,
        RequestStatus::SentInitial
    );
}
