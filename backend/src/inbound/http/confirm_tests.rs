//! Tests for the operator confirmation handlers.

use actix_web::http::StatusCode;
use actix_web::http::header::CACHE_CONTROL;
use actix_web::test as actix_test;
use rstest::rstest;
use serde_json::{Value, json};
use url::Url;

use super::escape_html;
use crate::domain::{Actor, DeletionRequestId, RequestStatus};
use crate::inbound::http::test_utils::{http_state, test_app};
use crate::test_support::{CONFIRM_LIMIT, Harness, draft};

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
    let email = harness.transport.sent().pop().expect("an email was sent");
    let link = email
        .text
        .lines()
        .find(|line| line.contains("/operator/confirm?"))
        .expect("confirmation link");
    let token = Url::parse(link.trim())
        .expect("link parses")
        .query_pairs()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .expect("token parameter");
    (request.id, token)
}

fn confirm_uri(token: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
    format!("/operator/confirm?token={encoded}")
}

async fn status_of(harness: &Harness, id: &DeletionRequestId) -> RequestStatus {
    harness
        .lifecycle
        .repository()
        .find_by_id(id)
        .await
        .expect("lookup")
        .expect("exists")
        .status
}

#[actix_web::test]
async fn preview_renders_a_page_without_consuming_the_link() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    let request = actix_test::TestRequest::get()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(CACHE_CONTROL)
            .and_then(|value| value.to_str().ok()),
        Some("no-store")
    );
    let body = actix_test::read_body(response).await;
    let page = String::from_utf8(body.to_vec()).expect("utf-8 page");
    assert!(page.contains("Acme Data"));
    assert!(page.contains("<li>phone</li>"));
    assert!(page.contains("method=\"post\""));
    assert_eq!(status_of(&harness, &id).await, RequestStatus::SentInitial);
}

#[actix_web::test]
async fn post_confirms_once_then_conflicts() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    let first = actix_test::TestRequest::post()
        .uri(&confirm_uri(&token))
        .insert_header(("user-agent", "Mail/1.0"))
        .to_request();
    let response = actix_test::call_service(&app, first).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["status"], json!("operator_confirmed"));
    assert_eq!(body["deletionRequestId"], json!(id.to_string()));

    let second = actix_test::TestRequest::post()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, second).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let preview = actix_test::TestRequest::get()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, preview).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(status_of(&harness, &id).await, RequestStatus::OperatorConfirmed);
}

#[rstest]
#[case::absent("/operator/confirm")]
#[case::blank("/operator/confirm?token=")]
#[case::whitespace("/operator/confirm?token=%20%20")]
#[actix_web::test]
async fn missing_tokens_are_bad_requests(#[case] uri: &str) {
    let harness = Harness::new();
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    let request = actix_test::TestRequest::post().uri(uri).to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = actix_test::read_body_json(response).await;
    assert_eq!(body["details"]["field"], json!("token"));
}

#[rstest]
#[case::garbage("not-a-token")]
#[case::wrong_shape("a.b.c")]
#[actix_web::test]
async fn forged_tokens_are_bad_requests(#[case] token: &str) {
    let harness = Harness::new();
    sent_request(&harness).await;
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    let request = actix_test::TestRequest::post()
        .uri(&confirm_uri(token))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn expired_links_are_bad_requests() {
    let harness = Harness::new();
    let (id, token) = sent_request(&harness).await;
    harness.clock.advance_days(46);
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    let request = actix_test::TestRequest::post()
        .uri(&confirm_uri(&token))
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(status_of(&harness, &id).await, RequestStatus::SentInitial);
}

#[actix_web::test]
async fn repeated_attempts_are_rate_limited() {
    let harness = Harness::new();
    let app = actix_test::init_service(test_app(http_state(&harness))).await;

    for _ in 0..CONFIRM_LIMIT {
        let request = actix_test::TestRequest::post()
            .uri(&confirm_uri("not-a-token"))
            .peer_addr("203.0.113.7:4000".parse().expect("socket address"))
            .to_request();
        let response = actix_test::call_service(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    let request = actix_test::TestRequest::post()
        .uri(&confirm_uri("not-a-token"))
        .peer_addr("203.0.113.7:4000".parse().expect("socket address"))
        .to_request();
    let response = actix_test::call_service(&app, request).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let other_client = actix_test::TestRequest::post()
        .uri(&confirm_uri("not-a-token"))
        .peer_addr("198.51.100.2:4000".parse().expect("socket address"))
        .to_request();
    let response = actix_test::call_service(&app, other_client).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[rstest]
#[case::plain("Acme Data", "Acme Data")]
#[case::markup("<script>alert('x')</script>", "&lt;script&gt;alert(&#39;x&#39;)&lt;/script&gt;")]
#[case::attribute("a\"b&c", "a&quot;b&amp;c")]
fn html_is_escaped(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(escape_html(raw), expected);
}
