//! Untrusted webhook input never turns into an error response.

mod support;

use actix_web::http::StatusCode;
use actix_web::test as actix_test;
use proptest::prelude::*;
use rstest::rstest;
use serde_json::{Value, json};

use erasure_engine::domain::WebhookPayload;

use support::Engine;

#[rstest]
#[case::null("null")]
#[case::empty_string("\"\"")]
#[case::nothing("")]
#[case::whitespace("   \n")]
#[case::number("42")]
#[case::object(r#"{"email": "dpo@acme.example", "text": "deleted"}"#)]
#[case::truncated(r#"[{"email": "dpo@acme.example""#)]
#[case::nested_arrays("[[], [[]]]")]
#[case::wrong_field_types(r#"[{"email": 7, "headers": "In-Reply-To"}]"#)]
#[actix_web::test]
async fn malformed_payloads_are_acknowledged(#[case] body: &'static str) {
    let engine = Engine::new();
    let app = actix_test::init_service(engine.app()).await;

    let request = actix_test::TestRequest::post()
        .uri("/webhook/email")
        .insert_header(("content-type", "application/json"))
        .set_payload(body)
        .to_request();
    let response = actix_test::call_service(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let receipt: Value = actix_test::read_body_json(response).await;
    assert_eq!(receipt, json!({ "accepted": 0 }));
}

#[actix_web::test]
async fn readable_events_survive_their_malformed_neighbours() {
    let engine = Engine::new();
    let app = actix_test::init_service(engine.app()).await;

    let request = actix_test::TestRequest::post()
        .uri("/webhook/email")
        .set_json(json!([
            null,
            { "email": "dpo@acme.example", "subject": "Re: erasure", "text": "Noted." },
            "junk",
        ]))
        .to_request();
    let receipt: Value = actix_test::call_and_read_body_json(&app, request).await;

    assert_eq!(receipt, json!({ "accepted": 1 }));
}

proptest! {
    #[test]
    fn parsing_arbitrary_bytes_never_panics(body in proptest::collection::vec(any::<u8>(), 0..512)) {
        let payload = WebhookPayload::parse(&body);
        prop_assert!(payload.events().len() <= body.len());
    }

    #[test]
    fn arbitrary_json_arrays_are_ingested_without_error(
        items in proptest::collection::vec(
            prop_oneof![
                Just(Value::Null),
                any::<i64>().prop_map(Value::from),
                "[a-z@.]{0,24}".prop_map(|email| json!({ "email": email })),
                ("[a-z]{1,8}@[a-z]{1,8}\\.example", ".{0,64}")
                    .prop_map(|(email, text)| json!({ "email": email, "text": text })),
            ],
            0..8,
        )
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime builds");
        let engine = Engine::new();
        let body = Value::Array(items).to_string();

        let stored = runtime.block_on(engine.ingestor.ingest(body.as_bytes()));

        prop_assert!(stored.is_ok());
    }
}
