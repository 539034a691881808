//! A confirmation link must succeed exactly once under parallel use.

mod support;

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::test as actix_test;
use futures::future::join_all;
use rstest::rstest;

use erasure_engine::domain::{ClientContext, ErrorCode, RequestStatus};

use support::{Engine, confirm_uri, confirmation_token};

#[rstest]
#[case(2)]
#[case(16)]
#[case(64)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_confirmations_have_one_winner(#[case] attempts: usize) {
    let engine = Arc::new(Engine::new());
    let request = engine.sent_request().await;
    let token = confirmation_token(&engine.outbox.last().expect("initial email"));

    let handles: Vec<_> = (0..attempts)
        .map(|attempt| {
            let engine = Arc::clone(&engine);
            let token = token.clone();
            tokio::spawn(async move {
                let client = ClientContext {
                    ip: Some(format!("198.51.100.{}", attempt % 250)),
                    user_agent: Some("parallel-test".to_owned()),
                };
                engine.confirmations.confirm(&token, &client).await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(receipt) => {
                assert_eq!(receipt.status, RequestStatus::OperatorConfirmed);
                successes += 1;
            }
            Err(error) => assert!(
                matches!(
                    error.code(),
                    ErrorCode::Conflict | ErrorCode::TooManyRequests
                ),
                "unexpected refusal: {error:?}"
            ),
        }
    }

    assert_eq!(successes, 1);
    let confirmed = engine.request(&request.id).await;
    assert_eq!(confirmed.status, RequestStatus::OperatorConfirmed);
    assert!(
        confirmed
            .confirmation
            .as_ref()
            .is_some_and(|record| record.used)
    );
}

#[actix_web::test]
async fn interleaved_http_confirmations_have_one_winner() {
    let engine = Engine::new();
    engine.sent_request().await;
    let token = confirmation_token(&engine.outbox.last().expect("initial email"));
    let app = actix_test::init_service(engine.app()).await;

    let calls = (0..8).map(|_| {
        let request = actix_test::TestRequest::post()
            .uri(&confirm_uri(&token))
            .to_request();
        actix_test::call_service(&app, request)
    });
    let statuses: Vec<StatusCode> = join_all(calls)
        .await
        .into_iter()
        .map(|response| response.status())
        .collect();

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    assert_eq!(ok, 1, "statuses: {statuses:?}");
    assert!(statuses.iter().all(|s| matches!(
        *s,
        StatusCode::OK | StatusCode::CONFLICT | StatusCode::TOO_MANY_REQUESTS
    )));
}
