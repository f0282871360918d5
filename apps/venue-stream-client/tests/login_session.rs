//! Login Session Integration Tests
//!
//! One login per physical connection, shared outcomes for concurrent
//! callers, rejection handling and reset after reconnect.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use common::{Behavior, LoginReply, MockVenue, WAIT, eventually};
use venue_stream_client::{
    Arg, ClientConfig, LoginError, NoopLogger, ServiceKind, StreamClient, StreamError,
};

#[tokio::test]
async fn concurrent_logins_send_one_directive() {
    let venue = MockVenue::start_with(Behavior {
        login_delay: Duration::from_millis(100),
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    let results = join_all((0..8).map(|_| {
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.login(&cancel).await }
    }))
    .await;

    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert_eq!(venue.count("login"), 1);
    assert!(client.is_authenticated());
}

#[tokio::test]
async fn login_is_idempotent_on_one_connection() {
    let venue = MockVenue::start().await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    client.login(&cancel).await.unwrap();
    client.login(&cancel).await.unwrap();

    assert_eq!(venue.count("login"), 1);
    assert_eq!(client.connects(), 1);
}

#[tokio::test]
async fn login_directive_carries_signed_args() {
    let venue = MockVenue::start().await;
    let client = venue.client(ServiceKind::Private);

    client.login(&CancellationToken::new()).await.unwrap();

    let directive = venue.directives().remove(0);
    let args = &directive["args"][0];
    assert_eq!(directive["op"], "login");
    assert_eq!(args["apiKey"], "key");
    assert_eq!(args["passphrase"], "pass");
    assert!(args["timestamp"].as_str().unwrap().parse::<i64>().is_ok());
    assert_eq!(args["sign"].as_str().unwrap().len(), 44);
}

#[tokio::test]
async fn rejected_login_event_surfaces_code() {
    let venue = MockVenue::start_with(Behavior {
        login: LoginReply::Reject("60024", "Wrong passphrase"),
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);

    let result = client.login(&CancellationToken::new()).await;

    assert_eq!(
        result,
        Err(LoginError::Rejected {
            code: "60024".to_string(),
            msg: "Wrong passphrase".to_string()
        })
    );
    assert!(!client.is_authenticated());
}

#[tokio::test]
async fn error_event_during_login_is_a_rejection() {
    let venue = MockVenue::start_with(Behavior {
        login: LoginReply::Error("60009", "Login failed."),
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);

    let result = timeout(WAIT, client.login(&CancellationToken::new()))
        .await
        .unwrap();

    assert_eq!(
        result,
        Err(LoginError::Rejected {
            code: "60009".to_string(),
            msg: "Login failed.".to_string()
        })
    );
    assert!(!client.state().is_alive());
}

#[tokio::test]
async fn unanswered_login_honours_cancellation() {
    let venue = MockVenue::start_with(Behavior {
        login: LoginReply::Silent,
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    let login = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.login(&cancel).await }
    });
    assert!(eventually(WAIT, || venue.count("login") == 1).await);
    cancel.cancel();

    let result = timeout(WAIT, login).await.unwrap().unwrap();
    assert_eq!(result, Err(LoginError::Cancelled));
    assert_eq!(client.active_watches(), 0);
}

#[tokio::test]
async fn reconnect_requires_fresh_login() {
    let venue = MockVenue::start().await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    client.login(&cancel).await.unwrap();
    assert!(client.is_authenticated());

    venue.drop_connections();
    assert!(eventually(WAIT, || !client.is_authenticated()).await);

    client.login(&cancel).await.unwrap();
    assert!(client.is_authenticated());
    assert_eq!(venue.count("login"), 2);
    assert_eq!(client.connects(), 2);
}

#[tokio::test]
async fn private_subscribe_logs_in_first() {
    let venue = MockVenue::start().await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    let subscription = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.subscribe(&cancel, Arg::new("account"), |_| {}).await }
    });
    assert!(eventually(WAIT, || venue.count("subscribe") == 1).await);

    let ops: Vec<String> = venue
        .directives()
        .iter()
        .map(|d| d["op"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(ops, ["login", "subscribe"]);

    cancel.cancel();
    assert_eq!(timeout(WAIT, subscription).await.unwrap().unwrap(), Ok(()));
}

#[tokio::test]
async fn private_service_without_credentials_fails_fast() {
    let venue = MockVenue::start().await;
    let client = StreamClient::builder(ClientConfig::new(
        venue.url(ServiceKind::Private),
        ServiceKind::Private,
    ))
    .logger(Arc::new(NoopLogger))
    .build();

    let result = client
        .subscribe(&CancellationToken::new(), Arg::new("account"), |_| {})
        .await;

    assert_eq!(result, Err(StreamError::Login(LoginError::NoCredentials)));
    assert_eq!(venue.count("login"), 0);
    assert!(!client.is_watching(&Arg::new("account")));
}

#[tokio::test]
async fn cancelled_login_ends_private_subscribe_as_cancelled() {
    let venue = MockVenue::start_with(Behavior {
        login: LoginReply::Silent,
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    let subscription = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move { client.subscribe(&cancel, Arg::new("account"), |_| {}).await }
    });
    assert!(eventually(WAIT, || venue.count("login") == 1).await);
    cancel.cancel();

    let result = timeout(WAIT, subscription).await.unwrap().unwrap();
    assert_eq!(result, Err(StreamError::Cancelled));
    assert_eq!(venue.count("subscribe"), 0);
    assert!(!client.is_watching(&Arg::new("account")));
}

#[tokio::test]
async fn cancelled_login_ends_supervised_subscribe_cleanly() {
    let venue = MockVenue::start_with(Behavior {
        login: LoginReply::Silent,
        ..Behavior::default()
    })
    .await;
    let client = venue.client(ServiceKind::Private);
    let cancel = CancellationToken::new();

    let subscription = tokio::spawn({
        let client = client.clone();
        let cancel = cancel.clone();
        async move {
            client
                .subscribe_with_retry(&cancel, Arg::new("account"), |_| {})
                .await
        }
    });
    assert!(eventually(WAIT, || venue.count("login") == 1).await);
    cancel.cancel();

    assert_eq!(timeout(WAIT, subscription).await.unwrap().unwrap(), Ok(()));
    assert_eq!(venue.count("login"), 1);
}
