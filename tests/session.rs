#![cfg(all(feature = "ws", feature = "status"))]
#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::time::Duration;

use codestorm_bridge::bridge::{CallOptions, Config};
use codestorm_bridge::error::Kind;
use codestorm_bridge::retry::{RetryConfig, Strategy};
use codestorm_bridge::session::{Session, SessionConfig};
use codestorm_bridge::status::{ProbeConfig, ProbeState};
use codestorm_bridge::ws::ConnectionState;
use common::{MockSocketServer, fast_socket, wait_until};
use serde_json::json;

fn session_config(max_attempts: u32) -> SessionConfig {
    SessionConfig::builder()
        .bridge(
            Config::builder()
                .socket(fast_socket(max_attempts))
                .auto_connect(false)
                .build(),
        )
        .probe(
            ProbeConfig::builder()
                .request_timeout(Duration::from_millis(500))
                .retry(
                    RetryConfig::builder()
                        .delay(Duration::from_millis(10))
                        .strategy(Strategy::Linear)
                        .build(),
                )
                .build(),
        )
        .retry(
            RetryConfig::builder()
                .max_attempts(max_attempts)
                .delay(Duration::from_millis(10))
                .build(),
        )
        .build()
}

#[tokio::test]
async fn session_runs_commands_until_shutdown() -> anyhow::Result<()> {
    let mut server = MockSocketServer::start().await;
    let session = Session::new(&server.base_url(), session_config(5))?;

    session.start().await?;
    assert!(
        session.connection_state().is_connected(),
        "socket should be up"
    );

    let call = {
        let bridge = session.bridge().clone();
        tokio::spawn(async move { bridge.send_command("pwd", &CallOptions::default()).await })
    };
    server
        .respond("command_result", json!({ "success": true, "output": "/home/alice" }))
        .await;
    assert_eq!(call.await??.output.as_deref(), Some("/home/alice"));

    session.shutdown();
    assert_eq!(session.connection_state(), ConnectionState::Closed);

    let err = session
        .bridge()
        .process_natural_language("anything", &CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), Kind::NotConnected);

    Ok(())
}

#[tokio::test]
async fn both_paths_share_one_retry_budget() -> anyhow::Result<()> {
    // Rejects socket connects and does not speak plain HTTP, so both paths fail.
    let server = MockSocketServer::start_rejecting("server full").await;
    let session = Session::new(&server.base_url(), session_config(3))?;

    let err = session.start().await.unwrap_err();
    assert_eq!(err.kind(), Kind::Connection);

    let exhausted = |session: &Session| {
        session.connection_state() == ConnectionState::Exhausted { attempts: 3 }
            && matches!(session.probe_state(), ProbeState::Failed { attempts: 3, .. })
    };
    assert!(
        wait_until(|| exhausted(&session)).await,
        "both paths should stop, socket {:?}, probe {:?}",
        session.connection_state(),
        session.probe_state()
    );
    assert_eq!(session.policy().attempts(), 3);
    assert!(
        session.bridge().policy().is_exhausted() && session.prober().policy().is_exhausted(),
        "bridge and prober see the same policy"
    );

    let before = server.handshakes();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.handshakes(), before, "nothing resumes on its own");

    session.retry();
    assert!(
        wait_until(|| server.handshakes() > before).await,
        "manual retry should reconnect"
    );
    assert!(
        wait_until(|| exhausted(&session)).await,
        "the fresh budget is spent again"
    );

    session.shutdown();
    Ok(())
}

#[tokio::test]
async fn prober_backs_off_linearly_inside_a_session() -> anyhow::Result<()> {
    let config = SessionConfig::builder()
        .bridge(Config::builder().auto_connect(false).build())
        .build();
    let session = Session::new("http://127.0.0.1:1", config)?;

    let first = session.prober().check().await;
    let second = session.prober().check().await;

    assert!(
        matches!(
            first,
            ProbeState::Disconnected { attempt: 1, retry_in, .. } if retry_in == Duration::from_millis(1500)
        ),
        "unexpected state {first:?}"
    );
    assert!(
        matches!(
            second,
            ProbeState::Disconnected { attempt: 2, retry_in, .. } if retry_in == Duration::from_millis(3000)
        ),
        "attempt 2 should wait twice the step, got {second:?}"
    );
    assert_eq!(session.policy().attempts(), 2, "budget is shared");

    session.shutdown();
    Ok(())
}

#[tokio::test]
async fn dropped_session_stops_reconnecting() -> anyhow::Result<()> {
    let server = MockSocketServer::start().await;
    let session = Session::new(&server.base_url(), session_config(5))?;
    session.start().await?;
    assert_eq!(server.connections(), 1);

    drop(session);
    server.drop_connections();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(server.connections(), 1, "a dropped session must not reconnect");
    Ok(())
}
