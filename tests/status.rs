#![cfg(feature = "status")]
#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::time::Duration;

use codestorm_bridge::retry::{RetryConfig, Strategy};
use codestorm_bridge::status::{Endpoint, ProbeConfig, ProbeState, StatusProber};
use httpmock::{Method::GET, Method::HEAD, MockServer};
use reqwest::StatusCode;
use serde_json::json;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn config(max_attempts: u32, step_ms: u64) -> ProbeConfig {
    ProbeConfig::builder()
        .request_timeout(Duration::from_secs(1))
        .retry(
            RetryConfig::builder()
                .max_attempts(max_attempts)
                .delay(Duration::from_millis(step_ms))
                .strategy(Strategy::Linear)
                .build(),
        )
        .build()
}

fn status_ok(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/api/status");
        then.status(StatusCode::OK)
            .json_body(json!({ "success": true, "status": "online" }));
    })
}

fn status_down(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/api/status");
        then.status(StatusCode::INTERNAL_SERVER_ERROR);
    })
}

fn ping_down(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(GET).path("/api/ping");
        then.status(StatusCode::NOT_FOUND);
    })
}

fn root_down(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(HEAD).path("/");
        then.status(StatusCode::SERVICE_UNAVAILABLE);
    })
}

#[tokio::test]
async fn healthy_status_endpoint_connects() -> anyhow::Result<()> {
    let server = MockServer::start();
    let mock = status_ok(&server);
    let prober = StatusProber::new(&server.base_url(), config(5, 10))?;

    let state = prober.check().await;

    assert_eq!(
        state,
        ProbeState::Connected {
            endpoint: Endpoint::Status
        }
    );
    assert_eq!(prober.state(), state);
    mock.assert();

    Ok(())
}

#[tokio::test]
async fn failing_status_falls_back_to_ping_without_retry() -> anyhow::Result<()> {
    let server = MockServer::start();
    let status = status_down(&server);
    let ping = server.mock(|when, then| {
        when.method(GET).path("/api/ping");
        then.status(StatusCode::OK)
            .json_body(json!({ "status": "ok", "message": "pong" }));
    });
    let prober = StatusProber::new(&server.base_url(), config(5, 10))?;

    let state = prober.check().await;

    assert_eq!(
        state,
        ProbeState::Connected {
            endpoint: Endpoint::Ping
        }
    );
    assert_eq!(prober.policy().attempts(), 0, "no retry escalation");
    status.assert();
    ping.assert();

    Ok(())
}

#[tokio::test]
async fn root_answer_counts_as_reachable() -> anyhow::Result<()> {
    let server = MockServer::start();
    status_down(&server);
    ping_down(&server);
    server.mock(|when, then| {
        when.method(HEAD).path("/");
        then.status(StatusCode::OK);
    });
    let prober = StatusProber::new(&server.base_url(), config(5, 10))?;

    assert_eq!(prober.probe().await?, Endpoint::Root);
    assert_eq!(prober.state(), ProbeState::Unknown, "probe leaves the state alone");

    Ok(())
}

#[tokio::test]
async fn failed_check_schedules_linear_retry() -> anyhow::Result<()> {
    let server = MockServer::start();
    status_down(&server);
    ping_down(&server);
    root_down(&server);
    let prober = StatusProber::new(&server.base_url(), config(5, 1500))?;

    let first = prober.check().await;
    let second = prober.check().await;

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
        "unexpected state {second:?}"
    );

    Ok(())
}

#[tokio::test]
async fn background_loop_gives_up_then_recovers_on_manual_retry() -> anyhow::Result<()> {
    let server = MockServer::start();
    let mut status = status_down(&server);
    ping_down(&server);
    root_down(&server);
    let prober = StatusProber::new(&server.base_url(), config(2, 10))?;
    let mut states = prober.state_receiver();

    prober.start();
    let failed = timeout(
        WAIT,
        states.wait_for(|state| matches!(state, ProbeState::Failed { .. })),
    )
    .await??
    .clone();

    assert!(
        matches!(failed, ProbeState::Failed { attempts: 2, .. }),
        "unexpected state {failed:?}"
    );
    status.assert_calls(3);

    tokio::time::sleep(Duration::from_millis(100)).await;
    status.assert_calls(3);

    status.delete();
    status_ok(&server);
    prober.retry();

    timeout(WAIT, states.wait_for(ProbeState::is_connected)).await??;
    assert_eq!(prober.policy().attempts(), 0);
    prober.stop();

    Ok(())
}

#[tokio::test]
async fn recheck_probes_again_while_connected() -> anyhow::Result<()> {
    let server = MockServer::start();
    let mock = status_ok(&server);
    let prober = StatusProber::new(&server.base_url(), config(5, 10))?;
    let mut states = prober.state_receiver();

    prober.start();
    timeout(WAIT, states.wait_for(ProbeState::is_connected)).await??;
    prober.start();

    prober.recheck();
    timeout(WAIT, states.changed()).await??;
    timeout(WAIT, states.wait_for(ProbeState::is_connected)).await??;

    mock.assert_calls(2);
    prober.stop();

    Ok(())
}
