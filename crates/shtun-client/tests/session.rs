//! Session lifecycle tests with a scripted remote shell and fake network.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use shtun_client::{
    AgentStatus, SessionConfig, SessionPhase, TunnelSession, agent_command, negotiate_agent,
};
use shtun_core::channel::ChannelConfig;
use shtun_core::frame;
use shtun_core::tunnel::{PumpExit, TunnelConfig};
use shtun_core::Error;
use shtun_test_utils::{FakeNetwork, FakeOpener, memory_channel};

const READY: &str = "# Agent device shtun.12.11 is ready [100.64.12.11]\r\n";

fn tunnel() -> TunnelConfig {
    TunnelConfig::new("100.64.12.10".parse().unwrap(), "100.64.12.11".parse().unwrap())
        .with_routes(vec!["10.0.0.0/16".parse().unwrap()])
}

fn config(hook: Option<PathBuf>) -> SessionConfig {
    SessionConfig {
        hook,
        stats: false,
        ..SessionConfig::new(tunnel())
    }
}

/// Hook script that appends its arguments to `calls` and exits with `code`.
fn hook_script(dir: &Path, code: i32) -> (PathBuf, PathBuf) {
    let calls = dir.join("calls");
    let path = dir.join("hook.sh");
    fs::write(
        &path,
        format!("#!/bin/sh\necho \"$@\" >> {}\nexit {code}\n", calls.display()),
    )
    .unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    (path, calls)
}

#[tokio::test]
async fn negotiation_detects_ready_agent() {
    let (mut channel, mut shell) = memory_channel(ChannelConfig::default());
    let remote = async {
        let command = shell.read_line().await.unwrap();
        shell.send("starting\r\n").await;
        shell.send(READY).await;
        command
    };
    let command = agent_command("tunnel-agent", &tunnel());
    let (status, sent) = tokio::join!(
        negotiate_agent(&mut channel, &command, std::time::Duration::from_secs(5)),
        remote
    );
    assert_eq!(status.unwrap(), AgentStatus::Ready);
    // the agent is told its own address first
    assert_eq!(sent, "tunnel-agent 100.64.12.11 100.64.12.10");
}

#[test]
fn agent_command_carries_non_default_mtu() {
    assert_eq!(
        agent_command("/opt/bin/tunnel-agent", &tunnel().with_mtu(1400)),
        "/opt/bin/tunnel-agent 100.64.12.11 100.64.12.10 --mtu 1400"
    );
    assert!(!agent_command("tunnel-agent", &tunnel()).contains("--mtu"));
}

#[tokio::test]
async fn session_starts_agent_with_its_mtu() {
    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    let (opener, _handle) = FakeOpener::new();
    let config = SessionConfig {
        stats: false,
        ..SessionConfig::new(tunnel().with_mtu(1280))
    };
    let mut session = TunnelSession::new(config, channel, net.clone(), opener).unwrap();

    let remote = async {
        let command = shell.read_line().await.unwrap();
        shell
            .send("bash: tunnel-agent: command not found\r\nsh-5.1$ ")
            .await;
        shell.read_line().await;
        shell.close_output().await;
        command
    };
    let (result, command) = tokio::join!(session.run(), remote);
    assert!(matches!(result, Err(Error::AgentNotInstalled { .. })));
    assert_eq!(command, "tunnel-agent 100.64.12.11 100.64.12.10 --mtu 1280");
}

#[tokio::test]
async fn missing_agent_never_touches_local_network() {
    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    let (opener, _handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(None), channel, net.clone(), opener).unwrap();

    let remote = async {
        shell.read_line().await.unwrap();
        shell
            .send("bash: tunnel-agent: command not found\r\nsh-5.1$ ")
            .await;
        let bye = shell.read_line().await;
        shell.close_output().await;
        bye
    };
    let (result, bye) = tokio::join!(session.run(), remote);

    let err = result.unwrap_err();
    assert!(matches!(err, Error::AgentNotInstalled { .. }));
    assert!(err.hint().is_some());
    assert!(net.calls().is_empty());
    assert_eq!(bye.as_deref(), Some("\x03exit"));
    assert_eq!(
        session.phases(),
        &[
            SessionPhase::Idle,
            SessionPhase::NegotiatingAgent,
            SessionPhase::TearingDown,
            SessionPhase::Closed,
        ]
    );
}

#[tokio::test]
async fn failing_up_hook_aborts_without_down_hook() {
    let dir = tempfile::tempdir().unwrap();
    let (script, calls) = hook_script(dir.path(), 1);

    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    let (opener, _handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(Some(script)), channel, net.clone(), opener).unwrap();

    let remote = async {
        shell.read_line().await.unwrap();
        shell.send(READY).await;
        shell.read_line().await;
        shell.close_output().await;
    };
    let (result, ()) = tokio::join!(session.run(), remote);

    assert!(matches!(result, Err(Error::Hook { .. })));
    let calls = fs::read_to_string(calls).unwrap();
    assert_eq!(calls.lines().count(), 1);
    assert!(calls.starts_with("up shtun.12.10 "));
    assert_eq!(net.count("create_interface"), 1);
    assert_eq!(net.count("destroy_interface"), 1);
    assert!(session.endpoint().is_destroyed());
    assert!(!session.phases().contains(&SessionPhase::RunningDownHook));
    assert!(!session.phases().contains(&SessionPhase::Active));
}

#[tokio::test]
async fn device_failure_tears_down_partial_setup() {
    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    net.fail_on("add_route");
    let (opener, _handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(None), channel, net.clone(), opener).unwrap();

    let remote = async {
        shell.read_line().await.unwrap();
        shell.send(READY).await;
        shell.read_line().await;
        shell.close_output().await;
    };
    let (result, ()) = tokio::join!(session.run(), remote);

    assert!(matches!(result, Err(Error::Device { .. })));
    assert_eq!(net.count("destroy_interface"), 1);
    assert_eq!(
        session.phases(),
        &[
            SessionPhase::Idle,
            SessionPhase::NegotiatingAgent,
            SessionPhase::BringingUpDevices,
            SessionPhase::TearingDown,
            SessionPhase::Closed,
        ]
    );
}

#[tokio::test]
async fn full_session_relays_and_runs_both_hooks() {
    let dir = tempfile::tempdir().unwrap();
    let (script, calls) = hook_script(dir.path(), 0);

    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    let (opener, mut handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(Some(script)), channel, net.clone(), opener).unwrap();

    let inbound: Vec<u8> = (0..1400).map(|i| (i % 256) as u8).collect();
    let outbound = vec![0x45u8; 60];
    let remote = async {
        shell.read_line().await.unwrap();
        shell.send(READY).await;
        shell.send(&format!("{}\r\n", frame::encode_data(&inbound))).await;
        let written = handle.next_written().await;

        handle.inject(outbound.clone());
        let mut line = shell.read_line().await.unwrap();
        while line == "#" {
            line = shell.read_line().await.unwrap();
        }

        shell.close_output().await;
        (written, line)
    };
    let (result, (written, line)) = tokio::join!(session.run(), remote);

    assert_eq!(result.unwrap(), PumpExit::ChannelClosed);
    assert_eq!(written, Some(inbound));
    assert_eq!(frame::decode(&line), Ok(Some(frame::Frame::Data(outbound))));

    let totals = session.counters().snapshot();
    assert_eq!(totals.r2l, 1400);
    assert_eq!(totals.l2r, 60);

    let calls = fs::read_to_string(calls).unwrap();
    let calls: Vec<&str> = calls.lines().collect();
    assert_eq!(
        calls,
        vec![
            "up shtun.12.10 100.64.12.10 100.64.12.11 10.0.0.0/16",
            "down shtun.12.10 100.64.12.10 100.64.12.11 10.0.0.0/16",
        ]
    );
    assert_eq!(
        net.calls(),
        vec![
            "create_interface shtun.12.10 100.64.12.10 peer 100.64.12.11 mtu 1500",
            "add_route 10.0.0.0/16 via 100.64.12.11",
            "destroy_interface shtun.12.10",
        ]
    );
    assert_eq!(
        session.phases(),
        &[
            SessionPhase::Idle,
            SessionPhase::NegotiatingAgent,
            SessionPhase::BringingUpDevices,
            SessionPhase::RunningUpHook,
            SessionPhase::Active,
            SessionPhase::RunningDownHook,
            SessionPhase::TearingDown,
            SessionPhase::Closed,
        ]
    );
}

#[tokio::test]
async fn shutdown_token_stops_active_session() {
    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let net = FakeNetwork::new();
    let (opener, _handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(None), channel, net.clone(), opener).unwrap();
    let shutdown = session.shutdown_token();

    let remote = async {
        shell.read_line().await.unwrap();
        shell.send(READY).await;
        // wait until the tunnel is configured, then ask for shutdown
        while net.count("add_route") == 0 {
            tokio::task::yield_now().await;
        }
        shutdown.cancel();
        let bye = shell.read_line().await;
        shell.close_output().await;
        bye
    };
    let (result, bye) = tokio::join!(session.run(), remote);

    assert_eq!(result.unwrap(), PumpExit::Cancelled);
    assert_eq!(bye.as_deref(), Some("\x03exit"));
    assert_eq!(net.count("destroy_interface"), 1);
    assert_eq!(session.phase(), SessionPhase::Closed);
}

#[tokio::test]
async fn session_runs_only_once() {
    let (channel, mut shell) = memory_channel(ChannelConfig::default());
    let (opener, _handle) = FakeOpener::new();
    let mut session = TunnelSession::new(config(None), channel, FakeNetwork::new(), opener).unwrap();

    let remote = async {
        shell.read_line().await.unwrap();
        shell.send("tunnel-agent: command not found\r\n").await;
        shell.close_output().await;
    };
    let (first, ()) = tokio::join!(session.run(), remote);
    assert!(first.is_err());
    assert!(matches!(session.run().await, Err(Error::Config { .. })));
}
