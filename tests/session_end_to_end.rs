//! Client and server talking over loopback TCP, backed by the simulated scope.

use scope_link::acquisition::AcquisitionSettings;
use scope_link::actors::ScopeActor;
use scope_link::data::RunLog;
use scope_link::error::ScopeResult;
use scope_link::hardware::{MockOperation, MockScope, TriggerBehavior};
use scope_link::instrument::{Channel, TriggerMode};
use scope_link::network::{
    ClientSession, DispatchServer, SessionEvent, SessionSummary, DEFAULT_MAX_FRAME_BYTES,
};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

struct Harness {
    session: ClientSession,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    server: JoinHandle<ScopeResult<SessionSummary>>,
    scope_view: MockScope,
    log: RunLog,
    _dir: TempDir,
}

impl Harness {
    async fn start(scope: MockScope) -> Self {
        let scope_view = scope.clone();
        let settings = AcquisitionSettings {
            trigger_timeout: Duration::from_millis(50),
            restore_auto_on_timeout: false,
        };
        let (handle, _actor) = ScopeActor::spawn(scope, settings, 8);
        let server = DispatchServer::bind("127.0.0.1:0", handle, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let server = tokio::spawn(server.serve());

        let dir = TempDir::new().unwrap();
        let log = RunLog::create(dir.path()).await.unwrap();
        let (session, events) = ClientSession::connect(addr, log.clone(), DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        Self {
            session,
            events,
            server,
            scope_view,
            log,
            _dir: dir,
        }
    }

    async fn next_event(&mut self) -> SessionEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("no response within 5 s")
            .expect("event stream ended")
    }

    /// Send `command` and collect `count` events.
    async fn exchange(&mut self, command: &str, count: usize) -> Vec<SessionEvent> {
        self.session.send_command(command).await.unwrap();
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            events.push(self.next_event().await);
        }
        events
    }

    async fn finish(mut self) -> SessionSummary {
        self.session.shutdown().await.unwrap();
        self.session.closed().await;
        assert_eq!(self.next_event().await, SessionEvent::Closed(None));
        self.server.await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn vertical_scale_reaches_the_mirror() {
    let mut h = Harness::start(MockScope::new()).await;

    let events = h.exchange("change vertical scale:1:2.5", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][C1 Vertical Scale]:2.5".into())]);
    assert_eq!(h.session.config().c1_vertical_scale, 2.5);

    h.finish().await;
}

#[tokio::test]
async fn mirror_follows_the_clamped_value() {
    let mut h = Harness::start(MockScope::new()).await;

    let events = h.exchange("change vertical scale:2:40", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][C2 Vertical Scale]:10".into())]);
    assert_eq!(h.session.config().c2_vertical_scale, 10.0);

    let events = h.exchange("change sampling rate:2000400", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][Sampling Rate]:2000000".into())]);
    assert_eq!(h.session.config().sampling_rate, 2_000_000);

    h.finish().await;
}

#[tokio::test]
async fn bad_argument_is_answered_and_session_continues() {
    let mut h = Harness::start(MockScope::new()).await;

    let events = h.exchange("change time scale:abc", 1).await;
    assert!(matches!(&events[0], SessionEvent::Error(_)));
    assert_eq!(h.session.config().time_scale, 1.0);

    let events = h.exchange("change time scale:0.002", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][Time Scale]:0.002".into())]);
    assert_eq!(h.session.config().time_scale, 0.002);

    let summary = h.finish().await;
    assert_eq!(summary.commands, 2);
    assert_eq!(summary.errors, 1);
}

#[tokio::test]
async fn unknown_command_never_reaches_the_instrument() {
    let mut h = Harness::start(MockScope::new()).await;

    let events = h.exchange("make coffee", 1).await;
    assert_eq!(events, vec![SessionEvent::Error("Invalid Command".into())]);
    assert_eq!(h.scope_view.call_count().await, 0);

    h.finish().await;
}

#[tokio::test]
async fn instrument_fault_leaves_mirror_unchanged() {
    let scope = MockScope::new();
    scope.fail_on(MockOperation::TriggerLevel).await;
    let mut h = Harness::start(scope).await;

    let events = h.exchange("set trigger level:0.4", 1).await;
    assert_eq!(events, vec![SessionEvent::Error("Could not change trigger level".into())]);
    assert_eq!(h.session.config().trigger_level, 1.0);

    let events = h.exchange("set trigger source:2", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][Trigger Source]:C2".into())]);
    assert_eq!(h.session.config().trigger_source, Channel::C2);

    h.finish().await;
}

#[tokio::test]
async fn triggered_read_delivers_both_channels() {
    let mut h = Harness::start(MockScope::new()).await;
    h.exchange("change samples per read:16", 1).await;

    let events = h.exchange("read trigger", 2).await;
    match events.as_slice() {
        [SessionEvent::Data(ch1), SessionEvent::Data(ch2)] => {
            assert_eq!((ch1.channel, ch1.samples.len()), (Channel::C1, 16));
            assert_eq!((ch2.channel, ch2.samples.len()), (Channel::C2, 16));
        }
        other => panic!("unexpected events: {:?}", other),
    }

    let mirror = h.session.mirror();
    assert_eq!(mirror.config.trigger_mode, TriggerMode::Auto);
    assert_eq!(mirror.ch2_data.samples.len(), 16);
    assert_eq!(h.scope_view.acquisitions().await, 1);

    h.finish().await;
}

#[tokio::test]
async fn triggered_read_timeout_leaves_single_mode() {
    let mut h = Harness::start(MockScope::new().with_trigger(TriggerBehavior::Never)).await;

    let events = h.exchange("read trigger", 4).await;
    assert_eq!(events[0], SessionEvent::Info("[INFO][Trigger Mode]:single".into()));
    assert!(matches!(&events[1], SessionEvent::Info(text) if text.contains("timed out")));
    assert!(matches!(&events[2], SessionEvent::Data(c) if c.channel == Channel::C1 && c.is_empty()));
    assert!(matches!(&events[3], SessionEvent::Data(c) if c.channel == Channel::C2 && c.is_empty()));

    assert_eq!(h.session.config().trigger_mode, TriggerMode::Single);

    h.finish().await;
}

#[tokio::test]
async fn measurements_are_appended_to_the_run_files() {
    let mut h = Harness::start(MockScope::new()).await;
    h.exchange("change samples per read:4", 1).await;

    for _ in 0..2 {
        let events = h.exchange("read once:1", 1).await;
        assert!(matches!(&events[0], SessionEvent::Data(c) if c.samples.len() == 4));
    }
    h.exchange("read once:2", 1).await;

    let log = h.log.clone();
    // Keep the run directory alive past `finish()`, which drops the harness.
    let _dir = std::mem::replace(&mut h._dir, TempDir::new().unwrap());
    h.finish().await;
    log.sync().await;

    let c1 = std::fs::read_to_string(log.channel_path(Channel::C1)).unwrap();
    let lines: Vec<&str> = c1.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Channel 1 - "));
    assert_eq!(lines[1].split(',').count(), 4);
    assert_eq!(lines[1], lines[2]);

    let c2 = std::fs::read_to_string(log.channel_path(Channel::C2)).unwrap();
    assert_eq!(c2.lines().count(), 2);

    let audit = std::fs::read_to_string(log.audit_path()).unwrap();
    let commands: Vec<&str> = audit
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once("]: ").map(|(_, cmd)| cmd))
        .collect();
    assert_eq!(
        commands,
        vec!["change samples per read:4", "read once:1", "read once:1", "read once:2"]
    );
}

#[tokio::test]
async fn exit_and_auto_setup_are_acknowledged() {
    let mut h = Harness::start(MockScope::new()).await;

    let events = h.exchange("auto setup", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO]:Auto Setup Done".into())]);

    let events = h.exchange("exit", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO]:Exit done".into())]);
    assert!(h.scope_view.is_shut_down().await);

    let events = h.exchange("change trigger mode:normal", 1).await;
    assert_eq!(events, vec![SessionEvent::Info("[INFO][Trigger Mode]:normal".into())]);

    h.finish().await;
}
