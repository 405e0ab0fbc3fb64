mod support;

use core::time::Duration;

use pulse_core::controller::{
    CommStage, OutputConfig, PreviewStatus, PulseRequest, RunController, RunError, RunModeKind,
    RunState,
};
use pulse_core::registers::{ClockSource, DioChannel, Register, RegisterWrite};
use pulse_core::telemetry::RunEventKind;
use pulse_core::timing::RequestError;
use support::{Logged, MockError, MockSession, MockTimer, RecordingPreview};

fn controller() -> RunController<MockTimer> {
    RunController::new(OutputConfig::default(), MockTimer::new()).expect("default config is valid")
}

#[test]
fn seven_pulses_at_ten_khz_hold_for_the_whole_train() {
    let mut controller = controller();
    let mut session = MockSession::new().with_counter(7);
    let request = PulseRequest::new(10_000, 10.0, 7);

    let report = controller.run(&mut session, &request).expect("run succeeds");

    assert_eq!(report.mode, RunModeKind::FiniteTrain);
    assert_eq!(report.hold, Duration::from_micros(700));
    assert!((report.hold.as_secs_f64() - 0.0007).abs() < 1e-12);
    assert_eq!(report.counter, Some(7));
    assert_eq!(report.start_writes, 13);
    assert_eq!(report.teardown_writes, 3);

    let clock = report.clock.expect("solved clock");
    assert_eq!(clock.roll_value_ticks, 1_000);
    assert_eq!(clock.on_ticks, 100);

    assert_eq!(controller.timer().holds.as_slice(), &[Duration::from_micros(700)]);
    assert_eq!(controller.state(), RunState::Idle);
    assert!(!session.energized());
}

#[test]
fn start_plan_precedes_counter_read_and_teardown() {
    let mut controller = controller();
    let mut session = MockSession::new();

    controller
        .run(&mut session, &PulseRequest::new(10_000, 10.0, 7))
        .expect("run succeeds");

    let pwm = DioChannel::new(0);
    let counter = DioChannel::new(18);
    let read_at = session
        .log
        .iter()
        .position(|entry| *entry == Logged::Read(Register::ReadA(counter)))
        .expect("counter read");
    assert_eq!(read_at, 13, "counter is read after the full start plan");

    let config_c = session
        .register_writes()
        .find(|write| write.register == Register::ConfigC(pwm))
        .expect("pulse count written");
    assert_eq!(config_c.value, 7);

    let teardown: Vec<_> = session.log[read_at + 1..].to_vec();
    assert_eq!(teardown.len(), 3);
    for entry in teardown {
        match entry {
            Logged::Register(write) => assert_eq!(write.value, 0),
            other => panic!("unexpected teardown entry: {other:?}"),
        }
    }
}

#[test]
fn full_duty_train_stays_a_pulse_train() {
    let mut controller = controller();
    let mut session = MockSession::new();

    let report = controller
        .run(&mut session, &PulseRequest::new(10_000, 100.0, 3))
        .expect("run succeeds");

    assert_eq!(report.mode, RunModeKind::FiniteTrain);
    let clock = report.clock.expect("solved clock");
    assert_eq!(clock.on_ticks, clock.roll_value_ticks);
}

#[test]
fn partial_start_plan_failure_still_tears_down() {
    let mut controller = controller();
    // Clock is re-enabled and the output feature armed before the link drops.
    let mut session = MockSession::new().failing_from(10);

    let error = controller
        .run(&mut session, &PulseRequest::new(10_000, 10.0, 7))
        .expect_err("link drops mid-plan");

    match error {
        RunError::Comm {
            stage,
            error,
            teardown,
        } => {
            assert_eq!(stage, CommStage::StartPlan);
            assert_eq!(error, MockError::LinkDown);
            assert_eq!(teardown, Some(MockError::LinkDown));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(controller.timer().holds.is_empty());
    assert_eq!(controller.state(), RunState::Failed);
    assert!(
        controller
            .telemetry()
            .contains(|event| *event == RunEventKind::CommFailed(CommStage::StartPlan))
    );
}

#[test]
fn unrepresentable_frequency_never_touches_the_device() {
    let config = OutputConfig {
        clock_divisor: 1,
        ..OutputConfig::default()
    };
    let mut controller = RunController::new(config, MockTimer::new()).expect("valid config");
    let mut session = MockSession::new();

    let error = controller
        .run(&mut session, &PulseRequest::new(90_000_000, 50.0, 5))
        .expect_err("zero-tick period");

    match error {
        RunError::UnrepresentableTiming(detail) => {
            assert_eq!(detail.requested_frequency_hz, 90_000_000);
            assert!((detail.max_frequency_hz - 80_000_000.0).abs() < f64::EPSILON);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(session.log.is_empty());
    assert_eq!(controller.state(), RunState::Failed);
}

#[test]
fn invalid_duty_cycle_fails_before_configuration() {
    let mut controller = controller();
    let mut session = MockSession::new();

    let error = controller
        .run(&mut session, &PulseRequest::new(10_000, 120.0, 5))
        .expect_err("duty out of range");

    assert_eq!(
        error,
        RunError::InvalidRequest(RequestError::DutyCycleOutOfRange)
    );
    assert!(session.log.is_empty());
    assert!(controller.timer().holds.is_empty());
}

#[test]
fn preview_is_rendered_before_any_write() {
    let mut controller = RunController::new(OutputConfig::default(), MockTimer::new())
        .expect("valid config")
        .with_preview(RecordingPreview::new());
    let mut session = MockSession::new();

    let report = controller
        .run(&mut session, &PulseRequest::new(10_000, 10.0, 7))
        .expect("run succeeds");
    assert_eq!(report.preview, PreviewStatus::Shown);

    let events: Vec<RunEventKind> = controller
        .telemetry()
        .oldest_first()
        .map(|record| record.event)
        .collect();
    let shown = events
        .iter()
        .position(|event| *event == RunEventKind::PreviewShown)
        .expect("preview shown");
    let issued = events
        .iter()
        .position(|event| matches!(event, RunEventKind::PlanIssued { .. }))
        .expect("plan issued");
    assert!(shown < issued);
}

#[test]
fn controller_can_run_again_after_a_failure() {
    let mut controller = controller();

    let mut broken = MockSession::new().failing_from(0);
    controller
        .run(&mut broken, &PulseRequest::new(10_000, 10.0, 7))
        .expect_err("link is down");
    assert_eq!(controller.state(), RunState::Failed);

    let mut healthy = MockSession::new();
    controller
        .run(&mut healthy, &PulseRequest::new(10_000, 10.0, 7))
        .expect("second run succeeds");
    assert_eq!(controller.state(), RunState::Idle);
    assert_eq!(controller.telemetry().oldest_first().next().map(|r| r.id), Some(0));
}

#[test]
fn teardown_continues_past_a_rejected_write() {
    let mut controller = controller();
    let clock_off = RegisterWrite::new(Register::ClockEnable(ClockSource::new(0)), 0);
    let mut session = MockSession::new().rejecting_from(13, clock_off);

    let error = controller
        .run(&mut session, &PulseRequest::new(10_000, 10.0, 7))
        .expect_err("clock disable is rejected");

    assert_eq!(error, RunError::Teardown(MockError::LinkDown));
    let read_at = session
        .log
        .iter()
        .position(|entry| matches!(entry, Logged::Read(_)))
        .expect("counter read");
    let teardown: Vec<Logged> = session.log[read_at + 1..].to_vec();
    assert_eq!(
        teardown,
        vec![
            Logged::Register(RegisterWrite::new(
                Register::FeatureEnable(DioChannel::new(0)),
                0
            )),
            Logged::Register(RegisterWrite::new(
                Register::FeatureEnable(DioChannel::new(18)),
                0
            )),
        ],
        "the writes after the rejected one are still sent"
    );
    assert!(!session.energized());
    assert_eq!(controller.state(), RunState::Failed);
    assert!(
        controller
            .telemetry()
            .contains(|event| *event == RunEventKind::TeardownFailed)
    );
}
