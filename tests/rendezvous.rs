//! Full probe runs on real renderer and controller threads.

use std::thread;
use std::time::Duration;

use axiom_lockprobe::{run_probe, Harness, ProbeConfig, ProbeError, TestState};

const CYCLE: [TestState; 5] = [
    TestState::NotStarted,
    TestState::TryAcquire,
    TestState::WaitAcquireFail,
    TestState::WaitAcquire,
    TestState::Release,
];

#[test]
fn single_run_visits_every_state_in_order() {
    let report = run_probe(ProbeConfig::default()).unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.transitions, TestState::ALL.to_vec());
    assert_eq!(report.cycles_started, 1);
    assert_eq!(report.cycles_completed, 1);

    let elapsed = report.elapsed.expect("controller measured the run");
    assert!(elapsed > Duration::from_millis(100), "run took {elapsed:?}");
}

#[test]
fn repeating_run_loops_back_to_not_started() {
    let config = ProbeConfig::default()
        .with_wait_fail_timeout(Duration::from_millis(20))
        .with_cycles(3);
    let report = run_probe(config).unwrap();

    assert!(report.is_success(), "{report}");
    assert_eq!(report.cycles_completed, 3);

    let mut expected = vec![TestState::Loading];
    for _ in 0..3 {
        expected.extend(CYCLE);
    }
    expected.push(TestState::Done);
    assert_eq!(report.transitions, expected);
}

#[test]
fn back_to_back_renderer_still_passes() {
    let config = ProbeConfig::default()
        .with_wait_fail_timeout(Duration::from_millis(20))
        .with_render_quantum(Duration::ZERO);
    let report = run_probe(config).unwrap();
    assert!(report.is_success(), "{report}");
}

#[test]
fn terminate_ends_an_active_run() {
    let harness = Harness::new(ProbeConfig::default()).unwrap();
    let run = harness.begin().unwrap().expect("no run was active");

    thread::sleep(Duration::from_millis(30));
    assert!(harness.terminate());
    assert!(!harness.is_active());

    let report = run.join();
    assert!(matches!(report.outcome, Err(ProbeError::Terminated { .. })), "{report}");
    assert_eq!(report.transitions.last(), Some(&TestState::Done));
}

#[test]
fn begin_is_a_no_op_while_running() {
    let harness = Harness::new(ProbeConfig::default()).unwrap();
    let run = harness.begin().unwrap().expect("first begin starts a run");
    assert!(harness.is_active());
    assert!(harness.begin().unwrap().is_none());

    let report = run.join();
    assert!(report.is_success(), "{report}");
    assert!(!harness.is_active());

    // a finished run does not block the next one
    let again = harness.begin().unwrap().expect("second run starts");
    assert!(again.join().is_success());
}

#[test]
fn concurrent_runs_do_not_interfere() {
    let config = ProbeConfig::default().with_wait_fail_timeout(Duration::from_millis(20));
    let runs: Vec<_> = (0..2)
        .map(|_| {
            let config = config.clone();
            thread::spawn(move || run_probe(config).unwrap())
        })
        .collect();

    for run in runs {
        let report = run.join().unwrap();
        assert!(report.is_success(), "{report}");
        assert_eq!(report.transitions, TestState::ALL.to_vec());
    }
}
