use dut_fleet_supervisor::machine_events::{MachineEvents, Status, MAX_CONSECUTIVE_HARD_REBOOTS};

#[test]
fn status_follows_the_documented_transition_dag() {
    let mut events = MachineEvents::new();

    // UNKNOWN before anything has happened.
    assert_eq!(events.status(0, 0), Status::Unknown);

    // ACTIVE once a run starts.
    events.start_benchmark();
    events.start_run();
    assert_eq!(events.status(0, 0), Status::Active);

    // Back to REBOOTING once the run ends and a soft reboot has been recorded.
    events.end_run();
    events.soft_reboot();
    assert_eq!(events.status(1, 0), Status::Rebooting);

    // ACTIVE again once the benchmark resumes.
    events.start_run();
    assert_eq!(events.status(1, 0), Status::Active);

    // SLEEPING once hard reboots hit the cap.
    events.end_run();
    assert_eq!(
        events.status(0, MAX_CONSECUTIVE_HARD_REBOOTS),
        Status::Sleeping
    );
}

#[test]
fn end_run_folds_run_counters_into_the_benchmark_totals() {
    let mut events = MachineEvents::new();
    events.start_run();
    events.iteration(10, 2.5);
    events.sdc();
    events.sdc();

    events.end_run();

    let summary = events.summary(0, 0);
    match summary {
        dut_fleet_supervisor::machine_events::Summary::Unknown => {}
        other => panic!("expected Unknown after end_run with no active reboot, got {other:?}"),
    }
}

#[test]
fn iteration_event_resets_reboot_counters_via_the_supervisor_contract() {
    // MachineEvents itself doesn't own the reboot counters (the Supervisor does),
    // but an #IT event must still be reflected as ACTIVE regardless of whatever
    // reboot counts are passed in, since run_start takes priority in status().
    let mut events = MachineEvents::new();
    events.start_run();
    assert_eq!(events.status(3, 4), Status::Active);
}
