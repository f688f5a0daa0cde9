use dut_fleet_supervisor::event::{Event, EventParser};

#[test]
fn iteration_datagram_parses_to_the_expected_fields() {
    let datagram = b"\x00#IT 42 KerTime:0.010 AccTime:1.000\n";
    let event = EventParser::parse(datagram);
    assert_eq!(
        event,
        Event::Iteration {
            iterations: 42,
            kernel_time: 0.010,
            accumulated_time: 1.000,
        }
    );
}

#[test]
fn unknown_prefix_datagram_is_classified_without_panicking() {
    let datagram = b"\x00#FOO bar";
    match EventParser::parse(datagram) {
        Event::Unknown { prefix } => assert_eq!(prefix, "#FOO bar"),
        other => panic!("expected Unknown, got {other:?}"),
    }
}
