use sensor_node::actuators::{servo_duty, ActuatorBank, ActuatorState, BUZZER_TONE_HZ};
use sensor_node::command::{ActuatorChange, CommandProcessor};
use sensor_node::sim::hardware::{Bench, PinChannel, PwmChannel, SharedBench, SimOutputPin, SimPwm};

const V1: &str = "/v1.6/devices/sensorverse-32";
const V2: &str = "/v2.0/devices/sensorverse-32";

fn bank(bench: &SharedBench) -> ActuatorBank {
    ActuatorBank::new(
        Box::new(SimPwm::new(bench.clone(), PwmChannel::Servo)),
        Box::new(SimOutputPin::new(bench.clone(), PinChannel::Relay)),
        Box::new(SimPwm::new(bench.clone(), PwmChannel::Buzzer)),
        [
            Box::new(SimPwm::new(bench.clone(), PwmChannel::Red)),
            Box::new(SimPwm::new(bench.clone(), PwmChannel::Green)),
            Box::new(SimPwm::new(bench.clone(), PwmChannel::Blue)),
        ],
    )
}

fn send(
    processor: &mut CommandProcessor,
    state: &mut ActuatorState,
    bank: &mut ActuatorBank,
    topic: &str,
    payload: &str,
) -> Option<ActuatorChange> {
    processor.on_message(topic, payload.as_bytes(), state, bank)
}

#[test]
fn test_servo_is_rounded_and_clamped() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();
    let topic = format!("{}/servo-angle/lv", V2);

    let cases = [
        ("-10", 0u8),
        ("45.4", 45),
        ("45.5", 46),
        ("200", 180),
        ("180", 180),
        ("0.2", 0),
    ];
    for (value, expected) in cases {
        let change = send(&mut processor, &mut state, &mut bank, &topic, value);
        assert_eq!(change, Some(ActuatorChange::Servo(expected)), "payload {}", value);
        assert_eq!(state.servo_angle, expected);
        assert_eq!(bench.borrow().outputs.servo_duty, servo_duty(expected));
    }
}

#[test]
fn test_rgb_channel_update_recomputes_all_duties() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();

    send(&mut processor, &mut state, &mut bank, &format!("{}/rgb-red/lv", V2), "300");
    assert_eq!(state.red, 255);
    assert_eq!((state.green, state.blue), (0, 0));
    assert_eq!(bench.borrow().outputs.rgb_duty, [1023, 0, 0]);

    send(&mut processor, &mut state, &mut bank, &format!("{}/rgb-blue/lv", V2), "-5");
    assert_eq!(state.blue, 0);

    let topic = format!("{}/rgb-green/lv", V2);
    let change = send(&mut processor, &mut state, &mut bank, &topic, "127.6");
    assert_eq!(
        change,
        Some(ActuatorChange::Rgb {
            red: 255,
            green: 128,
            blue: 0
        })
    );
    let duties = bench.borrow().outputs.rgb_duty;
    assert_eq!(duties[0], 1023);
    assert!(duties[1] > 500 && duties[1] < 520, "green duty {}", duties[1]);
    assert_eq!(duties[2], 0);
}

#[test]
fn test_relay_threshold_and_hardware_level() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();
    let topic = format!("{}/relay/lv", V1);

    send(&mut processor, &mut state, &mut bank, &topic, "0.5");
    assert!(state.relay);
    assert!(bench.borrow().outputs.relay);

    send(&mut processor, &mut state, &mut bank, &topic, "0.4999");
    assert!(!state.relay);
    assert!(!bench.borrow().outputs.relay);

    send(&mut processor, &mut state, &mut bank, &topic, "12");
    assert!(state.relay);
}

#[test]
fn test_buzzer_levels() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();
    let topic = format!("{}/buzzer/lv", V2);

    send(&mut processor, &mut state, &mut bank, &topic, "50");
    assert_eq!(state.buzzer, 50);
    assert_eq!(bench.borrow().outputs.buzzer_duty, 511);
    assert_eq!(bench.borrow().outputs.buzzer_frequency, BUZZER_TONE_HZ);

    send(&mut processor, &mut state, &mut bank, &topic, "250");
    assert_eq!(state.buzzer, 100);
    assert_eq!(bench.borrow().outputs.buzzer_duty, 1023);

    send(&mut processor, &mut state, &mut bank, &topic, "0");
    assert_eq!(state.buzzer, 0);
    assert_eq!(bench.borrow().outputs.buzzer_duty, 0);
}

#[test]
fn test_schema_variants_produce_identical_transitions() {
    let commands = [
        ("servo-angle", "33.3"),
        ("relay", "1"),
        ("buzzer", "75"),
        ("rgb-red", "10"),
        ("rgb-green", "20"),
        ("rgb-blue", "999"),
    ];

    let run = |prefix: &str| {
        let bench = Bench::shared();
        let mut bank = bank(&bench);
        let mut processor = CommandProcessor::new();
        let mut state = ActuatorState::default();
        let mut changes = Vec::new();
        for (name, value) in commands {
            let topic = format!("{}/{}/lv", prefix, name);
            changes.push(send(&mut processor, &mut state, &mut bank, &topic, value));
        }
        let outputs = bench.borrow().outputs.clone();
        (state, changes, outputs)
    };

    assert_eq!(run(V1), run(V2));
}

#[test]
fn test_malformed_payloads_leave_state_unchanged() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState {
        servo_angle: 12,
        relay: true,
        buzzer: 40,
        red: 1,
        green: 2,
        blue: 3,
    };
    let before = state;

    let servo = format!("{}/servo-angle/lv", V2);
    for payload in ["abc", "", "  ", "NaN", "inf", "1.2.3", "0x10"] {
        let change = send(&mut processor, &mut state, &mut bank, &servo, payload);
        assert!(change.is_none(), "payload {:?} was accepted", payload);
    }
    let red = format!("{}/rgb-red/lv", V2);
    let change = processor.on_message(&red, &[0xc3, 0x28], &mut state, &mut bank);
    assert!(change.is_none());

    assert_eq!(state, before);
    assert_eq!(processor.stats().rejected, 8);
    assert_eq!(processor.stats().applied, 0);
    assert_eq!(bench.borrow().outputs.servo_duty, 0);
}

#[test]
fn test_unknown_topics_are_ignored() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();

    let laser = format!("{}/laser/lv", V2);
    assert!(send(&mut processor, &mut state, &mut bank, &laser, "1").is_none());
    assert!(send(&mut processor, &mut state, &mut bank, &format!("{}/relay", V2), "1").is_none());
    assert!(send(&mut processor, &mut state, &mut bank, "relay/lv", "1").is_none());

    assert_eq!(state, ActuatorState::default());
    assert_eq!(processor.stats().ignored, 3);
    assert_eq!(processor.stats().received, 3);
}

#[test]
fn test_hardware_error_still_updates_state() {
    let bench = Bench::shared();
    let mut bank = bank(&bench);
    let mut processor = CommandProcessor::new();
    let mut state = ActuatorState::default();
    bench.borrow_mut().faults.pwm_error = true;

    let topic = format!("{}/servo-angle/lv", V2);
    let change = send(&mut processor, &mut state, &mut bank, &topic, "10");
    assert_eq!(change, Some(ActuatorChange::Servo(10)));
    assert_eq!(state.servo_angle, 10);
    assert_eq!(processor.stats().hardware_errors, 1);
    assert_eq!(processor.last_change(), Some(ActuatorChange::Servo(10)));
}
