use anyhow::Result;
use capture::publisher::{CaptureSource, PublishedFrame};
use mailbox::{FrameShape, Mailbox, Namespace, ReadStatus};
use processing::{ModuleError, ModuleManager, VideoInput};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tuners::{Tuner, TunerValue};

/// A 10 Hz publisher writes an 8x8x1 single-byte payload on "forward" with
/// acquisition time 1000; an aggregator declaring that input receives
/// exactly one fresh entry carrying the identical payload and time.
#[test]
fn published_frame_reaches_the_aggregator_intact() {
    let dir = tempdir().unwrap();
    let ns = Namespace::at(dir.path());

    let shape = FrameShape::new(&[8, 8, 1], 1).unwrap();
    let payload: Vec<u8> = (0..64u8).collect();

    let mut source = CaptureSource::new(ns.clone());
    let stop = source.stop_flag();
    let generator_payload = payload.clone();
    source.register_capture("bench", move |pacer| {
        pacer.rate(10.0).map(move |_tick| {
            Ok(PublishedFrame {
                channel: "forward".to_string(),
                acquired_at_ms: 1000,
                shape,
                data: generator_payload.clone(),
            })
        })
    });
    let publisher = thread::spawn(move || source.run());

    let mut manager = ModuleManager::new(
        "bench",
        ns,
        vec![VideoInput::new("forward")],
        vec![],
    )
    .unwrap();
    let mut session = manager.session().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let message = loop {
        assert!(Instant::now() < deadline, "no frame reached the aggregator");
        let mut messages = session.read_messages().unwrap();
        match messages.len() {
            0 => thread::sleep(Duration::from_millis(5)),
            1 => break messages.pop().unwrap(),
            n => panic!("expected at most one entry per channel, got {n}"),
        }
    };

    assert_eq!(message.channel, "forward");
    assert_eq!(message.status, ReadStatus::Success);
    assert_eq!(message.shape, shape);
    assert_eq!(message.acquired_at_ms, 1000);
    assert_eq!(message.data, payload);

    stop.store(true, Ordering::Relaxed);
    drop(session);
    publisher.join().unwrap().unwrap();
}

/// An externally written control value lands in the module on its next
/// read_messages-driven poll.
#[test]
fn external_control_update_lands_on_next_poll() {
    let dir = tempdir().unwrap();
    let ns = Namespace::at(dir.path());

    let mut manager = ModuleManager::new(
        "tuned",
        ns.clone(),
        vec![],
        vec![Tuner::int("gain", 5, 0, 100).unwrap()],
    )
    .unwrap();
    let mut session = manager.session().unwrap();
    assert_eq!(session.tuner_value("gain"), Some(TunerValue::Int(5)));

    // The remote side: open the module's control channel and push 42.
    let mut remote = Mailbox::try_open(&ns, "module_tuned_tune%0%int_gain").unwrap();
    let mut tuner = Tuner::int("gain", 5, 0, 100).unwrap();
    assert!(tuner.set_value(TunerValue::Int(42)));
    let bytes = tuner.serialize();
    remote
        .write(0, FrameShape::bytes(bytes.len()).unwrap(), &bytes)
        .unwrap();

    session.read_messages().unwrap();
    assert_eq!(session.tuner_value("gain"), Some(TunerValue::Int(42)));
}

/// Killing the publisher mid-run surfaces as PeerGone on the aggregator's
/// next read, for every channel the publisher owned.
#[test]
fn publisher_death_is_fatal_to_the_session() -> Result<()> {
    let dir = tempdir().unwrap();
    let ns = Namespace::at(dir.path());

    let mut producer = Mailbox::create(&ns, "forward", 16)?;
    producer.write(1, FrameShape::bytes(4)?, &[1, 2, 3, 4])?;

    let mut manager =
        ModuleManager::new("bench", ns, vec![VideoInput::new("forward")], vec![])?;
    let mut session = manager.session()?;
    assert_eq!(session.read_messages()?.len(), 1);

    // Simulated crash: the liveness lock drops, the region stays behind.
    producer.abandon();

    match session.read_messages() {
        Err(ModuleError::PeerGone(channel)) => assert_eq!(channel, "forward"),
        other => panic!("expected PeerGone, got {other:?}"),
    }
    Ok(())
}
