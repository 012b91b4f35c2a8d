use ges::{
    config::WorldConfig,
    devices::{LeakDetectorConfig, ValveConfig, ValveController, ValvePosition, Window},
    World,
};
use ges_core::{EventType, Packet, PacketBody, SimConfig};

fn config(internal_leaks: bool) -> WorldConfig {
    WorldConfig {
        sim: SimConfig {
            seed: Some(1234),
            ..Default::default()
        },
        valve: ValveConfig {
            reopen_delay: None,
            internal_leaks,
            ..Default::default()
        },
        leak_detector: LeakDetectorConfig {
            leak_timeframe: Window::new(60.0, 600.0),
            ..Default::default()
        },
        cloud_endpoint: None,
    }
}

fn events_from(packets: &[Packet], sender: &str) -> Vec<EventType> {
    packets
        .iter()
        .filter(|packet| packet.sender == sender)
        .filter_map(Packet::event_kind)
        .collect()
}

/// Who a valve's `LeakDetected` events name as the probe that got wet.
fn leak_sources(packets: &[Packet], valve: &str) -> Vec<String> {
    packets
        .iter()
        .filter(|packet| packet.sender == valve)
        .filter_map(|packet| match &packet.body {
            PacketBody::Event {
                kind: EventType::LeakDetected,
                data,
            } => data["data"]["from"].as_str().map(str::to_string),
            _ => None,
        })
        .collect()
}

#[test]
#[ntest::timeout(10000)]
fn paired_detector_closes_the_valve() -> anyhow::Result<()> {
    let mut world = World::new(config(false))?;
    let sink = world.wan().subscribe();
    let valve = world.spawn_valve_controllers(1)?.remove(0);
    let detector = world.spawn_leak_detectors(1)?.remove(0);
    world.pair_leak_detector(valve.mac_address(), detector.serial_number())?;

    // Past the end of the detector's leak window plus time for the motor.
    world.run_for(600.0 + 60.0)?;

    let packets = sink.drain();
    assert!(events_from(&packets, detector.instance_name()).contains(&EventType::LeakDetected));
    let sources = leak_sources(&packets, valve.instance_name());
    assert!(!sources.is_empty());
    assert!(sources.iter().all(|source| source == detector.instance_name()));

    let valve_events = events_from(&packets, valve.instance_name());
    assert!(valve_events.contains(&EventType::ValveClosing));
    assert!(
        valve_events.contains(&EventType::ValveClosed) || valve_events.contains(&EventType::ValveStuck)
    );
    let position = ValveController::position(&valve)?;
    assert!(matches!(position, ValvePosition::Closed | ValvePosition::Stuck));
    assert!(world.monitor().received() > 0);
    Ok(())
}

#[test]
#[ntest::timeout(10000)]
fn unpaired_valve_ignores_the_detector() -> anyhow::Result<()> {
    let mut world = World::new(config(false))?;
    let sink = world.wan().subscribe();
    let valve = world.spawn_valve_controllers(1)?.remove(0);
    let detector = world.spawn_leak_detectors(1)?.remove(0);

    world.run_for(1200.0)?;

    let packets = sink.drain();
    assert!(events_from(&packets, detector.instance_name()).contains(&EventType::LeakDetected));
    assert!(!events_from(&packets, valve.instance_name()).contains(&EventType::ValveClosing));
    assert_eq!(ValveController::position(&valve)?, ValvePosition::Opened);
    Ok(())
}

#[test]
fn same_seed_same_history() -> anyhow::Result<()> {
    let history = || -> anyhow::Result<Vec<(String, f64)>> {
        let mut world = World::new(config(true))?;
        let sink = world.wan().subscribe();
        world.spawn_valve_controllers(2)?;
        world.spawn_leak_detectors(2)?;
        world.run_for(4000.0)?;
        Ok(sink
            .drain()
            .iter()
            .filter_map(|packet| {
                packet
                    .event_kind()
                    .map(|kind| (kind.to_string(), packet.simulation_time.as_secs()))
            })
            .collect())
    };
    let first = history()?;
    assert!(!first.is_empty());
    assert_eq!(first, history()?);
    Ok(())
}
