use ges_core::{
    logging::packet_received_event,
    sim::{ExitStatus, Sim},
    tunnel::{Tunnel, TunnelError, TunnelKind},
    Packet, PacketBody, RadioMessage, SimTime, Wake,
};
use std::{cell::RefCell, rc::Rc};
use tracing_test::traced_test;

fn radio(sender: &str, at: SimTime) -> Packet {
    Packet::new(sender, at, PacketBody::Radio(RadioMessage::Heartbeat))
}

#[test]
fn fan_out_reaches_every_subscriber_once() {
    const SUBSCRIBERS: usize = 8;
    const PACKETS: usize = 5;

    let mut sim = Sim::new();
    let handle = sim.handle();
    let rf = Tunnel::new(TunnelKind::Rf, &handle);
    let counts = Rc::new(RefCell::new(vec![0usize; SUBSCRIBERS]));

    for index in 0..SUBSCRIBERS {
        let receiver = rf.subscribe();
        let counts = counts.clone();
        handle
            .spawn(format!("listener-{index}"), move |process| async move {
                while let Wake::Ready(_) = process.receive(&receiver).await {
                    counts.borrow_mut()[index] += 1;
                }
                Ok(())
            })
            .unwrap();
    }

    let sender = rf.clone();
    let deliveries = Rc::new(RefCell::new(Vec::new()));
    let record = deliveries.clone();
    handle
        .spawn("beacon", move |process| async move {
            for _ in 0..PACKETS {
                let delivery = sender.send(radio("beacon", process.now()))?;
                record.borrow_mut().push(delivery.subscribers);
                process.timeout(60.0)?.await;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(sim.run(None).unwrap(), ExitStatus::Exhausted);
    assert_eq!(*deliveries.borrow(), vec![SUBSCRIBERS; PACKETS]);
    assert_eq!(*counts.borrow(), vec![PACKETS; SUBSCRIBERS]);
}

#[test]
fn same_time_events_keep_spawn_order() {
    let mut sim = Sim::new();
    let handle = sim.handle();
    let order = Rc::new(RefCell::new(Vec::new()));
    for index in 0..100u32 {
        let order = order.clone();
        handle
            .spawn(format!("p{index}"), move |process| async move {
                process.timeout(10.0)?.await;
                order.borrow_mut().push(index);
                Ok(())
            })
            .unwrap();
    }
    sim.run(None).unwrap();
    assert_eq!(*order.borrow(), (0..100).collect::<Vec<_>>());
    assert_eq!(sim.now(), SimTime::from_secs(10.0));
}

#[test]
fn an_empty_tunnel_reports_no_subscribers() {
    let sim = Sim::new();
    let wan = Tunnel::new(TunnelKind::Wan, &sim.handle());
    assert_eq!(
        wan.send(radio("nobody", SimTime::ZERO)),
        Err(TunnelError::NoSubscribers(TunnelKind::Wan))
    );
}

#[test]
#[traced_test]
fn late_packets_are_flagged() {
    let mut sim = Sim::new();
    let handle = sim.handle();
    let rf = Tunnel::new(TunnelKind::Rf, &handle);
    let receiver = rf.subscribe();
    handle
        .spawn("slow reader", move |process| async move {
            process.timeout(30.0)?.await;
            if let Wake::Ready(packet) = process.receive(&receiver).await {
                packet_received_event("slow reader", &packet, process.now());
            }
            Ok(())
        })
        .unwrap();
    rf.send(radio("early bird", SimTime::ZERO)).unwrap();
    sim.run(None).unwrap();
    assert!(logs_contain("received packet LATE"));
}
