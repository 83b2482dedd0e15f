mod common;

use std::time::Duration;

use bytemuck::bytes_of;
use common::*;
use dcp::Error;
use iomfb::{records::GetColorRemapModeReq, ContextId, Message, IOMFB_ENDPOINT};

#[test]
fn handshake_announces_shared_memory() {
    let mut config = test_config();
    config.asc_dram_mask = 0xf00_0000_0000;
    let fw = Firmware::new(config);
    fw.dcp.start();
    let sent = fw.transport.sent();
    assert_eq!(
        sent[0],
        u64::from(Message::set_shmem(SHMEM_DVA | 0xf00_0000_0000))
    );
}

#[test]
fn boot_runs_nested_calls_then_post_start_chain() {
    let mut fw = Firmware::new(test_config());
    fw.boot(false, Some(timing_elements(&[(1920, 1080, 60)])));

    assert_eq!(
        fw.call_names(),
        [
            "A401", "A357", "A443", "A029", "A463", "A000", "A460", "A426", "A447", "A454",
            "A411"
        ]
    );
    // everything made while start_signal was outstanding nests on the callback context
    assert_eq!(fw.calls[0].context, ContextId::Command);
    assert!(fw.calls[1..7]
        .iter()
        .all(|c| c.context == ContextId::Callback));
    assert!(fw.calls[7..].iter().all(|c| c.context == ContextId::Command));
    // flush_supports_power(true)
    assert_eq!(fw.calls[4].input, 1u32.to_le_bytes());
    assert_eq!(
        fw.calls[7].input,
        bytes_of(&GetColorRemapModeReq::new(6))
    );
    // video power savings off
    assert_eq!(fw.calls[8].input, 0u32.to_le_bytes());

    assert!(fw.dcp.wait_ready(Duration::ZERO).is_ok());
    assert!(fw.dcp.is_active());
    assert!(!fw.dcp.is_main_display());
    assert!(fw.dcp.connected());
    assert_eq!(fw.client.take(), [Event::Hotplug(true)]);
}

#[test]
fn modes_are_reported_best_first() {
    let fw = booted();
    let modes = fw.dcp.modes();
    assert_eq!(modes.len(), 2);
    assert_eq!(modes[0].timing.hdisplay, 1920);
    assert!(modes[0].preferred);
    assert!(!modes[1].preferred);
    assert!(fw.dcp.mode_valid(&modes[1].timing));
}

#[test]
fn main_display_without_modes_is_disconnected() {
    let mut fw = Firmware::new(test_config());
    fw.boot(true, None);
    fw.dcp.wait_ready(Duration::ZERO).unwrap();
    assert!(fw.dcp.is_main_display());
    assert!(!fw.dcp.connected());
    assert_eq!(fw.client.take(), [Event::Hotplug(false)]);
}

#[test]
fn ready_future_resolves_after_boot() {
    let fw = booted();
    assert!(futures::executor::block_on(fw.dcp.ready()).is_ok());
}

#[test]
fn not_ready_before_boot() {
    let fw = Firmware::new(test_config());
    assert!(matches!(
        fw.dcp.wait_ready(Duration::from_millis(10)),
        Err(Error::NotReady)
    ));
}

#[test]
fn boot_stalls_without_start_signal_ack() {
    let mut fw = Firmware::new(test_config());
    fw.hold("A401");
    fw.boot(false, None);
    assert!(!fw.dcp.is_active());
    assert_eq!(fw.call_names(), ["A401", "A357", "A443", "A029", "A463", "A000", "A460"]);
    fw.release("A401");
    assert!(fw.dcp.is_active());
}

macro_rules! boot_stalls_on {
    ($($tag:ident),* $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<boot_stalls_without_ $tag:lower _ack>]() {
                    let name = stringify!($tag);
                    let mut fw = Firmware::new(test_config());
                    fw.hold(name);
                    fw.boot(false, Some(timing_elements(&[(1920, 1080, 60)])));
                    assert_eq!(fw.call_names().last().map(String::as_str), Some(name));
                    assert!(!fw.dcp.is_active());
                    assert!(matches!(
                        fw.dcp.wait_ready(Duration::from_millis(10)),
                        Err(Error::NotReady)
                    ));
                    assert!(fw.client.take().is_empty());

                    fw.release(name);
                    assert!(fw.dcp.is_active());
                    assert_eq!(fw.client.take(), [Event::Hotplug(true)]);
                }
            )*
        }
    };
}

boot_stalls_on!(A357, A443, A029, A463, A000, A460, A426, A447, A454, A411);

#[test]
fn crash_releases_waiters() {
    let mut fw = Firmware::new(test_config());
    let res = fw.run_blocking(|dcp| {
        std::thread::scope(|s| {
            let waiter = s.spawn(|| dcp.wait_ready(Duration::from_secs(5)));
            std::thread::sleep(Duration::from_millis(20));
            dcp.crashed();
            waiter.join().unwrap()
        })
    });
    assert!(matches!(res, Err(Error::Crashed)));
    assert!(fw.dcp.is_crashed());
}

#[test]
fn crash_disconnects_and_refuses_calls() {
    let fw = booted();
    fw.dcp.crashed();
    assert_eq!(fw.client.take(), [Event::Hotplug(false)]);
    assert!(!fw.dcp.is_active());
    assert!(matches!(fw.dcp.poweron(), Err(Error::Crashed)));
}

#[test]
fn spurious_ack_tears_the_session_down() {
    let fw = booted();
    fw.dcp
        .receive(IOMFB_ENDPOINT, Message::ack_for(ContextId::Command).into());
    assert!(fw.dcp.is_crashed());
    assert_eq!(fw.client.take(), [Event::Hotplug(false)]);
}

#[test]
fn unknown_context_tears_the_session_down() {
    let fw = booted();
    // context 5 does not exist
    let raw = u64::from(Message::packet(ContextId::Command, 0, 0x40)) & !(0xf << 8) | (5 << 8);
    fw.dcp.receive(IOMFB_ENDPOINT, raw);
    assert!(fw.dcp.is_crashed());
}

#[test]
fn other_endpoints_are_ignored() {
    let fw = booted();
    fw.dcp
        .receive(0x20, Message::ack_for(ContextId::Command).into());
    assert!(!fw.dcp.is_crashed());
    assert!(fw.transport.sent().len() > 1);
}

#[test]
fn unknown_callbacks_are_not_acked() {
    let mut fw = booted();
    let before = fw.transport.sent().len();
    assert_eq!(fw.callback(Callback::new(999, &[], 4)), None);
    assert_eq!(fw.callback(Callback::new(4, &[], 4)), None);
    assert_eq!(fw.transport.sent().len(), before);
    assert!(fw.dcp.is_active());
}
