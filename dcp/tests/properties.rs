mod common;

use bytemuck::bytes_of;
use common::*;

fn send(fw: &mut Firmware, cbs: Vec<Callback>) -> Vec<Vec<u8>> {
    cbs.into_iter()
        .map(|cb| fw.callback(cb).expect("transfer callback not acked"))
        .collect()
}

#[test]
fn timing_elements_in_small_chunks_replace_modes() {
    let mut fw = booted();
    let doc = timing_elements(&[(2560, 1440, 60), (1920, 1080, 120), (800, 600, 60)]);
    let replies = send(&mut fw, property_transfer("TimingElements", &doc, 100));
    assert!(replies.iter().all(|r| r == &[1]));
    let modes = fw.dcp.modes();
    assert_eq!(modes.len(), 3);
    assert_eq!(modes[0].timing.hdisplay, 2560);
    assert_eq!(modes[1].timing.vdisplay, 1080);
}

#[test]
fn bad_document_keeps_old_modes() {
    let mut fw = booted();
    let mut doc = timing_elements(&[(640, 480, 60)]);
    // break the header magic
    doc[0] ^= 0xff;
    let replies = send(&mut fw, property_transfer("TimingElements", &doc, 0x1000));
    assert_eq!(replies.last().unwrap(), &[0]);
    assert_eq!(fw.dcp.modes().len(), 2);

    // the buffer was released, a new transfer can start
    let doc = timing_elements(&[(640, 480, 60)]);
    let replies = send(&mut fw, property_transfer("TimingElements", &doc, 0x1000));
    assert_eq!(replies.last().unwrap(), &[1]);
    assert_eq!(fw.dcp.modes().len(), 1);
}

#[test]
fn display_attributes_set_panel_size() {
    let mut fw = booted();
    let doc = display_attributes(60, 34);
    send(&mut fw, property_transfer("DisplayAttributes", &doc, 0x1000));
    assert_eq!(fw.client.take(), [Event::Dimensions(600, 340)]);
    let size = fw.dcp.dimensions();
    assert_eq!((size.width_mm, size.height_mm), (600, 340));
    assert!(fw
        .dcp
        .modes()
        .iter()
        .all(|m| (m.width_mm, m.height_mm) == (600, 340)));

    // modes parsed later inherit the size
    let doc = timing_elements(&[(640, 480, 60)]);
    send(&mut fw, property_transfer("TimingElements", &doc, 0x1000));
    assert_eq!(fw.dcp.modes()[0].width_mm, 600);
}

#[test]
fn display_attributes_in_three_chunks_match_single_transfer() {
    let doc = display_attributes(60, 34);
    let chunk = doc.len().div_ceil(3);
    let cbs = property_transfer("DisplayAttributes", &doc, chunk);
    // start, three chunks, end
    assert_eq!(cbs.len(), 5);

    let mut split = booted();
    let split_replies = send(&mut split, cbs);
    let mut whole = booted();
    let whole_replies = send(
        &mut whole,
        property_transfer("DisplayAttributes", &doc, 0x1000),
    );

    assert!(split_replies.iter().all(|r| r == &[1]));
    assert!(whole_replies.iter().all(|r| r == &[1]));
    assert_eq!(split.dcp.dimensions(), whole.dcp.dimensions());
    assert_eq!(split.client.take(), whole.client.take());
    assert_eq!(split.dcp.modes(), whole.dcp.modes());
}

#[test]
fn unknown_keys_are_discarded() {
    let mut fw = booted();
    let replies = send(&mut fw, property_transfer("ColorElements", &[1, 2, 3, 4], 0x1000));
    assert!(replies.iter().all(|r| r == &[1]));
    assert_eq!(fw.dcp.modes().len(), 2);
}

#[test]
fn spurious_transfer_steps_are_refused() {
    let mut fw = booted();
    let chunk = Callback::new(123, bytes_of(&chunk_req(0, &[1, 2, 3])), 1);
    let end = Callback::new(124, bytes_of(&end_req("TimingElements")), 1);
    assert_eq!(fw.callback(chunk.clone()), Some(vec![0]));
    assert_eq!(fw.callback(end.clone()), Some(vec![0]));

    let start = Callback::new(122, &8u32.to_le_bytes(), 1);
    assert_eq!(fw.callback(start.clone()), Some(vec![1]));
    assert_eq!(fw.callback(start), Some(vec![0]));

    // overflowing the announced length
    let big = Callback::new(123, bytes_of(&chunk_req(4, &[0; 8])), 1);
    assert_eq!(fw.callback(big), Some(vec![0]));
    assert_eq!(fw.callback(chunk), Some(vec![1]));
}
