//! Modem-and-packet scenarios over simulated channels.

use skywave_harness::AudioLink;
use skywave_modem::{Modem, ModemConfig, Modulation};
use skywave_proto::{
    PacketFlags, PacketId, PacketType,
    fragment::fragment_message,
    reassembly::{Reassembler, ReassemblyConfig},
};

fn modem() -> Modem {
    Modem::new(ModemConfig::default()).unwrap()
}

#[test]
fn every_modulation_crosses_a_quiet_channel() {
    let mut link = AudioLink::noisy(28.0, 1);
    let mut tx = modem();
    let mut rx = modem();
    let frame: Vec<u8> = (0..=255u8).collect();

    for modulation in Modulation::ALL {
        let received = link.transfer_with(&mut tx, &mut rx, &frame, modulation).unwrap();
        assert_eq!(received, frame, "{modulation:?}");
    }
}

#[test]
fn robust_modes_cross_a_fair_channel() {
    // At 14 dB channel SNR the robust modes get through.
    let mut link = AudioLink::noisy(14.0, 2);
    let mut tx = modem();
    let mut rx = modem();
    let frame = vec![0x5Au8; 200];

    let received = link.transfer_with(&mut tx, &mut rx, &frame, Modulation::Bpsk).unwrap();
    assert_eq!(received, frame);
    let received = link.transfer_with(&mut tx, &mut rx, &frame, Modulation::Qpsk).unwrap();
    assert_eq!(received, frame);
}

#[test]
fn receiver_converges_on_the_channel() {
    let mut link = AudioLink::noisy(26.0, 3);
    let mut tx = modem();
    let mut rx = modem();

    for _ in 0..6 {
        link.transfer_with(&mut tx, &mut rx, &[0xA5; 128], Modulation::Qpsk).unwrap();
    }
    // A clean channel converges on the densest constellation and the
    // estimate stops moving between frames.
    assert_eq!(rx.status().modulation, Modulation::Qam16);
    let snr_a = rx.status().snr_db.unwrap();
    link.transfer_with(&mut tx, &mut rx, &[0xA5; 128], Modulation::Qpsk).unwrap();
    let snr_b = rx.status().snr_db.unwrap();
    assert!((snr_a - snr_b).abs() < 3.0, "estimate jumped {snr_a} -> {snr_b}");
}

#[test]
fn fragmented_message_crosses_noisy_link() {
    let mut link = AudioLink::noisy(18.0, 4);
    let mut tx = modem();
    let mut rx = modem();

    let message: Vec<u8> = (0..2000u32).map(|i| (i * 31 % 251) as u8).collect();
    let packets = fragment_message(
        PacketType::Response,
        PacketId::from_bytes([8; 8]),
        PacketFlags::empty(),
        &message,
        256,
    )
    .unwrap();
    assert!(packets.len() > 4);

    let mut table = Reassembler::<std::time::Instant>::new(ReassemblyConfig::default());
    let now = std::time::Instant::now();

    let mut complete = None;
    for packet in &packets {
        let received =
            link.transfer_with(&mut tx, &mut rx, &packet.to_wire(), Modulation::Qpsk).unwrap();
        let parsed = skywave_proto::Packet::decode(&received).unwrap();
        if let Some(message) = table.accept(now, &parsed).unwrap() {
            complete = Some(message);
        }
    }

    assert_eq!(complete.unwrap().payload, message);
    assert_eq!(rx.counters().fec_failures, 0);
}
