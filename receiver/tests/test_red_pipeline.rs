//! End-to-end tests: Opus encoding → RED sender → lossy channel → RED
//! receiver → playout.

use opus_red_common::{EncodedAudioFrame, MetricsContext};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

use red_receiver::{
    receive_loop, Playout, PlayoutConfig, ReceiveConfig, RedReceiver, RtpReceiver,
};
use red_sender::{
    stream_audio, AudioData, OpusEncoderWrapper, RedSender, RedundancyPolicyConfig, RtpSender,
    StreamConfig,
};

const OPUS_PT: u8 = 111;
const RED_PT: u8 = 63;
const SSRC: u32 = 0x0A0B_0C0D;
const FRAME: u32 = 960;

/// Loss on a redundant stream is detected, credited to RED and concealed
/// slot for slot.
#[test]
fn test_lossy_channel_recovers_with_red() {
    // ---
    let audio = AudioData::tone(300.0, 4.0);
    let mut opus = OpusEncoderWrapper::new(20).expect("encoder creation failed");
    let mut sender = RedSender::new(OPUS_PT, RED_PT, RedundancyPolicyConfig::default());
    sender.on_loss_observation(30.0, 0);
    assert_eq!(sender.active_redundancy_level(), 2);

    let mut receiver = RedReceiver::new(OPUS_PT, RED_PT);
    let mut playout = Playout::new(PlayoutConfig::default()).expect("playout");
    let mut rng = StdRng::seed_from_u64(7);

    let mut received = 0u64;
    let mut last_seq = 0u64;
    let mut samples = 0usize;

    for (n, pcm) in audio.frames().enumerate() {
        let payload = opus.encode(&pcm).expect("encode");
        let frame = EncodedAudioFrame::new(n as u16, n as u32 * FRAME, SSRC, OPUS_PT, payload);
        let frame = sender.encode_frame(frame).expect("frame kept");
        assert_eq!(frame.payload_type, RED_PT);

        // the first packet always arrives so the stream starts at seq 0
        if n > 0 && rng.gen_bool(0.15) {
            continue;
        }

        let rx = receiver.receive(frame).expect("forwarded");
        for slot in playout.push(&rx).expect("push") {
            samples += slot.pcm.len();
        }
        received += 1;
        last_seq = n as u64;
    }
    for slot in playout.flush().expect("flush") {
        samples += slot.pcm.len();
    }

    let counters = receiver.counters();
    let expected = last_seq + 1;
    let lost = expected - received;
    assert!(lost > 0, "seeded channel lost nothing");

    assert_eq!(counters.total_expected, expected);
    assert_eq!(counters.total_lost, lost);
    assert!(counters.total_recovered_red > 0);
    assert!(counters.total_recovered_red + counters.total_recovered_fec <= lost);

    let stats = playout.stats();
    assert_eq!(stats.concealed(), lost);
    assert!(stats.concealed_red > 0);
    assert_eq!(stats.late, 0);
    assert_eq!(samples, expected as usize * FRAME as usize);
}

/// Sequence 1 and 3 arrive, 2 is lost and then recovered from the redundant
/// block in 4.
#[test]
fn test_single_loss_recovered_from_next_red_packet() {
    // ---
    let mut sender = RedSender::new(OPUS_PT, RED_PT, RedundancyPolicyConfig::default());
    sender.set_num_redundant_encodings(1);
    let mut receiver = RedReceiver::new(OPUS_PT, RED_PT);

    let frames: Vec<EncodedAudioFrame> = (1..=4u16)
        .map(|seq| {
            let frame = EncodedAudioFrame::new(
                seq,
                seq as u32 * FRAME,
                SSRC,
                OPUS_PT,
                vec![0x08, 0x80, seq as u8],
            );
            sender.encode_frame(frame).expect("frame kept")
        })
        .collect();

    receiver.receive(frames[0].clone()).expect("forwarded");
    receiver.receive(frames[2].clone()).expect("forwarded");
    let c = receiver.counters();
    assert_eq!((c.total_expected, c.total_lost, c.total_recovered_red), (3, 1, 0));

    let rx = receiver.receive(frames[3].clone()).expect("forwarded");
    assert!(rx.redundant_block(2 * FRAME).is_some());

    let c = receiver.counters();
    assert_eq!(c.total_expected, 4);
    assert_eq!(c.total_lost, 1);
    assert_eq!(c.total_recovered_red, 1);
    assert_eq!(c.unrecovered(), 0);
}

/// The demo hosts talk RTP over loopback UDP.
#[tokio::test]
async fn test_udp_stream_end_to_end() {
    // ---
    let mut rtp_rx = RtpReceiver::bind("127.0.0.1:0").await.expect("bind");
    let addr = rtp_rx.local_addr().expect("addr").to_string();
    let mut rtp_tx = RtpSender::new(addr).await.expect("sender");

    let audio = AudioData::tone(440.0, 1.0);
    let mut opus = OpusEncoderWrapper::new(0).expect("encoder creation failed");
    let mut red_tx = RedSender::new(OPUS_PT, RED_PT, RedundancyPolicyConfig::default());
    let mut red_rx = RedReceiver::new(OPUS_PT, RED_PT);
    let mut playout = Playout::new(PlayoutConfig::default()).expect("playout");

    let tx_metrics = MetricsContext::new("e2e_sender").expect("metrics");
    let rx_metrics = MetricsContext::new("e2e_receiver").expect("metrics");

    let stream_cfg = StreamConfig {
        ssrc: SSRC,
        interval_ms: 1,
        seed: Some(1),
        ..StreamConfig::default()
    };
    let rx_cfg = ReceiveConfig {
        idle_timeout: Some(Duration::from_millis(500)),
        ..ReceiveConfig::default()
    };

    let (sent, received) = tokio::join!(
        stream_audio(
            &audio,
            &mut opus,
            &mut red_tx,
            &mut rtp_tx,
            &tx_metrics,
            &stream_cfg
        ),
        receive_loop(&mut rtp_rx, &mut red_rx, &mut playout, &rx_metrics, &rx_cfg)
    );
    sent.expect("stream");
    let stats = received.expect("receive");

    let frames = audio.frame_count() as u64;
    assert_eq!(tx_metrics.packets_sent_total.get(), frames);
    assert_eq!(stats.frames_received, frames);
    assert_eq!(stats.red_frames, frames);
    assert_eq!(red_rx.last_ssrc(), Some(SSRC));
    assert_eq!(red_rx.counters().total_expected, frames);
    assert_eq!(red_rx.counters().total_lost, 0);
    assert_eq!(playout.finish().expect("finish").decoded, frames);
    assert!(rx_metrics.bytes_received_total.get() > 0);
}
