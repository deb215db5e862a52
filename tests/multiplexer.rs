//! End-to-end multiplexer behavior over an in-memory carrier.
//!
//! Most tests drive one multiplexer against a hand-held carrier end so the
//! exact wire traffic can be asserted; a few run two multiplexers back to
//! back.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use wsmux::transport::{decode_frame, encode_header, Carrier, CarrierEvent, PipeCarrier};
use wsmux::{
    pipe, ChannelEvent, FrameHeader, MsgType, Multiplexer, MultiplexerConfig, MuxError,
    OpenOptions, SessionEvent,
};

/// Receive the next complete message on a raw carrier end and decode it.
async fn recv_frame(carrier: &mut PipeCarrier) -> (FrameHeader, Bytes) {
    match carrier.recv().await {
        Some(CarrierEvent::Message(bytes)) => decode_frame(bytes).expect("decodable frame"),
        other => panic!("expected a message, got {other:?}"),
    }
}

/// Send one protocol message on a raw carrier end.
async fn send_frame(
    carrier: &mut PipeCarrier,
    msg_type: MsgType,
    dst: u32,
    src: u32,
    payload: &[u8],
) {
    let header = Bytes::copy_from_slice(&encode_header(msg_type, dst, src, payload.len()));
    if payload.is_empty() {
        carrier.send(header, true).await.unwrap();
    } else {
        carrier.send(header, false).await.unwrap();
        carrier
            .send(Bytes::copy_from_slice(payload), true)
            .await
            .unwrap();
    }
}

/// Initiate an open from the multiplexer and acknowledge it from the raw
/// side as peer channel `peer`. Returns the opened channel.
async fn open_acked(
    mux: &Multiplexer,
    raw: &mut PipeCarrier,
    peer: u32,
) -> wsmux::Channel {
    let mut channel = mux.open(OpenOptions::default()).await.unwrap();
    let (header, _) = recv_frame(raw).await;
    assert_eq!(header.msg_type, MsgType::Open.as_u16());
    assert_eq!(header.dst_channel, 0);
    assert_eq!(header.src_channel, channel.id());

    send_frame(raw, MsgType::Ack, channel.id(), peer, &[]).await;
    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Opened { peer })
    );
    channel
}

#[tokio::test]
async fn test_open_then_send_between_multiplexers() {
    let (left, right) = pipe();
    let (a, _a_events) = Multiplexer::new(left, MultiplexerConfig::default());
    let (_b, mut b_events) = Multiplexer::new(right, MultiplexerConfig::default());

    let mut channel = a.open(OpenOptions::default()).await.unwrap();
    let opened = channel.recv().await;
    let peer = match opened {
        Some(ChannelEvent::Opened { peer }) => peer,
        other => panic!("expected Opened, got {other:?}"),
    };
    assert!(peer > 0);

    a.send(channel.id(), Bytes::from_static(b"hello"))
        .await
        .unwrap();

    let mut stream = match b_events.recv().await {
        Some(SessionEvent::Connection(stream)) => stream,
        other => panic!("expected a connection, got {other:?}"),
    };
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    assert_eq!(stream.bytes_read(), 5);
    let info = a.channel_info(channel.id()).await.unwrap();
    assert_eq!(info.bytes_written, 5);
    assert_eq!(info.bytes_read, 0);
}

#[tokio::test(start_paused = true)]
async fn test_open_ack_timeout() {
    let (left, _raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    let mut channel = a
        .open(OpenOptions {
            timeout: Duration::from_millis(1000),
            dst_channel: None,
        })
        .await
        .unwrap();

    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Error(MuxError::OpenChannelTimeout))
    );
    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
    assert_eq!(a.channel_info(channel.id()).await, None);
}

#[tokio::test]
async fn test_open_rejected_by_full_peer() {
    let (left, right) = pipe();
    let (a, _a_events) = Multiplexer::new(left, MultiplexerConfig::default());
    let config = MultiplexerConfig::builder()
        .max_channels(0)
        .build()
        .unwrap();
    let (_b, _b_events) = Multiplexer::new(right, config);

    let mut channel = a.open(OpenOptions::default()).await.unwrap();
    match channel.recv().await {
        Some(ChannelEvent::Error(err @ MuxError::OpenChannelRejected { .. })) => {
            assert_eq!(err.remote(), Some(&MuxError::NoChannels));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
}

#[tokio::test(start_paused = true)]
async fn test_ping_timeout_terminates_session() {
    let (left, mut raw) = pipe();
    raw.set_auto_pong(false);
    let config = MultiplexerConfig::builder()
        .keep_alive(Duration::from_millis(2000))
        .alive_threshold(Duration::from_millis(4000))
        .build()
        .unwrap();
    let (a, mut events) = Multiplexer::new(left, config);

    match events.recv().await {
        Some(SessionEvent::Error(MuxError::PingTimeout { idle_ms })) => {
            assert!(idle_ms >= 4000, "idle_ms = {idle_ms}");
        }
        other => panic!("expected ping timeout, got {other:?}"),
    }
    assert!(matches!(events.recv().await, Some(SessionEvent::Closed)));
    assert!(a.open(OpenOptions::default()).await.is_err());
}

#[tokio::test]
async fn test_version_mismatch_terminates_without_outbound() {
    let (left, mut raw) = pipe();
    let (_a, mut events) = Multiplexer::new(left, MultiplexerConfig::default());

    // Peer opens a channel; the multiplexer accepts and acks it.
    send_frame(&mut raw, MsgType::Open, 0, 77, &[]).await;
    let mut stream = match events.recv().await {
        Some(SessionEvent::Connection(stream)) => stream,
        other => panic!("expected a connection, got {other:?}"),
    };
    let (ack, _) = recv_frame(&mut raw).await;
    assert_eq!(ack.msg_type, MsgType::Ack.as_u16());
    assert_eq!(ack.dst_channel, 77);

    // A frame with version 0 kills the session.
    let bad = FrameHeader {
        version: 0,
        msg_type: MsgType::Data.as_u16(),
        dst_channel: ack.src_channel,
        src_channel: 77,
        length: 0,
    };
    raw.send(Bytes::copy_from_slice(&bad.to_bytes()), true)
        .await
        .unwrap();

    match events.recv().await {
        Some(SessionEvent::Error(MuxError::UnsupportedProtocolVersion { version })) => {
            assert_eq!(version, 0);
        }
        other => panic!("expected version error, got {other:?}"),
    }
    assert!(matches!(events.recv().await, Some(SessionEvent::Closed)));

    // The accepted stream observed the teardown.
    let mut buf = [0u8; 1];
    assert!(stream.read(&mut buf).await.is_err());

    // No CLOSE or any other frame left the session after the bad frame.
    loop {
        match raw.recv().await {
            Some(CarrierEvent::Message(bytes)) => {
                let (header, _) = decode_frame(bytes).unwrap();
                panic!("unexpected outbound frame after termination: {header:?}");
            }
            Some(CarrierEvent::Pong) => continue,
            Some(CarrierEvent::Closed) | None => break,
        }
    }
}

#[tokio::test]
async fn test_send_and_flow_control_wire_traffic() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let channel = open_acked(&a, &mut raw, 42).await;
    let id = channel.id();

    a.send(id, Bytes::from_static(b"AAAA")).await.unwrap();
    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.version, 2);
    assert_eq!(header.msg_type, MsgType::Data.as_u16());
    assert_eq!(header.dst_channel, 42);
    assert_eq!(header.src_channel, id);
    assert_eq!(header.length, 4);
    assert_eq!(payload.as_ref(), b"AAAA");

    // Pause then resume arrive as exactly one PAUSE and one RESUME, in order.
    a.flow_control(id, true).await.unwrap();
    a.flow_control(id, false).await.unwrap();
    let (pause, _) = recv_frame(&mut raw).await;
    assert_eq!(pause.msg_type, MsgType::Pause.as_u16());
    assert_eq!(pause.dst_channel, 42);
    let (resume, _) = recv_frame(&mut raw).await;
    assert_eq!(resume.msg_type, MsgType::Resume.as_u16());
    assert_eq!(resume.dst_channel, 42);
}

#[tokio::test]
async fn test_send_vectored_is_one_message() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let channel = open_acked(&a, &mut raw, 9).await;

    a.send_vectored(
        channel.id(),
        vec![Bytes::from_static(b"AA"), Bytes::from_static(b"BB")],
    )
    .await
    .unwrap();

    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.length, 4);
    assert_eq!(payload.as_ref(), b"AABB");
    assert_eq!(channel.bytes_written(), 4);
}

#[tokio::test]
async fn test_inbound_data_updates_counters() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut channel = open_acked(&a, &mut raw, 42).await;

    send_frame(&mut raw, MsgType::Data, channel.id(), 42, b"abcde").await;
    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Data(Bytes::from_static(b"abcde")))
    );
    assert_eq!(channel.bytes_read(), 5);

    let info = a.channel_info(channel.id()).await.unwrap();
    assert_eq!(info.bytes_read, 5);
    assert_eq!(info.bytes_written, 0);
}

#[tokio::test]
async fn test_send_while_opening_fails() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    let channel = a.open(OpenOptions::default()).await.unwrap();
    let (open, _) = recv_frame(&mut raw).await;
    assert_eq!(open.msg_type, MsgType::Open.as_u16());

    assert_eq!(
        a.send(channel.id(), Bytes::from_static(b"x")).await,
        Err(MuxError::ChannelNotOpen)
    );
    assert_eq!(
        a.flow_control(channel.id(), true).await,
        Err(MuxError::ChannelNotOpen)
    );
}

#[tokio::test]
async fn test_close_sends_close_and_requires_open() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut channel = open_acked(&a, &mut raw, 42).await;
    let id = channel.id();

    a.close(id).await.unwrap();
    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.msg_type, MsgType::Close.as_u16());
    assert_eq!(header.dst_channel, 42);
    assert_eq!(header.src_channel, id);
    assert!(payload.is_empty());

    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
    assert_eq!(a.close(id).await, Err(MuxError::ChannelNotOpen));
    assert_eq!(a.channel_info(id).await, None);
}

#[tokio::test]
async fn test_data_for_absent_channel_answers_close() {
    let (left, mut raw) = pipe();
    let (_a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    send_frame(&mut raw, MsgType::Data, 999, 5, b"x").await;

    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.msg_type, MsgType::Close.as_u16());
    assert_eq!(header.dst_channel, 5);
    assert_eq!(header.src_channel, 0);
    assert_eq!(payload.as_ref(), b"ERR_WSM_CHANNEL_NOT_OPEN");
}

#[tokio::test]
async fn test_pause_for_absent_channel_answers_close() {
    let (left, mut raw) = pipe();
    let (_a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    send_frame(&mut raw, MsgType::Pause, 999, 6, &[]).await;

    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.msg_type, MsgType::Close.as_u16());
    assert_eq!(header.dst_channel, 6);
    assert_eq!(header.src_channel, 0);
    assert_eq!(payload.as_ref(), b"ERR_WSM_CHANNEL_NOT_OPEN");
}

#[tokio::test]
async fn test_peer_close_with_code_wraps_remote_error() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut channel = open_acked(&a, &mut raw, 42).await;

    send_frame(
        &mut raw,
        MsgType::Close,
        channel.id(),
        42,
        b"ERR_WSM_PING_TIMEOUT",
    )
    .await;

    match channel.recv().await {
        Some(ChannelEvent::Error(err @ MuxError::ChannelClosedByPeer { .. })) => {
            assert_eq!(err.remote(), Some(&MuxError::PingTimeout { idle_ms: 0 }));
        }
        other => panic!("expected peer close, got {other:?}"),
    }
    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
}

#[tokio::test]
async fn test_close_while_opening_is_a_rejection() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    let mut channel = a.open(OpenOptions::default()).await.unwrap();
    let (open, _) = recv_frame(&mut raw).await;
    assert_eq!(open.src_channel, channel.id());

    send_frame(
        &mut raw,
        MsgType::Close,
        channel.id(),
        0,
        b"ERR_WSM_NO_CHANNELS",
    )
    .await;

    match channel.recv().await {
        Some(ChannelEvent::Error(err @ MuxError::OpenChannelRejected { .. })) => {
            assert_eq!(err.remote(), Some(&MuxError::NoChannels));
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
}

#[tokio::test]
async fn test_stray_close_is_ignored() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    send_frame(&mut raw, MsgType::Close, 12345, 0, &[]).await;

    // The session is still healthy.
    let channel = open_acked(&a, &mut raw, 8).await;
    assert!(channel.id() > 0);
}

#[tokio::test]
async fn test_unknown_message_type_is_ignored() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut channel = open_acked(&a, &mut raw, 8).await;

    let unknown = FrameHeader {
        version: 2,
        msg_type: 99,
        dst_channel: channel.id(),
        src_channel: 8,
        length: 0,
    };
    raw.send(Bytes::copy_from_slice(&unknown.to_bytes()), true)
        .await
        .unwrap();

    send_frame(&mut raw, MsgType::Data, channel.id(), 8, b"still here").await;
    assert_eq!(
        channel.recv().await,
        Some(ChannelEvent::Data(Bytes::from_static(b"still here")))
    );
}

#[tokio::test]
async fn test_short_frame_is_dropped() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    raw.send(Bytes::from_static(&[0x00, 0x02, 0x00]), true)
        .await
        .unwrap();

    // Still alive.
    let channel = open_acked(&a, &mut raw, 8).await;
    assert!(channel.id() > 0);
}

#[tokio::test]
async fn test_data_mismatch_closes_both_channels() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut first = open_acked(&a, &mut raw, 101).await;
    let mut second = open_acked(&a, &mut raw, 102).await;

    // DATA addressed to `first` but claiming to come from `second`'s peer.
    send_frame(&mut raw, MsgType::Data, first.id(), 102, b"zz").await;

    assert_eq!(
        first.recv().await,
        Some(ChannelEvent::Error(MuxError::ChannelMismatch))
    );
    assert_eq!(first.recv().await, Some(ChannelEvent::Closed));
    assert_eq!(
        second.recv().await,
        Some(ChannelEvent::Error(MuxError::ChannelMismatch))
    );
    assert_eq!(second.recv().await, Some(ChannelEvent::Closed));

    let (close_first, payload_first) = recv_frame(&mut raw).await;
    assert_eq!(close_first.msg_type, MsgType::Close.as_u16());
    assert_eq!(close_first.dst_channel, 101);
    assert_eq!(close_first.src_channel, first.id());
    assert_eq!(payload_first.as_ref(), b"ERR_WSM_CHANNEL_MISMATCH");

    let (close_second, payload_second) = recv_frame(&mut raw).await;
    assert_eq!(close_second.msg_type, MsgType::Close.as_u16());
    assert_eq!(close_second.dst_channel, 102);
    assert_eq!(close_second.src_channel, second.id());
    assert_eq!(payload_second.as_ref(), b"ERR_WSM_CHANNEL_MISMATCH");

    assert_eq!(a.channel_info(first.id()).await, None);
    assert_eq!(a.channel_info(second.id()).await, None);
}

#[tokio::test]
async fn test_duplicate_open_closes_holder_and_rejects() {
    let (left, mut raw) = pipe();
    let (_a, mut events) = Multiplexer::new(left, MultiplexerConfig::default());

    send_frame(&mut raw, MsgType::Open, 0, 7, &[]).await;
    let mut stream = match events.recv().await {
        Some(SessionEvent::Connection(stream)) => stream,
        other => panic!("expected a connection, got {other:?}"),
    };
    let (ack, _) = recv_frame(&mut raw).await;
    assert_eq!(ack.msg_type, MsgType::Ack.as_u16());
    let holder = ack.src_channel;

    // The same peer channel opens again.
    send_frame(&mut raw, MsgType::Open, 0, 7, &[]).await;

    let (close_holder, payload) = recv_frame(&mut raw).await;
    assert_eq!(close_holder.msg_type, MsgType::Close.as_u16());
    assert_eq!(close_holder.dst_channel, 7);
    assert_eq!(close_holder.src_channel, holder);
    assert_eq!(payload.as_ref(), b"ERR_WSM_OPEN_CHANNEL_REUSE");

    let (close_reject, payload) = recv_frame(&mut raw).await;
    assert_eq!(close_reject.msg_type, MsgType::Close.as_u16());
    assert_eq!(close_reject.dst_channel, 7);
    assert_eq!(close_reject.src_channel, 0);
    assert_eq!(payload.as_ref(), b"ERR_WSM_OPEN_CHANNEL_REUSE");

    // The holder's stream surfaces the reuse error.
    let mut buf = [0u8; 1];
    let err = stream.read(&mut buf).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
}

#[tokio::test]
async fn test_destroy_closes_open_channels_gracefully() {
    let (left, mut raw) = pipe();
    let (a, mut events) = Multiplexer::new(left, MultiplexerConfig::default());
    let mut channel = open_acked(&a, &mut raw, 42).await;

    a.destroy().await;

    let (header, payload) = recv_frame(&mut raw).await;
    assert_eq!(header.msg_type, MsgType::Close.as_u16());
    assert_eq!(header.dst_channel, 42);
    assert_eq!(header.src_channel, channel.id());
    assert!(payload.is_empty());

    assert_eq!(channel.recv().await, Some(ChannelEvent::Closed));
    assert!(matches!(events.recv().await, Some(SessionEvent::Closed)));
    assert!(a.is_closed());

    // Destroying twice is a no-op.
    a.destroy().await;
}

#[tokio::test]
async fn test_carrier_close_terminates_unexpectedly() {
    let (left, raw) = pipe();
    let (a, mut events) = Multiplexer::new(left, MultiplexerConfig::default());
    drop(raw);

    match events.recv().await {
        Some(SessionEvent::Error(MuxError::SocketClosedUnexpectedly)) => {}
        other => panic!("expected unexpected close, got {other:?}"),
    }
    assert!(matches!(events.recv().await, Some(SessionEvent::Closed)));
    assert!(a.open(OpenOptions::default()).await.is_err());
}

#[tokio::test]
async fn test_accepting_open_with_explicit_dst_channel() {
    let (left, mut raw) = pipe();
    let (a, _events) = Multiplexer::new(left, MultiplexerConfig::default());

    let mut channel = a
        .open(OpenOptions {
            dst_channel: Some(55),
            ..OpenOptions::default()
        })
        .await
        .unwrap();

    let (ack, _) = recv_frame(&mut raw).await;
    assert_eq!(ack.msg_type, MsgType::Ack.as_u16());
    assert_eq!(ack.dst_channel, 55);
    assert_eq!(ack.src_channel, channel.id());

    // Opened is queued, never delivered synchronously.
    assert_eq!(channel.recv().await, Some(ChannelEvent::Opened { peer: 55 }));

    // Accepting the same peer channel twice fails.
    assert_eq!(
        a.open(OpenOptions {
            dst_channel: Some(55),
            ..OpenOptions::default()
        })
        .await
        .unwrap_err(),
        MuxError::OpenChannelReuse
    );
}
