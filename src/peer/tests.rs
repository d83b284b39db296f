use super::*;
use crate::manager::PeerHandle;
use crate::piece::{BlockRequest, ProgressCounter, BLOCK_SIZE};
use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn progress() -> Arc<RwLock<ProgressCounter>> {
    Arc::new(RwLock::new(ProgressCounter::new()))
}

fn connected_conn(npieces: u32, progress: Arc<RwLock<ProgressCounter>>, now: Instant) -> PeerConnection {
    let mut conn = PeerConnection::new(npieces, BLOCK_SIZE * 4, 10, progress, false, now);
    conn.mark_handshake_sent(now);
    conn.on_handshake_received(now);
    conn
}

#[test]
fn test_bitfield() {
    let mut bf = Bitfield::new(100);
    assert!(!bf.has(0));

    bf.set(0);
    assert!(bf.has(0));

    bf.set(99);
    assert!(bf.has(99));

    bf.clear(0);
    assert!(!bf.has(0));

    assert_eq!(bf.count(), 1);
}

#[test]
fn test_bitfield_from_bytes_clears_spare_bits() {
    let bf = Bitfield::from_bytes(&[0x80, 0xFF], 9);
    assert!(bf.has(0));
    assert!(bf.has(8));
    // bits 9..16 don't map to pieces
    assert_eq!(bf.count(), 2);
}

#[test]
fn test_handshake_encode_decode() {
    let handshake = Handshake::new([1u8; 20], [2u8; 20]);
    let encoded = handshake.encode();
    assert_eq!(encoded.len(), HANDSHAKE_LEN);

    let decoded = Handshake::decode(&encoded).unwrap();
    assert_eq!(decoded.info_hash, [1u8; 20]);
    assert_eq!(decoded.peer_id, [2u8; 20]);
}

#[test]
fn test_handshake_rejects_wrong_protocol() {
    let mut bad = Handshake::new([1u8; 20], [2u8; 20]).encode().to_vec();
    bad[1] = b'X';
    assert!(matches!(
        Handshake::decode(&bad),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_request_wire_format() {
    let encoded = Message::Request {
        piece: 1,
        offset: 0x4000,
        length: 16384,
    }
    .encode();
    assert_eq!(
        &encoded[..],
        &[
            0, 0, 0, 13, 6, // len 13, id 6
            0, 0, 0, 1, // piece
            0, 0, 0x40, 0, // offset
            0, 0, 0x40, 0, // length
        ]
    );
}

#[test]
fn test_keepalive_wire_format() {
    assert_eq!(&Message::KeepAlive.encode()[..], &[0, 0, 0, 0]);
}

#[test]
fn test_piece_message_round_trip() {
    let data = Bytes::from_static(b"hello world");
    let msg = Message::Piece {
        piece: 3,
        offset: 16384,
        data: data.clone(),
    };

    let decoded = Message::decode(msg.encode()).unwrap();
    assert_eq!(
        decoded,
        Message::Piece {
            piece: 3,
            offset: 16384,
            data,
        }
    );
}

#[test]
fn test_unknown_message_id() {
    let frame = Bytes::from_static(&[0, 0, 0, 1, 42]);
    assert!(matches!(
        Message::decode(frame),
        Err(PeerError::InvalidMessageId(42))
    ));
}

#[test]
fn test_handshaker_partial_feed() {
    let mut hs = Handshaker::new([7u8; 20]);
    let wire = Handshake::new([7u8; 20], [9u8; 20]).encode();

    let (consumed, done) = hs.feed(&wire[..30]).unwrap();
    assert_eq!(consumed, 30);
    assert!(done.is_none());

    let (consumed, done) = hs.feed(&wire[30..]).unwrap();
    assert_eq!(consumed, 38);
    let handshake = done.unwrap();
    assert_eq!(handshake.peer_id, [9u8; 20]);
}

#[test]
fn test_handshaker_leaves_trailing_bytes() {
    let mut hs = Handshaker::new([7u8; 20]);
    let mut wire = Handshake::new([7u8; 20], [9u8; 20]).encode().to_vec();
    wire.extend_from_slice(&Message::KeepAlive.encode());

    let (consumed, done) = hs.feed(&wire).unwrap();
    assert_eq!(consumed, HANDSHAKE_LEN);
    assert!(done.is_some());
}

#[test]
fn test_handshaker_rejects_wrong_infohash() {
    let mut hs = Handshaker::new([7u8; 20]);
    let wire = Handshake::new([8u8; 20], [9u8; 20]).encode();
    assert!(matches!(
        hs.feed(&wire),
        Err(PeerError::InfoHashMismatch)
    ));
}

#[test]
fn test_handshaker_rejects_bad_pstrlen_immediately() {
    let mut hs = Handshaker::new([7u8; 20]);
    assert!(matches!(
        hs.feed(&[18u8]),
        Err(PeerError::InvalidHandshake)
    ));
}

#[test]
fn test_message_reader_across_split_buffers() {
    let mut reader = MessageReader::new();
    let mut wire = Vec::new();
    wire.extend_from_slice(&Message::Have { piece: 5 }.encode());
    wire.extend_from_slice(&Message::Unchoke.encode());

    let messages = reader.feed(&wire[..3]).unwrap();
    assert!(messages.is_empty());
    assert_eq!(reader.buffered(), 3);

    let messages = reader.feed(&wire[3..]).unwrap();
    assert_eq!(messages, vec![Message::Have { piece: 5 }, Message::Unchoke]);
    assert_eq!(reader.buffered(), 0);
}

#[test]
fn test_message_reader_keepalive() {
    let mut reader = MessageReader::new();
    let messages = reader.feed(&[0, 0, 0, 0]).unwrap();
    assert_eq!(messages, vec![Message::KeepAlive]);
}

#[test]
fn test_message_reader_rejects_oversize_frame() {
    let mut reader = MessageReader::new();
    let huge = (MAX_FRAME_LEN + 1).to_be_bytes();
    assert!(matches!(
        reader.feed(&huge),
        Err(PeerError::MessageTooLarge(_))
    ));
}

#[test]
fn test_choke_state_defaults() {
    let state = ChokeState::default();
    assert!(state.am_choking);
    assert!(!state.am_interested);
    assert!(state.peer_choking);
    assert!(!state.peer_interested);
}

#[test]
fn test_choke_returns_pending_requests() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let req = BlockRequest::new(0, 0, BLOCK_SIZE);
    assert!(conn.offer_block(req, now).is_some());
    assert_eq!(conn.pending_count(), 1);

    let events = conn.on_message(Message::Choke, now).unwrap();
    assert_eq!(events, vec![PeerEvent::GiveBack(vec![req])]);
    assert_eq!(conn.pending_count(), 0);
    assert!(conn.choke_state().peer_choking);
}

#[test]
fn test_unchoke_polls_for_blocks() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let events = conn.on_message(Message::Unchoke, now).unwrap();
    assert_eq!(events, vec![PeerEvent::PollBlocks]);
    assert!(!conn.choke_state().peer_choking);
}

#[test]
fn test_pipeline_ceiling() {
    let now = Instant::now();
    let progress = progress();
    let mut conn = PeerConnection::new(100, BLOCK_SIZE * 16, 2, progress, false, now);
    conn.on_handshake_received(now);

    assert!(conn.offer_block(BlockRequest::new(0, 0, BLOCK_SIZE), now).is_some());
    assert!(conn
        .offer_block(BlockRequest::new(0, BLOCK_SIZE, BLOCK_SIZE), now)
        .is_some());
    assert!(conn
        .offer_block(BlockRequest::new(0, 2 * BLOCK_SIZE, BLOCK_SIZE), now)
        .is_none());
    assert_eq!(conn.pending_count(), 2);
    assert!(!conn.has_pipeline_room());
}

#[test]
fn test_have_declares_interest_when_piece_wanted() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let events = conn.on_message(Message::Have { piece: 2 }, now).unwrap();
    assert_eq!(
        events,
        vec![
            PeerEvent::HasPiece(2),
            PeerEvent::Send(Message::Interested)
        ]
    );
    assert!(conn.peer_pieces().has(2));
    assert!(conn.choke_state().am_interested);

    // Interest is declared once.
    let events = conn.on_message(Message::Have { piece: 3 }, now).unwrap();
    assert_eq!(events, vec![PeerEvent::HasPiece(3)]);
}

#[test]
fn test_have_for_complete_piece_stays_uninterested() {
    let now = Instant::now();
    let progress = progress();
    progress.write().mark_complete(2);
    let mut conn = connected_conn(4, Arc::clone(&progress), now);

    let events = conn.on_message(Message::Have { piece: 2 }, now).unwrap();
    assert_eq!(events, vec![PeerEvent::HasPiece(2)]);
    assert!(!conn.choke_state().am_interested);
}

#[test]
fn test_have_out_of_range_is_protocol_error() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);
    assert!(conn.on_message(Message::Have { piece: 4 }, now).is_err());
}

#[test]
fn test_bitfield_only_as_first_message() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let bits = Bitfield::from_bytes(&[0b1010_0000], 4);
    let events = conn
        .on_message(Message::Bitfield(bits.to_bytes()), now)
        .unwrap();
    assert!(events.contains(&PeerEvent::HasPiece(0)));
    assert!(events.contains(&PeerEvent::HasPiece(2)));

    let again = conn.on_message(Message::Bitfield(bits.to_bytes()), now);
    assert!(matches!(again, Err(PeerError::UnexpectedBitfield)));
}

#[test]
fn test_request_ignored_while_choking() {
    let now = Instant::now();
    let progress = progress();
    progress.write().mark_complete(0);
    let mut conn = connected_conn(4, progress, now);

    let events = conn
        .on_message(
            Message::Request {
                piece: 0,
                offset: 0,
                length: BLOCK_SIZE,
            },
            now,
        )
        .unwrap();
    assert!(events.is_empty());
    assert!(conn.periodic(now).is_empty());
}

#[test]
fn test_request_served_after_unchoke() {
    let now = Instant::now();
    let progress = progress();
    progress.write().mark_complete(0);
    let mut conn = connected_conn(4, progress, now);

    assert_eq!(conn.unchoke_peer(now), Some(Message::Unchoke));
    let events = conn
        .on_message(
            Message::Request {
                piece: 0,
                offset: 0,
                length: BLOCK_SIZE,
            },
            now,
        )
        .unwrap();
    assert!(events.is_empty());

    let events = conn.periodic(now);
    assert!(events.contains(&PeerEvent::ServeBlock(BlockRequest::new(0, 0, BLOCK_SIZE))));
}

#[test]
fn test_cancel_withdraws_queued_upload() {
    let now = Instant::now();
    let progress = progress();
    progress.write().mark_complete(0);
    let mut conn = connected_conn(4, progress, now);

    conn.unchoke_peer(now);
    conn.on_message(
        Message::Request {
            piece: 0,
            offset: 0,
            length: BLOCK_SIZE,
        },
        now,
    )
    .unwrap();
    conn.on_message(
        Message::Cancel {
            piece: 0,
            offset: 0,
            length: BLOCK_SIZE,
        },
        now,
    )
    .unwrap();

    let events = conn.periodic(now);
    assert!(!events
        .iter()
        .any(|e| matches!(e, PeerEvent::ServeBlock(_))));
}

#[test]
fn test_choking_drops_queued_uploads() {
    let now = Instant::now();
    let progress = progress();
    progress.write().mark_complete(0);
    let mut conn = connected_conn(4, progress, now);

    conn.unchoke_peer(now);
    conn.on_message(
        Message::Request {
            piece: 0,
            offset: 0,
            length: BLOCK_SIZE,
        },
        now,
    )
    .unwrap();
    assert_eq!(conn.choke_peer(now), Some(Message::Choke));

    conn.unchoke_peer(now);
    let events = conn.periodic(now);
    assert!(!events
        .iter()
        .any(|e| matches!(e, PeerEvent::ServeBlock(_))));
}

#[test]
fn test_piece_arrival_clears_pending_and_repolls() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);
    conn.on_message(Message::Unchoke, now).unwrap();

    let req = BlockRequest::new(1, 0, BLOCK_SIZE);
    conn.offer_block(req, now);

    let events = conn
        .on_message(
            Message::Piece {
                piece: 1,
                offset: 0,
                data: Bytes::from(vec![0xAB; BLOCK_SIZE as usize]),
            },
            now,
        )
        .unwrap();
    assert_eq!(conn.pending_count(), 0);
    assert!(matches!(events[0], PeerEvent::BlockArrived(_)));
    assert_eq!(events[1], PeerEvent::PollBlocks);
    assert!(conn.download_rate(now) > 0);
}

#[test]
fn test_keepalive_after_idle() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let later = now + Duration::from_secs(61);
    let events = conn.periodic(later);
    assert!(events.contains(&PeerEvent::Send(Message::KeepAlive)));

    // Not again right away.
    let events = conn.periodic(later + Duration::from_secs(1));
    assert!(!events.contains(&PeerEvent::Send(Message::KeepAlive)));
}

#[test]
fn test_timeout_after_silence() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);

    let later = now + Duration::from_secs(121);
    let events = conn.periodic(later);
    assert_eq!(events, vec![PeerEvent::Disconnect("timeout")]);
}

#[test]
fn test_periodic_polls_when_unchoked_with_room() {
    let now = Instant::now();
    let mut conn = connected_conn(4, progress(), now);
    conn.on_message(Message::Unchoke, now).unwrap();

    let events = conn.periodic(now + Duration::from_secs(1));
    assert!(events.contains(&PeerEvent::PollBlocks));
}

#[test]
fn test_failed_connection_is_terminal() {
    let now = Instant::now();
    let mut conn = PeerConnection::new(4, BLOCK_SIZE, 10, progress(), true, now);
    assert_eq!(conn.state(), ConnState::Connecting);

    conn.on_transport_failed();
    conn.on_connected();
    conn.on_handshake_received(now);
    assert_eq!(conn.state(), ConnState::Failed);
    assert!(conn.periodic(now).is_empty());
}

#[test]
fn test_rate_counter_window() {
    let now = Instant::now();
    let mut rate = RateCounter::new(now);

    rate.record(now, 20_000);
    rate.record(now + Duration::from_secs(1), 20_000);
    assert_eq!(rate.rate(now + Duration::from_secs(2)), 2_000);

    // The window slides past both samples.
    assert_eq!(rate.rate(now + Duration::from_secs(60)), 0);
}

#[test]
fn test_leeching_choker_ranks_by_rate() {
    let mut choker = LeechingChoker::new(3);
    let candidates: Vec<ChokeCandidate> = (0..4)
        .map(|i| ChokeCandidate {
            peer: PeerHandle(i),
            rate: i * 100,
            interested: true,
            choked: true,
        })
        .collect();

    let decisions = choker.decide(&candidates);
    // Two rate slots: the fastest two get unchoked, nobody else flips.
    assert_eq!(decisions.len(), 2);
    assert!(decisions
        .iter()
        .all(|d| d.unchoke && (d.peer == PeerHandle(3) || d.peer == PeerHandle(2))));
}

#[test]
fn test_choker_chokes_displaced_peer() {
    let mut choker = LeechingChoker::new(2);
    let candidates = vec![
        ChokeCandidate {
            peer: PeerHandle(1),
            rate: 10,
            interested: true,
            choked: false,
        },
        ChokeCandidate {
            peer: PeerHandle(2),
            rate: 500,
            interested: true,
            choked: true,
        },
    ];

    let decisions = choker.decide(&candidates);
    assert!(decisions.contains(&ChokeDecision {
        peer: PeerHandle(1),
        unchoke: false
    }));
    assert!(decisions.contains(&ChokeDecision {
        peer: PeerHandle(2),
        unchoke: true
    }));
}

#[test]
fn test_optimistic_pick_only_from_choked_interested() {
    let mut choker = LeechingChoker::new(4);
    let candidates = vec![
        ChokeCandidate {
            peer: PeerHandle(1),
            rate: 0,
            interested: false,
            choked: true,
        },
        ChokeCandidate {
            peer: PeerHandle(2),
            rate: 0,
            interested: true,
            choked: false,
        },
        ChokeCandidate {
            peer: PeerHandle(3),
            rate: 0,
            interested: true,
            choked: true,
        },
    ];

    assert_eq!(choker.rotate_optimistic(&candidates), Some(PeerHandle(3)));
    assert_eq!(choker.optimistic(), Some(PeerHandle(3)));

    choker.remove_peer(PeerHandle(3));
    assert_eq!(choker.optimistic(), None);
}

#[test]
fn test_optimistic_keeps_reserved_slot_in_decisions() {
    let mut choker = LeechingChoker::new(2);
    let candidates = vec![
        ChokeCandidate {
            peer: PeerHandle(1),
            rate: 900,
            interested: true,
            choked: true,
        },
        ChokeCandidate {
            peer: PeerHandle(2),
            rate: 0,
            interested: true,
            choked: true,
        },
    ];

    // Only one rate slot; peer 2 can still ride the optimistic slot.
    choker.rotate_optimistic(&candidates[1..]);
    let decisions = choker.decide(&candidates);
    assert!(decisions.contains(&ChokeDecision {
        peer: PeerHandle(1),
        unchoke: true
    }));
    assert!(decisions.contains(&ChokeDecision {
        peer: PeerHandle(2),
        unchoke: true
    }));
}

#[test]
fn test_seeding_choker_ranks_by_upload() {
    let mut choker = SeedingChoker::new(2);
    let candidates = vec![
        ChokeCandidate {
            peer: PeerHandle(1),
            rate: 50,
            interested: true,
            choked: true,
        },
        ChokeCandidate {
            peer: PeerHandle(2),
            rate: 700,
            interested: true,
            choked: true,
        },
    ];

    let decisions = choker.decide(&candidates);
    assert_eq!(
        decisions,
        vec![ChokeDecision {
            peer: PeerHandle(2),
            unchoke: true
        }]
    );
}
