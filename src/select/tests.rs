use super::*;
use crate::manager::PeerHandle;

fn peer(n: u64) -> PeerHandle {
    PeerHandle(n)
}

#[test]
fn test_rarest_picks_lowest_availability() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.add_peer(peer(2));

    // Piece 0 is common, piece 3 is rare.
    sel.peer_have_piece(peer(1), 0);
    sel.peer_have_piece(peer(2), 0);
    sel.peer_have_piece(peer(1), 3);

    assert_eq!(sel.poll_piece(peer(1)), Some(3));
}

#[test]
fn test_rarest_breaks_ties_by_lowest_index() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.peer_have_piece(peer(1), 5);
    sel.peer_have_piece(peer(1), 2);
    sel.peer_have_piece(peer(1), 9);

    assert_eq!(sel.poll_piece(peer(1)), Some(2));
    assert_eq!(sel.poll_piece(peer(1)), Some(5));
    assert_eq!(sel.poll_piece(peer(1)), Some(9));
    assert_eq!(sel.poll_piece(peer(1)), None);
}

#[test]
fn test_rarest_availability_tracks_duplicates_and_removal() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.add_peer(peer(2));

    sel.peer_have_piece(peer(1), 4);
    sel.peer_have_piece(peer(1), 4); // re-announce doesn't double count
    sel.peer_have_piece(peer(2), 4);
    assert_eq!(sel.availability(4), 2);

    sel.remove_peer(peer(2));
    assert_eq!(sel.availability(4), 1);
}

#[test]
fn test_polled_piece_is_on_loan() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.add_peer(peer(2));
    sel.peer_have_piece(peer(1), 0);
    sel.peer_have_piece(peer(2), 0);

    assert_eq!(sel.poll_piece(peer(1)), Some(0));
    // On loan: peer 2 can't get it.
    assert_eq!(sel.poll_piece(peer(2)), None);

    sel.peer_giveback_piece(Some(peer(1)), 0);
    assert_eq!(sel.poll_piece(peer(2)), Some(0));
}

#[test]
fn test_have_piece_is_idempotent_and_final() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.peer_have_piece(peer(1), 0);

    sel.have_piece(0);
    sel.have_piece(0);
    assert_eq!(sel.poll_piece(peer(1)), None);

    // A giveback can't resurrect a piece we have.
    sel.peer_giveback_piece(None, 0);
    assert_eq!(sel.poll_piece(peer(1)), None);
}

#[test]
fn test_have_piece_clears_loan() {
    let mut sel = SequentialSelector::new();
    sel.add_peer(peer(1));
    sel.peer_have_piece(peer(1), 0);

    assert_eq!(sel.poll_piece(peer(1)), Some(0));
    sel.have_piece(0);
    assert_eq!(sel.poll_piece(peer(1)), None);
}

#[test]
fn test_sequential_polls_in_index_order() {
    let mut sel = SequentialSelector::new();
    sel.add_peer(peer(1));
    for i in [7, 1, 4] {
        sel.peer_have_piece(peer(1), i);
    }

    assert_eq!(sel.poll_piece(peer(1)), Some(1));
    assert_eq!(sel.poll_piece(peer(1)), Some(4));
    assert_eq!(sel.poll_piece(peer(1)), Some(7));
}

#[test]
fn test_random_only_picks_eligible() {
    let mut sel = RandomSelector::new();
    sel.add_peer(peer(1));
    sel.peer_have_piece(peer(1), 0);
    sel.peer_have_piece(peer(1), 1);
    sel.peer_have_piece(peer(1), 2);
    sel.have_piece(1);

    let mut seen = std::collections::HashSet::new();
    while let Some(p) = sel.poll_piece(peer(1)) {
        assert!(seen.insert(p), "piece {p} polled twice");
    }
    assert_eq!(seen, [0, 2].into_iter().collect());
}

#[test]
fn test_poll_only_offers_what_the_peer_has() {
    let mut sel = RarestFirstSelector::new();
    sel.add_peer(peer(1));
    sel.add_peer(peer(2));
    sel.peer_have_piece(peer(2), 0);

    assert_eq!(sel.poll_piece(peer(1)), None);
    assert_eq!(sel.poll_piece(peer(2)), Some(0));
}

#[test]
fn test_unknown_peer_polls_nothing() {
    let mut sel = SequentialSelector::new();
    assert_eq!(sel.poll_piece(peer(42)), None);
}
