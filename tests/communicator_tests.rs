use dist_csr::algs::collective::exchange_records;
use dist_csr::algs::communicator::{CommTag, Communicator, NoComm, RayonComm};
use dist_csr::algs::wire::{WireEntry, WireIndex};
use dist_csr::matrix_error::MatrixError;

#[test]
fn commtag_offset_wrap() {
    let t = CommTag::new(u16::MAX).offset(1);
    assert_eq!(t.as_u16(), 0);
}

#[test]
fn rayon_round_trip_on_shared_mailbox() {
    let tag = CommTag::new(0x1000);
    let c0 = RayonComm::new(0, 2);
    let c1 = RayonComm::new(1, 2);

    let h = std::thread::spawn(move || {
        let mut buf = [0u8; 5];
        c1.send_recv(0, tag, b"world", &mut buf).unwrap();
        buf
    });
    let mut buf = [0u8; 5];
    c0.send_recv(1, tag, b"hello", &mut buf).unwrap();
    assert_eq!(&buf, b"world");
    assert_eq!(&h.join().unwrap(), b"hello");
}

#[test]
fn rayon_fifo_order() {
    let tag = CommTag::new(0x1001);
    let c0 = RayonComm::new(0, 2);
    let c1 = RayonComm::new(1, 2);

    let h = std::thread::spawn(move || {
        (0..10u8)
            .map(|i| {
                let mut b = [0u8; 1];
                c1.send_recv(0, tag, &[100 + i], &mut b).unwrap();
                b[0]
            })
            .collect::<Vec<_>>()
    });
    for i in 0..10u8 {
        let mut b = [0u8; 1];
        c0.send_recv(1, tag, &[i], &mut b).unwrap();
        assert_eq!(b[0], 100 + i);
    }
    assert_eq!(h.join().unwrap(), (0u8..10u8).collect::<Vec<_>>());
}

#[test]
fn single_rank_cannot_exchange() {
    let mut buf = [0u8; 1];
    let err = NoComm.send_recv(0, CommTag::new(3), &[1], &mut buf).unwrap_err();
    assert!(matches!(err, MatrixError::CommError { neighbor: 0, .. }));
}

#[test]
fn record_exchange_sizes_each_direction_independently() {
    let world = RayonComm::world(2);
    let tag = CommTag::new(0x30);
    let got = std::thread::scope(|s| {
        let handles: Vec<_> = world
            .iter()
            .map(|comm| {
                s.spawn(move || {
                    let rank = comm.rank();
                    let mine: Vec<WireEntry> =
                        (0..rank * 3).map(|k| WireEntry::new(rank, k)).collect();
                    exchange_records(comm, 1 - rank, tag, &mine).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
    });
    assert_eq!(got[0].len(), 3);
    assert!(got[0].iter().all(|e| e.row() == 1));
    assert!(got[1].is_empty());
}

#[test]
fn wire_index_keeps_absence() {
    assert_eq!(WireIndex::from_option(None).get(), None);
    assert_eq!(WireIndex::of(42).get(), Some(42));
}

#[cfg(feature = "mpi-support")]
#[test]
fn mpi_round_trip_and_short_message() {
    use dist_csr::algs::communicator::MpiComm;
    let world = MpiComm::new().expect("MPI initialization failed");
    let me = world.rank();
    let n = world.size();
    // pair ranks (0,1), (2,3), ..; an unpaired last rank talks to itself
    let peer = if (me ^ 1) < n { me ^ 1 } else { me };

    let mut rx = [0u8; 2];
    world.send_recv(peer, CommTag::new(0xCAFE), &[42, me as u8], &mut rx).unwrap();
    assert_eq!(rx, [42, peer as u8]);

    // the peer sends two bytes where four are expected
    let mut rx = [0u8; 4];
    let err = world.send_recv(peer, CommTag::new(0xCAFF), &[1, 2], &mut rx).unwrap_err();
    assert!(matches!(err, MatrixError::CommError { neighbor, .. } if neighbor == peer));
}
