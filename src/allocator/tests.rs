//! Allocator tests

use std::sync::Arc;

use super::SkbAllocator;
use crate::capture::ChannelCapture;
use crate::config::PoolsConfig;
use crate::error::{AllocError, WindowError};
use crate::pool::PoolId;
use crate::skb::{ChecksumMode, PacketType, Rtskb, SkbMeta, RTSKB_SIZE};
use crate::stats::PoolSnapshot;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn config(global: usize, cache: usize) -> PoolsConfig {
    PoolsConfig {
        global_rtskbs: global,
        cache_size: cache,
        max_buffers: 256,
        max_pools: 16,
        check_balance: true,
    }
}

fn allocator() -> SkbAllocator {
    SkbAllocator::new(&config(8, 8)).unwrap()
}

fn new_pool(alloc: &SkbAllocator, count: usize) -> PoolId {
    alloc.pool_create(count).unwrap().require().unwrap()
}

fn snapshot(alloc: &SkbAllocator, pool: PoolId) -> PoolSnapshot {
    alloc.pool_stats(pool).unwrap()
}

#[test]
fn test_startup_populates_cache_and_global() {
    let alloc = SkbAllocator::new(&config(32, 16)).unwrap();
    assert_eq!(
        snapshot(&alloc, alloc.global_pool()),
        PoolSnapshot {
            free: 32,
            outstanding: 0,
            assigned: 32
        }
    );
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 16);

    let stats = alloc.stats();
    assert_eq!(stats.pools_live, 1);
    assert_eq!(stats.buffers_live, 32);
    assert_eq!(stats.cache_free, 16);
    assert_eq!(stats.arena_vacant, 256 - 48);
}

#[test]
fn test_startup_fails_when_arena_too_small() {
    let cfg = PoolsConfig {
        max_buffers: 10,
        ..config(8, 4)
    };
    let err = SkbAllocator::new(&cfg).unwrap_err();
    assert!(matches!(err, AllocError::Shortfall { actual: 6, .. }));
}

#[test]
fn test_alloc_and_free_round_trip() {
    let alloc = allocator();
    let pool = alloc.global_pool();
    let before = snapshot(&alloc, pool);

    let skb = alloc.alloc(pool, 100).unwrap();
    assert_eq!(skb.len(), 100);
    assert_eq!(skb.owner(), pool);
    assert_eq!(
        snapshot(&alloc, pool),
        PoolSnapshot {
            free: 7,
            outstanding: 1,
            assigned: 8
        }
    );

    alloc.free(skb);
    assert_eq!(snapshot(&alloc, pool), before);
    assert!(alloc.check_balance(pool));
}

#[test]
fn test_alloc_from_empty_pool() {
    let alloc = allocator();
    let pool = new_pool(&alloc, 1);
    let held = alloc.alloc(pool, 10).unwrap();
    let before = snapshot(&alloc, pool);

    assert_eq!(alloc.alloc(pool, 10).unwrap_err(), AllocError::Exhausted);
    assert_eq!(snapshot(&alloc, pool), before);
    assert_eq!(alloc.stats().alloc_failures, 1);
    drop(held);
}

#[test]
fn test_alloc_oversize_rejected() {
    let alloc = allocator();
    let pool = alloc.global_pool();
    let before = snapshot(&alloc, pool);

    let err = alloc.alloc(pool, RTSKB_SIZE + 1).unwrap_err();
    assert_eq!(
        err,
        AllocError::SizeExceedsCapacity {
            requested: RTSKB_SIZE + 1,
            capacity: RTSKB_SIZE
        }
    );
    assert_eq!(snapshot(&alloc, pool), before);
    assert_eq!(alloc.stats().alloc_failures, 0);

    assert_eq!(alloc.alloc(pool, RTSKB_SIZE).unwrap().len(), RTSKB_SIZE);
}

#[test]
fn test_alloc_unknown_pool() {
    let alloc = allocator();
    let bogus = PoolId::new(15);
    assert_eq!(
        alloc.alloc(bogus, 1).unwrap_err(),
        AllocError::UnknownPool(bogus)
    );
    let outside = PoolId::new(200);
    assert_eq!(
        alloc.alloc(outside, 1).unwrap_err(),
        AllocError::UnknownPool(outside)
    );
}

#[test]
fn test_free_order_is_fifo() {
    let alloc = allocator();
    let pool = new_pool(&alloc, 3);

    let mut bufs: Vec<Rtskb> = (0..3).map(|_| alloc.alloc(pool, 1).unwrap()).collect();
    for (i, skb) in bufs.iter_mut().enumerate() {
        skb.data_mut()[0] = b'a' + i as u8;
    }
    let c = bufs.pop().unwrap();
    let b = bufs.pop().unwrap();
    let a = bufs.pop().unwrap();

    // Return b, a, c; allocation must hand them back in that order
    drop(b);
    drop(a);
    drop(c);
    let order: Vec<u8> = (0..3)
        .map(|_| alloc.alloc(pool, 1).unwrap())
        .map(|skb| skb.data()[0])
        .collect();
    assert_eq!(order, b"bac".to_vec());
}

#[test]
fn test_acquire_moves_ownership() {
    let alloc = allocator();
    let rx = new_pool(&alloc, 2);
    let socket = new_pool(&alloc, 1);

    let mut skb = alloc.alloc(rx, 64).unwrap();
    alloc.acquire(&mut skb, socket).unwrap();

    assert_eq!(skb.owner(), socket);
    assert_eq!(
        snapshot(&alloc, rx),
        PoolSnapshot {
            free: 2,
            outstanding: 0,
            assigned: 2
        }
    );
    assert_eq!(
        snapshot(&alloc, socket),
        PoolSnapshot {
            free: 0,
            outstanding: 1,
            assigned: 1
        }
    );

    drop(skb);
    assert_eq!(snapshot(&alloc, socket).free, 1);
    assert_eq!(snapshot(&alloc, rx).free, 2);
    assert!(alloc.check_balance(rx));
    assert!(alloc.check_balance(socket));
}

#[test]
fn test_acquire_empty_companion_changes_nothing() {
    let alloc = allocator();
    let rx = new_pool(&alloc, 2);
    let socket = new_pool(&alloc, 0);

    let mut skb = alloc.alloc(rx, 64).unwrap();
    let rx_before = snapshot(&alloc, rx);
    let socket_before = snapshot(&alloc, socket);

    assert_eq!(
        alloc.acquire(&mut skb, socket).unwrap_err(),
        AllocError::Exhausted
    );
    assert_eq!(skb.owner(), rx);
    assert_eq!(snapshot(&alloc, rx), rx_before);
    assert_eq!(snapshot(&alloc, socket), socket_before);
}

#[test]
fn test_acquire_into_own_pool() {
    let alloc = allocator();
    let pool = alloc.global_pool();
    let mut skb = alloc.alloc(pool, 1).unwrap();
    let before = snapshot(&alloc, pool);

    alloc.acquire(&mut skb, pool).unwrap();
    assert_eq!(skb.owner(), pool);
    assert_eq!(snapshot(&alloc, pool), before);
}

#[test]
fn test_acquire_only_moves_chain_head() {
    let alloc = allocator();
    let rx = new_pool(&alloc, 2);
    let socket = new_pool(&alloc, 2);

    let mut head = alloc.alloc(rx, 10).unwrap();
    head.chain_append(alloc.alloc(rx, 10).unwrap());
    alloc.acquire(&mut head, socket).unwrap();

    let owners: Vec<PoolId> = head.chain_iter().map(Rtskb::owner).collect();
    assert_eq!(owners, vec![socket, rx]);
}

#[test]
fn test_chain_free_returns_members_to_their_owners() {
    let alloc = allocator();
    let a = new_pool(&alloc, 2);
    let b = new_pool(&alloc, 2);
    let c = new_pool(&alloc, 2);

    let mut head = alloc.alloc(a, 10).unwrap();
    let second = alloc.alloc(b, 20).unwrap();
    let mut third = alloc.alloc(b, 30).unwrap();
    // third now belongs to c, b got a replacement
    alloc.acquire(&mut third, c).unwrap();
    head.chain_append(second);
    head.chain_append(third);
    assert_eq!(head.chain_len(), 3);

    alloc.free(head);
    for (pool, assigned) in [(a, 2), (b, 2), (c, 2)] {
        assert_eq!(
            snapshot(&alloc, pool),
            PoolSnapshot {
                free: assigned,
                outstanding: 0,
                assigned
            }
        );
    }
}

#[test]
fn test_clone_copies_window_and_metadata() {
    let alloc = allocator();
    let src_pool = new_pool(&alloc, 1);
    let dst_pool = new_pool(&alloc, 1);

    let mut skb = alloc.alloc(src_pool, 0).unwrap();
    skb.reserve(2).unwrap();
    let payload: Vec<u8> = (0..42).collect();
    skb.put_slice(&payload).unwrap();
    *skb.meta_mut() = SkbMeta {
        time_stamp: 99,
        priority: 3,
        protocol: 0x0800,
        pkt_type: PacketType::Multicast,
        ip_summed: ChecksumMode::Unnecessary,
    };

    let mut copy = alloc.clone_skb(&skb, dst_pool).unwrap();
    assert_eq!(copy.len(), 42);
    assert_eq!(copy.data(), skb.data());
    assert_eq!(copy.meta(), skb.meta());
    assert_eq!(copy.owner(), dst_pool);
    assert_eq!(skb.owner(), src_pool);
    assert!(copy.is_chain_tail());

    // Independent storage
    copy.data_mut()[0] = 0xff;
    assert_eq!(skb.data()[0], 0);
    assert_eq!(skb.data(), &payload[..]);
}

#[test]
fn test_clone_keeps_link_header() {
    let alloc = allocator();
    let pool = alloc.global_pool();

    let mut skb = alloc.alloc(pool, 0).unwrap();
    skb.reserve(2).unwrap();
    skb.put_slice(&[0xee; 14]).unwrap();
    skb.put_slice(&[0x45; 20]).unwrap();
    skb.put_slice(b"data").unwrap();
    skb.reset_mac_header();
    skb.pull(14).unwrap();
    skb.set_network_header(0);
    skb.set_transport_header(20);

    let copy = alloc.clone_skb(&skb, pool).unwrap();
    assert_eq!(copy.len(), 24);
    assert_eq!(copy.data(), skb.data());
    assert_eq!(copy.headroom(), 14);
    assert_eq!(copy.mac_header(), Some(0));
    assert_eq!(copy.network_header(), Some(14));
    assert_eq!(copy.transport_header(), Some(34));
    assert_eq!(copy.link_header_len(), 14);
}

#[test]
fn test_clone_from_empty_pool() {
    let alloc = allocator();
    let empty = new_pool(&alloc, 0);
    let skb = alloc.alloc(alloc.global_pool(), 42).unwrap();
    assert_eq!(
        alloc.clone_skb(&skb, empty).unwrap_err(),
        AllocError::Exhausted
    );
    assert_eq!(skb.len(), 42);
}

#[test]
fn test_share_delivers_to_capture() {
    let (sink, rx) = ChannelCapture::bounded(4);
    let alloc = SkbAllocator::with_capture(&config(8, 8), Arc::new(sink)).unwrap();
    let pool = new_pool(&alloc, 2);
    let capture = new_pool(&alloc, 2);

    let mut skb = alloc.alloc(pool, 0).unwrap();
    skb.put_slice(b"captured").unwrap();
    alloc.share(&mut skb, capture).unwrap();
    assert!(skb.is_shared());
    assert_eq!(snapshot(&alloc, capture).outstanding, 1);

    // Sharing twice reserves nothing more
    alloc.share(&mut skb, capture).unwrap();
    assert_eq!(snapshot(&alloc, capture).outstanding, 1);

    drop(skb);
    assert_eq!(
        snapshot(&alloc, pool),
        PoolSnapshot {
            free: 2,
            outstanding: 0,
            assigned: 2
        }
    );

    let captured = rx.try_recv().unwrap();
    assert_eq!(captured.data(), b"captured");
    assert_eq!(captured.owner(), capture);
    assert!(!captured.is_shared());
    assert_eq!(snapshot(&alloc, capture).free, 1);

    drop(captured);
    assert_eq!(
        snapshot(&alloc, capture),
        PoolSnapshot {
            free: 2,
            outstanding: 0,
            assigned: 2
        }
    );
}

#[test]
fn test_share_full_channel_drops_to_capture_pool() {
    let (sink, rx) = ChannelCapture::bounded(1);
    let sink = Arc::new(sink);
    let alloc = SkbAllocator::with_capture(&config(8, 8), sink.clone()).unwrap();
    let capture = new_pool(&alloc, 4);
    let pool = alloc.global_pool();

    for _ in 0..3 {
        let mut skb = alloc.alloc(pool, 1).unwrap();
        alloc.share(&mut skb, capture).unwrap();
    }

    assert_eq!(sink.dropped(), 2);
    assert_eq!(rx.len(), 1);
    assert_eq!(snapshot(&alloc, capture).free, 3);
    assert_eq!(snapshot(&alloc, pool).free, 8);
}

#[test]
fn test_share_without_capture() {
    let alloc = allocator();
    let pool = alloc.global_pool();
    let mut skb = alloc.alloc(pool, 1).unwrap();
    assert_eq!(
        alloc.share(&mut skb, pool).unwrap_err(),
        AllocError::CaptureDisabled
    );
    assert!(!skb.is_shared());
}

#[test]
fn test_share_with_empty_capture_pool() {
    let (sink, _rx) = ChannelCapture::bounded(1);
    let alloc = SkbAllocator::with_capture(&config(8, 8), Arc::new(sink)).unwrap();
    let capture = new_pool(&alloc, 0);
    let mut skb = alloc.alloc(alloc.global_pool(), 1).unwrap();
    assert_eq!(
        alloc.share(&mut skb, capture).unwrap_err(),
        AllocError::Exhausted
    );
    assert!(!skb.is_shared());
}

#[test]
fn test_data_path_refuses_reserve_cache() {
    let (sink, _rx) = ChannelCapture::bounded(4);
    let alloc = SkbAllocator::with_capture(&config(2, 3), Arc::new(sink)).unwrap();
    let cache = alloc.cache();

    assert_eq!(alloc.alloc(cache, 10).unwrap_err(), AllocError::UnknownPool(cache));

    let mut skb = alloc.alloc(alloc.global_pool(), 10).unwrap();
    assert_eq!(
        alloc.acquire(&mut skb, cache).unwrap_err(),
        AllocError::UnknownPool(cache)
    );
    assert_eq!(skb.owner(), alloc.global_pool());
    assert_eq!(
        alloc.share(&mut skb, cache).unwrap_err(),
        AllocError::UnknownPool(cache)
    );
    assert!(!skb.is_shared());
    assert_eq!(
        alloc.clone_skb(&skb, cache).unwrap_err(),
        AllocError::UnknownPool(cache)
    );

    assert_eq!(alloc.stats().cache_free, 3);
    assert_eq!(alloc.stats().alloc_failures, 0);
    let created = alloc.pool_create_rt(3).unwrap();
    assert_eq!(created.provisioned.actual, 3);
}

#[test]
fn test_pool_create_rt_short_cache() {
    let alloc = SkbAllocator::new(&config(8, 4)).unwrap();
    let created = alloc.pool_create_rt(10).unwrap();

    assert_eq!(created.provisioned.actual, 4);
    assert_eq!(created.provisioned.shortfall(), 6);
    assert!(!created.provisioned.is_complete());
    assert_eq!(snapshot(&alloc, created.id).free, 4);
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 0);
    assert_eq!(
        created.require().unwrap_err(),
        AllocError::Shortfall {
            pool: created.id,
            requested: 10,
            actual: 4
        }
    );
}

#[test]
fn test_release_rt_refills_cache() {
    let alloc = SkbAllocator::new(&config(8, 6)).unwrap();
    let pool = alloc.pool_create_rt(4).unwrap().require().unwrap();
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 2);

    let skb = alloc.alloc(pool, 1).unwrap();
    assert_eq!(skb.owner(), pool);
    drop(skb);

    alloc.pool_release_rt(pool);
    assert_eq!(alloc.pool_stats(pool), None);
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 6);
    assert_eq!(alloc.stats().pools_live, 1);
}

#[test]
fn test_extend_and_shrink() {
    let alloc = SkbAllocator::new(&config(8, 4)).unwrap();
    let pool = new_pool(&alloc, 2);
    let vacant = alloc.stats().arena_vacant;

    assert_eq!(alloc.pool_extend(pool, 3).actual, 3);
    assert_eq!(alloc.stats().arena_vacant, vacant - 3);
    assert_eq!(alloc.pool_extend_rt(pool, 2).actual, 2);
    assert_eq!(snapshot(&alloc, pool).assigned, 7);
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 2);

    // Shrinking only touches free buffers
    let held: Vec<Rtskb> = (0..5).map(|_| alloc.alloc(pool, 1).unwrap()).collect();
    let shrunk = alloc.pool_shrink_rt(pool, 3);
    assert_eq!((shrunk.requested, shrunk.actual), (3, 2));
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 4);

    drop(held);
    assert_eq!(alloc.pool_shrink(pool, 5).actual, 5);
    assert_eq!(alloc.stats().arena_vacant, vacant + 2);
    assert_eq!(
        snapshot(&alloc, pool),
        PoolSnapshot {
            free: 0,
            outstanding: 0,
            assigned: 0
        }
    );
}

#[test]
fn test_extend_stops_when_arena_full() {
    let cfg = PoolsConfig {
        max_buffers: 20,
        ..config(8, 8)
    };
    let alloc = SkbAllocator::new(&cfg).unwrap();
    let created = alloc.pool_create(6).unwrap();
    assert_eq!(created.provisioned.actual, 4);
    assert_eq!(alloc.stats().arena_vacant, 0);

    alloc.pool_release(created.id);
    assert_eq!(alloc.stats().arena_vacant, 4);
}

#[test]
fn test_pool_table_full() {
    let cfg = PoolsConfig {
        max_pools: 4,
        ..config(8, 8)
    };
    let alloc = SkbAllocator::new(&cfg).unwrap();
    let a = new_pool(&alloc, 1);
    let _b = new_pool(&alloc, 1);
    assert_eq!(
        alloc.pool_create(1).unwrap_err(),
        AllocError::PoolTableFull
    );
    assert_eq!(
        alloc.pool_create_rt(1).unwrap_err(),
        AllocError::PoolTableFull
    );

    alloc.pool_release(a);
    assert!(alloc.pool_create(1).is_ok());
}

#[test]
fn test_release_with_buffers_in_flight() {
    let alloc = allocator();
    let vacant = alloc.stats().arena_vacant;
    let pool = new_pool(&alloc, 3);
    let skb = alloc.alloc(pool, 1).unwrap();

    alloc.pool_release(pool);
    assert_eq!(alloc.pool_stats(pool), None);
    assert_eq!(alloc.alloc(pool, 1).unwrap_err(), AllocError::UnknownPool(pool));
    assert_eq!(alloc.stats().pools_live, 1);
    assert_eq!(alloc.stats().arena_vacant, vacant - 1);

    // The late return is destroyed
    drop(skb);
    assert_eq!(alloc.stats().arena_vacant, vacant);
    assert_eq!(alloc.stats().buffers_live, 8);
    assert_eq!(alloc.stats().balance_violations, 0);
}

#[test]
fn test_release_rt_with_buffers_in_flight() {
    let alloc = allocator();
    let vacant = alloc.stats().arena_vacant;
    let pool = alloc.pool_create_rt(3).unwrap().require().unwrap();
    let skb = alloc.alloc(pool, 1).unwrap();

    alloc.pool_release_rt(pool);
    assert_eq!(alloc.pool_stats(pool), None);
    assert_eq!(alloc.stats().cache_free, 7);

    // The late return joins the reserve cache instead of being destroyed
    drop(skb);
    assert_eq!(
        snapshot(&alloc, alloc.cache()),
        PoolSnapshot {
            free: 8,
            outstanding: 0,
            assigned: 8
        }
    );
    let stats = alloc.stats();
    assert_eq!(stats.arena_vacant, vacant);
    assert_eq!(stats.buffers_live, 8);
    assert_eq!(stats.pools_live, 1);
    assert_eq!(stats.balance_violations, 0);
    assert!(alloc.check_balance(alloc.cache()));
}

#[test]
fn test_release_cache_refused() {
    let alloc = allocator();
    alloc.pool_release(alloc.cache());
    alloc.pool_release_rt(alloc.cache());
    assert_eq!(snapshot(&alloc, alloc.cache()).free, 8);
}

#[test]
fn test_live_counters_and_high_water_marks() {
    let alloc = allocator();
    let a = new_pool(&alloc, 4);
    let b = alloc.pool_create_rt(3).unwrap().require().unwrap();

    let stats = alloc.stats();
    assert_eq!(stats.pools_live, 3);
    assert_eq!(stats.buffers_live, 15);
    assert_eq!(stats.cache_free, 5);

    alloc.pool_release(a);
    alloc.pool_release_rt(b);
    let stats = alloc.stats();
    assert_eq!(stats.pools_live, 1);
    assert_eq!(stats.pools_live_max, 3);
    assert_eq!(stats.buffers_live, 8);
    assert_eq!(stats.buffers_live_max, 15);
    assert_eq!(stats.cache_free, 8);
}

#[test]
fn test_shutdown_with_buffer_in_flight() {
    let alloc = allocator();
    let skb = alloc.alloc(alloc.global_pool(), 10).unwrap();
    let observer = alloc.clone();
    alloc.shutdown();
    drop(skb);

    let stats = observer.stats();
    assert_eq!(stats.pools_live, 0);
    assert_eq!(stats.buffers_live, 0);
    assert_eq!(stats.arena_vacant, 256);
}

#[test]
fn test_shutdown_closes_capture_sink() {
    let (sink, rx) = ChannelCapture::bounded(4);
    let sink = Arc::new(sink);
    let alloc = SkbAllocator::with_capture(&config(8, 8), sink.clone()).unwrap();
    let capture = new_pool(&alloc, 4);
    let traffic = new_pool(&alloc, 2);
    let shared = Arc::downgrade(&alloc.shared);

    let mut skb = alloc.alloc(traffic, 1).unwrap();
    alloc.share(&mut skb, capture).unwrap();
    drop(skb);
    assert_eq!(rx.len(), 1);

    let survivor = alloc.clone();
    alloc.shutdown();

    // Deliveries after shutdown are discarded back to the capture pool
    let mut skb = survivor.alloc(traffic, 1).unwrap();
    survivor.share(&mut skb, capture).unwrap();
    drop(skb);
    assert_eq!(sink.dropped(), 1);
    assert_eq!(rx.len(), 1);
    assert_eq!(snapshot(&survivor, capture).free, 3);
    drop(survivor);

    // Queued buffers are the only thing keeping the allocator alive
    let kept = rx.recv().unwrap();
    assert!(shared.upgrade().is_some());
    drop(rx);
    drop(kept);
    assert!(shared.upgrade().is_none());
}

#[test]
fn test_window_errors_leave_buffer_usable() {
    let alloc = allocator();
    let mut skb = alloc.alloc(alloc.global_pool(), RTSKB_SIZE).unwrap();
    assert!(matches!(skb.put(1), Err(WindowError::Overrun { .. })));
    assert_eq!(skb.len(), RTSKB_SIZE);
    skb.trim(10);
    assert!(skb.put(1).is_ok());
}

#[derive(Debug, Clone)]
enum Op {
    Alloc { pool: usize, size: usize },
    Free(usize),
    Acquire { skb: usize, pool: usize },
    Clone { skb: usize, pool: usize },
    Chain { head: usize, member: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..3usize, 0..=RTSKB_SIZE).prop_map(|(pool, size)| Op::Alloc { pool, size }),
        any::<usize>().prop_map(Op::Free),
        (any::<usize>(), 0..3usize).prop_map(|(skb, pool)| Op::Acquire { skb, pool }),
        (any::<usize>(), 0..3usize).prop_map(|(skb, pool)| Op::Clone { skb, pool }),
        (any::<usize>(), any::<usize>()).prop_map(|(head, member)| Op::Chain { head, member }),
    ]
}

proptest! {
    #[test]
    fn prop_pools_stay_balanced(ops in prop::collection::vec(op(), 1..64)) {
        let alloc = allocator();
        let pools = [alloc.global_pool(), new_pool(&alloc, 4), new_pool(&alloc, 2)];
        let total: usize = pools.iter().map(|&p| snapshot(&alloc, p).assigned).sum();
        let mut held: Vec<Rtskb> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc { pool, size } => {
                    if let Ok(skb) = alloc.alloc(pools[pool], size) {
                        prop_assert_eq!(skb.len(), size);
                        held.push(skb);
                    }
                }
                Op::Free(i) if !held.is_empty() => {
                    let skb = held.swap_remove(i % held.len());
                    alloc.free(skb);
                }
                Op::Acquire { skb, pool } if !held.is_empty() => {
                    let i = skb % held.len();
                    let _ = alloc.acquire(&mut held[i], pools[pool]);
                }
                Op::Clone { skb, pool } if !held.is_empty() => {
                    let i = skb % held.len();
                    if let Ok(copy) = alloc.clone_skb(&held[i], pools[pool]) {
                        held.push(copy);
                    }
                }
                Op::Chain { head, member } if held.len() >= 2 => {
                    let m = held.swap_remove(member % held.len());
                    let h = head % held.len();
                    held[h].chain_append(m);
                }
                _ => {}
            }

            for &pool in &pools {
                prop_assert!(alloc.check_balance(pool));
            }
            let accounted: usize = pools.iter().map(|&p| snapshot(&alloc, p).assigned).sum();
            prop_assert_eq!(accounted, total);
        }

        drop(held);
        for &pool in &pools {
            let snap = snapshot(&alloc, pool);
            prop_assert_eq!(snap.outstanding, 0);
            prop_assert_eq!(snap.free, snap.assigned);
        }
        prop_assert_eq!(alloc.stats().balance_violations, 0);
    }
}
