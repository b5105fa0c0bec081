use oslab_runqueue::RunQueue;

#[test]
fn test_rq_basic() {
    let mut runqueue: RunQueue<8> = RunQueue::new();

    runqueue.push(0);
    runqueue.push(1);
    runqueue.push(2);

    assert_eq!(runqueue.pop_head(), Some(0));
    assert_eq!(runqueue.pop_head(), Some(1));

    runqueue.push(0);

    assert_eq!(runqueue.pop_head(), Some(2));
    assert_eq!(runqueue.pop_head(), Some(0));
    assert_eq!(runqueue.pop_head(), None);
    assert!(runqueue.is_empty());
}

#[test]
fn test_rq_wraparound() {
    let mut runqueue: RunQueue<4> = RunQueue::new();

    // Cycle enough times that head wraps past the end of the ring.
    for round in 0..10u8 {
        runqueue.push(round % 4);
        runqueue.push((round + 1) % 4);
        assert_eq!(runqueue.pop_head(), Some(round % 4));
        assert_eq!(runqueue.pop_head(), Some((round + 1) % 4));
    }
    assert!(runqueue.is_empty());
}

#[test]
fn test_rq_full() {
    let mut runqueue: RunQueue<3> = RunQueue::new();

    assert!(runqueue.push(0));
    assert!(runqueue.push(1));
    assert!(runqueue.push(2));
    assert!(!runqueue.push(2));
    assert_eq!(runqueue.len(), 3);
}

#[test]
fn test_rq_del_middle() {
    let mut runqueue: RunQueue<8> = RunQueue::new();

    for n in 0..5 {
        runqueue.push(n);
    }

    assert!(runqueue.del(2));
    assert!(!runqueue.del(2));
    assert!(!runqueue.contains(2));

    assert_eq!(runqueue.pop_head(), Some(0));
    assert_eq!(runqueue.pop_head(), Some(1));
    assert_eq!(runqueue.pop_head(), Some(3));
    assert_eq!(runqueue.pop_head(), Some(4));
    assert_eq!(runqueue.pop_head(), None);
}

#[test]
fn test_rq_del_head_and_tail() {
    let mut runqueue: RunQueue<8> = RunQueue::new();

    runqueue.push(3);
    runqueue.push(4);
    runqueue.push(5);

    assert!(runqueue.del(3));
    assert_eq!(runqueue.peek_head(), Some(4));
    assert!(runqueue.del(5));
    assert_eq!(runqueue.len(), 1);
    assert_eq!(runqueue.pop_head(), Some(4));
}
