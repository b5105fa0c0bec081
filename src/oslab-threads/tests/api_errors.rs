//! Argument validation and tid allocation, without any preemption in the
//! picture (one-second quantum).

use oslab_threads as uthreads;
use oslab_threads::Error;

fn noop() {}

fn main() {
    env_logger::init();

    assert_eq!(uthreads::init(0), Err(Error::InvalidQuantum));
    assert_eq!(uthreads::init(-7), Err(Error::InvalidQuantum));

    // Everything else refuses to run before init.
    assert_eq!(uthreads::spawn(noop), Err(Error::NotInitialized));
    assert_eq!(uthreads::block(1), Err(Error::NotInitialized));

    uthreads::init(1_000_000).unwrap();

    assert_eq!(uthreads::block(0), Err(Error::MainThreadBlock));
    assert_eq!(uthreads::sleep(1), Err(Error::MainThreadSleep));
    assert_eq!(uthreads::resume(42), Err(Error::UnknownThread(42)));
    assert_eq!(uthreads::terminate(42), Err(Error::UnknownThread(42)));
    assert_eq!(uthreads::quantums(55), Err(Error::UnknownThread(55)));
    assert!(uthreads::is_alive(0));
    assert!(!uthreads::is_alive(1));

    // Fill the table: tids are handed out smallest-first.
    for expected in 1..uthreads::MAX_THREAD_NUM {
        let tid = uthreads::spawn(noop).unwrap();
        assert_eq!(usize::from(tid), expected);
    }
    assert_eq!(uthreads::spawn(noop), Err(Error::ThreadTableFull));

    // A freed tid is the next one handed out.
    uthreads::terminate(5).unwrap();
    assert!(!uthreads::is_alive(5));
    assert_eq!(uthreads::spawn(noop).unwrap(), 5);

    // Blocking and resuming threads that never ran yet.
    uthreads::block(7).unwrap();
    uthreads::resume(7).unwrap();

    uthreads::terminate(0).unwrap();
    unreachable!();
}
