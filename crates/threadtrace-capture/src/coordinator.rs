use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use threadtrace_types::{Backtrace, ThreadRecord, Tid};
use tracing::{debug, info, warn};

use crate::{Blacklist, CaptureOptions, Platform};

#[derive(Debug, Default)]
struct ArmState {
    users: usize,
}

/// Reference-counted arm/disarm plus the capture state machine, generic over
/// the platform backend.
pub struct Coordinator<P> {
    platform: P,
    options: CaptureOptions,
    arm_state: Mutex<ArmState>,
    armed: AtomicBool,
    blacklist: Mutex<Blacklist>,
    // One capture in flight at a time, so at most one session is published.
    capture_lock: Mutex<()>,
}

impl<P: Platform> Coordinator<P> {
    pub fn new(platform: P, options: CaptureOptions) -> Self {
        let blacklist = Blacklist::with_capacity(options.max_threads);
        Self {
            platform,
            options,
            arm_state: Mutex::new(ArmState::default()),
            armed: AtomicBool::new(false),
            blacklist: Mutex::new(blacklist),
            capture_lock: Mutex::new(()),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn blacklist(&self) -> Blacklist {
        self.blacklist.lock().clone()
    }

    /// Registers one more user. The first user arms the backend; returns
    /// `false` (and registers nothing) when arming fails.
    pub fn start(&self) -> bool {
        let mut state = self.arm_state.lock();
        if state.users == 0 {
            self.rebuild_blacklist();
            if let Err(error) = self.platform.arm() {
                warn!(%error, "thread capture unavailable");
                return false;
            }
            self.armed.store(true, Ordering::Release);
            info!(
                blacklisted = self.blacklist.lock().len(),
                "thread capture armed"
            );
        }
        state.users += 1;
        true
    }

    /// Drops one user registered by a successful [`Coordinator::start`]. The
    /// last one disarms the backend.
    pub fn stop(&self) {
        let mut state = self.arm_state.lock();
        debug_assert!(state.users > 0, "stop() called without a matching start()");
        if state.users == 0 {
            warn!("stop() called without a matching start(); ignoring");
            return;
        }
        state.users -= 1;
        if state.users > 0 {
            return;
        }

        self.armed.store(false, Ordering::Release);
        // Let an in-flight capture finish before its handler goes away.
        let _capture = self.capture_lock.lock();
        match self.platform.disarm() {
            Ok(()) => info!("thread capture disarmed"),
            Err(error) => warn!(%error, "failed to disarm thread capture"),
        }
    }

    fn rebuild_blacklist(&self) {
        let mut blacklist = self.blacklist.lock();
        blacklist.clear();
        if self.options.denylist.is_empty() {
            return;
        }

        let mut ids = vec![Tid::default(); self.options.max_threads];
        let count = self
            .platform
            .enumerate(true, &Blacklist::default(), &mut ids);
        for &id in &ids[..count] {
            let Some(name) = self.platform.read_name(id) else {
                continue;
            };
            if self.options.denylist.iter().any(|denied| name == denied.as_str()) {
                debug!(tid = %id, name = %name, "blacklisting thread");
                blacklist.insert(id);
            }
        }
    }

    /// Snapshots the stacks of every live thread, optionally including the
    /// caller. `None` when not armed or when no thread produced frames.
    pub fn capture(&self, include_current_thread: bool) -> Option<Backtrace> {
        if !self.is_armed() {
            return None;
        }
        let _capture = self.capture_lock.lock();
        if !self.is_armed() {
            return None;
        }

        let started = Instant::now();
        let mut ids = vec![Tid::default(); self.options.max_threads];
        let count = {
            let blacklist = self.blacklist.lock();
            self.platform
                .enumerate(include_current_thread, &blacklist, &mut ids)
        };
        if count == 0 {
            debug!("no threads to capture");
            return None;
        }

        // Metadata comes from the requesting thread: none of it is safe to
        // read from handler context.
        let mut records: Vec<ThreadRecord> = ids[..count]
            .iter()
            .map(|&id| {
                let mut record = ThreadRecord::new(id);
                record.set_name(self.platform.read_name(id));
                record.set_state(self.platform.read_state(id));
                record
            })
            .collect();

        let reported = self.platform.walk(&mut records, &self.options);

        let skip = P::SKIPPED_FRAMES;
        let silent: Vec<Tid> = records
            .iter()
            .filter(|record| record.raw_frames().len() <= skip)
            .map(ThreadRecord::id)
            .collect();
        records.retain(|record| record.raw_frames().len() > skip);

        debug!(
            enumerated = count,
            reported,
            kept = records.len(),
            ?silent,
            elapsed_us = started.elapsed().as_micros(),
            "capture finished"
        );

        if records.is_empty() {
            return None;
        }
        Some(Backtrace::new(records, skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CaptureError, StackWalker, ThreadEnumerator, ThreadMetadata};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use threadtrace_types::{RunState, ThreadName};

    struct FakeThread {
        id: u64,
        name: &'static str,
        frames: usize,
    }

    struct FakePlatform {
        current: u64,
        threads: Vec<FakeThread>,
        fail_arm: bool,
        arms: AtomicUsize,
        disarms: AtomicUsize,
        walked: Mutex<Vec<Tid>>,
    }

    impl FakePlatform {
        fn new(current: u64, threads: Vec<FakeThread>) -> Self {
            Self {
                current,
                threads,
                fail_arm: false,
                arms: AtomicUsize::new(0),
                disarms: AtomicUsize::new(0),
                walked: Mutex::new(Vec::new()),
            }
        }
    }

    impl ThreadEnumerator for FakePlatform {
        fn current_thread(&self) -> Tid {
            Tid::new(self.current)
        }

        fn enumerate(&self, include_self: bool, blacklist: &Blacklist, out: &mut [Tid]) -> usize {
            let mut count = 0;
            for thread in &self.threads {
                let id = Tid::new(thread.id);
                if count == out.len() {
                    break;
                }
                if (!include_self && thread.id == self.current) || blacklist.contains(id) {
                    continue;
                }
                out[count] = id;
                count += 1;
            }
            count
        }
    }

    impl ThreadMetadata for FakePlatform {
        fn read_name(&self, id: Tid) -> Option<ThreadName> {
            self.threads
                .iter()
                .find(|t| t.id == id.get())
                .map(|t| ThreadName::from_str_truncated(t.name))
        }

        fn read_state(&self, id: Tid) -> RunState {
            if id.get() % 2 == 0 {
                RunState::Running
            } else {
                RunState::Other
            }
        }
    }

    impl StackWalker for FakePlatform {
        const SKIPPED_FRAMES: usize = 1;

        fn arm(&self) -> Result<(), CaptureError> {
            if self.fail_arm {
                return Err(CaptureError::UnsupportedPlatform { target_os: "fake" });
            }
            self.arms.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn disarm(&self) -> Result<(), CaptureError> {
            self.disarms.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn walk(&self, records: &mut [ThreadRecord], _options: &CaptureOptions) -> usize {
            let mut reported = 0;
            for record in records.iter_mut() {
                self.walked.lock().push(record.id());
                let thread = self
                    .threads
                    .iter()
                    .find(|t| t.id == record.id().get())
                    .unwrap();
                for frame in 0..thread.frames {
                    record.frames_mut().push(0x1000 * thread.id as usize + frame);
                }
                if thread.frames > 0 {
                    reported += 1;
                }
            }
            reported
        }
    }

    fn thread(id: u64, name: &'static str, frames: usize) -> FakeThread {
        FakeThread { id, name, frames }
    }

    fn coordinator(platform: FakePlatform) -> Coordinator<FakePlatform> {
        Coordinator::new(platform, CaptureOptions::default())
    }

    #[test]
    fn capture_requires_arming() {
        let c = coordinator(FakePlatform::new(1, vec![thread(1, "main", 4)]));
        assert!(c.capture(true).is_none());
        assert!(c.start());
        assert!(c.capture(true).is_some());
        c.stop();
        assert!(c.capture(true).is_none());
    }

    #[test]
    fn nested_start_stop_arms_once() {
        let c = coordinator(FakePlatform::new(1, vec![thread(1, "main", 4)]));
        for _ in 0..3 {
            assert!(c.start());
        }
        assert_eq!(c.platform().arms.load(Ordering::SeqCst), 1);
        c.stop();
        c.stop();
        assert!(c.is_armed());
        assert_eq!(c.platform().disarms.load(Ordering::SeqCst), 0);
        c.stop();
        assert!(!c.is_armed());
        assert_eq!(c.platform().disarms.load(Ordering::SeqCst), 1);

        assert!(c.start());
        assert_eq!(c.platform().arms.load(Ordering::SeqCst), 2);
        c.stop();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "without a matching start")]
    fn unmatched_stop_is_caught() {
        let c = coordinator(FakePlatform::new(1, vec![thread(1, "main", 4)]));
        assert!(c.start());
        c.stop();
        c.stop();
    }

    #[test]
    fn failed_arm_reports_unusable() {
        let mut platform = FakePlatform::new(1, vec![thread(1, "main", 4)]);
        platform.fail_arm = true;
        let c = coordinator(platform);
        assert!(!c.start());
        assert!(!c.is_armed());
        assert!(c.capture(true).is_none());
    }

    #[test]
    fn excludes_caller_unless_asked() {
        let c = coordinator(FakePlatform::new(
            1,
            vec![thread(1, "main", 4), thread(2, "worker", 4)],
        ));
        assert!(c.start());
        let without = c.capture(false).unwrap();
        assert_eq!(without.thread_count(), 1);
        assert_eq!(without.thread_id(0), Tid::new(2));
        let with = c.capture(true).unwrap();
        assert_eq!(with.thread_count(), 2);
        c.stop();
    }

    #[test]
    fn only_caller_and_excluded_yields_none() {
        let c = coordinator(FakePlatform::new(1, vec![thread(1, "main", 4)]));
        assert!(c.start());
        assert!(c.capture(false).is_none());
        c.stop();
    }

    #[test]
    fn silent_threads_are_dropped_in_order() {
        let c = coordinator(FakePlatform::new(
            9,
            vec![
                thread(1, "a", 3),
                thread(2, "b", 0),
                thread(3, "c", 1),
                thread(4, "d", 5),
            ],
        ));
        assert!(c.start());
        let bt = c.capture(true).unwrap();
        // Thread 3 only has its skipped handler frame left.
        let ids: Vec<u64> = bt.threads().map(|t| t.id().get()).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(bt.frame_count(0), 2);
        assert_eq!(bt.frame_address(0, 0), 0x1001);
        assert_eq!(bt.frame_address(1, -1), 0x4004);
        assert_eq!(bt.thread_name(1), Some("d"));
        assert!(bt.is_running(1));
        assert!(!bt.is_running(0));
        c.stop();
    }

    #[test]
    fn nobody_reporting_yields_none() {
        let c = coordinator(FakePlatform::new(9, vec![thread(1, "a", 0), thread(2, "b", 0)]));
        assert!(c.start());
        assert!(c.capture(true).is_none());
        c.stop();
    }

    #[test]
    fn denylisted_threads_are_never_walked() {
        let c = coordinator(FakePlatform::new(
            1,
            vec![
                thread(1, "main", 4),
                thread(2, "gmain", 4),
                thread(3, "threaded-ml", 4),
                thread(4, "worker", 4),
            ],
        ));
        assert!(c.start());
        assert_eq!(c.blacklist().ids(), &[Tid::new(2), Tid::new(3)]);
        let bt = c.capture(true).unwrap();
        let ids: Vec<u64> = bt.threads().map(|t| t.id().get()).collect();
        assert_eq!(ids, vec![1, 4]);
        assert!(
            c.platform()
                .walked
                .lock()
                .iter()
                .all(|id| id.get() != 2 && id.get() != 3)
        );
        c.stop();
    }

    #[test]
    fn enumeration_truncates_at_max_threads() {
        let threads = (1..=10).map(|id| thread(id, "t", 2)).collect();
        let options = CaptureOptions {
            max_threads: 4,
            timeout: Duration::from_millis(5),
            ..CaptureOptions::default()
        };
        let c = Coordinator::new(FakePlatform::new(1, threads), options);
        assert!(c.start());
        assert_eq!(c.capture(true).unwrap().thread_count(), 4);
        c.stop();
    }

    #[test]
    fn concurrent_captures_are_independent() {
        let c = std::sync::Arc::new(coordinator(FakePlatform::new(
            1,
            vec![thread(1, "main", 3), thread(2, "w", 6)],
        )));
        assert!(c.start());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = std::sync::Arc::clone(&c);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let bt = c.capture(true).unwrap();
                        assert_eq!(bt.thread_count(), 2);
                        assert_eq!(bt.frame_count(1), 5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        c.stop();
    }
}
