mod common;

use common::init_logging;

#[test]
fn arming_lifecycle() {
    init_logging();
    assert!(!threadtrace::start(), "start before init must refuse");
    assert!(threadtrace::capture(true).is_none());

    threadtrace::init();
    threadtrace::init();
    assert!(threadtrace::capture(true).is_none(), "not armed yet");

    let supported = cfg!(any(target_os = "linux", windows));
    assert_eq!(threadtrace::start(), supported);
    if !supported {
        return;
    }
    assert!(threadtrace::is_armed());
    assert!(threadtrace::start());
    threadtrace::stop();
    assert!(threadtrace::is_armed());
    assert!(threadtrace::capture(true).is_some());
    threadtrace::stop();
    assert!(!threadtrace::is_armed());
    assert!(threadtrace::capture(true).is_none());
}
