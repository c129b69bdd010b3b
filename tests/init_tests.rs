//! Global `init` behavior, kept in its own binary so no other test touches
//! the global registry before `init` runs.

use chrono::{TimeZone, Utc};

use timesource::TimeConfig;

#[test]
fn first_init_wins() {
    let first = Utc.with_ymd_and_hms(2021, 3, 15, 13, 20, 0).unwrap();
    let second = first + chrono::Duration::days(1);

    timesource::init(TimeConfig {
        realtime: false,
        start_at: Some(first),
    });
    timesource::init(TimeConfig {
        realtime: false,
        start_at: Some(second),
    });
    assert_eq!(timesource::now(), first, "a later init must not move time");

    // A frozen registry is still swappable through the usual handles.
    timesource::restore();
    assert_ne!(timesource::now(), first);
}
