use chrono::{DateTime, FixedOffset, SecondsFormat};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use tapkit_engine::bookmark::BookmarkTracker;
use tapkit_types::bookmark::parse_timestamp;
use tapkit_types::catalog::Stream;
use tapkit_types::schema::{JsonType, PropertySchema, StreamSchema};
use tapkit_types::state::{StreamState, SyncState};

fn events(key_type: PropertySchema, sorted: bool) -> Stream {
    let schema: StreamSchema = [("cursor".to_string(), key_type)].into_iter().collect();
    let mut stream = Stream::new("events", schema).incremental("cursor");
    stream.is_sorted = sorted;
    stream
}

fn rec(cursor: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("cursor".into(), cursor);
    map
}

fn resumed_from(start: i64) -> SyncState {
    let mut state = SyncState::new();
    state.bookmarks.insert(
        "events".to_string(),
        StreamState {
            replication_key: Some("cursor".to_string()),
            replication_key_value: Some(json!(start)),
            ..StreamState::default()
        },
    );
    state
}

fn committed(tracker: &BookmarkTracker) -> Option<Value> {
    tracker
        .snapshot()
        .stream("events")
        .and_then(|s| s.replication_key_value.clone())
}

proptest! {
    #[test]
    fn committed_bookmark_is_max_of_accepted_values(
        pages in prop::collection::vec(prop::collection::vec(prop::option::of(-1000_i64..1000), 0..8), 0..6),
        sorted in any::<bool>(),
    ) {
        let tracker = BookmarkTracker::new(SyncState::new());
        tracker.register(&events(PropertySchema::of_type(JsonType::Integer), sorted)).unwrap();

        // Pages arrive out of order; nulls never move the bookmark.
        for page in &pages {
            for value in page {
                let cursor = value.map_or(Value::Null, |v| json!(v));
                tracker.advance("events", &rec(cursor)).unwrap();
            }
        }
        tracker.finalize("events");

        let expected = pages.iter().flatten().flatten().max().copied();
        prop_assert_eq!(committed(&tracker), expected.map(|v| json!(v)));
    }

    #[test]
    fn bookmark_never_moves_below_resume_point(
        start in -500_i64..500,
        values in prop::collection::vec(-1000_i64..1000, 0..20),
    ) {
        let tracker = BookmarkTracker::new(resumed_from(start));
        tracker.register(&events(PropertySchema::of_type(JsonType::Integer), true)).unwrap();

        for value in &values {
            let covered = tracker.is_covered("events", &rec(json!(value)));
            prop_assert_eq!(covered, *value < start);
            if !covered {
                tracker.advance("events", &rec(json!(value))).unwrap();
            }
        }
        tracker.finalize("events");

        let expected = values.iter().copied().chain([start]).max().unwrap();
        prop_assert_eq!(committed(&tracker), Some(json!(expected)));
    }

    #[test]
    fn timestamps_compare_as_instants_across_offsets(
        instants in prop::collection::vec((0_i64..2_000_000_000, -12_i32..=14), 1..12),
    ) {
        let tracker = BookmarkTracker::new(SyncState::new());
        tracker
            .register(&events(PropertySchema::of_type(JsonType::String).with_format("date-time"), true))
            .unwrap();

        for (secs, offset_hours) in &instants {
            let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
            let local = DateTime::from_timestamp(*secs, 0).unwrap().with_timezone(&offset);
            let raw = local.to_rfc3339_opts(SecondsFormat::Secs, false);
            tracker.advance("events", &rec(json!(raw))).unwrap();
        }

        let stored = committed(&tracker).unwrap();
        let stored = parse_timestamp(stored.as_str().unwrap()).unwrap();
        let expected = instants.iter().map(|(secs, _)| *secs).max().unwrap();
        prop_assert_eq!(stored.timestamp(), expected);
    }
}
