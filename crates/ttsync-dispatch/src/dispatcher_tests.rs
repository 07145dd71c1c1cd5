use super::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use ttsync_store::{KvStore, MemoryKvStore, NEXT_UPDATES_KEY};
use ttsync_upstream::{Lesson, LessonStatus, Metadata, UpstreamError};

struct MockUpstream {
    metadata: Metadata,
    classes: Vec<SchoolClass>,
    lessons: Vec<Lesson>,
    fail_lessons: AtomicBool,
    metadata_calls: AtomicUsize,
    lessons_calls: AtomicUsize,
}

impl MockUpstream {
    fn new(metadata: Metadata, classes: Vec<SchoolClass>) -> Self {
        Self {
            metadata,
            classes,
            lessons: vec![sample_lesson()],
            fail_lessons: AtomicBool::new(false),
            metadata_calls: AtomicUsize::new(0),
            lessons_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn get_metadata(&self) -> Result<Metadata, UpstreamError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.metadata.clone())
    }

    async fn get_classes(&self, _semester_id: &str) -> Result<Vec<SchoolClass>, UpstreamError> {
        Ok(self.classes.clone())
    }

    async fn get_lessons(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _class_id: &str,
    ) -> Result<Vec<Lesson>, UpstreamError> {
        self.lessons_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lessons.load(Ordering::SeqCst) {
            return Err(UpstreamError::Parse("injected failure".to_string()));
        }
        Ok(self.lessons.clone())
    }
}

fn sample_lesson() -> Lesson {
    Lesson {
        name: "M".to_string(),
        full_name: "Mathematics".to_string(),
        room: Some("101".to_string()),
        start_date: Utc::now(),
        end_date: Utc::now(),
        teacher: Some("ab".to_string()),
        status: LessonStatus::Normal,
        comment: None,
    }
}

/// Two semesters; index 1 is the running one, spanning two weeks back and
/// three weeks ahead of now so the current-week scan always succeeds.
fn fixture_metadata(now: DateTime<Utc>) -> Metadata {
    Metadata {
        semesters: vec![
            Semester {
                id: "70".to_string(),
                name: "past".to_string(),
                start_date: now - chrono::Duration::days(200),
                end_date: now - chrono::Duration::days(120),
            },
            Semester {
                id: "71".to_string(),
                name: "current".to_string(),
                start_date: now - chrono::Duration::days(14),
                end_date: now + chrono::Duration::days(21),
            },
        ],
        time_slots: Vec::new(),
    }
}

fn fixture_classes() -> Vec<SchoolClass> {
    vec![
        SchoolClass { id: "a1".to_string(), name: "1a".to_string() },
        SchoolClass { id: "b2".to_string(), name: "2b".to_string() },
    ]
}

struct Fixture {
    dispatcher: Dispatcher,
    scheduler: Arc<Scheduler>,
    store: Arc<MemoryKvStore>,
    upstream: Arc<MockUpstream>,
    signal: ShutdownSignal,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryKvStore::new());
    let scheduler = Arc::new(Scheduler::new(store.clone()));
    let upstream = Arc::new(MockUpstream::new(fixture_metadata(Utc::now()), fixture_classes()));
    let signal = ShutdownSignal::new();
    let dispatcher = Dispatcher::new(
        scheduler.clone(),
        upstream.clone(),
        DispatchConfig::default(),
        signal.clone(),
    );
    Fixture { dispatcher, scheduler, store, upstream, signal }
}

#[tokio::test]
async fn init_without_cached_meta_fetches_and_seeds_pool() {
    let mut f = fixture();
    f.dispatcher.init().await.unwrap();

    let meta: MetaRecord = f.scheduler.get(&ResourcePath::meta()).await.unwrap().unwrap();
    assert_eq!(meta.classes.len(), 2);
    assert!(!meta.weeks.is_empty());

    // Meta path plus one entry per week×class.
    let expected = meta.weeks.len() * meta.classes.len() + 1;
    assert_eq!(f.scheduler.tracked_count().await.unwrap(), expected);
    assert_eq!(f.upstream.metadata_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn init_with_cached_meta_skips_upstream() {
    let f = fixture();
    let record = MetaRecord {
        semesters: f.upstream.metadata.semesters.clone(),
        classes: fixture_classes(),
        time_slots: Vec::new(),
        weeks: f.upstream.metadata.weeks("71"),
    };
    f.scheduler.set(&ResourcePath::meta(), &record, None).await.unwrap();

    let mut dispatcher = f.dispatcher;
    dispatcher.init().await.unwrap();
    assert_eq!(f.upstream.metadata_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tick_with_empty_index_is_a_noop() {
    let mut f = fixture();
    f.dispatcher.tick().await;
    assert_eq!(f.upstream.metadata_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.upstream.lessons_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn timetable_tick_stores_lessons_and_pushes_due_forward() {
    let mut f = fixture();
    f.dispatcher.init().await.unwrap();

    // Freshly seeded timetable entries are all immediately eligible; the
    // deterministic tie-break picks the lexically smallest path.
    let expected_path = ResourcePath::timetable("71", 0, "a1");
    assert_eq!(f.scheduler.get_next().await.unwrap(), expected_path);

    f.dispatcher.tick().await;

    assert_eq!(f.upstream.lessons_calls.load(Ordering::SeqCst), 1);
    let lessons: Vec<Lesson> = f.scheduler.get(&expected_path).await.unwrap().unwrap();
    assert_eq!(lessons.len(), 1);
    assert_eq!(lessons[0].name, "M");

    let index = f.store.hash_get_all(NEXT_UPDATES_KEY).await.unwrap();
    let due = DateTime::parse_from_rfc3339(&index[&expected_path.joined()])
        .unwrap()
        .with_timezone(&Utc);
    assert!(due > Utc::now());
}

#[tokio::test]
async fn failed_refresh_keeps_the_due_time() {
    let mut f = fixture();
    f.dispatcher.init().await.unwrap();
    f.upstream.fail_lessons.store(true, Ordering::SeqCst);

    let next = f.scheduler.get_next().await.unwrap();
    let before = f.store.hash_get_all(NEXT_UPDATES_KEY).await.unwrap();

    f.dispatcher.tick().await;

    // The failure was swallowed, nothing was stored, the due time is
    // unchanged and the resource stays first in line.
    let after = f.store.hash_get_all(NEXT_UPDATES_KEY).await.unwrap();
    assert_eq!(before, after);
    let record: Option<Vec<Lesson>> = f.scheduler.get(&next).await.unwrap();
    assert!(record.is_none());
    assert_eq!(f.scheduler.get_next().await.unwrap(), next);
}

#[tokio::test]
async fn meta_refresh_prunes_resources_no_longer_reported() {
    let f = fixture();
    // A leftover from a semester upstream no longer reports.
    let stale = ResourcePath::timetable("99", 5, "zz");
    f.scheduler.set(&stale, &json!([]), Some(Due::At(Utc::now()))).await.unwrap();

    let mut dispatcher = f.dispatcher;
    dispatcher.init().await.unwrap();

    let index = f.store.hash_get_all(NEXT_UPDATES_KEY).await.unwrap();
    assert!(!index.contains_key(&stale.joined()));
    // Only the index entry is pruned; the record itself survives.
    let record: Option<serde_json::Value> = f.scheduler.get(&stale).await.unwrap();
    assert!(record.is_some());
}

#[tokio::test]
async fn unrecognized_path_is_dropped_from_the_index() {
    let mut f = fixture();
    let odd = ResourcePath::parse("orphan").unwrap();
    f.scheduler.set(&odd, &json!({}), Some(Due::At(Utc::now()))).await.unwrap();

    f.dispatcher.tick().await;

    assert_eq!(f.upstream.metadata_calls.load(Ordering::SeqCst), 0);
    assert_eq!(f.upstream.lessons_calls.load(Ordering::SeqCst), 0);
    // The entry is untracked so it cannot win selection again; the record
    // itself survives.
    let index = f.store.hash_get_all(NEXT_UPDATES_KEY).await.unwrap();
    assert!(!index.contains_key("orphan"));
    let record: Option<serde_json::Value> = f.scheduler.get(&odd).await.unwrap();
    assert!(record.is_some());
}

#[tokio::test(start_paused = true)]
async fn run_stops_on_shutdown_between_ticks() {
    let f = fixture();
    let signal = f.signal.clone();
    let mut dispatcher = f.dispatcher;

    let handle = tokio::spawn(async move { dispatcher.run().await });
    tokio::task::yield_now().await;
    signal.request();

    handle.await.unwrap().unwrap();
}
