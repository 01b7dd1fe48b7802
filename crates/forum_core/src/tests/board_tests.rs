use super::*;
use chrono::Duration;
use shared::{
    catalog,
    domain::{ThreadId, User, UserId, UserRef},
};
use storage::MemoryThreadStore;

use crate::{
    identity::SessionIdentity,
    notify::{BroadcastNotifier, NotificationLevel},
};

fn alice() -> User {
    User {
        id: UserId::new("u-alice"),
        username: "alice".into(),
        email: "alice@example.com".into(),
        is_moderator: false,
    }
}

fn tag(name: &str) -> Tag {
    catalog::tag_by_name(name).expect("catalog tag")
}

fn thread(title: &str, tags: &[&str], minutes_ago: i64) -> Thread {
    Thread {
        id: ThreadId::new(),
        title: title.into(),
        description: "A thread on the board".into(),
        category: Category::SoftwareDevelopment,
        creator: UserRef {
            id: UserId::new("u-bob"),
            username: "bob".into(),
        },
        creation_date: Utc::now() - Duration::minutes(minutes_ago),
        comments: Vec::new(),
        tags: tags.iter().map(|name| tag(name)).collect(),
        is_qna: false,
        is_answered: false,
        answered_comment_id: None,
        is_locked: false,
        version: 1,
    }
}

struct Fixture {
    store: Arc<MemoryThreadStore>,
    notifier: Arc<BroadcastNotifier>,
    identity: Arc<SessionIdentity>,
    board: ThreadBoard,
}

async fn fixture(threads: Vec<Thread>) -> Fixture {
    let store = Arc::new(MemoryThreadStore::with_threads(threads).await);
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let identity = Arc::new(SessionIdentity::signed_in(alice()));
    let ctx = ForumContext::new(store.clone(), notifier.clone());
    let board = ThreadBoard::new(ctx, identity.clone());
    Fixture {
        store,
        notifier,
        identity,
        board,
    }
}

fn titles(threads: &[Thread]) -> Vec<&str> {
    threads.iter().map(|t| t.title.as_str()).collect()
}

fn draft(title: &str) -> ThreadDraft {
    ThreadDraft {
        title: title.into(),
        description: "How do I configure the reverse proxy?".into(),
        category: Category::NetworkingSecurity,
        is_qna: true,
        tag_ids: vec!["2".into(), "1".into()],
    }
}

#[tokio::test]
async fn toggling_tags_narrows_and_widens_the_board() {
    let f = fixture(vec![
        thread("A", &["Frontend"], 3),
        thread("B", &["Azure"], 2),
        thread("C", &["Frontend", "Backend"], 1),
    ])
    .await;
    f.board.load().await.expect("load");

    assert_eq!(titles(&f.board.filtered_threads().await), vec!["C", "B", "A"]);

    assert!(f.board.toggle_tag(tag("Frontend")).await);
    assert_eq!(titles(&f.board.filtered_threads().await), vec!["C", "A"]);

    assert!(f.board.toggle_tag(tag("Azure")).await);
    assert_eq!(titles(&f.board.filtered_threads().await), vec!["C", "B", "A"]);

    assert!(!f.board.toggle_tag(tag("Frontend")).await);
    assert_eq!(titles(&f.board.filtered_threads().await), vec!["B"]);

    // Filtering works on the fetched list only.
    assert_eq!(f.store.fetch_count(), 1);
}

#[tokio::test]
async fn load_fetches_once_and_refresh_refetches() {
    let f = fixture(vec![thread("A", &[], 1)]).await;

    assert_eq!(f.board.load().await.expect("first load"), 1);
    f.store.insert_thread(thread("B", &[], 0)).await;
    assert_eq!(f.board.load().await.expect("second load"), 1);
    assert_eq!(f.store.fetch_count(), 1);

    assert_eq!(f.board.refresh().await.expect("refresh"), 2);
    assert_eq!(f.store.fetch_count(), 2);
    assert_eq!(titles(&f.board.threads().await), vec!["B", "A"]);
}

#[tokio::test]
async fn failed_refresh_keeps_last_known_threads() {
    let f = fixture(vec![thread("A", &["Routing"], 1)]).await;
    f.board.load().await.expect("load");

    let mut notes = f.notifier.subscribe();
    f.store.set_fail_reads(true);
    let err = f.board.refresh().await.expect_err("refresh should fail");
    assert!(matches!(err, ForumError::Persistence(_)));
    assert_eq!(titles(&f.board.threads().await), vec!["A"]);
    assert_eq!(
        notes.recv().await.expect("notification").level,
        NotificationLevel::Failure
    );
}

#[tokio::test]
async fn select_tag_and_category_narrowing() {
    let mut cloud = thread("Cloud", &["Azure"], 2);
    cloud.category = Category::CloudComputing;
    let f = fixture(vec![cloud, thread("Code", &["Azure"], 1)]).await;
    f.board.load().await.expect("load");

    f.board.select_tag(Some(tag("Azure"))).await;
    assert_eq!(f.board.selected_tag().await, Some(tag("Azure")));
    assert_eq!(
        titles(&f.board.filtered_threads_in(Some(Category::CloudComputing)).await),
        vec!["Cloud"]
    );
    assert_eq!(f.board.filtered_threads_in(None).await.len(), 2);

    f.board.clear_filter().await;
    assert!(f.board.selected_tags().await.is_empty());
}

#[tokio::test]
async fn filter_changes_are_published() {
    let f = fixture(Vec::new()).await;
    let mut events = f.board.subscribe_events();

    f.board.toggle_tag(tag("Backend")).await;
    assert_eq!(
        events.recv().await.expect("event"),
        ForumEvent::FilterChanged {
            selected: vec![tag("Backend")]
        }
    );
}

#[tokio::test]
async fn create_thread_persists_and_prepends() {
    let f = fixture(vec![thread("Older", &[], 5)]).await;
    f.board.load().await.expect("load");
    let mut notes = f.notifier.subscribe();

    let created = f
        .board
        .create_thread(draft("Reverse proxy setup"))
        .await
        .expect("create");

    assert_eq!(created.creator.id, alice().id);
    assert_eq!(created.tags, vec![tag("Routing"), tag("Cybersecurity")]);
    assert!(created.is_qna && !created.is_answered && !created.is_locked);
    assert_eq!(titles(&f.board.threads().await), vec!["Reverse proxy setup", "Older"]);
    assert_eq!(f.store.write_count(), 1);

    let note = notes.recv().await.expect("notification");
    assert_eq!(note.level, NotificationLevel::Success);
}

#[tokio::test]
async fn create_thread_rejects_invalid_drafts_without_writing() {
    let f = fixture(Vec::new()).await;
    let mut notes = f.notifier.subscribe();

    let err = f.board.create_thread(draft("Short")).await.expect_err("short title");
    assert!(matches!(err, ForumError::Validation(_)));

    let mut unknown_tag = draft("A perfectly fine title");
    unknown_tag.tag_ids = vec!["42".into()];
    let err = f.board.create_thread(unknown_tag).await.expect_err("unknown tag");
    assert!(matches!(err, ForumError::Validation(_)));

    assert_eq!(f.store.write_count(), 0);
    assert!(f.board.threads().await.is_empty());
    assert_eq!(
        notes.recv().await.expect("notification").level,
        NotificationLevel::Failure
    );
}

#[tokio::test]
async fn anonymous_users_cannot_create_threads() {
    let f = fixture(Vec::new()).await;
    f.identity.sign_out();

    let err = f
        .board
        .create_thread(draft("Reverse proxy setup"))
        .await
        .expect_err("anonymous");
    assert!(matches!(err, ForumError::Unauthenticated));
    assert_eq!(f.store.write_count(), 0);
}

#[tokio::test]
async fn failed_create_leaves_board_unchanged() {
    let f = fixture(vec![thread("Existing", &[], 1)]).await;
    f.board.load().await.expect("load");
    f.store.set_fail_writes(true);

    let err = f
        .board
        .create_thread(draft("Reverse proxy setup"))
        .await
        .expect_err("write failure");
    assert!(matches!(err, ForumError::Persistence(_)));
    assert_eq!(titles(&f.board.threads().await), vec!["Existing"]);
}

#[tokio::test]
async fn closed_board_does_not_fetch() {
    let f = fixture(vec![thread("A", &[], 1)]).await;
    f.board.close();

    let err = f.board.load().await.expect_err("cancelled");
    assert!(matches!(err, ForumError::Cancelled));
    assert!(f.board.threads().await.is_empty());
}

#[tokio::test]
async fn parent_cancellation_reaches_the_board() {
    let store = Arc::new(MemoryThreadStore::new());
    let ctx = ForumContext::new(store, Arc::new(BroadcastNotifier::new(4)));
    let parent = CancellationToken::new();
    let board = ThreadBoard::with_cancellation(ctx, Arc::new(SessionIdentity::anonymous()), parent.clone());

    parent.cancel();
    assert!(matches!(board.refresh().await, Err(ForumError::Cancelled)));
}

#[tokio::test]
async fn dropping_the_board_leaves_the_parent_token_alone() {
    let store = Arc::new(MemoryThreadStore::new());
    let ctx = ForumContext::new(store, Arc::new(BroadcastNotifier::new(4)));
    let parent = CancellationToken::new();
    let board = ThreadBoard::with_cancellation(ctx, Arc::new(SessionIdentity::anonymous()), parent.clone());

    drop(board);
    assert!(!parent.is_cancelled());
}
