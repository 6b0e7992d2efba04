//! Book merge integration tests

mod helpers;

use helpers::{admin, create_test_services, member, seed_book, seed_isbn_row, table_snapshot};
use rdtk_common::db::get_book_record;
use rdtk_im::isbn::IsbnDetails;

async fn canonical_counts_per_group(pool: &sqlx::SqlitePool) -> Vec<(i64, i64)> {
    sqlx::query_as(
        "SELECT group_id, SUM(is_canonical) FROM book_identity GROUP BY group_id ORDER BY group_id",
    )
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_self_merge_conflicts_without_changes() {
    let env = create_test_services().await.unwrap();
    let a = seed_book(env.pool(), "Dune", Some("Frank Herbert")).await;
    env.services
        .isbns
        .add_isbn(&admin(), a, "978-0441013593", IsbnDetails::primary())
        .await
        .unwrap();

    let before = table_snapshot(env.pool()).await;
    let err = env
        .services
        .merges
        .merge_books(&admin(), a, a, true, "same record")
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(table_snapshot(env.pool()).await, before);
}

#[tokio::test]
async fn test_merge_resolves_source_to_target_with_one_record() {
    let env = create_test_services().await.unwrap();
    let a = seed_book(env.pool(), "Dune", None).await;
    let b = seed_book(env.pool(), "Dune (2nd ed.)", None).await;

    let record = env
        .services
        .merges
        .merge_books(&admin(), a, b, false, "duplicate upload")
        .await
        .unwrap();
    assert_eq!((record.from_id, record.to_id), (a, b));
    assert_eq!(record.operator, 1);
    assert_eq!(record.reason, "duplicate upload");

    assert_eq!(env.services.identity.get_canonical(a).await.unwrap(), b);
    assert_eq!(env.services.identity.get_canonical(b).await.unwrap(), b);
    assert!(!env.services.identity.is_canonical(a).await.unwrap());
    assert_eq!(env.services.merge_log.book_merge_count(a, b).await.unwrap(), 1);
    assert_eq!(env.services.merge_log.prior_identities(b).await.unwrap(), vec![a]);
}

#[tokio::test]
async fn test_merged_source_cannot_merge_again_but_target_can() {
    let env = create_test_services().await.unwrap();
    let a = seed_book(env.pool(), "A", None).await;
    let b = seed_book(env.pool(), "B", None).await;
    let c = seed_book(env.pool(), "C", None).await;
    let merges = &env.services.merges;

    merges.merge_books(&admin(), a, b, false, "dup").await.unwrap();

    let err = merges
        .merge_books(&admin(), a, c, false, "dup")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    // Merging into a retired record is rejected as well
    let err = merges
        .merge_books(&admin(), c, a, false, "dup")
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    merges.merge_books(&admin(), b, c, false, "dup").await.unwrap();

    let identity = &env.services.identity;
    assert_eq!(identity.get_canonical(a).await.unwrap(), c);
    assert_eq!(identity.get_canonical(b).await.unwrap(), c);
    assert_eq!(identity.group_members(a).await.unwrap(), vec![c, a, b]);
    assert_eq!(
        env.services.merge_log.prior_identities(c).await.unwrap(),
        vec![a, b]
    );

    for (_, canonical) in canonical_counts_per_group(env.pool()).await {
        assert_eq!(canonical, 1);
    }
}

#[tokio::test]
async fn test_shared_isbn_is_coalesced_and_target_primary_kept() {
    let env = create_test_services().await.unwrap();
    let book_10 = seed_book(env.pool(), "Ten", None).await;
    let book_20 = seed_book(env.pool(), "Twenty", None).await;

    seed_isbn_row(env.pool(), book_10, "978-1", false).await;
    seed_isbn_row(env.pool(), book_10, "978-2", true).await;
    // Legacy data: the same isbn also recorded on the duplicate
    seed_isbn_row(env.pool(), book_20, "978-1", false).await;

    env.services
        .merges
        .merge_books(&admin(), book_20, book_10, false, "same work")
        .await
        .unwrap();

    let isbns = env.services.isbns.list_for_book(book_10).await.unwrap();
    assert_eq!(isbns.len(), 2);
    assert_eq!(isbns[0].isbn, "978-2");
    assert!(isbns[0].is_primary);
    assert_eq!(isbns[1].isbn, "978-1");
    assert!(!isbns[1].is_primary);

    assert!(env
        .services
        .isbns
        .list_for_book(book_20)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_smallest_isbn_promoted_when_target_has_no_primary() {
    let env = create_test_services().await.unwrap();
    let from = seed_book(env.pool(), "From", None).await;
    let to = seed_book(env.pool(), "To", None).await;
    let isbns = &env.services.isbns;

    isbns
        .add_isbn(&admin(), from, "978-9", IsbnDetails::primary())
        .await
        .unwrap();
    isbns
        .add_isbn(&admin(), from, "978-3", IsbnDetails::default())
        .await
        .unwrap();
    isbns
        .add_isbn(&admin(), to, "978-5", IsbnDetails::default())
        .await
        .unwrap();

    env.services
        .merges
        .merge_books(&admin(), from, to, false, "dup")
        .await
        .unwrap();

    let primary = isbns.primary_isbn(to).await.unwrap().unwrap();
    assert_eq!(primary.isbn, "978-3");
    assert_eq!(isbns.list_for_book(to).await.unwrap().len(), 3);
    assert_eq!(isbns.find_book_by_isbn("978-9").await.unwrap(), Some(to));
}

#[tokio::test]
async fn test_sync_metadata_copies_target_fields_onto_source() {
    let env = create_test_services().await.unwrap();
    let pool = env.pool();
    let stale = seed_book(pool, "dune", Some("f. herbert")).await;
    let keep = seed_book(pool, "Untouched", Some("Someone")).await;
    let target = rdtk_common::db::create_book(
        pool,
        &rdtk_common::db::NewBook::new("Dune")
            .with_author("Frank Herbert")
            .with_page_count(412),
    )
    .await
    .unwrap();
    let other_target = seed_book(pool, "Other", Some("Other Author")).await;

    let merges = &env.services.merges;
    let record = merges
        .merge_books(&admin(), stale, target, true, "dup")
        .await
        .unwrap();
    assert!(record.sync_metadata);
    merges
        .merge_books(&admin(), keep, other_target, false, "dup")
        .await
        .unwrap();

    let synced = get_book_record(pool, stale).await.unwrap();
    assert_eq!(synced.title, "Dune");
    assert_eq!(synced.author.as_deref(), Some("Frank Herbert"));
    assert_eq!(synced.page_count, Some(412));

    let untouched = get_book_record(pool, keep).await.unwrap();
    assert_eq!(untouched.title, "Untouched");
    assert_eq!(untouched.author.as_deref(), Some("Someone"));
}

#[tokio::test]
async fn test_failed_log_append_rolls_back_whole_merge() {
    let env = create_test_services().await.unwrap();
    let pool = env.pool();
    let from = seed_book(pool, "From", Some("Anon")).await;
    let to = seed_book(pool, "To", Some("Known")).await;
    seed_isbn_row(pool, from, "978-7", true).await;

    sqlx::query(
        r#"
        CREATE TRIGGER reject_merge_log BEFORE INSERT ON book_merge_log
        BEGIN
            SELECT RAISE(ABORT, 'audit log unavailable');
        END
        "#,
    )
    .execute(pool)
    .await
    .unwrap();

    let before = table_snapshot(pool).await;
    let err = env
        .services
        .merges
        .merge_books(&admin(), from, to, true, "dup")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("audit log unavailable"));
    assert_eq!(table_snapshot(pool).await, before);
    assert_eq!(env.services.identity.get_canonical(from).await.unwrap(), from);
}

#[tokio::test]
async fn test_bulk_merge_isolates_bad_source() {
    let env = create_test_services().await.unwrap();
    let target = seed_book(env.pool(), "Target", None).await;
    let a = seed_book(env.pool(), "A", None).await;
    let b = seed_book(env.pool(), "B", None).await;
    let missing = 9_999;

    let report = env
        .services
        .merges
        .bulk_merge(&admin(), target, &[a, missing, b], false, "cleanup")
        .await
        .unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].source_id, missing);
    assert_eq!(report.errors[0].code, "NOT_FOUND");

    let identity = &env.services.identity;
    assert_eq!(identity.get_canonical(a).await.unwrap(), target);
    assert_eq!(identity.get_canonical(b).await.unwrap(), target);
}

#[tokio::test]
async fn test_member_merge_denied_without_changes() {
    let env = create_test_services().await.unwrap();
    let a = seed_book(env.pool(), "A", None).await;
    let b = seed_book(env.pool(), "B", None).await;

    let before = table_snapshot(env.pool()).await;
    let err = env
        .services
        .merges
        .merge_books(&member(), a, b, false, "dup")
        .await
        .unwrap_err();
    assert!(err.is_permission_denied());
    assert_eq!(table_snapshot(env.pool()).await, before);
}
