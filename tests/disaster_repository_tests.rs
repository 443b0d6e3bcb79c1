use chrono::{TimeZone, Utc};
use disaster_alerts::domain::Disaster;
use disaster_alerts::ingest::validate_declaration;
use disaster_alerts::repositories::{DisasterRepository, DisasterStore, DisasterUpsert};
mod test_utils;
use test_utils::{declaration, setup_test_db};

fn disaster(id: &str, county: &str, last_refresh: &str) -> Disaster {
    validate_declaration(&declaration(id, "25", county, last_refresh)).expect("valid fixture")
}

#[tokio::test]
async fn upserting_the_same_declaration_twice_stores_one_row() {
    let db = setup_test_db().await.unwrap();
    let repo = DisasterRepository::new(db);
    let now = Utc::now();
    let record = disaster("d-1", "017", "2025-09-02T10:00:00.000Z");

    assert_eq!(
        repo.upsert_disaster(&record, now).await.unwrap(),
        DisasterUpsert::Inserted
    );
    assert_eq!(
        repo.upsert_disaster(&record, now).await.unwrap(),
        DisasterUpsert::Unchanged
    );

    assert_eq!(repo.count().await.unwrap(), 1);
    let stored = repo.find_by_id("d-1").await.unwrap().expect("row stored");
    assert_eq!(stored, record);
}

#[tokio::test]
async fn refresh_only_change_does_not_reopen_fanout() {
    let db = setup_test_db().await.unwrap();
    let repo = DisasterRepository::new(db);
    let now = Utc::now();

    repo.upsert_disaster(&disaster("d-1", "017", "2025-09-02T10:00:00.000Z"), now)
        .await
        .unwrap();
    repo.mark_fanout_complete("d-1", now).await.unwrap();

    let refreshed = disaster("d-1", "017", "2025-09-03T10:00:00.000Z");
    let result = repo.upsert_disaster(&refreshed, now).await.unwrap();

    assert_eq!(result, DisasterUpsert::Updated { material: false });
    assert!(!result.needs_fanout());
    assert!(repo.find_pending_fanout(10).await.unwrap().is_empty());
    assert_eq!(
        repo.find_by_id("d-1").await.unwrap().unwrap().last_refresh,
        Utc.with_ymd_and_hms(2025, 9, 3, 10, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn material_change_reopens_fanout() {
    let db = setup_test_db().await.unwrap();
    let repo = DisasterRepository::new(db);
    let now = Utc::now();

    repo.upsert_disaster(&disaster("d-1", "017", "2025-09-02T10:00:00.000Z"), now)
        .await
        .unwrap();
    repo.mark_fanout_complete("d-1", now).await.unwrap();
    assert!(repo.find_pending_fanout(10).await.unwrap().is_empty());

    let moved = disaster("d-1", "021", "2025-09-03T10:00:00.000Z");
    let result = repo.upsert_disaster(&moved, now).await.unwrap();

    assert_eq!(result, DisasterUpsert::Updated { material: true });
    let pending = repo.find_pending_fanout(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].fips_county_code, 21);
}

#[tokio::test]
async fn pending_fanout_respects_limit_and_completion() {
    let db = setup_test_db().await.unwrap();
    let repo = DisasterRepository::new(db);
    let now = Utc::now();

    for id in ["d-1", "d-2", "d-3"] {
        repo.upsert_disaster(&disaster(id, "017", "2025-09-02T10:00:00.000Z"), now)
            .await
            .unwrap();
    }

    let first_two = repo.find_pending_fanout(2).await.unwrap();
    assert_eq!(
        first_two.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        vec!["d-1", "d-2"]
    );

    repo.mark_fanout_complete("d-2", now).await.unwrap();
    let remaining = repo.find_pending_fanout(10).await.unwrap();
    assert_eq!(
        remaining.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        vec!["d-1", "d-3"]
    );
}
