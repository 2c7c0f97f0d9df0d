//! Entry locking and the field-level audit trail, end to end against a
//! real database file.

mod common;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;

use tallyclock::db::EntryFilter;
use tallyclock::error::DatabaseError;

use common::{at, client, entry, open_db, reject_updates};

#[tokio::test]
async fn locked_entry_rejects_edits_and_deletes() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let worked = entry(&db, acme.id, 2, 60, dec!(80)).await;
    let invoice = db
        .create_invoice(&tallyclock::model::Invoice::draft(
            "INV-2026-001",
            acme.id,
            common::date(2026, 3, 1),
            common::date(2026, 3, 31),
        ))
        .await
        .expect("invoice");

    db.lock_entries_for_invoice(&[worked.id], invoice.id)
        .await
        .expect("lock");
    assert!(db.is_entry_locked(worked.id).await.expect("locked"));

    let mut edited = worked.clone();
    edited.description = "rewritten".to_string();
    let err = db.update_entry(&edited, "typo").await.unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::Locked { entry_id, invoice_id } if entry_id == worked.id && invoice_id == invoice.id
    ));

    let err = db.soft_delete_entry(worked.id, "oops").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Locked { .. }));

    let stored = db.get_entry(worked.id).await.expect("get").expect("exists");
    assert_eq!(stored.description, "work");
    assert!(!stored.is_deleted);
    assert!(db.entry_history(worked.id).await.expect("history").is_empty());
}

#[tokio::test]
async fn lock_is_reported_before_validation() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let worked = entry(&db, acme.id, 2, 60, dec!(80)).await;
    let invoice = db
        .create_invoice(&tallyclock::model::Invoice::draft(
            "INV-2026-001",
            acme.id,
            common::date(2026, 3, 1),
            common::date(2026, 3, 31),
        ))
        .await
        .expect("invoice");
    db.lock_entries_for_invoice(&[worked.id], invoice.id)
        .await
        .expect("lock");

    let mut invalid = worked.clone();
    invalid.end_time = Some(worked.start_time - chrono::Duration::hours(1));
    let err = db.update_entry(&invalid, "backdate").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Locked { entry_id, .. } if entry_id == worked.id));
}

#[tokio::test]
async fn invalid_edit_of_unlocked_entry_is_a_validation_error() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let worked = entry(&db, acme.id, 2, 60, dec!(80)).await;

    let mut invalid = worked.clone();
    invalid.end_time = Some(worked.start_time - chrono::Duration::hours(1));
    let err = db.update_entry(&invalid, "backdate").await.unwrap_err();
    assert!(matches!(err, DatabaseError::Validation(_)));
    assert!(db.entry_history(worked.id).await.expect("history").is_empty());
}

#[tokio::test]
async fn batch_lock_is_all_or_nothing() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let first = entry(&db, acme.id, 2, 60, dec!(80)).await;
    let second = entry(&db, acme.id, 3, 60, dec!(80)).await;
    let draft = |n: &str| {
        tallyclock::model::Invoice::draft(n, acme.id, common::date(2026, 3, 1), common::date(2026, 3, 31))
    };
    let earlier = db.create_invoice(&draft("INV-2026-001")).await.expect("invoice");
    let later = db.create_invoice(&draft("INV-2026-002")).await.expect("invoice");

    db.lock_entries_for_invoice(&[second.id], earlier.id)
        .await
        .expect("lock second");

    let err = db
        .lock_entries_for_invoice(&[first.id, second.id], later.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DatabaseError::LockConflict { entry_id } if entry_id == second.id));

    assert!(!db.is_entry_locked(first.id).await.expect("first"));
    let second = db.get_entry(second.id).await.expect("get").expect("exists");
    assert_eq!(second.invoice_id, Some(earlier.id));
}

#[tokio::test]
async fn unknown_entry_has_no_lock_state() {
    let (db, _dir) = open_db().await;
    let err = db.is_entry_locked(404).await.unwrap_err();
    assert!(matches!(err, DatabaseError::NotFound { .. }));
}

#[tokio::test]
async fn every_changed_field_gets_one_history_row() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let original = entry(&db, acme.id, 2, 60, dec!(80)).await;

    let mut edited = original.clone();
    edited.description = "client workshop".to_string();
    edited.hourly_rate = dec!(95.50);
    edited.reschedule(original.start_time, Some(at(2, 10, 30)));
    db.update_entry(&edited, "client asked for detail")
        .await
        .expect("update");

    let history = db.entry_history(original.id).await.expect("history");
    let mut fields: Vec<&str> = history.iter().map(|h| h.field_name.as_str()).collect();
    fields.sort_unstable();
    assert_eq!(
        fields,
        vec!["description", "duration_seconds", "end_time", "hourly_rate"]
    );
    assert!(history.iter().all(|h| h.change_reason == "client asked for detail"));

    let rate = history
        .iter()
        .find(|h| h.field_name == "hourly_rate")
        .expect("rate row");
    assert_eq!(rate.old_value, "80");
    assert_eq!(rate.new_value, "95.5");

    let duration = history
        .iter()
        .find(|h| h.field_name == "duration_seconds")
        .expect("duration row");
    assert_eq!(duration.old_value, "3600");
    assert_eq!(duration.new_value, "5400");
}

#[tokio::test]
async fn unchanged_update_writes_no_history() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let original = entry(&db, acme.id, 2, 60, dec!(80)).await;

    db.update_entry(&original, "no-op").await.expect("update");
    assert!(db.entry_history(original.id).await.expect("history").is_empty());
}

#[tokio::test]
async fn history_matches_the_stored_description() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let original = entry(&db, acme.id, 2, 60, dec!(80)).await;

    let mut padded = original.clone();
    padded.description = "work  ".to_string();
    let stored = db.update_entry(&padded, "whitespace").await.expect("update");
    assert_eq!(stored.description, "work");
    assert!(db.entry_history(original.id).await.expect("history").is_empty());

    let mut renamed = original.clone();
    renamed.description = "  design review ".to_string();
    let stored = db.update_entry(&renamed, "rename").await.expect("update");
    let history = db.entry_history(original.id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_value, "work");
    assert_eq!(history[0].new_value, stored.description);
    assert_eq!(stored.description, "design review");
}

#[tokio::test]
async fn failed_update_rolls_back_its_history() {
    let (db, dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let original = entry(&db, acme.id, 2, 60, dec!(80)).await;
    reject_updates(&dir, "time_entries").await;

    let mut edited = original.clone();
    edited.description = "rewritten".to_string();
    edited.hourly_rate = dec!(90);
    assert!(db.update_entry(&edited, "rename").await.is_err());
    assert!(db.soft_delete_entry(original.id, "duplicate").await.is_err());

    assert!(db.entry_history(original.id).await.expect("history").is_empty());
    let stored = db.get_entry(original.id).await.expect("get").expect("exists");
    assert_eq!(stored.description, "work");
    assert_eq!(stored.hourly_rate, dec!(80));
    assert!(!stored.is_deleted);
}

#[tokio::test]
async fn history_is_newest_first_and_records_deletion() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let original = entry(&db, acme.id, 2, 60, dec!(80)).await;

    let mut edited = original.clone();
    edited.description = "first pass".to_string();
    db.update_entry(&edited, "rename").await.expect("update");
    db.soft_delete_entry(original.id, "duplicate").await.expect("delete");

    let history = db.entry_history(original.id).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].field_name, "is_deleted");
    assert_eq!(history[0].old_value, "false");
    assert_eq!(history[0].new_value, "true");
    assert_eq!(history[0].change_reason, "duplicate");
    assert_eq!(history[1].field_name, "description");
    assert_eq!(history[1].old_value, "work");

    let listed = db.list_entries(&EntryFilter::default()).await.expect("list");
    assert!(listed.iter().all(|e| e.id != original.id));
}

#[tokio::test]
async fn listing_filters_by_client_period_and_lock() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    let globex = client(&db, "Globex", dec!(120)).await;
    let early = entry(&db, acme.id, 2, 60, dec!(80)).await;
    let late = entry(&db, acme.id, 20, 60, dec!(80)).await;
    let other = entry(&db, globex.id, 2, 60, dec!(120)).await;
    let invoice = db
        .create_invoice(&tallyclock::model::Invoice::draft(
            "INV-2026-001",
            acme.id,
            common::date(2026, 3, 1),
            common::date(2026, 3, 31),
        ))
        .await
        .expect("invoice");
    db.lock_entries_for_invoice(&[late.id], invoice.id)
        .await
        .expect("lock");

    let acme_unlocked = db
        .list_entries(&EntryFilter {
            client_id: Some(acme.id),
            ..EntryFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(acme_unlocked.iter().map(|e| e.id).collect::<Vec<_>>(), vec![early.id]);

    let acme_all = db
        .list_entries(&EntryFilter {
            client_id: Some(acme.id),
            include_locked: true,
            ..EntryFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(acme_all.len(), 2);

    let in_window = db
        .list_entries(&EntryFilter {
            start: Some(at(1, 0, 0)),
            end: Some(at(5, 0, 0)),
            include_locked: true,
            ..EntryFilter::default()
        })
        .await
        .expect("list");
    let mut ids: Vec<i64> = in_window.iter().map(|e| e.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![early.id, other.id]);

    let unbilled = db
        .list_unbilled_entries(acme.id, at(1, 0, 0), at(31, 23, 59))
        .await
        .expect("unbilled");
    assert_eq!(unbilled.iter().map(|e| e.id).collect::<Vec<_>>(), vec![early.id]);
}

#[tokio::test]
async fn clients_can_be_archived_and_restored() {
    let (db, _dir) = open_db().await;
    let acme = client(&db, "Acme", dec!(80)).await;
    client(&db, "Globex", dec!(120)).await;

    assert!(db.set_client_archived(acme.id, true).await.expect("archive"));
    let active = db.list_clients(false).await.expect("list");
    assert_eq!(active.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["Globex"]);
    assert_eq!(db.list_clients(true).await.expect("list").len(), 2);

    assert!(db.set_client_archived(acme.id, false).await.expect("restore"));
    assert_eq!(db.list_clients(false).await.expect("list").len(), 2);
    assert!(!db.set_client_archived(999, true).await.expect("missing"));

    let found = db.get_client_by_name("Acme").await.expect("by name").expect("exists");
    assert_eq!(found.id, acme.id);
}
