use asupersync::runtime::RuntimeBuilder;
use asupersync::{Cx, Outcome};

use minorm::prelude::*;
use std::sync::Arc;

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn expect_err<T>(outcome: Outcome<T, Error>) -> Error {
    match outcome {
        Outcome::Err(e) => e,
        Outcome::Ok(_) => panic!("expected an error"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

#[derive(Debug, Default)]
struct Product {
    id: i64,
    name: String,
    price: Decimal,
}

impl Entity for Product {
    fn declare() -> EntityDeclaration<Self> {
        EntityDeclaration::new()
            .table("PRODUCT")
            .field(
                FieldDeclaration::new("id", |p: &Product| &p.id, |p| &mut p.id)
                    .column("ID")
                    .identifier(),
            )
            .field(FieldDeclaration::new("name", |p: &Product| &p.name, |p| &mut p.name).column("NAME"))
            .field(FieldDeclaration::new("price", |p: &Product| &p.price, |p| &mut p.price).column("PRICE"))
    }
}

/// A shop database with three products, isolated per test by `name`.
fn shop(name: &str) -> SqliteDataSource {
    let source = SqliteDataSource::memory(name).expect("open shared memory db");
    source
        .execute_batch(
            "CREATE TABLE PRODUCT (ID INTEGER PRIMARY KEY, NAME TEXT NOT NULL UNIQUE, PRICE TEXT NOT NULL);
             INSERT INTO PRODUCT VALUES (1, 'A', '10.50');
             INSERT INTO PRODUCT VALUES (2, 'B', '2.00');
             INSERT INTO PRODUCT VALUES (3, 'C', '3.00');",
        )
        .expect("create schema");
    source
}

fn stored(source: &SqliteDataSource, id: i64) -> (String, String) {
    let conn = source.connect().expect("connect");
    let cx = Cx::for_testing();
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let row = rt.block_on(conn.query_one(
        &cx,
        "SELECT NAME, PRICE FROM PRODUCT WHERE ID = ?1",
        &[Value::BigInt(id)],
    ));
    let row = unwrap_outcome(row).expect("row exists");
    (
        row.get_named::<String>("NAME").unwrap(),
        row.get_named::<String>("PRICE").unwrap(),
    )
}

#[test]
fn changed_field_is_persisted_on_close() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_round_trip"));

    rt.block_on(async {
        let mut session = factory.open();
        let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        assert_eq!(product.read().unwrap().name, "A");
        product.write().unwrap().name = "B-renamed".to_string();
        let report = unwrap_outcome(session.close(&cx).await);
        assert_eq!(report.updated, vec!["Product#1".to_string()]);
        assert_eq!(report.rows_affected, 1);

        let mut session = factory.open();
        let reloaded = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        assert!(!Arc::ptr_eq(&product, &reloaded));
        assert_eq!(reloaded.read().unwrap().name, "B-renamed");
        unwrap_outcome(session.close(&cx).await);
    });

    assert_eq!(
        stored(factory.source(), 1),
        ("B-renamed".to_string(), "10.50".to_string())
    );
    let source = factory.source();
    assert_eq!(source.acquired(), 3);
    assert_eq!(source.in_use(), 0);
}

#[test]
fn repeated_find_shares_one_instance_and_one_select() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_identity"));
    let mut session = factory.open();

    rt.block_on(async {
        let first = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        let second = unwrap_outcome(session.find::<Product>(&cx, 1_i32).await);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.read().unwrap().price, Decimal::parse("10.5").unwrap());
    });

    assert_eq!(factory.source().acquired(), 1);
    assert_eq!(session.tracked_count(), 1);
    rt.block_on(async {
        unwrap_outcome(session.close(&cx).await);
    });
}

#[test]
fn text_identifier_resolves_to_the_tracked_row() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_text_identifier"));

    let report = rt.block_on(async {
        let mut session = factory.open();
        let by_number = unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
        let by_text = unwrap_outcome(session.find::<Product>(&cx, "2").await);
        assert!(Arc::ptr_eq(&by_number, &by_text));
        assert_eq!(session.tracked_count(), 1);
        by_text.write().unwrap().name = "B-text".to_string();
        unwrap_outcome(session.close(&cx).await)
    });

    assert_eq!(report.updated, vec!["Product#2".to_string()]);
    assert_eq!(stored(factory.source(), 2).0, "B-text");
}

#[test]
fn untouched_entities_issue_no_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_no_changes"));

    let report = rt.block_on(async {
        let mut session = factory.open();
        unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
        unwrap_outcome(session.close(&cx).await)
    });

    assert!(report.is_empty());
    assert_eq!(factory.source().acquired(), 2);
}

#[test]
fn equal_decimal_reassignment_is_not_dirty() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_decimal_scale"));

    let report = rt.block_on(async {
        let mut session = factory.open();
        let product = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        {
            let mut product = product.write().unwrap();
            product.price = Decimal::parse("10.5").unwrap();
            product.name = String::from("A");
        }
        unwrap_outcome(session.close(&cx).await)
    });

    assert!(report.is_empty());
    assert_eq!(stored(factory.source(), 1).1, "10.50");
}

#[test]
fn two_changed_fields_share_one_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_two_fields"));

    let report = rt.block_on(async {
        let mut session = factory.open();
        let product = unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
        {
            let mut product = product.write().unwrap();
            product.name = "B2".to_string();
            product.price = Decimal::parse("2.25").unwrap();
        }
        unwrap_outcome(session.close(&cx).await)
    });

    assert_eq!(report.statements(), 1);
    assert_eq!(
        stored(factory.source(), 2),
        ("B2".to_string(), "2.25".to_string())
    );
}

#[test]
fn missing_identifier_is_not_found() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_not_found"));
    let mut session = factory.open();

    rt.block_on(async {
        let err = expect_err(session.find::<Product>(&cx, 99_i64).await);
        assert!(err.is_not_found());
        assert!(!session.is_tracked::<Product>(99_i64));
        unwrap_outcome(session.close(&cx).await);
    });
    assert_eq!(factory.source().in_use(), 0);
}

#[test]
fn row_deleted_behind_the_session_is_reported_unmatched() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_deleted_row"));

    let report = rt.block_on(async {
        let mut session = factory.open();
        let product = unwrap_outcome(session.find::<Product>(&cx, 3_i64).await);
        factory
            .source()
            .execute_batch("DELETE FROM PRODUCT WHERE ID = 3")
            .unwrap();
        product.write().unwrap().name = "gone".to_string();
        unwrap_outcome(session.close(&cx).await)
    });

    assert_eq!(report.rows_affected, 0);
    assert_eq!(report.unmatched, vec!["Product#3".to_string()]);
}

#[test]
fn failed_update_aborts_remaining_by_default() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_abort"));

    let err = rt.block_on(async {
        let mut session = factory.open();
        let first = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        let second = unwrap_outcome(session.find::<Product>(&cx, 2_i64).await);
        first.write().unwrap().name = "B".to_string();
        second.write().unwrap().name = "X".to_string();
        let err = expect_err(session.close(&cx).await);
        assert!(!session.is_open());
        err
    });

    let Error::Flush(flush) = err else {
        panic!("expected flush error, got {err:?}");
    };
    assert_eq!(flush.failures[0].0, "Product#1");
    assert_eq!(flush.completed, 0);
    assert_eq!(flush.not_attempted, vec!["Product#2".to_string()]);
    assert_eq!(stored(factory.source(), 2).0, "B");
}

#[test]
fn continue_policy_attempts_every_update() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let config = SessionConfig::from_json(r#"{"flush_policy": "continue_on_error"}"#).unwrap();
    let factory = SessionFactory::new(shop("e2e_continue")).with_config(config);

    let err = rt.block_on(async {
        let mut session = factory.open();
        let first = unwrap_outcome(session.find::<Product>(&cx, 1_i64).await);
        let third = unwrap_outcome(session.find::<Product>(&cx, 3_i64).await);
        first.write().unwrap().name = "B".to_string();
        third.write().unwrap().name = "C2".to_string();
        expect_err(session.close(&cx).await)
    });

    let Error::Flush(flush) = err else {
        panic!("expected flush error, got {err:?}");
    };
    assert_eq!(flush.failures.len(), 1);
    assert_eq!(flush.completed, 1);
    assert!(flush.not_attempted.is_empty());
    assert_eq!(stored(factory.source(), 3).0, "C2");
    assert_eq!(factory.source().in_use(), 0);
}

#[test]
fn closed_session_rejects_further_use() {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let factory = SessionFactory::new(shop("e2e_closed"));
    let mut session = factory.open();

    rt.block_on(async {
        unwrap_outcome(session.close(&cx).await);
        let err = expect_err(session.find::<Product>(&cx, 1_i64).await);
        assert!(matches!(err, Error::Session(_)));
    });
    assert_eq!(factory.source().acquired(), 0);
}
