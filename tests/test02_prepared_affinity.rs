mod common;

use futures_util::future::join_all;
use sql_dialect::prelude::*;
use sql_dialect::test_utils::{NativeCall, Scope, SimulatedDriver};

use common::{count, init, meta, position};

const PATH: &str = "read.accounts.by_id";
const SQL: &str = "SELECT * FROM accounts WHERE id = :id";

fn prepared(tx: Option<&str>) -> ExecOptions {
    let opts = ExecOptions::new()
        .with_bind("id", 7)
        .with_input_type("id", "${Int}")
        .with_prepare_statement(true);
    match tx {
        Some(tx) => opts.with_transaction(tx).with_auto_commit(false),
        None => opts,
    }
}

#[tokio::test]
async fn statements_keep_the_transaction_context_they_were_prepared_in()
-> Result<(), SqlDialectError> {
    let contexts = [None, Some("t1"), Some("t2")];
    for first in contexts {
        for second in contexts {
            let driver = SimulatedDriver::new();
            let dialect = init(&driver).await?;
            dialect.exec(SQL, &prepared(first), &[], &meta(PATH), None).await?;
            let outcome = dialect.exec(SQL, &prepared(second), &[], &meta(PATH), None).await;

            match (first, second) {
                (a, b) if a == b => assert!(outcome.is_ok(), "{first:?} -> {second:?}"),
                (Some(_), None) => assert!(
                    matches!(outcome, Err(SqlDialectError::TransactionInProgress { .. })),
                    "{first:?} -> {second:?}"
                ),
                (None, Some(_)) => assert!(
                    matches!(outcome, Err(SqlDialectError::TransactionNotInProgress { .. })),
                    "{first:?} -> {second:?}"
                ),
                _ => assert!(
                    matches!(
                        &outcome,
                        Err(SqlDialectError::TransactionMismatch { prepared_tx, requested_tx, .. })
                            if Some(prepared_tx.as_str()) == first && Some(requested_tx.as_str()) == second
                    ),
                    "{first:?} -> {second:?}"
                ),
            }
            dialect.close().await?;
        }
    }
    Ok(())
}

#[tokio::test]
async fn commit_leaves_a_reused_key_prepared_outside_the_transaction()
-> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let res = dialect.exec(SQL, &prepared(Some("t1")), &[], &meta(PATH), None).await?;
    let handle = res.unprepare.expect("unprepare handle");
    dialect.resolve(&handle).await?;

    dialect.exec(SQL, &prepared(None), &[], &meta(PATH), None).await?;
    dialect.commit("t1").await?;
    dialect.exec(SQL, &prepared(None), &[], &meta(PATH), None).await?;

    let calls = driver.calls();
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Unprepare { .. })), 1);
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Prepare { .. })), 2);
    assert_eq!(
        count(&calls, |c| matches!(c, NativeCall::Execute { statement: 2, .. })),
        2
    );
    assert!(calls.contains(&NativeCall::Commit { tx: 1 }));
    Ok(())
}

#[tokio::test]
async fn commit_unprepares_transaction_statements_first() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let res = dialect.exec(SQL, &prepared(Some("t1")), &[], &meta(PATH), None).await?;
    assert_eq!(res.unprepare, Some(ExecHandle::Unprepare(PATH.into())));
    assert_eq!(res.rows.results[0].get("id"), Some(&RowValues::Int(7)));
    dialect.commit("t1").await?;

    let calls = driver.calls();
    assert!(calls.contains(&NativeCall::Prepare {
        statement: 1,
        scope: Scope::Transaction(1),
        sql: "SELECT * FROM accounts WHERE id = @id".into(),
        declared: vec!["id".into()],
    }));
    assert!(
        position(&calls, &NativeCall::Unprepare { statement: 1 })
            < position(&calls, &NativeCall::Commit { tx: 1 })
    );

    // the key is free again outside any transaction
    dialect.exec(SQL, &prepared(None), &[], &meta(PATH), None).await?;
    assert!(driver.calls().contains(&NativeCall::Prepare {
        statement: 2,
        scope: Scope::Pool,
        sql: "SELECT * FROM accounts WHERE id = @id".into(),
        declared: vec!["id".into()],
    }));
    Ok(())
}

#[tokio::test]
async fn auto_committed_statements_return_no_unprepare_handle() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let opts = prepared(Some("t1")).with_auto_commit(true);
    let res = dialect.exec(SQL, &opts, &[], &meta(PATH), None).await?;
    assert!(res.unprepare.is_none() && res.commit.is_none());

    let calls = driver.calls();
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Unprepare { .. })), 1);
    assert!(!dialect.unprepare(PATH).await?);
    Ok(())
}

#[tokio::test]
async fn unprepare_is_idempotent() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let res = dialect.exec(SQL, &prepared(None), &[], &meta(PATH), None).await?;
    let handle = res.unprepare.expect("prepared executions return an unprepare handle");
    dialect.resolve(&handle).await?;
    dialect.resolve(&handle).await?;
    assert!(!dialect.unprepare(PATH).await?);

    let calls = driver.calls();
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Unprepare { .. })), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_first_executions_share_one_preparation() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;
    let opts: Vec<ExecOptions> = (0..3)
        .map(|i| {
            ExecOptions::new()
                .with_bind("id", i)
                .with_input_type("id", "${Int}")
                .with_prepare_statement(true)
        })
        .collect();
    let path = meta(PATH);

    let runs = opts.iter().map(|o| dialect.exec(SQL, o, &[], &path, None));
    for result in join_all(runs).await {
        result?;
    }

    let calls = driver.calls();
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Prepare { .. })), 1);
    let executed: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            NativeCall::Execute { params, .. } => Some(params[0].1.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(executed, vec![RowValues::Int(0), RowValues::Int(1), RowValues::Int(2)]);
    Ok(())
}

#[tokio::test]
async fn new_inputs_are_declared_once() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    dialect.exec(SQL, &prepared(None), &[], &meta(PATH), None).await?;
    let wider = "SELECT * FROM accounts WHERE id = :id AND name = :name";
    let opts = prepared(None)
        .with_bind("name", "alice")
        .with_input_type("name", "${NVarChar}");
    dialect.exec(wider, &opts, &[], &meta(PATH), None).await?;
    dialect.exec(wider, &opts, &[], &meta(PATH), None).await?;

    let calls = driver.calls();
    let declares: Vec<_> = calls
        .iter()
        .filter(|c| matches!(c, NativeCall::Declare { .. }))
        .collect();
    assert_eq!(
        declares,
        vec![&NativeCall::Declare {
            statement: 1,
            names: vec!["name".into()]
        }]
    );
    Ok(())
}

#[tokio::test]
async fn prepared_inputs_need_a_bind_type() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let opts = ExecOptions::new().with_bind("id", 1).with_prepare_statement(true);
    let err = dialect.exec(SQL, &opts, &[], &meta(PATH), None).await.unwrap_err();

    assert!(matches!(err.root(), SqlDialectError::ParameterError(m) if m.contains(":id")));
    assert_eq!(err.sql(), Some("SELECT * FROM accounts WHERE id = @id"));
    let calls = driver.calls();
    assert_eq!(count(&calls, |c| matches!(c, NativeCall::Prepare { .. })), 0);
    Ok(())
}
