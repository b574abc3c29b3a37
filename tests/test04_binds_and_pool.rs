mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use sql_dialect::prelude::*;
use sql_dialect::test_utils::{NativeCall, Scope, SimulatedDriver};

use common::{PASSWORD, USER, build, init, meta};

#[tokio::test]
async fn only_referenced_binds_are_sent() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let opts = ExecOptions::new().with_bind("a", 1).with_bind("b", "x");
    let res = dialect
        .exec("SELECT :a AS a", &opts, &[], &meta("read.a"), None)
        .await?;

    assert!(driver.calls().contains(&NativeCall::Query {
        scope: Scope::Pool,
        sql: "SELECT @a AS a".into(),
        params: vec![("a".into(), RowValues::Int(1))],
    }));
    assert_eq!(res.rows.results.len(), 1);
    assert_eq!(res.rows.results[0].get("a"), Some(&RowValues::Int(1)));
    assert!(res.rows.results[0].get("b").is_none());
    assert_eq!(res.raw.total_rows_affected(), 1);
    Ok(())
}

#[tokio::test]
async fn constant_tokens_resolve_in_bind_values() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new().with_constant("MAX_ROWS", json!(100));
    let dialect = init(&driver).await?;

    let opts = ExecOptions::new()
        .with_bind("top", "${MAX_ROWS}")
        .with_bind("kind", "${VarChar}")
        .with_bind("raw", "${unknown}");
    dialect
        .exec("SELECT TOP (:top) :kind, :raw", &opts, &[], &meta("read.top"), None)
        .await?;

    assert!(driver.calls().contains(&NativeCall::Query {
        scope: Scope::Pool,
        sql: "SELECT TOP (@top) @kind, @raw".into(),
        params: vec![
            ("top".into(), RowValues::Int(100)),
            ("kind".into(), RowValues::Text("VarChar".into())),
            ("raw".into(), RowValues::Text("${unknown}".into())),
        ],
    }));
    Ok(())
}

#[tokio::test]
async fn missing_bind_values_fail_before_reaching_the_engine() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;
    driver.clear_calls();

    let err = dialect
        .exec("SELECT :a, :missing", &ExecOptions::new().with_bind("a", 1), &[], &meta("read.a"), None)
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SqlDialectError::ParameterError(m) if m.contains(":missing")));
    assert!(driver.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn execution_errors_carry_sql_and_bind_types() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);
    let handler = ErrorOptions::with_handler(move |err| {
        assert!(err.sql().is_some());
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let opts = ExecOptions::new()
        .with_bind("id", 3)
        .with_input_type("id", "${VarChar}");
    let err = dialect
        .exec(
            "RAISERROR('bad row %s', 16, 1, :id)",
            &opts,
            &[],
            &meta("update.bad"),
            Some(&handler),
        )
        .await
        .unwrap_err();

    match &err {
        SqlDialectError::Execution {
            path,
            sql,
            input_bind_types,
            ..
        } => {
            assert_eq!(path, "update.bad");
            assert_eq!(sql, "RAISERROR('bad row %s', 16, 1, @id)");
            assert_eq!(input_bind_types.get("id"), Some(&BindType::VarChar));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(matches!(err.root(), SqlDialectError::ExecutionError(_)));
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_bind_types_are_rejected() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    let opts = ExecOptions::new().with_bind("id", 1).with_input_type("id", "${Nope}");
    let err = dialect
        .exec("SELECT :id", &opts, &[], &meta("read.id"), None)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), SqlDialectError::ParameterError(_)));
    Ok(())
}

#[tokio::test]
async fn pool_creation_errors_hide_the_password() {
    let driver = SimulatedDriver::new().with_password(PASSWORD);
    let dialect = build(&driver, "not-the-password");

    let err = dialect.init(&InitOptions::default()).await.unwrap_err();
    let SqlDialectError::PoolCreation { pool_id, config, .. } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert_eq!(pool_id, "sim");
    assert_eq!(config["user"], json!(USER));
    assert_eq!(config["server"], json!("localhost"));
    assert!(config.get("password").is_none());
    assert!(!err.to_string().contains("not-the-password"));
    assert!(!format!("{err:?}").contains("not-the-password"));
    assert!(err.to_string().contains("Login failed for user 'tester'"));
    assert!(!dialect.is_initialized());
}

#[tokio::test]
async fn close_failures_on_a_rejected_pool_keep_the_creation_error() {
    common::trace();
    let driver = SimulatedDriver::new()
        .with_password(PASSWORD)
        .with_failing_close();
    let dialect = build(&driver, "not-the-password");

    let err = dialect.init(&InitOptions::default()).await.unwrap_err();
    let SqlDialectError::PoolCreation { source, .. } = &err else {
        panic!("unexpected error {err:?}");
    };
    assert!(source.to_string().contains("Login failed for user 'tester'"));
    assert!(!err.to_string().contains("simulated close failure"));
    assert!(!dialect.is_initialized());
}

#[tokio::test]
async fn init_runs_once() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let dialect = init(&driver).await?;

    assert!(matches!(
        dialect.init(&InitOptions::default()).await,
        Err(SqlDialectError::AlreadyInitialized(id)) if id == "sim"
    ));
    assert_eq!(
        driver.calls(),
        vec![NativeCall::Connect {
            server: "localhost".into(),
            user: Some(USER.into())
        }]
    );
    Ok(())
}

#[tokio::test]
async fn operations_before_init_fail() {
    let driver = SimulatedDriver::new();
    let dialect = build(&driver, PASSWORD);

    assert!(matches!(
        dialect.begin_transaction("t1", &TransactionOptions::new()).await,
        Err(SqlDialectError::NotInitialized(_))
    ));
    let err = dialect
        .exec("SELECT 1", &ExecOptions::new(), &[], &meta("read.one"), None)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), SqlDialectError::NotInitialized(id) if id == "sim"));
    assert_eq!(dialect.state(), DialectState::default());
}

#[tokio::test]
async fn generated_pool_ids_and_logger_callbacks() -> Result<(), SqlDialectError> {
    let driver = SimulatedDriver::new();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let dialect = Dialect::builder(Arc::new(driver.clone()))
        .private_options(PrivateOptions::new().with_credentials(USER, PASSWORD))
        .logger(DialectLogger::new().with_info(move |line| {
            sink.lock().unwrap().push(line.to_owned());
        }))
        .debug(true)
        .build();
    assert!(dialect.id().starts_with("sqlDialectGen"));

    dialect.init(&InitOptions::new(4)).await?;
    dialect
        .exec("SELECT 1", &ExecOptions::new(), &["where"], &meta("read.one"), None)
        .await?;

    let lines = lines.lock().unwrap();
    let prefix = format!("[{}] ", dialect.id());
    assert!(lines.iter().all(|line| line.starts_with(&prefix)));
    assert!(lines.iter().any(|l| l.contains("Created simulated connection pool for 4 prepared functions")));
    assert!(lines.iter().any(|l| l.contains("Executing \"read.one\"") && l.contains("[where]")));
    Ok(())
}
