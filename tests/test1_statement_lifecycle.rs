use sql_worker::prelude::*;

fn open() -> Result<(Engine, DatabaseSession), SqlWorkerError> {
    let engine = Engine::new()?;
    let db = engine.open_session(None)?;
    Ok((engine, db))
}

#[test]
fn prepare_bind_step_get_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let cfg = QueryConfig::default();
    db.run("CREATE TABLE people (id INTEGER, name TEXT, photo BLOB)", None)?;

    let insert = db.prepare("INSERT INTO people VALUES (?, ?, ?)")?;
    db.bind(
        insert,
        &Params::positional([Value::from(1), Value::from("ann"), Value::Blob(vec![1, 2, 3])]),
    )?;
    assert_eq!(db.step(insert)?, StepResult::Done);
    assert_eq!(db.changes()?, 1);
    assert!(db.finalize(insert)?);

    let select = db.prepare("SELECT id, name, photo FROM people WHERE id = :id")?;
    db.bind(select, &Params::named([(":id", 1_i64)]))?;
    assert_eq!(db.statement_state(select)?, StatementState::Bound);
    assert_eq!(db.step(select)?, StepResult::RowAvailable);
    assert_eq!(db.column_names(select)?, vec!["id", "name", "photo"]);
    assert_eq!(
        db.get_row(select, None, cfg)?,
        vec![Value::Integer(1), Value::from("ann"), Value::Blob(vec![1, 2, 3])]
    );
    // selected subset, out-of-range index reads as NULL
    assert_eq!(
        db.get_row(select, Some(&[2, 0, 9]), cfg)?,
        vec![Value::Blob(vec![1, 2, 3]), Value::Integer(1), Value::Null]
    );
    assert_eq!(db.step(select)?, StepResult::Done);
    assert!(db.get_row(select, None, cfg).is_err());
    db.finalize(select)?;
    assert!(db.live_statements().is_empty());
    Ok(())
}

#[test]
fn unknown_named_parameters_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let id = db.prepare("SELECT :x AS x")?;
    let row = db.get_row_with(
        id,
        &Params::named([(":missing", 1_i64), (":x", 7_i64)]),
        QueryConfig::default(),
    )?;
    assert_eq!(row, vec![Value::Integer(7)]);
    Ok(())
}

#[test]
fn positional_overflow_is_a_bind_error() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let id = db.prepare("SELECT ?")?;
    let err = db
        .bind(id, &Params::positional([1, 2]))
        .expect_err("second parameter has no slot");
    assert!(matches!(err, SqlWorkerError::BindError(_)), "{err:?}");
    // the statement stays usable
    db.bind(id, &Params::positional([1]))?;
    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    Ok(())
}

#[test]
fn finalize_releases_allocations_and_closes_the_handle() -> Result<(), Box<dyn std::error::Error>>
{
    let (engine, mut db) = open()?;
    let cfg = QueryConfig::default();
    let baseline = engine.live_allocations();

    let id = db.prepare("SELECT ?, ?")?;
    let params = Params::positional([Value::from("some text"), Value::Blob(vec![9; 64])]);
    db.bind(id, &params)?;
    assert_eq!(engine.live_allocations(), baseline + 2);
    // rebinding releases the previous staging first
    db.bind(id, &params)?;
    assert_eq!(engine.live_allocations(), baseline + 2);

    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    assert_eq!(
        db.get_row(id, None, cfg)?,
        vec![Value::from("some text"), Value::Blob(vec![9; 64])]
    );
    db.finalize(id)?;
    assert_eq!(engine.live_allocations(), baseline);

    assert!(matches!(db.step(id), Err(SqlWorkerError::HandleClosed(_))));
    assert!(matches!(db.get_row(id, None, cfg), Err(SqlWorkerError::HandleClosed(_))));
    assert!(matches!(db.bind(id, &params), Err(SqlWorkerError::HandleClosed(_))));
    assert!(matches!(db.reset(id), Err(SqlWorkerError::HandleClosed(_))));
    assert!(matches!(db.finalize(id), Err(SqlWorkerError::HandleClosed(_))));

    // a new statement never inherits the old id
    let next = db.prepare("SELECT 1")?;
    assert_ne!(next, id);
    Ok(())
}

#[test]
fn reset_releases_allocations_and_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut db) = open()?;
    let baseline = engine.live_allocations();
    let id = db.prepare("SELECT ?")?;
    db.bind(id, &Params::positional(["text"]))?;
    assert_eq!(db.step(id)?, StepResult::RowAvailable);

    assert!(db.reset(id)?);
    assert_eq!(engine.live_allocations(), baseline);
    assert_eq!(db.statement_state(id)?, StatementState::Ready);
    assert!(db.reset(id)?);
    assert!(db.reset(id)?);
    assert_eq!(db.statement_state(id)?, StatementState::Ready);

    // reset cleared the binding, so the parameter reads as NULL
    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    assert_eq!(db.get_row(id, None, QueryConfig::default())?, vec![Value::Null]);
    Ok(())
}

#[test]
fn prepare_errors() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;

    let err = db.prepare("SELEC 1").expect_err("syntax error");
    assert!(matches!(err, SqlWorkerError::PrepareError { .. }));
    assert!(err.to_string().contains("syntax error"), "{err}");

    let err = db.prepare("  -- only a comment\n").expect_err("no statement");
    assert_eq!(err.to_string(), "Nothing to prepare");
    Ok(())
}

#[test]
fn step_failure_names_the_statement() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.run("CREATE TABLE u (a UNIQUE)", None)?;
    let insert = db.prepare("INSERT INTO u VALUES (?)")?;
    db.run_statement(insert, Some(&Params::positional([1])))?;

    db.bind(insert, &Params::positional([1]))?;
    let err = db.step(insert).expect_err("duplicate key");
    assert!(matches!(err, SqlWorkerError::EngineError { .. }));
    let message = err.to_string();
    assert!(message.contains("UNIQUE constraint failed"), "{message}");
    assert!(message.contains("INSERT INTO u VALUES (?)"), "{message}");
    Ok(())
}

#[test]
fn run_statement_rewinds_for_reuse() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.run("CREATE TABLE n (v INTEGER)", None)?;
    let insert = db.prepare("INSERT INTO n VALUES (?)")?;
    for v in 1..=5 {
        db.run_statement(insert, Some(&Params::positional([v])))?;
    }
    db.finalize(insert)?;

    let results = db.exec("SELECT sum(v) AS total FROM n", None, QueryConfig::default())?;
    assert_eq!(results[0].values, vec![vec![Value::Integer(15)]]);
    Ok(())
}

#[test]
fn run_with_params_executes_first_statement_only() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.run("CREATE TABLE r (v); CREATE TABLE s (v);", None)?;
    db.run(
        "INSERT INTO r VALUES (?); INSERT INTO s VALUES (1);",
        Some(&Params::positional([3])),
    )?;
    let results = db.exec(
        "SELECT count(*) FROM r; SELECT count(*) FROM s;",
        None,
        QueryConfig::default(),
    )?;
    assert_eq!(results[0].values, vec![vec![Value::Integer(1)]]);
    assert_eq!(results[1].values, vec![vec![Value::Integer(0)]]);
    Ok(())
}

#[test]
fn iterate_statements_keeps_unparsed_tail_on_failure() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let mut statements = db.iterate_statements(
        "CREATE TABLE t (a); INSERT INTO t VALUES (1); SELEC oops; INSERT INTO t VALUES (2);",
    );

    let mut ran = 0;
    let err = loop {
        match statements.advance(&mut db) {
            Ok(Some(id)) => {
                db.step(id)?;
                ran += 1;
            }
            Ok(None) => panic!("iteration should stop at the malformed statement"),
            Err(err) => break err,
        }
    };
    assert_eq!(ran, 2);
    assert!(matches!(err, SqlWorkerError::PrepareError { .. }));
    assert!(
        statements
            .remaining_sql()
            .trim_start()
            .starts_with("SELEC oops; INSERT INTO t VALUES (2);")
    );
    // exhausted, and the last yielded statement is already finalized
    assert_eq!(statements.advance(&mut db)?, None);
    assert!(db.live_statements().is_empty());

    let results = db.exec("SELECT count(*) AS n FROM t", None, QueryConfig::default())?;
    assert_eq!(results[0].values, vec![vec![Value::Integer(1)]]);
    Ok(())
}

#[test]
fn typed_getters_follow_the_column_cursor() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let sql = "SELECT 1.5, 9007199254740993, 'txt', x'0102'";
    let id = db.prepare(sql)?;
    assert_eq!(db.statement_sql(id)?, sql);
    assert_eq!(db.step(id)?, StepResult::RowAvailable);

    assert!((db.get_number(id, None)? - 1.5).abs() < f64::EPSILON);
    assert_eq!(db.get_big_int(id, None)?, 9_007_199_254_740_993);
    assert_eq!(db.get_string(id, None)?, "txt");
    assert_eq!(db.get_blob(id, None)?, vec![1, 2]);
    // explicit index does not need the cursor
    assert_eq!(db.get_string(id, Some(0))?, "1.5");
    Ok(())
}

#[test]
fn get_as_object_maps_names_to_values() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    let id = db.prepare("SELECT ? * 2 AS doubled, 'x' AS tag")?;
    db.get_row_with(id, &Params::positional([21]), QueryConfig::default())?;
    let row = db.get_as_object(id, QueryConfig::default())?;
    assert_eq!(row.get("doubled"), Some(&Value::Integer(42)));
    assert_eq!(
        serde_json::to_string(&row)?,
        r#"{"doubled":42,"tag":"x"}"#
    );
    Ok(())
}

#[test]
fn close_finalizes_everything() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut db) = open()?;
    let baseline = engine.live_allocations();
    let id = db.prepare("SELECT ?")?;
    db.bind(id, &Params::positional(["pending"]))?;
    let path = db.path().to_path_buf();
    assert!(path.exists());

    db.close()?;
    assert!(!db.is_open());
    assert_eq!(engine.live_allocations(), baseline);
    assert!(!path.exists());
    assert!(matches!(db.step(id), Err(SqlWorkerError::HandleClosed(_))));
    assert!(matches!(db.prepare("SELECT 1"), Err(SqlWorkerError::HandleClosed(_))));
    // closing twice is fine
    db.close()?;
    Ok(())
}

#[test]
fn export_round_trips_through_open() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut db) = open()?;
    db.run("CREATE TABLE kv (k TEXT, v INTEGER); INSERT INTO kv VALUES ('a', 1);", None)?;
    let open_stmt = db.prepare("SELECT * FROM kv")?;

    let image = db.export()?;
    assert!(image.starts_with(b"SQLite format 3\0"));
    // export finalizes open statements but keeps the session usable
    assert!(matches!(db.step(open_stmt), Err(SqlWorkerError::HandleClosed(_))));
    db.run("INSERT INTO kv VALUES ('b', 2)", None)?;

    let mut copy = engine.open_session(Some(&image))?;
    let results = copy.exec("SELECT k, v FROM kv", None, QueryConfig::default())?;
    assert_eq!(results[0].values, vec![vec![Value::from("a"), Value::Integer(1)]]);
    Ok(())
}
