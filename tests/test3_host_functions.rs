use sql_worker::prelude::*;

fn open() -> Result<(Engine, DatabaseSession), SqlWorkerError> {
    let engine = Engine::new()?;
    let db = engine.open_session(None)?;
    Ok((engine, db))
}

fn single(db: &mut DatabaseSession, sql: &str) -> Result<Value, SqlWorkerError> {
    let mut results = db.exec(sql, None, QueryConfig::default())?;
    Ok(results.remove(0).values.remove(0).remove(0))
}

#[test]
fn scalar_function_result_becomes_a_column() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("double", |args: &[Value]| {
        Ok(Value::Integer(args[0].as_int().unwrap_or(0) * 2))
    })?;
    let results = db.exec("SELECT double(21)", None, QueryConfig::default())?;
    assert_eq!(
        results,
        vec![QueryResult {
            columns: vec!["double(21)".to_string()],
            values: vec![vec![Value::Integer(42)]],
        }]
    );
    Ok(())
}

#[test]
fn scalar_functions_return_every_variant() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut db) = open()?;
    db.create_function("wrap", |args: &[Value]| {
        Ok(Value::Text(format!("<{}>", args[0].as_text().unwrap_or_default())))
    })?;
    db.create_function("bytes", |args: &[Value]| {
        Ok(Value::Blob(args[0].as_text().unwrap_or_default().as_bytes().to_vec()))
    })?;
    db.create_function("nothing", |_: &[Value]| Ok(Value::Null))?;
    db.create_function("half", |args: &[Value]| {
        Ok(Value::Float(args[0].as_float().unwrap_or(0.0) / 2.0))
    })?;
    db.create_function("arity", |args: &[Value]| {
        Ok(Value::Integer(i64::try_from(args.len()).unwrap_or(-1)))
    })?;

    assert_eq!(single(&mut db, "SELECT wrap('x')")?, Value::from("<x>"));
    assert_eq!(single(&mut db, "SELECT bytes('ab')")?, Value::Blob(vec![b'a', b'b']));
    assert_eq!(single(&mut db, "SELECT nothing()")?, Value::Null);
    assert_eq!(single(&mut db, "SELECT half(5)")?, Value::Float(2.5));
    assert_eq!(single(&mut db, "SELECT arity(1, 'a', NULL)")?, Value::Integer(3));
    assert_eq!(single(&mut db, "SELECT arity()")?, Value::Integer(0));
    // result staging is released right after the engine copies it
    assert_eq!(engine.live_allocations(), 0);
    Ok(())
}

#[test]
fn callbacks_see_exact_integers() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("show", |args: &[Value]| {
        Ok(Value::Text(format!("{:?}", args[0])))
    })?;
    assert_eq!(
        single(&mut db, "SELECT show(9007199254740993)")?,
        Value::from("Integer(9007199254740993)")
    );
    Ok(())
}

#[test]
fn function_errors_become_query_errors() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("fail", |_: &[Value]| Err("nope, not today".into()))?;
    let err = db
        .exec("SELECT fail()", None, QueryConfig::default())
        .expect_err("function error");
    assert!(matches!(err, SqlWorkerError::EngineError { .. }));
    assert!(err.to_string().contains("nope, not today"), "{err}");

    // the session is still fine
    assert_eq!(single(&mut db, "SELECT 1")?, Value::Integer(1));
    assert!(db.live_statements().is_empty());
    Ok(())
}

#[test]
fn panicking_function_becomes_query_error() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("explode", |_: &[Value]| -> Result<Value, FunctionError> {
        panic!("kaboom")
    })?;
    let err = db
        .exec("SELECT explode()", None, QueryConfig::default())
        .expect_err("panic is reported");
    assert!(err.to_string().contains("kaboom"), "{err}");
    assert_eq!(single(&mut db, "SELECT 2")?, Value::Integer(2));
    Ok(())
}

#[test]
fn reregistering_replaces_the_previous_function() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("f", |_: &[Value]| Ok(Value::Integer(1)))?;
    assert_eq!(single(&mut db, "SELECT f()")?, Value::Integer(1));
    db.create_function("f", |_: &[Value]| Ok(Value::Integer(2)))?;
    assert_eq!(single(&mut db, "SELECT f()")?, Value::Integer(2));
    assert_eq!(db.function_names(), vec!["f"]);

    assert!(db.remove_function("f")?);
    assert!(!db.remove_function("f")?);
    let err = db.prepare("SELECT f()").expect_err("function is gone");
    assert!(err.to_string().contains("no such function"), "{err}");
    Ok(())
}

#[test]
fn aggregate_keeps_groups_apart() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_aggregate(
        "sum_sq",
        aggregate(
            || 0_i64,
            |acc, args: &[Value]| Ok(acc + args[0].as_int().unwrap_or(0).pow(2)),
            |acc| Ok(Value::Integer(acc)),
        ),
    )?;
    db.run(
        "CREATE TABLE g (k TEXT, v INTEGER);
         INSERT INTO g VALUES ('a', 1), ('a', 2), ('b', 3);",
        None,
    )?;

    let results = db.exec(
        "SELECT k, sum_sq(v) AS s FROM g GROUP BY k ORDER BY k",
        None,
        QueryConfig::default(),
    )?;
    assert_eq!(
        results[0].values,
        vec![
            vec![Value::from("a"), Value::Integer(5)],
            vec![Value::from("b"), Value::Integer(9)],
        ]
    );
    assert_eq!(db.open_aggregate_groups("sum_sq"), 0);

    // no rows: finalize still runs on a fresh accumulator
    assert_eq!(single(&mut db, "SELECT sum_sq(v) FROM g WHERE 0")?, Value::Integer(0));
    assert_eq!(db.open_aggregate_groups("sum_sq"), 0);
    Ok(())
}

const THREE_ROWS: &str =
    "SELECT f(x) FROM (SELECT 1 AS x UNION ALL SELECT 2 UNION ALL SELECT 3)";

fn times_ten(args: &[Value]) -> Result<Value, FunctionError> {
    Ok(Value::Integer(args[0].as_int().unwrap_or(0) * 10))
}

#[test]
fn reregistering_during_active_statement_keeps_old_function()
-> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("f", times_ten)?;
    let id = db.prepare(THREE_ROWS)?;
    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    assert_eq!(db.get_row(id, None, QueryConfig::default())?, vec![Value::Integer(10)]);

    let err = db
        .create_function("f", |_: &[Value]| Ok(Value::Integer(-1)))
        .expect_err("engine refuses while the statement is active");
    assert!(matches!(err, SqlWorkerError::EngineError { .. }), "{err:?}");
    assert_eq!(db.function_names(), vec!["f"]);

    // the cursor keeps calling the original function
    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    assert_eq!(db.get_row(id, None, QueryConfig::default())?, vec![Value::Integer(20)]);
    db.finalize(id)?;

    db.create_function("f", |_: &[Value]| Ok(Value::Integer(-1)))?;
    assert_eq!(single(&mut db, "SELECT f(1)")?, Value::Integer(-1));
    assert_eq!(db.function_names(), vec!["f"]);
    Ok(())
}

#[test]
fn remove_function_unregisters_it() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("f", times_ten)?;
    assert_eq!(single(&mut db, "SELECT f(4)")?, Value::Integer(40));

    assert!(db.remove_function("f")?);
    assert!(db.function_names().is_empty());
    assert!(!db.remove_function("f")?);
    assert!(!db.remove_function("never_registered")?);
    let err = db.prepare("SELECT f(4)").expect_err("function is gone");
    assert!(matches!(err, SqlWorkerError::PrepareError { .. }), "{err:?}");
    Ok(())
}

#[test]
fn remove_function_during_active_statement_fails() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("f", times_ten)?;
    let id = db.prepare(THREE_ROWS)?;
    assert_eq!(db.step(id)?, StepResult::RowAvailable);

    let err = db
        .remove_function("f")
        .expect_err("engine refuses while the statement is active");
    assert!(matches!(err, SqlWorkerError::EngineError { .. }), "{err:?}");
    assert_eq!(db.function_names(), vec!["f"]);

    assert_eq!(db.step(id)?, StepResult::RowAvailable);
    assert_eq!(db.get_row(id, None, QueryConfig::default())?, vec![Value::Integer(20)]);
    db.finalize(id)?;

    assert!(db.remove_function("f")?);
    assert!(db.function_names().is_empty());
    Ok(())
}

struct Joiner;

impl Aggregate for Joiner {
    type State = Vec<String>;

    fn init(&self) -> Vec<String> {
        Vec::new()
    }

    fn step(&self, mut state: Vec<String>, args: &[Value]) -> Result<Vec<String>, FunctionError> {
        match &args[0] {
            Value::Text(text) => {
                state.push(text.clone());
                Ok(state)
            }
            other => Err(FunctionError(format!("joiner wants text, got {other:?}"))),
        }
    }

    fn finalize(&self, state: Vec<String>) -> Result<Value, FunctionError> {
        Ok(Value::Text(state.join("+")))
    }
}

#[test]
fn aggregate_step_failure_clears_state() -> Result<(), Box<dyn std::error::Error>> {
    let (engine, mut db) = open()?;
    db.create_aggregate("joiner", Joiner)?;
    db.run(
        "CREATE TABLE w (v); INSERT INTO w VALUES ('x'), ('y'), (3);",
        None,
    )?;

    let err = db
        .exec("SELECT joiner(v) FROM w", None, QueryConfig::default())
        .expect_err("integer row fails the step");
    assert!(err.to_string().contains("joiner wants text"), "{err}");
    assert_eq!(db.open_aggregate_groups("joiner"), 0);

    db.run("DELETE FROM w WHERE typeof(v) != 'text'", None)?;
    assert_eq!(
        single(&mut db, "SELECT joiner(v) FROM (SELECT v FROM w ORDER BY v)")?,
        Value::from("x+y")
    );
    assert_eq!(db.open_aggregate_groups("joiner"), 0);
    assert_eq!(engine.live_allocations(), 0);
    Ok(())
}

#[test]
fn functions_survive_export() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("triple", |args: &[Value]| {
        Ok(Value::Integer(args[0].as_int().unwrap_or(0) * 3))
    })?;
    db.export()?;
    assert_eq!(single(&mut db, "SELECT triple(3)")?, Value::Integer(9));
    Ok(())
}

#[test]
fn close_releases_functions() -> Result<(), Box<dyn std::error::Error>> {
    let (_engine, mut db) = open()?;
    db.create_function("noop", |_: &[Value]| Ok(Value::Null))?;
    db.close()?;
    assert!(db.function_names().is_empty());
    assert!(matches!(
        db.create_function("noop", |_: &[Value]| Ok(Value::Null)),
        Err(SqlWorkerError::HandleClosed(_))
    ));
    Ok(())
}
