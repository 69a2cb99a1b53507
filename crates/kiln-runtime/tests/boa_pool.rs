//! Integration tests for a pool of Boa engines.

#![cfg(feature = "boa")]

use kiln_runtime::{BoaEngineFactory, EngineError, EnginePool, PoolConfig};

#[test]
fn test_requests_do_not_share_globals() {
    let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(1)).unwrap();

    pool.execute("globalThis.leaked = 'secret';").unwrap();
    assert_eq!(pool.execute("typeof leaked").unwrap(), "undefined");
    assert_eq!(pool.stats().total_created, 1);

    pool.close();
}

#[test]
fn test_props_injection_renders_per_request() {
    let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(2)).unwrap();
    let compiled = r#"(function () { return "<p>" + props.user + "</p>"; })()"#;

    let first = pool
        .execute(&format!(r#"var props = {{"user":"ada"}}; {compiled}"#))
        .unwrap();
    let second = pool
        .execute(&format!(r#"var props = {{"user":"grace"}}; {compiled}"#))
        .unwrap();

    assert_eq!(first, "<p>ada</p>");
    assert_eq!(second, "<p>grace</p>");
    pool.close();
}

#[test]
fn test_parallel_execution_across_threads() {
    let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(2)).unwrap();

    let threads: Vec<_> = (0..6)
        .map(|i| {
            let pool = pool.clone();
            std::thread::spawn(move || pool.execute(&format!("var props = {i}; props * 10")))
        })
        .collect();

    let mut results: Vec<String> = threads
        .into_iter()
        .map(|t| t.join().unwrap().unwrap())
        .collect();
    results.sort();
    assert_eq!(results, vec!["0", "10", "20", "30", "40", "50"]);

    let stats = pool.stats();
    assert!(stats.idle <= 2);
    assert_eq!(stats.live, stats.idle);

    pool.close();
    assert_eq!(pool.stats().live, 0);
}

#[test]
fn test_syntax_error_reports_execution_failure() {
    let pool = EnginePool::new(BoaEngineFactory::new(), PoolConfig::with_capacity(1)).unwrap();
    let err = pool.execute("var = ;").unwrap_err();
    assert!(matches!(err, EngineError::Execution(_)));
    // The engine survived and went back to the pool.
    assert_eq!(pool.execute("'ok'").unwrap(), "ok");
    pool.close();
}
