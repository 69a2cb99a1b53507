//! File changes flowing through the dependency graph.

mod common;

use std::path::Path;

use common::{fixture, fixture_with, frontend, wait_for_parents};
use kiln::{BuildCache, BuildKind, RenderConfig, route_id};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_editing_import_invalidates_importer() {
    let fx = fixture().await;
    let a = fx.path("pages/a.tsx");
    let b = fx.path("components/b.tsx");
    fx.bundler.set_imports(&a, &[&b]);

    fx.kiln
        .render_route(RenderConfig::new("pages/a.tsx"))
        .await
        .unwrap();
    assert_eq!(wait_for_parents(fx.cache.as_ref(), &b).await, vec![a.clone()]);
    assert_eq!(fx.bundler.builds(), 2);

    let mut reloads = fx.kiln.subscribe_reloads();
    let reloaded = fx
        .kiln
        .invalidator()
        .handle_change(Path::new(&b))
        .await
        .unwrap();

    assert_eq!(reloaded, vec![route_id(&a)]);
    for kind in BuildKind::ALL {
        assert!(fx.cache.get_build(kind, &a).await.unwrap().is_none());
    }

    let event = reloads.recv().await.unwrap();
    assert_eq!(event.changed, b);
    assert_eq!(event.route_ids, vec![route_id(&a)]);

    fx.kiln
        .render_route(RenderConfig::new("pages/a.tsx"))
        .await
        .unwrap();
    assert_eq!(fx.bundler.builds(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_editing_root_invalidates_its_own_builds() {
    let fx = fixture().await;
    let c = fx.path("pages/c.tsx");

    fx.kiln
        .render_route(RenderConfig::new("pages/c.tsx"))
        .await
        .unwrap();

    let reloaded = fx
        .kiln
        .invalidator()
        .handle_change(Path::new(&c))
        .await
        .unwrap();

    assert_eq!(reloaded, vec![route_id(&c)]);
    assert!(fx.cache.get_build(BuildKind::Server, &c).await.unwrap().is_none());
    assert!(fx.cache.get_build(BuildKind::Client, &c).await.unwrap().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_file_reloads_nothing() {
    let fx = fixture().await;
    let a = fx.path("pages/a.tsx");

    fx.kiln
        .render_route(RenderConfig::new("pages/a.tsx"))
        .await
        .unwrap();
    wait_for_parents(fx.cache.as_ref(), &a).await;

    let mut reloads = fx.kiln.subscribe_reloads();
    let reloaded = fx
        .kiln
        .invalidator()
        .handle_change(&fx.dir.path().join("components/b.tsx"))
        .await
        .unwrap();

    assert!(reloaded.is_empty());
    assert!(reloads.try_recv().is_err());
    assert!(fx.cache.get_build(BuildKind::Server, &a).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_layout_change_reloads_every_route() {
    let dir = frontend();
    let fx = fixture_with(dir, |config| config.layout_file = Some("Layout.tsx".into())).await;
    let a = fx.path("pages/a.tsx");
    let c = fx.path("pages/c.tsx");
    let layout = fx.path("Layout.tsx");
    fx.bundler.set_imports(&a, &[&layout]);
    fx.bundler.set_imports(&c, &[&layout]);

    for file in ["pages/a.tsx", "pages/c.tsx"] {
        fx.kiln.render_route(RenderConfig::new(file)).await.unwrap();
    }
    wait_for_parents(fx.cache.as_ref(), &layout).await;
    // Both write-backs have to land before the graph is complete.
    for _ in 0..200 {
        if fx.cache.parent_files(&layout).await.unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    let reloaded = fx
        .kiln
        .invalidator()
        .handle_change(Path::new(&layout))
        .await
        .unwrap();

    let mut expected = vec![route_id(&a), route_id(&c)];
    expected.sort();
    assert_eq!(reloaded, expected);
    for root in [&a, &c] {
        assert!(fx.cache.get_build(BuildKind::Server, root).await.unwrap().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_layout_css_change_rebuilds_stylesheet() {
    let dir = frontend();
    let fx = fixture_with(dir, |config| config.layout_css_file = Some("global.css".into())).await;
    assert_eq!(fx.bundler.builds(), 1);

    fx.kiln
        .render_route(RenderConfig::new("pages/a.tsx"))
        .await
        .unwrap();

    let reloaded = fx
        .kiln
        .invalidator()
        .handle_change(&fx.dir.path().join("global.css"))
        .await
        .unwrap();

    assert_eq!(reloaded, vec![route_id(&fx.path("pages/a.tsx"))]);
    // Startup stylesheet, two route builds, rebuilt stylesheet.
    assert_eq!(fx.bundler.builds(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spa_rebuilt_when_its_source_changes() {
    let dir = frontend();
    let fx = fixture_with(dir, |config| config.client_app_path = Some("App.tsx".into())).await;
    let app = fx.path("App.tsx");
    assert_eq!(fx.kiln.spa_bundle().unwrap().dependencies, vec![app.clone()]);
    assert_eq!(fx.bundler.builds(), 1);

    fx.kiln
        .invalidator()
        .handle_change(Path::new(&app))
        .await
        .unwrap();

    assert_eq!(fx.bundler.builds(), 2);
}
