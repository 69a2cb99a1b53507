//! Behaviour shared by every cache backend.

#![allow(dead_code)]

use kiln_cache::{BuildArtifact, BuildCache, BuildKind};

pub fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub async fn assert_round_trip(cache: &dyn BuildCache, root: &str) {
    let artifact = BuildArtifact::new("renderToString(App())", ".nav{color:red}")
        .with_dependencies(paths(&["/app/nav.tsx", "/app/nav.css"]));

    cache
        .set_build(BuildKind::Server, root, artifact.clone())
        .await
        .unwrap();

    let stored = cache.get_build(BuildKind::Server, root).await.unwrap();
    assert_eq!(stored, Some(artifact));
    assert!(cache.get_build(BuildKind::Client, root).await.unwrap().is_none());

    cache.remove_build(BuildKind::Server, root).await.unwrap();
    assert!(cache.get_build(BuildKind::Server, root).await.unwrap().is_none());
    // Removing again is a no-op.
    cache.remove_build(BuildKind::Server, root).await.unwrap();
}

pub async fn assert_dependency_replacement(cache: &dyn BuildCache, root: &str, dir: &str) {
    let d1 = vec![format!("{dir}/b.tsx"), format!("{dir}/c.tsx")];
    let d2 = vec![format!("{dir}/c.tsx"), format!("{dir}/d.tsx")];

    cache.set_dependencies(root, &d1).await.unwrap();
    cache.set_dependencies(root, &d2).await.unwrap();

    assert!(cache
        .parent_files(&format!("{dir}/b.tsx"))
        .await
        .unwrap()
        .is_empty());
    for dep in &d2 {
        assert_eq!(cache.parent_files(dep).await.unwrap(), vec![root.to_string()]);
    }
}

pub async fn assert_route_lookup(cache: &dyn BuildCache, dir: &str) {
    let page = format!("{dir}/page.tsx");
    let widget = format!("{dir}/widget.tsx");
    let lonely = format!("{dir}/lonely.tsx");

    cache.set_parent_file("route-a", &page).await.unwrap();
    cache.set_parent_file("route-b", &page).await.unwrap();
    cache.set_parent_file("route-c", &lonely).await.unwrap();
    cache
        .set_dependencies(&page, &[widget.clone()])
        .await
        .unwrap();

    assert_eq!(
        cache.route_ids_with_file(&widget).await.unwrap(),
        vec!["route-a", "route-b"]
    );
    // Nothing depends on the lonely page, so it is its own root.
    assert_eq!(
        cache.route_ids_with_file(&lonely).await.unwrap(),
        vec!["route-c"]
    );
    assert!(cache
        .route_ids_with_file(&format!("{dir}/unknown.tsx"))
        .await
        .unwrap()
        .is_empty());

    let all = cache.all_route_ids().await.unwrap();
    for id in ["route-a", "route-b", "route-c"] {
        assert!(all.iter().any(|r| r == id), "missing {id}");
    }
}

pub async fn assert_clear_twice(cache: &dyn BuildCache, root: &str) {
    cache
        .set_build(BuildKind::Client, root, BuildArtifact::new("hydrate()", ""))
        .await
        .unwrap();
    cache.set_parent_file("route-x", root).await.unwrap();
    cache
        .set_dependencies(root, &paths(&["/shared/util.ts"]))
        .await
        .unwrap();

    cache.clear().await.unwrap();
    cache.clear().await.unwrap();

    assert!(cache.get_build(BuildKind::Client, root).await.unwrap().is_none());
    assert!(cache.all_route_ids().await.unwrap().is_empty());
    assert!(cache.parent_files("/shared/util.ts").await.unwrap().is_empty());
}
