//! Composite filesystem behavior: routing, listing order, child lifecycle.

mod common;

use common::{list_dir, put_file, read_file, StubFs};
use dav_server::davpath::DavPath;
use dav_server::fs::{DavFileSystem, DavMetaData, FsError, OpenOptions};
use dav_server::memfs::MemFs;
use meshfs_webdav::{ChildFs, CompositeFs, CompositeOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn composite() -> CompositeFs {
    CompositeFs::new(CompositeOptions::default())
}

fn dav(path: &str) -> DavPath {
    DavPath::new(path).expect("valid path")
}

#[tokio::test]
async fn test_root_listing_is_sorted() {
    let cfs = composite();
    let mem_b = *MemFs::new();
    let mem_a = *MemFs::new();
    put_file(&mem_b, "/x", b"bx").await;
    put_file(&mem_a, "/y", b"ay").await;

    // Inserted out of order; listed in name order.
    cfs.add_child("b", ChildFs::plain(mem_b));
    cfs.add_child("a", ChildFs::plain(mem_a));

    let entries = list_dir(&cfs, "/").await.unwrap();
    assert_eq!(
        entries,
        vec![("a".to_string(), true), ("b".to_string(), true)]
    );
}

#[tokio::test]
async fn test_routing_to_children() {
    let cfs = composite();
    let mem_a = *MemFs::new();
    let mem_b = *MemFs::new();
    put_file(&mem_b, "/x", b"contents of x").await;
    cfs.add_child("a", ChildFs::plain(mem_a));
    cfs.add_child("b", ChildFs::plain(mem_b));

    // Child a has no x.
    assert!(matches!(
        read_file(&cfs, "/a/x").await.unwrap_err(),
        FsError::NotFound
    ));

    // Child b does.
    assert_eq!(read_file(&cfs, "/b/x").await.unwrap(), b"contents of x");
}

#[tokio::test]
async fn test_unknown_child_is_not_found_without_touching_children() {
    let cfs = composite();
    let stub = StubFs::new(SystemTime::UNIX_EPOCH);
    cfs.add_child("a", ChildFs::closeable(stub.clone()));

    for result in [
        cfs.metadata(&dav("/nope/x")).await.err(),
        cfs.create_dir(&dav("/nope/d")).await.err(),
        cfs.remove_file(&dav("/nope/f")).await.err(),
    ] {
        assert!(matches!(result, Some(FsError::NotFound)));
    }
    assert!(cfs
        .open(&dav("/nope"), OpenOptions::default())
        .await
        .is_err());

    assert_eq!(stub.access_count(), 0);
}

#[tokio::test]
async fn test_root_is_read_only() {
    let cfs = composite();
    cfs.add_child("a", ChildFs::plain(*MemFs::new()));

    assert!(matches!(
        cfs.create_dir(&dav("/")).await.unwrap_err(),
        FsError::Forbidden
    ));
    assert!(matches!(
        cfs.remove_dir(&dav("/")).await.unwrap_err(),
        FsError::Forbidden
    ));
    assert!(matches!(
        cfs.rename(&dav("/"), &dav("/x")).await.unwrap_err(),
        FsError::Forbidden
    ));
    let write = OpenOptions {
        write: true,
        create: true,
        ..OpenOptions::default()
    };
    assert!(matches!(
        cfs.open(&dav("/"), write).await.unwrap_err(),
        FsError::Forbidden
    ));
}

#[tokio::test]
async fn test_mutation_on_child_mount_forwards_to_child() {
    let cfs = composite();
    let stub = StubFs::new(SystemTime::UNIX_EPOCH);
    cfs.add_child("a", ChildFs::closeable(stub.clone()));

    // The mount name itself targets the child's own root; the child
    // decides, so its error surfaces instead of Forbidden.
    assert!(matches!(
        cfs.remove_dir(&dav("/a")).await.unwrap_err(),
        FsError::NotImplemented
    ));
    assert!(matches!(
        cfs.create_dir(&dav("/a")).await.unwrap_err(),
        FsError::NotImplemented
    ));
    assert_eq!(stub.access_count(), 2);
}

#[tokio::test]
async fn test_rename_across_children_refused() {
    let cfs = composite();
    let mem_a = *MemFs::new();
    let mem_b = *MemFs::new();
    put_file(&mem_a, "/f", b"data").await;
    cfs.add_child("a", ChildFs::plain(mem_a));
    cfs.add_child("b", ChildFs::plain(mem_b));

    assert!(matches!(
        cfs.rename(&dav("/a/f"), &dav("/b/f")).await.unwrap_err(),
        FsError::NotImplemented
    ));

    // Within one child it forwards.
    cfs.rename(&dav("/a/f"), &dav("/a/g")).await.unwrap();
    assert_eq!(read_file(&cfs, "/a/g").await.unwrap(), b"data");
    assert!(read_file(&cfs, "/a/f").await.is_err());
}

#[tokio::test]
async fn test_removed_child_closed_exactly_once() {
    let cfs = composite();
    let stub = StubFs::new(SystemTime::UNIX_EPOCH);
    cfs.add_child("n", ChildFs::closeable(stub.clone()));

    cfs.remove_child("n");
    assert_eq!(stub.close_count(), 1);
    assert!(cfs.get_child("n").is_none());

    // Replacement under the same name is a distinct child.
    let replacement = StubFs::new(SystemTime::UNIX_EPOCH);
    cfs.add_child("n", ChildFs::closeable(replacement.clone()));
    assert!(matches!(
        cfs.metadata(&dav("/gone/x")).await.unwrap_err(),
        FsError::NotFound
    ));
    assert_eq!(stub.close_count(), 1);
    assert_eq!(replacement.close_count(), 0);
}

#[tokio::test]
async fn test_set_children_idempotent() {
    let cfs = composite();
    let stub_a = StubFs::new(SystemTime::UNIX_EPOCH);
    let stub_b = StubFs::new(SystemTime::UNIX_EPOCH);
    let child_a = ChildFs::closeable(stub_a.clone());
    let child_b = ChildFs::closeable(stub_b.clone());

    let children: HashMap<String, ChildFs> = [
        ("a".to_string(), child_a.clone()),
        ("b".to_string(), child_b.clone()),
    ]
    .into();
    cfs.set_children(children.clone());
    cfs.set_children(children);

    // Reinstalling the same handles closes nothing.
    assert_eq!(stub_a.close_count(), 0);
    assert_eq!(stub_b.close_count(), 0);

    // Replacing the set closes the displaced children once.
    cfs.set_children(HashMap::new());
    assert_eq!(stub_a.close_count(), 1);
    assert_eq!(stub_b.close_count(), 1);
    assert!(list_dir(&cfs, "/").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_close_closes_every_child() {
    let cfs = composite();
    let stub_a = StubFs::new(SystemTime::UNIX_EPOCH);
    let stub_b = StubFs::new(SystemTime::UNIX_EPOCH);
    cfs.add_child("a", ChildFs::closeable(stub_a.clone()));
    cfs.add_child("b", ChildFs::closeable(stub_b.clone()));

    cfs.close();
    assert_eq!(stub_a.close_count(), 1);
    assert_eq!(stub_b.close_count(), 1);
}

#[tokio::test]
async fn test_stat_children_reports_newest_mtime() {
    let t1 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
    let t2 = SystemTime::UNIX_EPOCH + Duration::from_secs(2_000);

    let cfs = CompositeFs::new(CompositeOptions {
        stat_children: true,
        clock: None,
    });
    cfs.add_child("old", ChildFs::closeable(StubFs::new(t1)));
    cfs.add_child("new", ChildFs::closeable(StubFs::new(t2)));

    let meta = cfs.metadata(&dav("/")).await.unwrap();
    assert_eq!(meta.modified().unwrap(), t2);
}

#[tokio::test]
async fn test_fixed_clock_used_without_stat_children() {
    let frozen = SystemTime::UNIX_EPOCH + Duration::from_secs(42);
    let cfs = CompositeFs::new(CompositeOptions {
        stat_children: false,
        clock: Some(Arc::new(move || frozen)),
    });
    cfs.add_child("a", ChildFs::plain(*MemFs::new()));

    let meta = cfs.metadata(&dav("/")).await.unwrap();
    assert_eq!(meta.modified().unwrap(), frozen);

    // Per-child synthetic stats use the same clock.
    let meta = cfs.metadata(&dav("/a")).await.unwrap();
    assert!(meta.is_dir());
    assert_eq!(meta.modified().unwrap(), frozen);
}

#[tokio::test]
async fn test_nested_composites_route_two_levels() {
    let outer = composite();
    let inner = composite();
    let mem = *MemFs::new();
    put_file(&mem, "/f", b"deep").await;
    inner.add_child("peer", ChildFs::plain(mem));
    outer.add_child("domain", ChildFs::closeable(inner));

    assert_eq!(read_file(&outer, "/domain/peer/f").await.unwrap(), b"deep");
    let entries = list_dir(&outer, "/domain").await.unwrap();
    assert_eq!(entries, vec![("peer".to_string(), true)]);
}
