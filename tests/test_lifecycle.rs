use lumen::config::{RuntimeConfig, TasksConfig};
use lumen::{AliveRegistry, LocalHost, Object, ObjectHeader, Ref, Runtime};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

struct Mesh {
    header: ObjectHeader,
    vertices: usize,
    dropped_on: Arc<Mutex<Vec<ThreadId>>>,
}

impl Object for Mesh {
    fn header(&self) -> &ObjectHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "Mesh"
    }
}

impl Drop for Mesh {
    fn drop(&mut self) {
        self.dropped_on.lock().unwrap().push(thread::current().id());
    }
}

fn config(workers: usize) -> RuntimeConfig {
    RuntimeConfig {
        tasks: TasksConfig {
            workers,
            thread_name: "lifecycle".to_string(),
        },
        ..RuntimeConfig::default()
    }
}

fn mesh(vertices: usize, dropped_on: &Arc<Mutex<Vec<ThreadId>>>) -> Mesh {
    Mesh {
        header: ObjectHeader::new(),
        vertices,
        dropped_on: Arc::clone(dropped_on),
    }
}

#[test]
fn test_bridged_objects_shared_with_tasks() {
    let host = Arc::new(LocalHost::new());
    let registry = Arc::new(AliveRegistry::new());
    let runtime = Runtime::builder()
        .config(config(4))
        .host(host.clone())
        .registry(registry.clone())
        .build()
        .unwrap();

    let dropped_on = Arc::new(Mutex::new(Vec::new()));
    let objects: Vec<_> = (0..8).map(|i| runtime.create(mesh(i * 10, &dropped_on))).collect();

    let bridge = runtime.bridge().unwrap().clone();
    let peers: Vec<_> = {
        let lock = bridge.lock();
        objects
            .iter()
            .map(|object| host.wrap(object, &lock).unwrap())
            .collect()
    };

    let total = Arc::new(AtomicUsize::new(0));
    for object in &objects {
        let shared = runtime.share(object).unwrap();
        let total = Arc::clone(&total);
        runtime.submit(move || {
            for _ in 0..10 {
                let copy = shared.clone();
                total.fetch_add(copy.vertices, Ordering::SeqCst);
            }
        });
    }

    runtime.wait_for_tasks().unwrap();
    assert_eq!(total.load(Ordering::SeqCst), 10 * (0..8).map(|i| i * 10).sum::<usize>());
    assert_eq!(host.unguarded_mutations(), 0);

    // Only the host wrapper and the creator remain
    for (object, peer) in objects.iter().zip(&peers) {
        assert_eq!(Ref::count(object), 2);
        assert_eq!(host.wrapper_count(*peer), Some(1));
    }

    {
        let lock = bridge.lock();
        for peer in &peers {
            host.host_release(*peer, &lock);
        }
    }
    assert_eq!(host.live_wrappers(), 0);
    drop(objects);
    drop(bridge);

    let report = runtime.shutdown().unwrap();
    assert!(report.is_clean());
    assert_eq!(report.tasks.completed, 8);
    assert_eq!(dropped_on.lock().unwrap().len(), 8);
}

#[test]
fn test_last_release_on_worker_destroys_there() {
    let host = Arc::new(LocalHost::new());
    let runtime = Runtime::builder()
        .config(config(1))
        .host(host.clone())
        .registry(Arc::new(AliveRegistry::new()))
        .build()
        .unwrap();

    let dropped_on = Arc::new(Mutex::new(Vec::new()));
    let object = runtime.create(mesh(3, &dropped_on));
    let bridge = runtime.bridge().unwrap().clone();
    let peer = {
        let lock = bridge.lock();
        host.wrap(&object, &lock).unwrap()
    };

    let shared = runtime.share(&object).unwrap();
    {
        let lock = bridge.lock();
        host.host_release(peer, &lock);
    }
    drop(object);

    let worker = runtime.submit(move || {
        drop(shared);
        thread::current().id()
    });
    let worker_id = worker.wait().unwrap();

    assert_eq!(*dropped_on.lock().unwrap(), vec![worker_id]);
    assert_eq!(host.wrapper_count(peer), None);

    drop(bridge);
    assert!(runtime.shutdown().unwrap().is_clean());
}

#[test]
fn test_shutdown_reports_leaks() {
    let registry = Arc::new(AliveRegistry::new());
    let runtime = Runtime::builder()
        .config(config(2))
        .registry(registry.clone())
        .build()
        .unwrap();

    let dropped_on = Arc::new(Mutex::new(Vec::new()));
    let kept = runtime.create(mesh(1, &dropped_on));
    let gone = runtime.create(mesh(2, &dropped_on));
    drop(gone);

    let report = runtime.shutdown().unwrap();
    if lumen::registry::ENABLED {
        assert_eq!(report.leaked.len(), 1);
        assert_eq!(report.leaked[0].tag, "Mesh");
        assert_eq!(report.leaked[0].count, 1);
        assert!(!report.is_clean());
    } else {
        assert!(report.leaked.is_empty());
    }

    drop(kept);
    assert!(registry.is_empty());
}

#[test]
fn test_unbridged_runtime_shares_nothing() {
    let runtime = Runtime::builder().config(config(1)).build().unwrap();
    let dropped_on = Arc::new(Mutex::new(Vec::new()));
    let object = runtime.create(mesh(5, &dropped_on));

    assert!(runtime.bridge().is_none());
    assert!(runtime.share(&object).is_none());
    drop(object);

    let report = runtime.shutdown().unwrap();
    assert_eq!(report.tasks.submitted, 0);
}

#[test]
fn test_share_after_host_collected_wrapper() {
    let host = Arc::new(LocalHost::new());
    let runtime = Runtime::builder()
        .config(config(2))
        .host(host.clone())
        .registry(Arc::new(AliveRegistry::new()))
        .build()
        .unwrap();

    let dropped_on = Arc::new(Mutex::new(Vec::new()));
    let object = runtime.create(mesh(7, &dropped_on));
    let bridge = runtime.bridge().unwrap().clone();
    let peer = {
        let lock = bridge.lock();
        let peer = host.wrap(&object, &lock).unwrap();
        host.host_release(peer, &lock);
        peer
    };
    assert_eq!(host.wrapper_count(peer), None);

    let shared = runtime.share(&object).unwrap();
    assert_eq!(host.wrapper_count(peer), Some(1));
    let vertices = runtime.submit(move || shared.vertices).wait().unwrap();
    assert_eq!(vertices, 7);

    runtime.wait_for_tasks().unwrap();
    assert_eq!(host.wrapper_count(peer), None);
    assert_eq!(Ref::count(&object), 1);

    drop(object);
    drop(bridge);
    assert!(runtime.shutdown().unwrap().is_clean());
    assert_eq!(dropped_on.lock().unwrap().len(), 1);
}
