use std::time::Duration;

use rpcflow::{Atom, BuiltRouter, Procedure, Router, Service, StreamOutcome};
use serde::Serialize;
use serde_json::json;
use specta::Type;

mod utils;
use utils::*;

#[derive(Debug, Clone, PartialEq, Serialize, Type)]
struct Presence {
    online: Vec<String>,
}

fn router(atom: &Atom<Presence>) -> BuiltRouter {
    Router::new()
        .service(
            "Room",
            Service::new().procedure("Presence", Procedure::builder().atom(atom)),
        )
        .build()
        .unwrap()
}

async fn wait_for_subscribers(atom: &Atom<Presence>, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while atom.subscriber_count() != count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber count never settled");
}

#[tokio::test]
async fn subscribers_start_with_the_current_value() {
    let atom = Atom::new(Presence {
        online: vec!["ada".into()],
    });
    atom.update(|p| Presence {
        online: [p.online.clone(), vec!["bob".into()]].concat(),
    });
    let router = router(&atom);

    let mut stream = open(router.handle(get("/Room/Presence", None), ()).await);
    let first = stream.next().await.unwrap();
    assert_eq!(result(&first), &json!({ "online": ["ada", "bob"] }));

    stream.cancel.cancel();
    let (rest, outcome) = stream.finish().await;
    assert!(rest.is_empty());
    assert_eq!(outcome, StreamOutcome::Cancelled);
}

#[tokio::test]
async fn every_subscriber_sees_an_update_once() {
    let atom = Atom::new(Presence { online: vec![] });
    let router = router(&atom);

    let mut a = open(router.handle(get("/Room/Presence", None), ()).await);
    let mut b = open(router.handle(get("/Room/Presence", None), ()).await);
    assert_eq!(result(&a.next().await.unwrap()), &json!({ "online": [] }));
    assert_eq!(result(&b.next().await.unwrap()), &json!({ "online": [] }));
    assert_eq!(atom.subscriber_count(), 2);

    atom.set(Presence {
        online: vec!["cy".into()],
    });

    let expected = json!({ "online": ["cy"] });
    assert_eq!(result(&a.next().await.unwrap()), &expected);
    assert_eq!(result(&b.next().await.unwrap()), &expected);

    // Nothing else was queued for either of them.
    a.cancel.cancel();
    b.cancel.cancel();
    assert!(a.finish().await.0.is_empty());
    assert!(b.finish().await.0.is_empty());
}

#[tokio::test]
async fn closed_streams_unsubscribe() {
    let atom = Atom::new(Presence { online: vec![] });
    let router = router(&atom);

    let mut stream = open(router.handle(get("/Room/Presence", None), ()).await);
    stream.next().await.unwrap();
    assert_eq!(atom.subscriber_count(), 1);

    stream.cancel.cancel();
    stream.finish().await;
    wait_for_subscribers(&atom, 0).await;
}

#[tokio::test]
async fn concurrent_updates_are_serialized() {
    let atom = Atom::new(0u64);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let atom = atom.clone();
            tokio::spawn(async move {
                for _ in 0..100 {
                    atom.update(|n| n + 1);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(*atom.get(), 800);
    assert_eq!(atom.version(), 800);
}
