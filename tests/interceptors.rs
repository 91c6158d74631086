use std::sync::{Arc, Mutex};

use futures::StreamExt;
use rpcflow::{
    middleware::{logging, stream_logging, StreamInterceptor, UnaryInterceptor},
    procedure::Payload,
    BoxError, BuiltRouter, Error, Event, Procedure, Router, Service, StreamError,
};
use serde_json::json;

mod utils;
use utils::*;

#[derive(Clone, Default)]
struct Ctx {
    log: Arc<Mutex<Vec<String>>>,
}

impl Ctx {
    fn push(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn traced(name: &'static str) -> UnaryInterceptor<Ctx> {
    UnaryInterceptor::<Ctx>::new(move |ctx, input, next| async move {
        ctx.push(format!("{name}:before"));
        let result = next.run(ctx.clone(), input).await;
        ctx.push(format!("{name}:after"));
        result
    })
}

fn router() -> BuiltRouter<Ctx> {
    let double = StreamInterceptor::<Ctx>::new(|ctx, input, next| {
        next.run(ctx, input).map(|event| {
            event.map(|mut event| {
                if let Some(n) = event.data().as_u64() {
                    *event.data_mut() = json!(n * 2);
                }
                event
            })
        })
    });

    let greet = StreamInterceptor::<Ctx>::new(|ctx, input, next| {
        async_stream::stream! {
            yield Ok::<_, BoxError>(Event::new(json!("hello")).with_id("greeting"));

            let mut events = next.run(ctx, input);
            while let Some(event) = events.next().await {
                yield event;
            }
        }
    });

    let shout = UnaryInterceptor::<Ctx>::new(|ctx, input, next| async move {
        let upper = input.inspect(|text: &String| text.to_uppercase());
        let input = upper.map(Payload::new).unwrap_or(input);
        next.run(ctx, input).await
    });

    // Keeps its own handle on the input across `next`.
    let audit = UnaryInterceptor::<Ctx>::new(|ctx, input, next| async move {
        ctx.push(format!("audit:{}", input.type_name()));
        let result = next.run(ctx.clone(), input.clone()).await;
        let left = input.inspect(|text: &String| text.clone());
        ctx.push(format!("audit:after:{}", left.as_deref().unwrap_or("taken")));
        result
    });

    let deny = UnaryInterceptor::<Ctx>::new(|_, _, _| async move {
        Err::<serde_json::Value, BoxError>(Error::permission_denied("read only").into())
    });

    Router::new()
        .with(traced("global"))
        .with(logging())
        .with_stream(stream_logging())
        .service(
            "Echo",
            Service::new()
                .with(traced("service"))
                .procedure(
                    "Say",
                    Procedure::<Ctx>::builder()
                        .with(traced("first"))
                        .with(traced("second"))
                        .query(|ctx, text: String| async move {
                            ctx.push("handler");
                            Ok::<_, Error>(text)
                        }),
                )
                .procedure(
                    "Shout",
                    Procedure::<Ctx>::builder()
                        .with(shout)
                        .query(|_, text: String| async move { Ok::<_, Error>(text) }),
                )
                .procedure(
                    "Audited",
                    Procedure::<Ctx>::builder()
                        .with(audit)
                        .query(|_, text: String| async move { Ok::<_, Error>(text) }),
                )
                .procedure(
                    "Delete",
                    Procedure::<Ctx>::builder()
                        .with(deny)
                        .exec(|ctx, _: ()| async move {
                            ctx.push("handler");
                            Ok::<_, Error>(())
                        }),
                )
                .procedure(
                    "Numbers",
                    Procedure::<Ctx>::builder()
                        .with_stream(double)
                        .stream(|ctx, _: (), tx| async move {
                            ctx.push("handler");
                            for n in 1..=3u64 {
                                tx.send(n).await?;
                            }
                            Ok::<_, StreamError>(())
                        }),
                )
                .procedure(
                    "Greeted",
                    Procedure::<Ctx>::builder()
                        .with_stream(greet)
                        .stream(|_, _: (), tx| async move {
                            tx.send("world".to_owned()).await?;
                            Ok::<_, StreamError>(())
                        }),
                ),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn interceptors_run_global_then_service_then_procedure() {
    let router = router();
    let ctx = Ctx::default();

    let (_, _, body) = unary(
        router
            .handle(get("/Echo/Say", Some(json!("hi"))), ctx.clone())
            .await,
    );
    assert_eq!(body, json!({ "result": "hi" }));
    assert_eq!(
        ctx.entries(),
        [
            "global:before",
            "service:before",
            "first:before",
            "second:before",
            "handler",
            "second:after",
            "first:after",
            "service:after",
            "global:after",
        ]
    );
}

#[tokio::test]
async fn interceptors_can_replace_the_input() {
    let router = router();

    let (_, _, body) = unary(
        router
            .handle(get("/Echo/Shout", Some(json!("hey"))), Ctx::default())
            .await,
    );
    assert_eq!(body, json!({ "result": "HEY" }));
}

#[tokio::test]
async fn interceptors_can_short_circuit() {
    let router = router();
    let ctx = Ctx::default();

    let (status, _, body) = unary(router.handle(post("/Echo/Delete", ""), ctx.clone()).await);
    assert_eq!(status, http::StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], "permission_denied");
    assert!(!ctx.entries().contains(&"handler".to_owned()));
}

#[tokio::test]
async fn stream_interceptors_see_every_event() {
    let router = router();
    let ctx = Ctx::default();

    let (frames, _) = open(router.handle(get("/Echo/Numbers", None), ctx.clone()).await)
        .finish()
        .await;
    let values: Vec<_> = frames.iter().map(|f| result(f).clone()).collect();
    assert_eq!(values, [json!(2), json!(4), json!(6)]);

    // Unary interceptors only ran once, during setup, before the handler.
    assert_eq!(
        ctx.entries(),
        ["global:before", "service:before", "service:after", "global:after", "handler"]
    );
}

#[tokio::test]
async fn stream_interceptors_can_inject_events() {
    let router = router();

    let (frames, outcome) = open(router.handle(get("/Echo/Greeted", None), Ctx::default()).await)
        .finish()
        .await;
    assert_eq!(outcome, rpcflow::StreamOutcome::Completed);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].id.as_deref(), Some("greeting"));
    assert_eq!(result(&frames[0]), &json!("hello"));
    assert_eq!(result(&frames[1]), &json!("world"));
}

#[tokio::test]
async fn interceptors_can_hold_the_input_across_next() {
    let router = router();
    let ctx = Ctx::default();

    let (status, _, body) = unary(
        router
            .handle(get("/Echo/Audited", Some(json!("hi"))), ctx.clone())
            .await,
    );
    assert_eq!(status, http::StatusCode::OK);
    assert_eq!(body, json!({ "result": "hi" }));

    let entries = ctx.entries();
    assert!(entries
        .iter()
        .any(|entry| entry.starts_with("audit:") && entry.ends_with("String")));
    assert!(entries.contains(&"audit:after:taken".to_owned()));
}
