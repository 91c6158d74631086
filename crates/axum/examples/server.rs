//! A small chat-style server: a presence atom, a ticking stream and a couple of procedures.
//!
//! Try it with:
//!
//! ```sh
//! curl 'localhost:4000/rpc/Chat/Hello?input=%22ada%22'
//! curl -X POST localhost:4000/rpc/Chat/Join -d '"ada"'
//! curl -N localhost:4000/rpc/Chat/Online
//! curl -N 'localhost:4000/rpc/Chat/Ticks?input=5'
//! ```

use std::time::Duration;

use axum::http::request::Parts;
use rpcflow::{
    middleware::{logging, stream_logging},
    Atom, CacheControl, Config, Error, Procedure, Router, Service, StreamError,
};

#[derive(Clone)]
struct Ctx {
    user_agent: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let online = Atom::new(Vec::<String>::new());

    let router = Router::<Ctx>::new()
        .config(Config::development().keepalive(Duration::from_secs(15)))
        .with(logging())
        .with_stream(stream_logging())
        .service(
            "Chat",
            Service::new()
                .procedure(
                    "Hello",
                    Procedure::<Ctx>::builder()
                        .cache_control(CacheControl::public(Duration::from_secs(60)))
                        .query(|ctx, name: String| async move {
                            let agent = ctx.user_agent.as_deref().unwrap_or("unknown client");
                            Ok::<_, Error>(format!("Hello, {name}! ({agent})"))
                        }),
                )
                .procedure("Join", {
                    let online = online.clone();
                    Procedure::<Ctx>::builder().exec(move |_, name: String| {
                        let online = online.clone();
                        async move {
                            if name.trim().is_empty() {
                                return Err(Error::invalid_argument("name is required"));
                            }
                            let now = online.update(|names| {
                                let mut names = names.clone();
                                names.push(name);
                                names
                            });
                            Ok(now.len())
                        }
                    })
                })
                .procedure("Online", Procedure::<Ctx>::builder().atom(&online))
                .procedure(
                    "Ticks",
                    Procedure::<Ctx>::builder().stream(|_, count: u32, tx| async move {
                        let mut interval = tokio::time::interval(Duration::from_secs(1));
                        for n in 0..count {
                            interval.tick().await;
                            tx.send_with_id(n.to_string(), n).await?;
                        }
                        Ok::<_, StreamError>(())
                    }),
                ),
        )
        .build()
        .unwrap();

    let app = axum::Router::new().nest(
        "/rpc",
        rpcflow_axum::Endpoint::new(router, |parts: &Parts| Ctx {
            user_agent: parts
                .headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        }),
    );

    let listener = tokio::net::TcpListener::bind("0.0.0.0:4000").await.unwrap();
    println!("listening on http://{}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
}
