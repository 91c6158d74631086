#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use http_body_util::Full;
use rpcflow::{Reply, StreamOutcome};
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader, DuplexStream, Lines},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

pub fn get(path: &str, input: Option<Value>) -> Request<Full<Bytes>> {
    let uri = match input {
        Some(input) => format!(
            "{path}?{}",
            form_urlencoded::Serializer::new(String::new())
                .append_pair("input", &input.to_string())
                .finish()
        ),
        None => path.to_owned(),
    };

    Request::get(uri).body(Full::default()).unwrap()
}

pub fn post(path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::post(path).body(Full::new(body.into())).unwrap()
}

/// Status, headers and parsed body of a unary reply.
pub fn unary(reply: Reply) -> (StatusCode, HeaderMap, Value) {
    let response = reply.into_unary().expect("expected a unary reply");
    let status = response.status();
    let (parts, body) = response.into_parts();
    (status, parts.headers, serde_json::from_slice(&body).unwrap())
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: Option<String>,
    pub data: Value,
}

/// A stream reply being written into an in-memory pipe.
pub struct Open {
    pub headers: HeaderMap,
    pub cancel: CancellationToken,
    pub task: JoinHandle<StreamOutcome>,
    lines: Lines<BufReader<DuplexStream>>,
}

pub fn open(reply: Reply) -> Open {
    let stream = reply.into_stream().expect("expected a stream reply");
    let headers = stream.headers().clone();
    let cancel = stream.cancellation_token();

    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let task = tokio::spawn(stream.pump(writer));

    Open {
        headers,
        cancel,
        task,
        lines: BufReader::new(reader).lines(),
    }
}

impl Open {
    /// The next event frame, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Frame> {
        tokio::time::timeout(Duration::from_secs(5), self.read_frame())
            .await
            .expect("timed out waiting for a frame")
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        let mut id = None;
        let mut data = None;

        loop {
            let line = self.lines.next_line().await.unwrap()?;
            if let Some(rest) = line.strip_prefix("id: ") {
                id = Some(rest.to_owned());
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data = Some(serde_json::from_str(rest).unwrap());
            } else if line.is_empty() {
                if let Some(data) = data.take() {
                    return Some(Frame { id, data });
                }
            }
        }
    }

    /// Every remaining frame and how the stream ended.
    pub async fn finish(mut self) -> (Vec<Frame>, StreamOutcome) {
        let mut frames = Vec::new();
        while let Some(frame) = self.next().await {
            frames.push(frame);
        }
        (frames, self.task.await.unwrap())
    }
}

pub fn result(frame: &Frame) -> &Value {
    frame.data.get("result").expect("expected a result frame")
}
