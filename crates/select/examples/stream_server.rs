use bytes::Bytes;
use futures::channel::mpsc::channel;
use futures::SinkExt;
use micro_select::middleware::compress;
use micro_select::{handler, App, Error, RawResponse, Reply, Router, Server};
use std::convert::Infallible;
use std::time::Duration;

// curl -N http://127.0.0.1:8080/count
async fn count() -> Reply {
    let (mut sender, receiver) = channel::<Result<Bytes, Infallible>>(2);

    tokio::spawn(async move {
        for i in 0..5 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if sender.send(Ok(Bytes::from(format!("{i}\n")))).await.is_err() {
                break;
            }
        }
    });

    Reply::stream(receiver)
}

// curl -N http://127.0.0.1:8080/raw
async fn raw() -> Reply {
    Reply::raw(|_ctx, mut raw: RawResponse| async move {
        raw.headers_mut().insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/plain"));
        for i in 0..5 {
            raw.write(format!("chunk {i}\n")).await?;
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        raw.end();
        Ok::<(), Error>(())
    })
}

#[tokio::main]
async fn main() {
    let router = Router::builder()
        .get("/count", handler((), count))
        .get("/raw", handler((), raw))
        .build()
        .unwrap();

    let app = App::builder().middleware(compress()).build(router);

    Server::builder().address("127.0.0.1:8080").unwrap().app(app).build().unwrap().start().await;
}
