use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use micro_select::filter::header;
use micro_select::middleware::{compress, recover, timeout};
use micro_select::select::{body_text, form_body, json_body, method, query, BodyOptions, QueryMap};
use micro_select::{handler, middleware_fn, App, ErrorConfig, Next, Reply, Router, Server};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Deserialize, Serialize, Debug)]
pub struct User {
    name: String,
    zip: String,
}

// curl -v "http://127.0.0.1:8080/?name=micro"
async fn simple_get(method: Method, query: Arc<QueryMap>) -> String {
    format!("receive from method: {method}, name: {}\r\n", query.get("name").unwrap_or("nobody"))
}

// curl -v -H "Transfer-Encoding: chunked" -d "name=hello&zip=world" http://127.0.0.1:8080/
async fn simple_handler_form_data(method: Method, user: User) -> String {
    format!("receive from method: {method}, receive user: {user:#?}\r\n")
}

// curl -v -H 'Content-Type: application/json' -d '{"name":"hello","zip":"world"}' http://127.0.0.1:8080/
async fn simple_handler_json_data(user: User) -> Reply {
    Reply::json(serde_json::json!({ "received": user }))
}

// curl -v -d "anything" http://127.0.0.1:8080/
async fn simple_handler_post(body: String) -> String {
    format!("receive {} bytes\r\n", body.len())
}

#[tokio::main]
async fn main() {
    let router = Router::builder()
        .get("/", handler((method(), query()), simple_get))
        .route_with(
            ("/", Method::POST),
            header(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded")),
            handler((method(), form_body::<User>(BodyOptions::new())), simple_handler_form_data),
        )
        .route_with(
            ("/", Method::POST),
            header(CONTENT_TYPE, HeaderValue::from_static("application/json")),
            handler((json_body::<User>(BodyOptions::new()),), simple_handler_json_data),
        )
        .post("/", handler((body_text(BodyOptions::new()),), simple_handler_post))
        .build()
        .unwrap();

    let access_log = middleware_fn((method(),), |next: Next, method: Method| async move {
        let start = Instant::now();
        let path = next.context().uri().path().to_string();
        let reply = next.run().await;
        info!(%method, path, elapsed = ?start.elapsed(), "request handled");
        reply
    });

    let app = App::builder()
        .error_config(ErrorConfig::from_env())
        .middleware(recover(ErrorConfig::from_env()))
        .middleware(access_log)
        .middleware(compress())
        .middleware(timeout(Duration::from_secs(10)))
        .build(router);

    Server::builder().address("127.0.0.1:8080").unwrap().app(app).build().unwrap().start().await;
}
