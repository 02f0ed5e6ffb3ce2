use micro_select::select::route_param;
use micro_select::{handler, Reply, Router, Server};
use http::StatusCode;

async fn hello_world() -> &'static str {
    "hello world"
}

async fn echo_uid(id: Option<String>) -> String {
    id.unwrap_or_default()
}

async fn not_found() -> Reply {
    Reply::error(StatusCode::NOT_FOUND, "404 not found")
}

#[tokio::main]
async fn main() {
    let router = Router::builder()
        .get("/", handler((), hello_world))
        .get("/user/:id", handler((route_param("id"),), echo_uid))
        .not_found(handler((), not_found))
        .build()
        .unwrap();

    Server::builder().address("127.0.0.1:3000").unwrap().handler(router).build().unwrap().start().await;
}
