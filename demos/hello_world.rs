#[path = "tcp_driver.rs"]
mod tcp_driver;

use at_web::{Method, Server};
use tcp_driver::TcpDriver;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tcp_driver::init_logging();

    let mut server = Server::builder().driver(TcpDriver::default()).port(8080).build();

    server.on("/", Method::Get, |_, resp| {
        resp.send(200, Some("text/plain"), "Hello, world!");
    });

    server.launch().await;
}
