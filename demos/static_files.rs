#[path = "tcp_driver.rs"]
mod tcp_driver;

use at_web::{FsContent, Server};
use tcp_driver::TcpDriver;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tcp_driver::init_logging();

    let root = std::env::args().nth(1).unwrap_or_else(|| "www".to_owned());
    let mut server = Server::builder().driver(TcpDriver::default()).port(8080).build();

    server
        .serve_static("/", FsContent::new(root), Some("max-age=600"))
        .on_not_found(|req, resp| {
            resp.send(404, Some("text/plain"), format!("{} not found", req.uri()));
        });

    server.launch().await;
}
