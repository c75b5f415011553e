#[path = "tcp_driver.rs"]
mod tcp_driver;

use at_web::{limits::ReqLimits, Method, Server, UploadStatus};
use std::{fs::File, io::Write};
use tcp_driver::TcpDriver;

const FORM: &str = r#"<form method="POST" action="/upload" enctype="multipart/form-data">
<input type="file" name="firmware"><input type="submit" value="Upload">
</form>"#;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tcp_driver::init_logging();

    let mut server = Server::builder()
        .driver(TcpDriver::default())
        .port(8080)
        .request_limits(ReqLimits {
            upload_buffer_size: 1024,
            ..ReqLimits::default()
        })
        .build();

    let mut target: Option<File> = None;

    server
        .on("/", Method::Get, |_, resp| resp.send(200, Some("text/html"), FORM))
        .on("/settings", Method::Post, |req, resp| {
            if !req.authenticate("admin", "admin") {
                return resp.request_authentication();
            }
            match req.arg("interval") {
                Some(value) => resp.send(200, Some("text/plain"), format!("interval set to {value}")),
                None => resp.send(400, Some("text/plain"), "missing interval"),
            }
        })
        .on_upload(
            "/upload",
            Method::Post,
            |_, resp| resp.send(200, Some("text/plain"), "stored"),
            move |_, upload| match upload.status() {
                UploadStatus::Start => {
                    tracing::info!("Receiving {} into {}", upload.name(), upload.filename());
                    target = File::create(format!("upload-{}", upload.filename())).ok();
                }
                UploadStatus::Write | UploadStatus::End => {
                    if let Some(file) = target.as_mut() {
                        let _ = file.write_all(upload.data());
                    }
                    if upload.status() == UploadStatus::End {
                        tracing::info!("Stored {} bytes", upload.total_size());
                        target = None;
                    }
                }
                UploadStatus::Aborted => target = None,
            },
        );

    server.launch().await;
}
