//! at_web - HTTP server for serial-attached modems
//!
//! A small HTTP/1.x server that runs on top of the socket layer of an
//! AT-command modem. The modem side is reached only through the
//! [`SocketDriver`] trait: acquire a socket, poll for bytes, read, write,
//! release. Everything above it (request parsing, multipart uploads,
//! routing, response framing) lives in this crate.
//!
//! # Protocol Support
//!
//! - **HTTP/1.1** and **HTTP/1.0**: one request per connection, always
//!   answered with `Connection: close`
//! - **Methods**: `GET`, `POST`, `PUT`, `PATCH`, `DELETE`, `OPTIONS`
//! - **Bodies**: urlencoded forms, raw bodies and `multipart/form-data` file
//!   uploads streamed in fixed-size chunks
//! - **Responses**: `Content-Length` or chunked framing
//!
//! # Resource Model
//!
//! - **One client at a time** - [`Server::handle_client`] runs a complete
//!   cycle and returns
//! - **Fixed buffers** - the lookahead window and the upload buffer are
//!   allocated once, see [`limits`]
//! - **Bounded waits** - every read has a budget measured from the last byte
//!   received, a silent client never stalls the server
//! - **Exactly-once release** - the socket handle goes back to the driver
//!   once per cycle, on every exit path
//!
//! # Examples
//!
//! Quick start:
//! ```no_run
//! # at_web::impl_demo_driver!{ModemDriver}
//! use at_web::{Method, Server};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut server = Server::builder().driver(ModemDriver).build();
//!
//!     server.on("/", Method::Get, |_, resp| {
//!         resp.send(200, Some("text/plain"), "Hello World!");
//!     });
//!
//!     server.launch().await;
//! }
//! ```
//! Forms, uploads and files:
//! ```no_run
//! # at_web::impl_demo_driver!{ModemDriver}
//! use at_web::{FsContent, Method, Server, UploadStatus};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let mut server = Server::builder().driver(ModemDriver).port(8080).build();
//!
//!     server
//!         .on("/settings", Method::Post, |req, resp| {
//!             match req.arg("interval") {
//!                 Some(value) => resp.send(200, Some("text/plain"), format!("interval={value}")),
//!                 None => resp.send(400, Some("text/plain"), "missing interval"),
//!             }
//!         })
//!         .on_upload(
//!             "/upload",
//!             Method::Post,
//!             |_, resp| resp.send(200, None, "<p>stored</p>"),
//!             |_, upload| {
//!                 if upload.status() == UploadStatus::Write {
//!                     println!("{} += {} bytes", upload.filename(), upload.current_size());
//!                 }
//!             },
//!         )
//!         .serve_static("/", FsContent::new("www"), Some("max-age=3600"))
//!         .on_not_found(|req, resp| {
//!             resp.send(404, Some("text/plain"), format!("{} is not here", req.uri()));
//!         });
//!
//!     loop {
//!         let _ = server.handle_client().await;
//!         tokio::task::yield_now().await;
//!     }
//! }
//! ```

pub(crate) mod http {
    pub mod query;
    pub(crate) mod multipart;
    pub(crate) mod request;
    pub(crate) mod response;
    pub(crate) mod ring;
    pub(crate) mod types;
}
pub(crate) mod server {
    pub(crate) mod connection;
    pub(crate) mod driver;
    pub(crate) mod router;
    pub(crate) mod server_impl;
}
pub(crate) mod errors;
pub mod limits;

pub use crate::{
    errors::ErrorKind,
    http::{
        multipart::{Upload, UploadStatus},
        query,
        request::Request,
        response::{write::WriteBuffer, ContentLength, Response},
        types::{content_type_for, reason_phrase, Method, StatusCode, Version},
    },
    server::{
        driver::{ConnectionState, SocketDriver, SocketHandle, SocketSlots, MAX_SOCKETS},
        router::{Content, ContentSource, FsContent, HandlerFn, RequestHandler, StaticFiles, UploadFn},
        server_impl::{Server, ServerBuilder},
    },
};

#[doc(hidden)]
#[macro_export]
macro_rules! impl_demo_driver {
    ($name:ident) => {
        use at_web::{ConnectionState, SocketDriver, SocketHandle};
        struct $name;

        impl SocketDriver for $name {
            fn start_server(&mut self, _: u16) -> bool {
                true
            }
            fn acquire_handle(&mut self) -> Option<SocketHandle> {
                None
            }
            fn release_handle(&mut self, _: SocketHandle) {}
            fn is_data_available(&mut self, _: SocketHandle) -> usize {
                0
            }
            fn read_byte(&mut self, _: SocketHandle) -> (Option<u8>, bool) {
                (None, true)
            }
            fn read_bytes(&mut self, _: SocketHandle, _: &mut [u8]) -> usize {
                0
            }
            fn write_bytes(&mut self, _: SocketHandle, _: &[u8]) -> bool {
                true
            }
            fn connection_state(&mut self, _: SocketHandle) -> ConnectionState {
                ConnectionState::Closed
            }
        }
    };
}

#[cfg(test)]
pub mod tools {
    use std::str::from_utf8;

    #[inline]
    pub fn str_op(value: &[u8]) -> &str {
        from_utf8(value).unwrap()
    }

    #[inline]
    pub fn pair(value: &(String, String)) -> (&str, &str) {
        (&value.0, &value.1)
    }
}
