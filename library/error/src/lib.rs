// The derives in error-derive name their traits as `error::...`, which lets them be used
// inside this crate's own tests as well.
extern crate self as error;

mod httpcode;
mod kind;

pub use crate::httpcode::{HttpCode, Status};
pub use crate::kind::Kind;
pub use error_derive::{HttpCode, Kind, LfmError};
pub use thiserror;
pub use thiserror::Error;

use log::{debug, error};
use rocket::request::Request;
use rocket::response::Responder;
use serde::{Serialize, Serializer};
use serde_json::{to_string_pretty, Map, Value};

/// An LfmError is the trait to which every error returned by any part of the service MUST
/// adhere.
///
/// The easiest way to implement this error type is to utilize the derive macros re-exported
/// by this library. Notably, [Error](thiserror::Error), [LfmError](error_derive::LfmError),
/// [HttpCode](error_derive::HttpCode), and [Kind](error_derive::Kind).
///
/// ```
/// use error::*;
///
/// #[derive(Error, LfmError, HttpCode, Kind, Debug)]
/// #[error("The tag '{tag}' is not usable as a directory name")]
/// #[code(Status::BadRequest)]
/// struct UnsafeTag {
///     tag: String,
///     // Any aggregated error annotated as a source is formatted and
///     // serialized into the 'details' key of the resulting JSON.
///     #[source]
///     cause: std::io::Error,
/// }
/// ```
pub trait LfmError: std::error::Error + HttpCode + Kind + Send + Sync {}

/// This conversion supports the automatic boxing of any type that implements
/// [LfmError](crate::LfmError), which is what lets `?` work across the whole service.
impl<T: 'static + LfmError> From<T> for Box<dyn LfmError> {
    fn from(err: T) -> Self {
        Box::new(err)
    }
}

/// The [Serialize](serde::Serialize) implementation for an [LfmError](crate::LfmError) is a
/// flat JSON object.
///
/// ```ignore
/// {
///     "error": "The record 12 does not exist.",
///     "details": "Its cause, omitted entirely when there is none.",
///     "kind": "StoreError::NotFound"
/// }
/// ```
impl Serialize for Box<dyn LfmError> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(self.to_string()));
        if let Some(cause) = self.source() {
            body.insert("details".to_string(), Value::String(cause.to_string()));
        }
        body.insert("kind".to_string(), Value::String(self.kind()));
        Value::Object(body).serialize(serializer)
    }
}

/// Walks the full `source()` chain of an error, outermost first, for log entries.
pub fn chain<E: std::error::Error + ?Sized>(err: &E) -> String {
    let mut links = vec![err.to_string()];
    let mut cause = err.source();
    while let Some(inner) = cause {
        links.push(inner.to_string());
        cause = inner.source();
    }
    links.join(": ")
}

/// The [Responder](rocket::response::Responder) implementation for an
/// [LfmError](crate::LfmError) does four things:
///
/// 1. Logs the error. Server side failures (5xx) are logged at `error` with their full cause
///    chain, client mistakes at `debug`.
/// 2. Sets the content type to JSON.
/// 3. Sets the HTTP status to the status declared in the error's `#[code(..)]` annotation.
/// 4. Serializes the error (see [Serialize](#impl-Serialize-for-Box<dyn LfmError>)) and sends
///    the resulting bytes over the wire.
impl<'r, 'o: 'r> Responder<'r, 'o> for Box<dyn LfmError> {
    fn respond_to(self, request: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.http_code();
        if status.code >= 500 {
            error!(
                "{} {} failed with {} ({}): {}",
                request.method(),
                request.uri(),
                status,
                self.kind(),
                chain(self.as_ref())
            );
        } else {
            debug!(
                "{} {} rejected with {} ({}): {}",
                request.method(),
                request.uri(),
                status,
                self.kind(),
                self
            );
        }
        // Serializing a map of strings cannot fail.
        let json = to_string_pretty(&self).unwrap_or_else(|_| String::from("{}"));
        rocket::Response::build()
            .header(rocket::http::ContentType::JSON)
            .status(status)
            .sized_body(json.len(), std::io::Cursor::new(json))
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::get;
    use rocket::local::blocking::Client;
    use rocket::routes;

    #[derive(LfmError, Error, Kind, HttpCode, Debug)]
    #[error("The export left nothing behind")]
    #[code(Status::BadGateway)]
    struct NothingExported {}

    #[get("/")]
    async fn fail_without_cause() -> std::result::Result<(), Box<dyn LfmError>> {
        Err(NothingExported {}.into())
    }

    #[test]
    fn without_cause() {
        let client =
            Client::tracked(rocket::build().mount("/", routes![fail_without_cause])).unwrap();
        let response = client.get("/").dispatch();
        assert_eq!(response.status(), Status::BadGateway);
        let got: serde_json::Value = response.into_json().unwrap();
        let want = serde_json::json!({
            "error": "The export left nothing behind",
            "kind": "NothingExported"
        });
        assert_eq!(got, want)
    }

    #[derive(LfmError, Error, Kind, HttpCode, Debug)]
    #[error("The record could not be registered")]
    #[code(Status::NotFound)]
    struct NotRegistered {
        #[from]
        cause: NothingExported,
    }

    #[get("/")]
    async fn fail_with_cause() -> std::result::Result<(), Box<dyn LfmError>> {
        Err(NotRegistered::from(NothingExported {}).into())
    }

    #[test]
    fn with_cause() {
        let client = Client::tracked(rocket::build().mount("/", routes![fail_with_cause])).unwrap();
        let response = client.get("/").dispatch();
        assert_eq!(response.status(), Status::NotFound);
        let got: serde_json::Value = response.into_json().unwrap();
        let want = serde_json::json!({
            "error": "The record could not be registered",
            "details": "The export left nothing behind",
            "kind": "NotRegistered"
        });
        assert_eq!(got, want)
    }

    #[test]
    fn chain_walks_every_source() {
        let err = NotRegistered::from(NothingExported {});
        assert_eq!(
            chain(&err),
            "The record could not be registered: The export left nothing behind"
        );
    }

    #[derive(Error, LfmError, Kind, HttpCode, Debug)]
    #[code(Status::InternalServerError)]
    enum Mixed {
        #[error("gone")]
        #[code(Status::Gone)]
        Gone,
        #[error("fallback {0}")]
        Fallback(u32),
        #[error("named {id}")]
        Named { id: u32 },
    }

    #[test]
    fn enum_codes_fall_back_to_the_enum_default() {
        assert_eq!(Mixed::Gone.http_code(), Status::Gone);
        assert_eq!(Mixed::Fallback(1).http_code(), Status::InternalServerError);
        assert_eq!(Mixed::Named { id: 2 }.http_code(), Status::InternalServerError);
    }

    #[test]
    fn enum_kinds_name_the_variant() {
        assert_eq!(Mixed::Gone.kind(), "Mixed::Gone");
        assert_eq!(Mixed::Fallback(1).kind(), "Mixed::Fallback");
        assert_eq!(Mixed::Named { id: 2 }.kind(), "Mixed::Named");
    }
}
