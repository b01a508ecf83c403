pub use rocket::http::Status;

/// A type that implements HttpCode communicates the status the HTTP framework should set
/// should an instance of the type be returned to the caller.
///
/// The easiest way to implement HttpCode is via the derive macro.
///
/// ```
/// use error::{HttpCode, Status};
///
/// #[derive(HttpCode)]
/// #[code(Status::ServiceUnavailable)]
/// struct PoolExhausted {}
///
/// assert_eq!(PoolExhausted {}.http_code(), Status::ServiceUnavailable);
/// ```
///
/// See <https://api.rocket.rs/v0.5/rocket/http/struct.Status.html> for a full list of
/// available codes.
pub trait HttpCode {
    fn http_code(&self) -> Status;
}
