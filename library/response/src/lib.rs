use rocket::request::Request;
use rocket::response::Responder;
use serde::Serialize;
use serde_json::to_string_pretty;

/// A Response may be constructed from any type that implements [Serialize](serde::Serialize).
///
/// Once constructed, the resulting Response may be returned to the HTTP framework where it
/// will properly handle tasks such as setting content headers, serializing your data and
/// setting the HTTP response code.
///
/// ```
/// use serde::Serialize;
/// use response::Response;
/// use result::Result;
/// use rocket::get;
///
/// #[derive(Serialize)]
/// struct Built {
///     #[serde(rename = "imageTag")]
///     image_tag: String,
/// }
///
/// #[get("/")]
/// async fn build() -> Result<Response<Built>> {
///     Ok(Built { image_tag: "22.04-latest".to_string() }.into())
/// }
/// ```
pub struct Response<T> {
    payload: T,
}

/// A Response may be constructed from any type that implements [Serialize](serde::Serialize)
/// due to this blanket implementation.
impl<T: Serialize> From<T> for Response<T> {
    fn from(payload: T) -> Self {
        Self { payload }
    }
}

/// The [Responder](rocket::response::Responder) implementation for a [Response](crate::Response)
/// sets the content type to JSON, sets the status to 200 (OK) and sends the serialized payload,
/// as is, as the body. The admin page reads the payload's fields directly off the body, so
/// there is no envelope around it.
impl<'r, 'o: 'r, T: Serialize> Responder<'r, 'o> for Response<T> {
    fn respond_to(self, _: &'r Request<'_>) -> rocket::response::Result<'o> {
        let json = to_string_pretty(&self.payload).map_err(|err| {
            log::error!("failed to serialize a response payload: {}", err);
            rocket::http::Status::InternalServerError
        })?;
        rocket::Response::build()
            .header(rocket::http::ContentType::JSON)
            .status(rocket::http::Status::Ok)
            .sized_body(json.len(), std::io::Cursor::new(json))
            .ok()
    }
}

/// The `{ "message": ... }` acknowledgement returned by operations that have nothing else
/// to report.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message: String,
}

impl<T: AsRef<str>> From<T> for Message {
    fn from(message: T) -> Self {
        Message {
            message: message.as_ref().to_string(),
        }
    }
}
