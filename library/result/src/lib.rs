use error::LfmError;

/// A Result is an alias of [std::result::Result](std::result::Result) with its error variant
/// pre-populated with a `Box<dyn LfmError>`. This allows for shorter notation throughout the
/// service, and every error in the service converts into it with `?`.
///
/// ```
/// use result::Result;
///
/// fn tag() -> Result<&'static str> {
///     Ok("22.04-latest")
/// }
/// ```
pub type Result<T> = std::result::Result<T, Box<dyn LfmError>>;
