/// A type that implements Kind is capable of describing itself to outside systems, typically
/// by simply returning the name of its type. Error bodies carry it under the `kind` key so
/// that callers may branch on something sturdier than a message.
///
/// ```
/// use error::Kind;
///
/// #[derive(Kind)]
/// struct ExportIncomplete {}
///
/// #[derive(Kind)]
/// enum StoreError {
///     NotFound { id: i64 },
///     Unavailable(String),
/// }
///
/// assert_eq!("ExportIncomplete", ExportIncomplete {}.kind());
/// assert_eq!("StoreError::NotFound", StoreError::NotFound { id: 1 }.kind());
/// assert_eq!("StoreError::Unavailable", StoreError::Unavailable(String::new()).kind());
/// ```
///
/// The Kind derivation macro does not work on unions.
pub trait Kind {
    fn kind(&self) -> String;
}
