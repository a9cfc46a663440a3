//! Error types.

use std::fmt::{self, Formatter, Display};


pub type Result<I> = std::result::Result<I, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    error: Box<dyn std::error::Error + Send + Sync>,
    field: Option<String>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ErrorKind {
    /// (Only when marshaling) a write would land outside the destination
    /// buffer, or a reference header's offset or count would not fit in its
    /// 16 bits.
    ///
    /// Recovery means retrying with a larger buffer. A message which needs
    /// more than `MAX_MESSAGE_LEN` bytes can never be marshaled.
    BufferOverflow,

    /// (Only when unmarshaling) a fixed read or a reference header points
    /// outside the source buffer. The buffer is truncated or corrupt.
    BufferUnderflow,

    /// The schema contains a message which inlines itself, so its fixed
    /// region would be infinitely large.
    SchemaCycle,

    /// The schema itself is illegal, for reasons other than a cycle. This
    /// kind of error is always reported by layout planning, before any bytes
    /// are touched.
    IllegalSchema,

    /// The shape of the value the user of this library tried to marshal is
    /// not valid for the given schema.
    SchemaNonConformance,

    /// (Only when unmarshaling) the bytes are in bounds, but are not a valid
    /// message for the given schema, such as non-UTF8 str bytes.
    MalformedData,

    /// Some "other" error type. The codecs will not themselves produce this.
    Other,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error {
            kind,
            error: error.into(),
            field: None,
        }
    }

    pub fn other<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(ErrorKind::Other, error)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Dotted path of the field being coded when the error occurred, if
    /// known. List elements and map entries appear as `[i]`.
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Prepend a path segment to the field path. Codecs call this on the way
    /// back up, so the outermost field ends up first.
    pub fn in_field(mut self, name: &str) -> Self {
        self.field = Some(match self.field.take() {
            None => name.to_owned(),
            Some(inner) if inner.starts_with('[') => format!("{}{}", name, inner),
            Some(inner) => format!("{}.{}", name, inner),
        });
        self
    }

    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.error
    }

    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync + 'static> {
        self.error
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match *self {
            ErrorKind::BufferOverflow => "buffer overflow",
            ErrorKind::BufferUnderflow => "buffer underflow",
            ErrorKind::SchemaCycle => "schema cycle",
            ErrorKind::IllegalSchema => "illegal schema",
            ErrorKind::SchemaNonConformance => "schema non-conformance error",
            ErrorKind::MalformedData => "malformed data",
            ErrorKind::Other => "unknown error",
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(&self.kind, f)?;
        f.write_str(", ")?;
        Display::fmt(&self.error, f)?;
        if let Some(ref field) = self.field {
            f.write_str(" (at field ")?;
            f.write_str(field)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}


macro_rules! error {
    ($k:ident, $($e:tt)*)=>{
        $crate::error::Error::new(
            $crate::error::ErrorKind::$k,
            format!($($e)*),
        )
    };
}

macro_rules! bail {
    ($($e:tt)*)=>{ return Err($crate::error::error!($($e)*)) };
}

macro_rules! ensure {
    ($c:expr, $($e:tt)*)=>{
        if !$c {
            $crate::error::bail!($($e)*);
        }
    };
}

pub(crate) use error;
pub(crate) use bail;
pub(crate) use ensure;


#[test]
fn test_field_path() {
    let e = error!(BufferUnderflow, "oops")
        .in_field("x")
        .in_field("[3]")
        .in_field("items")
        .in_field("root");
    assert_eq!(e.field(), Some("root.items[3].x"));
    assert_eq!(e.kind(), ErrorKind::BufferUnderflow);
    assert_eq!(
        e.to_string(),
        "buffer underflow, oops (at field root.items[3].x)",
    );
}
