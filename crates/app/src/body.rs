use bytes::Bytes;

/// A fully buffered response body.
///
/// Handlers run to completion before the response leaves the application, so the body is
/// always a single chunk of bytes (possibly empty).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseBody {
    inner: Option<Bytes>,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: None }
    }

    pub fn once(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::empty() } else { Self { inner: Some(bytes) } }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, Bytes::len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.inner.as_deref().unwrap_or_default()
    }

    pub fn into_bytes(self) -> Bytes {
        self.inner.unwrap_or_default()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::once(bytes)
    }
}

impl From<Vec<u8>> for ResponseBody {
    fn from(value: Vec<u8>) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        Self::once(Bytes::from(value))
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        Self::once(Bytes::from_static(value.as_bytes()))
    }
}

impl From<()> for ResponseBody {
    fn from((): ()) -> Self {
        Self::empty()
    }
}

impl From<Option<Bytes>> for ResponseBody {
    fn from(option: Option<Bytes>) -> Self {
        match option {
            Some(bytes) => Self::once(bytes),
            None => Self::empty(),
        }
    }
}
