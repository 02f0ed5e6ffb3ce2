//! Conversion of business function return values into a [`Reply`].
//!
//! The [`IntoReply`] trait is how a handler's return value enters the response
//! pipeline. Besides [`Reply`] itself it is implemented for the usual shorthands:
//! strings, bytes, json values, `()`, `(StatusCode, T)` and `Result`.

use crate::error::Error;
use crate::reply::{Reply, ReplyBody};
use bytes::Bytes;
use http::StatusCode;
use std::convert::Infallible;

/// A type a handler may return.
pub trait IntoReply {
    fn into_reply(self) -> Result<Reply, Error>;
}

impl IntoReply for Reply {
    #[inline]
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(self)
    }
}

/// `Err` is propagated to the error boundary instead of being answered here.
impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Into<Error>,
{
    fn into_reply(self) -> Result<Reply, Error> {
        self.map_err(Into::into)?.into_reply()
    }
}

/// `None` answers with an empty 200.
impl<T: IntoReply> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Reply, Error> {
        match self {
            Some(t) => t.into_reply(),
            None => Ok(Reply::empty()),
        }
    }
}

impl<T: IntoReply> IntoReply for (StatusCode, T) {
    fn into_reply(self) -> Result<Reply, Error> {
        let (status, inner) = self;
        Ok(inner.into_reply()?.set_status_code(status))
    }
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::empty())
    }
}

impl IntoReply for &'static str {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(self))
    }
}

impl IntoReply for String {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(self))
    }
}

impl IntoReply for Bytes {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(self))
    }
}

impl IntoReply for Vec<u8> {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(Bytes::from(self)))
    }
}

impl IntoReply for serde_json::Value {
    fn into_reply(self) -> Result<Reply, Error> {
        Ok(Reply::new(ReplyBody::Json(self)))
    }
}

impl IntoReply for Infallible {
    fn into_reply(self) -> Result<Reply, Error> {
        match self {}
    }
}

#[cfg(test)]
mod tests {
    use super::IntoReply;
    use crate::error::Error;
    use crate::reply::ReplyBody;
    use http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_text() {
        let reply = "hello".into_reply().unwrap();
        assert_eq!(reply.status(), StatusCode::OK);
        assert!(matches!(reply.body(), ReplyBody::Text(text) if text == "hello"));
    }

    #[test]
    fn test_status_tuple() {
        let reply = (StatusCode::CREATED, "made".to_string()).into_reply().unwrap();
        assert_eq!(reply.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_json_value() {
        let reply = json!({"a": 1}).into_reply().unwrap();
        assert!(matches!(reply.body(), ReplyBody::Json(_)));
    }

    #[test]
    fn test_unit_and_none() {
        assert!(matches!(().into_reply().unwrap().body(), ReplyBody::Empty));
        assert!(matches!(None::<String>.into_reply().unwrap().body(), ReplyBody::Empty));
    }

    #[test]
    fn test_error_propagates() {
        let result: Result<&'static str, Error> = Err(Error::new(StatusCode::FORBIDDEN, "nope"));
        let err = result.into_reply().unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
