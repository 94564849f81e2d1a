//! Direct-user channel addressing.
//!
//! An addressed delivery names its destination through a channel of the
//! form `<namespace>.<kind>.<identity>`, e.g. `chat.user.bob`. Segments past
//! the third are ignored.

use crate::error::RelayError;

/// The fixed leading tags of a direct-user channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelScheme {
    namespace: String,
    kind: String,
}

impl Default for ChannelScheme {
    fn default() -> Self {
        Self::new("chat", "user")
    }
}

impl ChannelScheme {
    /// Create a scheme with the given namespace and kind tags.
    #[must_use]
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    /// Resolve the destination identity of a channel.
    ///
    /// The identity segment is returned verbatim, whatever its length, so
    /// every identity that can register can also be addressed.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::InvalidChannel`] for any other shape, including
    /// an empty identity segment.
    pub fn destination<'a>(&self, channel: &'a str) -> Result<&'a str, RelayError> {
        let mut parts = channel.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(kind), Some(identity))
                if namespace == self.namespace && kind == self.kind && !identity.is_empty() =>
            {
                Ok(identity)
            }
            _ => Err(RelayError::InvalidChannel(channel.to_string())),
        }
    }

    /// The channel addressing an identity.
    #[must_use]
    pub fn channel_for(&self, identity: &str) -> String {
        format!("{}.{}.{}", self.namespace, self.kind, identity)
    }
}
