//! Sensitivity tracking for configuration values.
//!
//! A [`Sensitive`] pairs a value with a secret flag. Every combinator that
//! derives a new value (mapping, combining, collecting) carries the flag
//! forward, so anything computed from a secret stays secret. Formatting a
//! secret through `Display` or `Debug` prints [`REDACTED`]; the plaintext is
//! only reachable through [`Sensitive::expose`].

use std::fmt;

/// Marker printed in place of secret values.
pub const REDACTED: &str = "[secret]";

/// A value that may be marked secret.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Sensitive<T> {
    value: T,
    secret: bool,
}

impl<T> Sensitive<T> {
    /// Wraps a value with an explicit sensitivity flag.
    pub const fn new(value: T, secret: bool) -> Self {
        Self { value, secret }
    }

    /// Wraps a value that may be displayed.
    pub const fn plain(value: T) -> Self {
        Self::new(value, false)
    }

    /// Wraps a value that must never be displayed.
    pub const fn secret(value: T) -> Self {
        Self::new(value, true)
    }

    /// Returns whether the value is secret.
    pub const fn is_secret(&self) -> bool {
        self.secret
    }

    /// Returns the plaintext value.
    ///
    /// Callers must not log or print the result.
    pub const fn expose(&self) -> &T {
        &self.value
    }

    /// Consumes the wrapper and returns the plaintext value.
    pub fn into_exposed(self) -> T {
        self.value
    }

    /// Returns a copy of this wrapper that is marked secret.
    #[must_use]
    pub fn into_secret(self) -> Self {
        Self::secret(self.value)
    }

    /// Borrows the inner value, keeping the flag.
    pub const fn as_ref(&self) -> Sensitive<&T> {
        Sensitive::new(&self.value, self.secret)
    }

    /// Derives a new value; the result is secret if `self` was.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sensitive<U> {
        Sensitive::new(f(self.value), self.secret)
    }

    /// Fallible [`map`](Self::map).
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Sensitive<U>, E> {
        Ok(Sensitive::new(f(self.value)?, self.secret))
    }

    /// Derives a sensitive value; the result is secret if either side was.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Sensitive<U>) -> Sensitive<U> {
        let derived = f(self.value);
        Sensitive::new(derived.value, derived.secret || self.secret)
    }

    /// Combines two values; the result is secret if either input was.
    pub fn combine<U, R>(self, other: Sensitive<U>, f: impl FnOnce(T, U) -> R) -> Sensitive<R> {
        Sensitive::new(f(self.value, other.value), self.secret || other.secret)
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self::plain(value)
    }
}

impl<T> FromIterator<Sensitive<T>> for Sensitive<Vec<T>> {
    fn from_iter<I: IntoIterator<Item = Sensitive<T>>>(iter: I) -> Self {
        let mut secret = false;
        let values = iter
            .into_iter()
            .map(|item| {
                secret |= item.secret;
                item.value
            })
            .collect();
        Self::new(values, secret)
    }
}

impl<T: fmt::Display> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            f.write_str(REDACTED)
        } else {
            self.value.fmt(f)
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.secret {
            write!(f, "Sensitive({REDACTED})")
        } else {
            f.debug_tuple("Sensitive").field(&self.value).finish()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_redacted_in_display_and_debug() {
        let token = Sensitive::secret("dop_v1_abc".to_string());
        assert_eq!(token.to_string(), REDACTED);
        let debug = format!("{token:?}");
        assert!(!debug.contains("dop_v1_abc"), "got: {debug}");
        assert_eq!(token.expose(), "dop_v1_abc");
    }

    #[test]
    fn plain_values_display_normally() {
        let region = Sensitive::plain("fra1");
        assert_eq!(region.to_string(), "fra1");
        assert_eq!(format!("{region:?}"), "Sensitive(\"fra1\")");
    }

    #[test]
    fn interpolation_into_string_stays_secret() {
        let token = Sensitive::secret("abc".to_string());
        let header = token.map(|t| format!("Bearer {t}"));
        assert!(header.is_secret());
        assert_eq!(header.expose(), "Bearer abc");
        assert_eq!(header.to_string(), REDACTED);
    }

    #[test]
    fn combining_with_plain_yields_secret() {
        let host = Sensitive::plain("inference.do-ai.run".to_string());
        let key = Sensitive::secret("k".to_string());
        let joined = host.combine(key, |h, k| format!("{h}?key={k}"));
        assert!(joined.is_secret());

        let a = Sensitive::plain(1);
        let b = Sensitive::plain(2);
        assert!(!a.combine(b, |x, y| x + y).is_secret());
    }

    #[test]
    fn and_then_keeps_either_flag() {
        let plain = Sensitive::plain(3);
        assert!(plain.clone().and_then(Sensitive::secret).is_secret());
        let secret = Sensitive::secret(3);
        assert!(secret.and_then(Sensitive::plain).is_secret());
        assert!(!plain.and_then(Sensitive::plain).is_secret());
    }

    #[test]
    fn field_extraction_stays_secret() {
        let response = Sensitive::secret(vec![("uuid", "u-1"), ("secret_key", "sk")]);
        let uuid = response.map(|fields| fields[0].1);
        assert!(uuid.is_secret());
    }

    #[test]
    fn collecting_any_secret_marks_the_whole() {
        let items = vec![Sensitive::plain("a"), Sensitive::secret("b")];
        let all: Sensitive<Vec<&str>> = items.into_iter().collect();
        assert!(all.is_secret());
        assert_eq!(all.expose(), &vec!["a", "b"]);
    }
}
