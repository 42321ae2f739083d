use serde::{Deserialize, Serialize};

/// Distinguishes "field not set" from "field set", without relying on a
/// sentinel value inside `T` itself.
///
/// Wire adapters need to tell "the caller didn't pass `Subject`" apart from
/// "the caller passed an empty `Subject`", and "there is a next page" apart
/// from "there is no `NextToken` at all". `Option<T>` alone can't always
/// carry that distinction once `T` itself is optional-shaped, so response
/// fields that need it use this instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Presence<T> {
    /// The field was supplied.
    Present(T),
    /// The field was not supplied.
    Absent,
}

impl<T> Presence<T> {
    /// True if this carries a value.
    pub fn is_present(&self) -> bool {
        matches!(self, Presence::Present(_))
    }

    /// Convert to a plain `Option`, discarding the distinction this type
    /// exists to preserve. Useful at the boundary with code that only cares
    /// about "is there a value".
    pub fn into_option(self) -> Option<T> {
        match self {
            Presence::Present(v) => Some(v),
            Presence::Absent => None,
        }
    }

    pub fn as_ref(&self) -> Presence<&T> {
        match self {
            Presence::Present(v) => Presence::Present(v),
            Presence::Absent => Presence::Absent,
        }
    }
}

impl<T> From<Option<T>> for Presence<T> {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Presence::Present(v),
            None => Presence::Absent,
        }
    }
}

impl<T> Default for Presence<T> {
    fn default() -> Self {
        Presence::Absent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_option() {
        let present: Presence<u32> = Some(5).into();
        assert!(present.is_present());
        assert_eq!(present.into_option(), Some(5));

        let absent: Presence<u32> = None.into();
        assert!(!absent.is_present());
        assert_eq!(absent.into_option(), None);
    }
}
