use crate::error::Error;

use std::time;

/// The timebase for expiring and rolling tickets and ticketing keys.
///
/// A `TimeBase` is fixed at creation time, so a value is taken once
/// at each observable event (ticket receipt, resumption offer) and
/// reused within it.
#[derive(Clone, Copy, Debug)]
pub struct TimeBase(time::Duration);

impl TimeBase {
    #[inline]
    pub fn now() -> Result<Self, Error> {
        Ok(Self(
            time::SystemTime::now()
                .duration_since(time::UNIX_EPOCH)
                .map_err(|_| Error::FailedToGetCurrentTime)?,
        ))
    }

    #[inline]
    pub fn as_secs(&self) -> u64 {
        self.0.as_secs()
    }

    #[cfg(test)]
    pub(crate) fn from_secs_for_test(secs: u64) -> Self {
        Self(time::Duration::from_secs(secs))
    }
}
