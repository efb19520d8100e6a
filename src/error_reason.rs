use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorReason {
    None = 0,
    RpcError = 1,
    BadJson = 2,
    HttpError = 3,
    Timeout = 4,
    BadStatus = 5,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::None => "-",
            ErrorReason::RpcError => "rpc_error",
            ErrorReason::BadJson => "bad_json",
            ErrorReason::HttpError => "http_error",
            ErrorReason::Timeout => "timeout",
            ErrorReason::BadStatus => "bad_status",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => ErrorReason::RpcError,
            2 => ErrorReason::BadJson,
            3 => ErrorReason::HttpError,
            4 => ErrorReason::Timeout,
            5 => ErrorReason::BadStatus,
            _ => ErrorReason::None,
        }
    }
}

/// Last upstream failure reason. Sticky: successes do not clear it.
#[derive(Debug, Default)]
pub struct LastError(AtomicU8);

impl LastError {
    pub fn set(&self, reason: ErrorReason) {
        self.0.store(reason as u8, Ordering::Relaxed);
    }

    pub fn get(&self) -> ErrorReason {
        ErrorReason::from_u8(self.0.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_error_starts_empty_and_sticks() {
        let last = LastError::default();
        assert_eq!(last.get(), ErrorReason::None);
        assert_eq!(last.get().as_str(), "-");

        last.set(ErrorReason::Timeout);
        assert_eq!(last.get(), ErrorReason::Timeout);
        last.set(ErrorReason::BadStatus);
        assert_eq!(last.get().as_str(), "bad_status");
    }
}
