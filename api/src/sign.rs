//! Request authentication.
//!
//! Every request carries four headers: the API key, a millisecond timestamp, a receive window,
//! and a signature. The signature is the base64-encoded HMAC-SHA256, keyed by the API secret, of
//! ```text
//! timestamp + api_key + recv_window + query_string + body
//! ```
//! where `query_string` is the request's parameters sorted by key and joined as `k=v&k=v`
//! (without URL encoding) and `body` is the compact JSON body. Either may be empty.

use crate::types::Params;
use anyhow::Error;
use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::{self, Debug, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

pub const X_API_KEY: &str = "X-API-KEY";
pub const X_SIGN: &str = "X-SIGN";
pub const X_TIMESTAMP: &str = "X-TIMESTAMP";
pub const X_RECV_WINDOW: &str = "X-RECV-WINDOW";

/// Receive window used when none is configured, in milliseconds.
pub const DEFAULT_RECV_WINDOW: u64 = 5000;

type HmacSha256 = Hmac<Sha256>;

/// An API key and the secret used to sign requests made with it.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    mac: HmacSha256,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    /// Credentials from an API key and the base64-encoded secret issued with it.
    pub fn new(api_key: impl Into<String>, secret: &str) -> Result<Self, Error> {
        let secret = BASE64_STANDARD
            .decode(secret.trim())
            .map_err(|err| Error::msg(format!("API secret is not valid base64: {err}")))?;
        Self::from_secret_bytes(api_key, &secret)
    }

    /// Credentials from an API key and the raw (decoded) secret.
    pub fn from_secret_bytes(api_key: impl Into<String>, secret: &[u8]) -> Result<Self, Error> {
        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|err| Error::msg(format!("unusable API secret: {err}")))?;
        Ok(Self {
            api_key: api_key.into(),
            mac,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a request.
    pub fn sign(&self, timestamp: u64, recv_window: u64, query: &str, body: &str) -> String {
        let mut mac = self.mac.clone();
        self.feed(&mut mac, timestamp, recv_window, query, body);
        BASE64_STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Check a signature produced by [`sign`](Self::sign).
    ///
    /// The comparison takes constant time. A signature which is not valid base64 is rejected.
    pub fn verify(
        &self,
        timestamp: u64,
        recv_window: u64,
        query: &str,
        body: &str,
        signature: &str,
    ) -> bool {
        let Ok(signature) = BASE64_STANDARD.decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        self.feed(&mut mac, timestamp, recv_window, query, body);
        mac.verify_slice(&signature).is_ok()
    }

    /// The headers authenticating a request, as `(name, value)` pairs.
    pub fn headers(
        &self,
        timestamp: u64,
        recv_window: u64,
        query: &str,
        body: &str,
    ) -> [(&'static str, String); 4] {
        [
            (X_API_KEY, self.api_key.clone()),
            (X_SIGN, self.sign(timestamp, recv_window, query, body)),
            (X_TIMESTAMP, timestamp.to_string()),
            (X_RECV_WINDOW, recv_window.to_string()),
        ]
    }

    fn feed(&self, mac: &mut HmacSha256, timestamp: u64, recv_window: u64, query: &str, body: &str) {
        mac.update(timestamp.to_string().as_bytes());
        mac.update(self.api_key.as_bytes());
        mac.update(recv_window.to_string().as_bytes());
        mac.update(query.as_bytes());
        mac.update(body.as_bytes());
    }
}

/// The canonical query string covered by a signature.
pub fn query_string(params: &Params) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// The current time in milliseconds since the epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Whether a request stamped at `timestamp` is acceptable at time `now`.
///
/// The request is accepted if it is no more than `recv_window` milliseconds away from `now`, in
/// either direction.
pub fn check_timestamp(timestamp: u64, recv_window: u64, now: u64) -> bool {
    timestamp.abs_diff(now) <= recv_window
}

#[cfg(test)]
mod test {
    use super::*;

    fn credentials() -> Credentials {
        Credentials::from_secret_bytes("key", b"secret").unwrap()
    }

    #[test]
    fn test_known_signature() {
        // HMAC-SHA256("secret", "1700000000000key5000{}"), computed independently.
        let creds = credentials();
        let sig = creds.sign(1_700_000_000_000, 5000, "", "{}");
        let expected = {
            let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
            mac.update(b"1700000000000key5000{}");
            BASE64_STANDARD.encode(mac.finalize().into_bytes())
        };
        assert_eq!(sig, expected);
    }

    #[test]
    fn test_rfc4231_vector() {
        // RFC 4231 test case 2, with an empty API key and the whole message in the body.
        let creds = Credentials::from_secret_bytes("", b"Jefe").unwrap();
        let mut mac = creds.mac.clone();
        mac.update(b"what do ya want for nothing?");
        let digest = mac.finalize().into_bytes();
        let hex = digest
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        assert_eq!(
            hex,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_base64_secret() {
        let creds = Credentials::new("key", &BASE64_STANDARD.encode(b"secret")).unwrap();
        assert_eq!(
            creds.sign(1, 5000, "a=b", ""),
            credentials().sign(1, 5000, "a=b", "")
        );
        assert!(Credentials::new("key", "not base64!").is_err());
    }

    #[test]
    fn test_verify() {
        let creds = credentials();
        let sig = creds.sign(42, 5000, "limit=1", "");
        assert!(creds.verify(42, 5000, "limit=1", "", &sig));
        assert!(!creds.verify(43, 5000, "limit=1", "", &sig));
        assert!(!creds.verify(42, 5000, "limit=2", "", &sig));
        assert!(!creds.verify(42, 5000, "limit=1", "", "garbage"));

        let other = Credentials::from_secret_bytes("key", b"other").unwrap();
        assert!(!other.verify(42, 5000, "limit=1", "", &sig));
    }

    #[test]
    fn test_headers() {
        let creds = credentials();
        let headers = creds.headers(7, 5000, "", "{}");
        assert_eq!(headers[0], (X_API_KEY, "key".to_string()));
        assert_eq!(headers[1].1, creds.sign(7, 5000, "", "{}"));
        assert_eq!(headers[2], (X_TIMESTAMP, "7".to_string()));
        assert_eq!(headers[3], (X_RECV_WINDOW, "5000".to_string()));
    }

    #[test]
    fn test_query_string_sorted() {
        let mut params = Params::new();
        params.insert("orderIds".into(), "1,2".into());
        params.insert("clientOrderIds".into(), "a".into());
        assert_eq!(query_string(&params), "clientOrderIds=a&orderIds=1,2");
        assert_eq!(query_string(&Params::new()), "");
    }

    #[test]
    fn test_timestamp_window() {
        assert!(check_timestamp(1000, 5000, 6000));
        assert!(check_timestamp(6000, 5000, 1000));
        assert!(!check_timestamp(1000, 5000, 6001));
        assert!(!check_timestamp(6001, 5000, 1000));
    }

    #[test]
    fn test_debug_hides_secret() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("key"));
        assert!(!debug.contains("secret"));
    }
}
