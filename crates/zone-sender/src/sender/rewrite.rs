//! Return-path rewriting handed to every delivery worker.
//!
//! Workers treat the rewriter as an opaque capability behind
//! [`AddressRewriter`]. The process ships [`SrsRewriter`], a Sender Rewriting
//! Scheme (SRS0) forward rewriter keyed by a shared secret.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::SystemTime;
use zone_sender_core::Error;

type HmacSha256 = Hmac<Sha256>;

const BASE32: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const HASH_LENGTH: usize = 4;
const SECS_PER_DAY: u64 = 86_400;

/// Rewrites envelope senders before a message leaves through this zone.
pub trait AddressRewriter: Send + Sync {
    fn forward(&self, address: &str) -> Result<String, Error>;
}

/// SRS0 forward rewriter.
///
/// `user@origin.example` becomes
/// `SRS0=HHHH=TT=origin.example=user@<rewrite domain>`, where `TT` is the day
/// stamp and `HHHH` authenticates stamp, domain and local part. Addresses that
/// already belong to the rewrite domain, and addresses that are already SRS
/// encoded, are returned unchanged.
#[derive(Clone)]
pub struct SrsRewriter {
    secret: Vec<u8>,
    domain: String,
}

impl SrsRewriter {
    pub fn new(secret: impl Into<Vec<u8>>, domain: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            domain: domain.into(),
        }
    }

    /// Rewrites `address` as of `day` (days since the Unix epoch).
    pub fn forward_on(&self, address: &str, day: u64) -> Result<String, Error> {
        let Some((local, domain)) = address.rsplit_once('@') else {
            return Err(Error::InvalidAddress {
                address: address.to_owned(),
            });
        };
        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress {
                address: address.to_owned(),
            });
        }

        if domain.eq_ignore_ascii_case(&self.domain) || is_srs(local) {
            return Ok(address.to_owned());
        }

        let stamp = timestamp(day);
        let hash = self.hash(&[&stamp, domain, local])?;
        Ok(format!("SRS0={hash}={stamp}={domain}={local}@{}", self.domain))
    }

    fn hash(&self, parts: &[&str]) -> Result<String, Error> {
        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|e| Error::InvalidConfig {
            reason: format!("unusable SRS secret: {e}"),
        })?;
        for part in parts {
            mac.update(part.to_ascii_lowercase().as_bytes());
        }
        let digest = STANDARD.encode(mac.finalize().into_bytes());
        Ok(digest[..HASH_LENGTH].to_owned())
    }
}

impl AddressRewriter for SrsRewriter {
    fn forward(&self, address: &str) -> Result<String, Error> {
        let day = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs() / SECS_PER_DAY)
            .unwrap_or_default();
        self.forward_on(address, day)
    }
}

impl core::fmt::Debug for SrsRewriter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SrsRewriter")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

/// Two base32 characters encoding the day number modulo 1024.
fn timestamp(day: u64) -> String {
    let day = (day % 1024) as usize;
    [BASE32[day >> 5], BASE32[day & 0x1f]]
        .iter()
        .map(|&b| b as char)
        .collect()
}

fn is_srs(local: &str) -> bool {
    local.get(..5).is_some_and(|prefix| {
        prefix.eq_ignore_ascii_case("SRS0=") || prefix.eq_ignore_ascii_case("SRS1=")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewriter() -> SrsRewriter {
        SrsRewriter::new("top secret", "bounces.example.net")
    }

    #[test]
    fn rewrites_foreign_sender() {
        let out = rewriter().forward_on("alice@origin.example", 20_000).unwrap();
        let (encoded, domain) = out.rsplit_once('@').unwrap();
        assert_eq!(domain, "bounces.example.net");

        let parts: Vec<&str> = encoded.split('=').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], "SRS0");
        assert_eq!(parts[1].len(), HASH_LENGTH);
        assert_eq!(parts[2], timestamp(20_000));
        assert_eq!(parts[3], "origin.example");
        assert_eq!(parts[4], "alice");
    }

    #[test]
    fn hash_depends_on_secret_and_day_but_not_case() {
        let a = rewriter().forward_on("alice@origin.example", 20_000).unwrap();
        let b = rewriter().forward_on("ALICE@Origin.Example", 20_000).unwrap();
        assert_eq!(a[..9], b[..9]);

        let other_secret = SrsRewriter::new("other", "bounces.example.net")
            .forward_on("alice@origin.example", 20_000)
            .unwrap();
        assert_ne!(a, other_secret);

        let next_day = rewriter().forward_on("alice@origin.example", 20_001).unwrap();
        assert_ne!(a, next_day);
    }

    #[test]
    fn timestamp_wraps_every_1024_days() {
        assert_eq!(timestamp(0), "AA");
        assert_eq!(timestamp(31), "A7");
        assert_eq!(timestamp(32), "BA");
        assert_eq!(timestamp(1023), "77");
        assert_eq!(timestamp(1024), timestamp(0));
    }

    #[test]
    fn leaves_local_and_srs_addresses_alone() {
        let rewriter = rewriter();
        assert_eq!(
            rewriter.forward_on("bob@Bounces.Example.Net", 1).unwrap(),
            "bob@Bounces.Example.Net"
        );
        let srs = "SRS0=abcd=AA=origin.example=alice@elsewhere.example";
        assert_eq!(rewriter.forward_on(srs, 1).unwrap(), srs);
    }

    #[test]
    fn rejects_non_addresses() {
        for bad in ["postmaster", "@origin.example", "alice@"] {
            assert!(matches!(
                rewriter().forward_on(bad, 1),
                Err(Error::InvalidAddress { .. })
            ));
        }
    }
}
