//! Stable client identities.
//!
//! A client keeps its identity across reconnects by presenting the token it
//! was given on its first handshake. Resolution never fails: a missing or
//! malformed token simply gets a freshly minted identity.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Length of the canonical hyphenated form (`8-4-4-4-12`).
const TOKEN_LEN: usize = 36;

/// Byte offsets of the hyphens in the canonical form.
const HYPHENS: [usize; 4] = [8, 13, 18, 23];

/// Opaque identity of a client, in hyphenated UUID form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Accept a presented token if it has the canonical hyphenated shape.
    ///
    /// Any hex case is accepted and the token is kept exactly as presented.
    pub fn parse(token: &str) -> Option<Self> {
        is_well_formed(token).then(|| Self(token.to_owned()))
    }

    /// Mint a random (version 4) identity.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Return the inner string as a slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume self and return the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token.bytes().enumerate().all(|(i, b)| {
            if HYPHENS.contains(&i) {
                b == b'-'
            } else {
                b.is_ascii_hexdigit()
            }
        })
}

/// Outcome of resolving a handshake's presented token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolved {
    /// The identity the connection will carry.
    pub identity: Identity,
    /// `true` when the identity was generated for this handshake and must be
    /// handed back to the client.
    pub minted: bool,
}

/// Source of connection identities.
pub trait IdentityProvider: Send + Sync {
    /// Generate a brand new identity.
    fn mint(&self) -> Identity;

    /// Resolve a presented token, minting when it is absent or malformed.
    fn resolve_token(&self, presented: Option<&str>) -> Resolved {
        match presented.and_then(Identity::parse) {
            Some(identity) => Resolved {
                identity,
                minted: false,
            },
            None => Resolved {
                identity: self.mint(),
                minted: true,
            },
        }
    }

    /// Resolve a presented token to the identity the connection will use.
    fn resolve(&self, presented: Option<&str>) -> Identity {
        self.resolve_token(presented).identity
    }
}

/// Production provider: random version 4 identities.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomIdentityProvider;

impl IdentityProvider for RandomIdentityProvider {
    fn mint(&self) -> Identity {
        Identity::random()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_minted_shape(id: &Identity) {
        let s = id.as_str();
        assert_eq!(s.len(), 36, "got: {s}");
        for (i, c) in s.chars().enumerate() {
            if HYPHENS.contains(&i) {
                assert_eq!(c, '-', "expected hyphen at {i} in {s}");
            } else {
                assert!(c.is_ascii_hexdigit() && !c.is_ascii_uppercase(), "bad char {c} in {s}");
            }
        }
        assert_eq!(&s[14..15], "4", "version nibble in {s}");
        assert!(matches!(&s[19..20], "8" | "9" | "a" | "b"), "variant nibble in {s}");
    }

    #[test]
    fn random_identity_has_v4_shape() {
        for _ in 0..200 {
            assert_minted_shape(&Identity::random());
        }
    }

    #[test]
    fn random_identities_are_unique() {
        assert_ne!(Identity::random(), Identity::random());
    }

    #[test]
    fn valid_token_returned_unchanged() {
        let provider = RandomIdentityProvider;
        let token = "3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f";
        let resolved = provider.resolve_token(Some(token));
        assert_eq!(resolved.identity.as_str(), token);
        assert!(!resolved.minted);
    }

    #[test]
    fn uppercase_token_accepted_verbatim() {
        let token = "3F2C1A9E-0B7D-4C21-9E55-6A1B2C3D4E5F";
        let id = RandomIdentityProvider.resolve(Some(token));
        assert_eq!(id.as_str(), token);
    }

    #[test]
    fn minted_identity_is_stable_on_reconnect() {
        let provider = RandomIdentityProvider;
        let first = provider.resolve_token(None);
        assert!(first.minted);
        let again = provider.resolve_token(Some(first.identity.as_str()));
        assert!(!again.minted);
        assert_eq!(again.identity, first.identity);
    }

    #[test]
    fn absent_token_mints() {
        let resolved = RandomIdentityProvider.resolve_token(None);
        assert!(resolved.minted);
        assert_minted_shape(&resolved.identity);
    }

    #[test]
    fn malformed_tokens_mint() {
        let bad = [
            "",
            "not-a-uuid",
            "3f2c1a9e0b7d4c219e556a1b2c3d4e5f",
            "{3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f}",
            "3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5",
            "3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5fa",
            "3f2c1a9e-0b7d-4c21-9e55_6a1b2c3d4e5f",
            "zf2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f",
            "connectionid=3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f",
        ];
        for token in bad {
            let resolved = RandomIdentityProvider.resolve_token(Some(token));
            assert!(resolved.minted, "token {token:?} should not be accepted");
            assert_minted_shape(&resolved.identity);
        }
    }

    #[test]
    fn multibyte_token_rejected() {
        // 36 bytes but not 36 ascii characters
        let token = "3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4eé";
        assert_eq!(token.len(), 36);
        assert!(Identity::parse(token).is_none());
    }

    #[test]
    fn custom_provider_is_used_for_minting() {
        struct Fixed;
        impl IdentityProvider for Fixed {
            fn mint(&self) -> Identity {
                Identity::parse("00000000-0000-4000-8000-000000000000").unwrap()
            }
        }
        assert_eq!(
            Fixed.resolve(Some("garbage")).as_str(),
            "00000000-0000-4000-8000-000000000000"
        );
    }

    #[test]
    fn serde_is_transparent() {
        let id = Identity::parse("3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""3f2c1a9e-0b7d-4c21-9e55-6a1b2c3d4e5f""#);
    }
}
