use sha2::{Digest, Sha512};

use crate::X25519PublicKey;

const GROUPS: usize = 12;
const GROUP_BYTES: usize = 5;

/// Derives the human-comparable safety number for a pair of identities.
///
/// Both parties compute the same value regardless of argument order: the
/// two (key, id) pairs are sorted by id (key bytes as tiebreak) before
/// hashing. Rendered as twelve space-separated groups of five decimal
/// digits for out-of-band comparison; a mismatch indicates identity-key
/// substitution between the two devices.
pub fn safety_number(
    own_identity_public: &X25519PublicKey,
    own_id: &str,
    their_identity_public: &X25519PublicKey,
    their_id: &str,
) -> String {
    let mut pairs = [
        (own_id, own_identity_public.as_bytes()),
        (their_id, their_identity_public.as_bytes()),
    ];
    pairs.sort();

    let mut hasher = Sha512::new();
    for (id, key) in pairs {
        hasher.update(id.as_bytes());
        hasher.update(key);
    }
    let digest = hasher.finalize();

    let mut groups = Vec::with_capacity(GROUPS);
    for chunk in digest.chunks(GROUP_BYTES).take(GROUPS) {
        let mut value: u64 = 0;
        for byte in chunk {
            value = (value << 8) | u64::from(*byte);
        }
        groups.push(format!("{:05}", value % 100_000));
    }

    groups.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::IdentityKeyPair;

    #[test]
    fn test_symmetric_in_argument_order() {
        let a = IdentityKeyPair::generate().unwrap();
        let b = IdentityKeyPair::generate().unwrap();

        let from_a = safety_number(
            &a.dh_key_public(),
            &a.key_id(),
            &b.dh_key_public(),
            &b.key_id(),
        );
        let from_b = safety_number(
            &b.dh_key_public(),
            &b.key_id(),
            &a.dh_key_public(),
            &a.key_id(),
        );

        assert_eq!(from_a, from_b);
    }

    #[test]
    fn test_format_is_twelve_groups_of_five_digits() {
        let a = IdentityKeyPair::generate().unwrap();
        let b = IdentityKeyPair::generate().unwrap();

        let number = safety_number(
            &a.dh_key_public(),
            &a.key_id(),
            &b.dh_key_public(),
            &b.key_id(),
        );

        let groups: Vec<&str> = number.split(' ').collect();
        assert_eq!(groups.len(), 12);
        assert!(
            groups
                .iter()
                .all(|group| group.len() == 5 && group.chars().all(|c| c.is_ascii_digit()))
        );
    }

    #[test]
    fn test_changes_when_a_key_is_substituted() {
        let a = IdentityKeyPair::generate().unwrap();
        let b = IdentityKeyPair::generate().unwrap();
        let mallory = IdentityKeyPair::generate().unwrap();

        let genuine = safety_number(
            &a.dh_key_public(),
            &a.key_id(),
            &b.dh_key_public(),
            &b.key_id(),
        );
        // Mallory substitutes their key but keeps B's claimed id.
        let substituted = safety_number(
            &a.dh_key_public(),
            &a.key_id(),
            &mallory.dh_key_public(),
            &b.key_id(),
        );

        assert_ne!(genuine, substituted);
    }
}
