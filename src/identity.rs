//! Session id generation
//!
//! Ids are the alphanumeric characters of the display name in shuffled
//! order, followed by `-` and a 4-character random suffix. They only need to
//! be unique within one running relay; the registry retries on collision.

use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::types::SessionId;

/// Base used when a display name has no alphanumeric characters
const FALLBACK_BASE: &str = "User";

/// Length of the random suffix
const SUFFIX_LEN: usize = 4;

/// Generates session ids from display names
///
/// Owns its random source. The lock only covers drawing one id, so
/// concurrent handlers contend for a few microseconds at most.
#[derive(Debug)]
pub struct IdentityGenerator {
    rng: Mutex<StdRng>,
}

impl IdentityGenerator {
    /// Create a generator seeded from OS entropy
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a deterministic generator (tests, reproducible runs)
    pub fn from_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Create a generator around an injected random source
    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
        }
    }

    /// Generate an id for the given display name
    pub fn generate(&self, display_name: &str) -> SessionId {
        let mut chars: Vec<char> = sanitize(display_name).chars().collect();

        let suffix: String = {
            let mut rng = self.rng.lock();
            chars.shuffle(&mut *rng);
            (&mut *rng)
                .sample_iter(&Alphanumeric)
                .take(SUFFIX_LEN)
                .map(char::from)
                .collect()
        };

        let base: String = chars.into_iter().collect();
        SessionId(format!("{}-{}", base, suffix))
    }
}

impl Default for IdentityGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep only alphanumeric characters, falling back to "User"
pub fn sanitize(display_name: &str) -> String {
    let cleaned: String = display_name
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if cleaned.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(id: &SessionId) -> (&str, &str) {
        id.as_str().rsplit_once('-').unwrap()
    }

    #[test]
    fn test_sanitize_strips_symbols() {
        assert_eq!(sanitize("Al ice!_"), "Alice");
        assert_eq!(sanitize("  "), "User");
        assert_eq!(sanitize("--__"), "User");
    }

    #[test]
    fn test_id_is_permutation_plus_suffix() {
        let ids = IdentityGenerator::from_seed(7);
        let id = ids.generate("Bob Smith");
        let (base, suffix) = split(&id);

        let mut got: Vec<char> = base.chars().collect();
        let mut want: Vec<char> = "BobSmith".chars().collect();
        got.sort_unstable();
        want.sort_unstable();
        assert_eq!(got, want);

        assert_eq!(suffix.len(), 4);
        assert!(suffix.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_empty_name_uses_fallback_base() {
        let ids = IdentityGenerator::from_seed(1);
        let id = ids.generate("!!!");
        let (base, _) = split(&id);
        let mut chars: Vec<char> = base.chars().collect();
        chars.sort_unstable();
        assert_eq!(chars, vec!['U', 'e', 'r', 's']);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let a = IdentityGenerator::from_seed(42);
        let b = IdentityGenerator::from_seed(42);
        assert_eq!(a.generate("Alice"), b.generate("Alice"));
    }

    #[test]
    fn test_repeated_names_mostly_differ() {
        let ids = IdentityGenerator::from_seed(3);
        let generated: std::collections::HashSet<_> =
            (0..50).map(|_| ids.generate("Alice")).collect();
        assert!(generated.len() > 40);
    }
}
