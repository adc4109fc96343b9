use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::Mutex;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates 20-character push ids: 8 characters of timestamp followed by 12
/// random characters. Ids sort lexicographically in creation order, also
/// within one millisecond, where the random suffix is incremented instead of
/// redrawn.
#[derive(Default)]
pub struct PushIdGenerator {
    state: Mutex<PushState>,
}

#[derive(Default)]
struct PushState {
    last_ms: u64,
    last_random: [u8; 12],
}

impl PushIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self, now_ms: u64) -> Result<String> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("push id lock poisoned"))?;
        // A clock step backwards is treated like a repeat of the last instant.
        let now_ms = now_ms.max(state.last_ms);
        let duplicate = now_ms == state.last_ms;
        state.last_ms = now_ms;

        let mut id = [0u8; 20];
        let mut t = now_ms;
        for slot in id[..8].iter_mut().rev() {
            *slot = PUSH_CHARS[(t % 64) as usize];
            t /= 64;
        }

        if duplicate {
            for digit in state.last_random.iter_mut().rev() {
                if *digit == 63 {
                    *digit = 0;
                } else {
                    *digit += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for digit in state.last_random.iter_mut() {
                *digit = rng.gen_range(0..64);
            }
        }
        for (slot, digit) in id[8..].iter_mut().zip(state.last_random.iter()) {
            *slot = PUSH_CHARS[*digit as usize];
        }
        Ok(id.iter().map(|b| *b as char).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_ordered_and_unique() -> Result<()> {
        let ids = PushIdGenerator::new();
        let mut out = Vec::new();
        for ms in [1_700_000_000_000u64, 1_700_000_000_000, 1_700_000_000_000, 1_700_000_000_001] {
            out.push(ids.next_id(ms)?);
        }
        for id in &out {
            assert_eq!(id.len(), 20);
            assert!(id.bytes().all(|b| PUSH_CHARS.contains(&b)));
        }
        let mut sorted = out.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, out);
        Ok(())
    }

    #[test]
    fn timestamp_prefix_encodes_time() -> Result<()> {
        let ids = PushIdGenerator::new();
        assert!(ids.next_id(0)?.starts_with("--------"));
        let later = ids.next_id(64)?;
        assert_eq!(&later[..8], "------0-");
        Ok(())
    }
}
