use std::sync::{LazyLock, Mutex};

use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generates chronologically sortable 20 character keys: 8 characters of
/// timestamp followed by 12 random characters. Keys generated within the same
/// millisecond increment the random part so they still sort in creation order.
#[derive(Debug, Default)]
pub(crate) struct PushIdGenerator {
    state: Mutex<PushState>,
}

#[derive(Debug, Default)]
struct PushState {
    last_push_time: u64,
    last_rand_chars: [u8; 12],
}

static GENERATOR: LazyLock<PushIdGenerator> = LazyLock::new(PushIdGenerator::default);

pub(crate) fn next_push_id(now: u64) -> String {
    GENERATOR.next(now)
}

impl PushIdGenerator {
    pub(crate) fn next(&self, mut now: u64) -> String {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        // A clock that steps backwards keeps the last timestamp so ordering holds.
        now = now.max(state.last_push_time);
        let duplicate_time = now == state.last_push_time;
        state.last_push_time = now;

        let mut timestamp_chars = [0u8; 8];
        for slot in timestamp_chars.iter_mut().rev() {
            *slot = PUSH_CHARS[(now % 64) as usize];
            now /= 64;
        }

        if duplicate_time {
            let mut index = state.last_rand_chars.len();
            while index > 0 && state.last_rand_chars[index - 1] == 63 {
                state.last_rand_chars[index - 1] = 0;
                index -= 1;
            }
            if index > 0 {
                state.last_rand_chars[index - 1] += 1;
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in state.last_rand_chars.iter_mut() {
                *slot = rng.gen_range(0..64);
            }
        }

        timestamp_chars
            .iter()
            .copied()
            .chain(
                state
                    .last_rand_chars
                    .iter()
                    .map(|&index| PUSH_CHARS[index as usize]),
            )
            .map(char::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_twenty_url_safe_characters() {
        let id = PushIdGenerator::default().next(1_700_000_000_000);
        assert_eq!(id.len(), 20);
        assert!(id.bytes().all(|byte| PUSH_CHARS.contains(&byte)));
    }

    #[test]
    fn same_millisecond_ids_sort_in_creation_order() {
        let generator = PushIdGenerator::default();
        let ids: Vec<String> = (0..50).map(|_| generator.next(42)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
    }

    #[test]
    fn later_timestamps_sort_after_earlier_ones() {
        let generator = PushIdGenerator::default();
        let first = generator.next(1_000);
        let second = generator.next(2_000);
        let regressed = generator.next(1_500);
        assert!(first < second);
        assert!(second < regressed);
    }
}
