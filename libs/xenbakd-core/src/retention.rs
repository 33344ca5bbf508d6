/// returns the prefix of `sorted` (ascending by timestamp) that is obsolete once
/// one more entry is written, given `retention`. The `-1` accounts for the entry
/// about to be written (§4.4). Ordering is the caller's responsibility.
pub fn old_entries<T: Clone>(retention: u32, sorted: &[T]) -> Vec<T> {
    if retention == 0 {
        return vec![];
    }
    let keep = (retention - 1) as usize;
    if sorted.len() <= keep {
        return vec![];
    }
    sorted[..sorted.len() - keep].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_zero_keeps_nothing_marked_old() {
        // retention == 0 means "keep unbounded" is not a thing here — callers
        // gate on retention == 0 meaning "don't write/keep at all"
        assert_eq!(old_entries(0, &[1, 2, 3]), Vec::<i32>::new());
    }

    #[test]
    fn retention_one_marks_all_existing_as_old() {
        assert_eq!(old_entries(1, &[1, 2, 3]), vec![1, 2, 3]);
    }

    #[test]
    fn retention_three_with_two_existing_keeps_both() {
        assert_eq!(old_entries(3, &[1, 2]), Vec::<i32>::new());
    }

    #[test]
    fn retention_three_with_four_existing_drops_the_oldest_two() {
        assert_eq!(old_entries(3, &[1, 2, 3, 4]), vec![1, 2]);
    }

    #[test]
    fn idempotent_on_the_post_deletion_state() {
        let sorted = vec![1, 2, 3, 4];
        let old = old_entries(3, &sorted);
        let remaining: Vec<i32> = sorted
            .into_iter()
            .filter(|e| !old.contains(e))
            .collect();
        assert_eq!(old_entries(3, &remaining), Vec::<i32>::new());
    }
}
