use rand::seq::SliceRandom;
use rand::thread_rng;

/// Abstracts over "pick one element of a non-empty slice at random" so tests can inject
/// deterministic choices instead of depending on [`rand::thread_rng`].
///
/// Every random decision the engine makes — root server, glue IP, authority name, CNAME
/// target — goes through this trait (spec §9).
pub trait Selector: std::fmt::Debug + Send + Sync {
    /// Returns the index of the chosen element. `len` is always `> 0`.
    fn pick(&self, len: usize) -> usize;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSelector;

impl Selector for ThreadRngSelector {
    fn pick(&self, len: usize) -> usize {
        (0..len).collect::<Vec<_>>().choose(&mut thread_rng()).copied().unwrap_or(0)
    }
}

/// Picks one element of a slice using the given [`Selector`]. Panics if the slice is empty;
/// callers are expected to check emptiness as part of the classification logic, not here.
pub fn choose<'a, T>(selector: &dyn Selector, items: &'a [T]) -> &'a T {
    &items[selector.pick(items.len())]
}


#[cfg(test)]
mod tests {
    use super::test_support::{FirstSelector, SequenceSelector};
    use super::{choose, Selector};

    #[test]
    fn choose_picks_the_selected_index() {
        let items = vec!["a", "b", "c"];
        assert_eq!(&"a", choose(&FirstSelector, &items));
    }

    #[test]
    fn sequence_selector_advances_each_call() {
        let s = SequenceSelector::new(vec![2, 0, 1]);
        assert_eq!(2, s.pick(3));
        assert_eq!(0, s.pick(3));
        assert_eq!(1, s.pick(3));
        // runs out of scripted picks, falls back to 0
        assert_eq!(0, s.pick(3));
    }
}
