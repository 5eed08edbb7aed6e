use std::{cmp::Ordering, fmt, sync::Arc};

use ghostdex_common::{Result, error::Error};

type CompareFn<K> = dyn Fn(&K, &K) -> Option<Ordering> + Send + Sync;

/// The total order of tree keys: either the natural `Ord` of the key type or
/// a user comparator.
///
/// A comparator returning `None` signals incomparable keys, which fails the
/// operation that compared them.
pub struct KeyOrder<K> {
    compare: Option<Arc<CompareFn<K>>>,
}

impl<K: Ord> KeyOrder<K> {
    pub fn natural() -> KeyOrder<K> {
        KeyOrder { compare: None }
    }

    pub fn by(compare: impl Fn(&K, &K) -> Option<Ordering> + Send + Sync + 'static) -> KeyOrder<K> {
        KeyOrder {
            compare: Some(Arc::new(compare)),
        }
    }

    pub fn is_natural(&self) -> bool {
        self.compare.is_none()
    }

    #[inline]
    pub fn compare(&self, a: &K, b: &K) -> Result<Ordering> {
        match &self.compare {
            None => Ok(a.cmp(b)),
            Some(f) => f(a, b).ok_or_else(|| Error::incomparable("key comparator")),
        }
    }

    /// Binary search over a sorted run of items.
    ///
    /// `Ok(i)` if `key` equals the key of item `i`, otherwise `Err(i)` with
    /// the insertion point.
    pub fn search<T>(
        &self,
        items: &[T],
        key: &K,
        key_of: impl Fn(&T) -> &K,
    ) -> Result<std::result::Result<usize, usize>> {
        let (mut lo, mut hi) = (0, items.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.compare(key_of(&items[mid]), key)? {
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
                Ordering::Equal => return Ok(Ok(mid)),
            }
        }
        Ok(Err(lo))
    }
}

impl<K> Clone for KeyOrder<K> {
    fn clone(&self) -> Self {
        KeyOrder {
            compare: self.compare.clone(),
        }
    }
}

impl<K: Ord> Default for KeyOrder<K> {
    fn default() -> Self {
        Self::natural()
    }
}

impl<K> fmt::Debug for KeyOrder<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compare {
            None => f.write_str("KeyOrder::Natural"),
            Some(_) => f.write_str("KeyOrder::Custom"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search() {
        let order = KeyOrder::natural();
        let items = [1, 3, 5, 7];
        assert_eq!(order.search(&items[..], &5, |x| x).unwrap(), Ok(2));
        assert_eq!(order.search(&items[..], &0, |x| x).unwrap(), Err(0));
        assert_eq!(order.search(&items[..], &6, |x| x).unwrap(), Err(3));
        assert_eq!(order.search(&items[..], &9, |x| x).unwrap(), Err(4));
        assert_eq!(order.search(&[] as &[i32], &9, |x| x).unwrap(), Err(0));
    }

    #[test]
    fn test_custom_order() {
        let reverse = KeyOrder::by(|a: &i32, b: &i32| Some(b.cmp(a)));
        assert_eq!(reverse.compare(&1, &2).unwrap(), Ordering::Greater);
        assert!(!reverse.is_natural());

        // Negative keys are not comparable under this order.
        let partial = KeyOrder::by(|a: &i32, b: &i32| (*a >= 0 && *b >= 0).then(|| a.cmp(b)));
        assert_eq!(partial.compare(&1, &2).unwrap(), Ordering::Less);
        let err = partial.compare(&-1, &2).unwrap_err();
        assert!(matches!(
            err.kind(),
            ghostdex_common::error::ErrorKind::Incomparable { .. }
        ));
    }
}
